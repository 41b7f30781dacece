//! Extension pour lire les réglages radio depuis pmoconfig
//!
//! ```rust,ignore
//! use pmoconfig::get_config;
//! use pmoradio::RadioConfigExt;
//!
//! let config = get_config();
//! let settings = config.get_radio_settings()?;
//! ```
//!
//! Section YAML correspondante :
//!
//! ```yaml
//! radio:
//!   directory: radio          # relatif au répertoire de configuration
//!   extensions: [mp3]
//!   chunk_size: 4096
//!   cadence_ms: 170
//!   replay_capacity: 28
//!   queue_capacity: 2
//! ```

use std::time::Duration;

use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::{Number, Value};
use tracing::warn;

use crate::{
    engine::{
        EngineSettings, DEFAULT_CADENCE, DEFAULT_QUEUE_CAPACITY, DEFAULT_REPLAY_CAPACITY,
    },
    playlist::DEFAULT_EXTENSIONS,
    producer::DEFAULT_CHUNK_SIZE,
};

/// Répertoire des stations par défaut (relatif au config_dir)
const DEFAULT_RADIO_DIRECTORY: &str = "radio";

/// Trait d'extension pour la configuration radio dans pmoconfig
pub trait RadioConfigExt {
    /// Répertoire racine des stations, créé s'il n'existe pas.
    fn get_radio_directory(&self) -> Result<String>;

    /// Définit le répertoire racine (absolu ou relatif au config_dir).
    fn set_radio_directory(&self, path: String) -> Result<()>;

    /// Extensions acceptées, sans le point (default: `[mp3]`).
    fn get_radio_extensions(&self) -> Result<Vec<String>>;

    fn set_radio_extensions(&self, extensions: Vec<String>) -> Result<()>;

    fn get_radio_chunk_size(&self) -> Result<usize>;

    fn set_radio_chunk_size(&self, size: usize) -> Result<()>;

    /// Intervalle entre deux chunks, en millisecondes.
    fn get_radio_cadence_ms(&self) -> Result<u64>;

    fn set_radio_cadence_ms(&self, millis: u64) -> Result<()>;

    fn get_radio_replay_capacity(&self) -> Result<usize>;

    fn set_radio_replay_capacity(&self, capacity: usize) -> Result<()>;

    fn get_radio_queue_capacity(&self) -> Result<usize>;

    fn set_radio_queue_capacity(&self, capacity: usize) -> Result<()>;

    /// Assemble tous les réglages du moteur de diffusion.
    fn get_radio_settings(&self) -> Result<EngineSettings>;
}

impl RadioConfigExt for Config {
    fn get_radio_directory(&self) -> Result<String> {
        self.get_managed_dir(&["radio", "directory"], DEFAULT_RADIO_DIRECTORY)
    }

    fn set_radio_directory(&self, path: String) -> Result<()> {
        self.set_managed_dir(&["radio", "directory"], path)
    }

    fn get_radio_extensions(&self) -> Result<Vec<String>> {
        let extensions: Vec<String> = match self.get_value(&["radio", "extensions"]) {
            Ok(Value::Sequence(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim_start_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            Ok(Value::String(s)) => s
                .split(',')
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        if extensions.is_empty() {
            Ok(DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect())
        } else {
            Ok(extensions)
        }
    }

    fn set_radio_extensions(&self, extensions: Vec<String>) -> Result<()> {
        let items = extensions.into_iter().map(Value::String).collect();
        self.set_value(&["radio", "extensions"], Value::Sequence(items))
    }

    fn get_radio_chunk_size(&self) -> Result<usize> {
        Ok(positive_or_default(self, &["radio", "chunk_size"], DEFAULT_CHUNK_SIZE as u64) as usize)
    }

    fn set_radio_chunk_size(&self, size: usize) -> Result<()> {
        self.set_value(&["radio", "chunk_size"], Value::Number(Number::from(size)))
    }

    fn get_radio_cadence_ms(&self) -> Result<u64> {
        Ok(positive_or_default(
            self,
            &["radio", "cadence_ms"],
            DEFAULT_CADENCE.as_millis() as u64,
        ))
    }

    fn set_radio_cadence_ms(&self, millis: u64) -> Result<()> {
        self.set_value(&["radio", "cadence_ms"], Value::Number(Number::from(millis)))
    }

    fn get_radio_replay_capacity(&self) -> Result<usize> {
        Ok(positive_or_default(
            self,
            &["radio", "replay_capacity"],
            DEFAULT_REPLAY_CAPACITY as u64,
        ) as usize)
    }

    fn set_radio_replay_capacity(&self, capacity: usize) -> Result<()> {
        self.set_value(
            &["radio", "replay_capacity"],
            Value::Number(Number::from(capacity)),
        )
    }

    fn get_radio_queue_capacity(&self) -> Result<usize> {
        Ok(positive_or_default(
            self,
            &["radio", "queue_capacity"],
            DEFAULT_QUEUE_CAPACITY as u64,
        ) as usize)
    }

    fn set_radio_queue_capacity(&self, capacity: usize) -> Result<()> {
        self.set_value(
            &["radio", "queue_capacity"],
            Value::Number(Number::from(capacity)),
        )
    }

    fn get_radio_settings(&self) -> Result<EngineSettings> {
        let mut settings = EngineSettings::new(self.get_radio_directory()?);
        settings.extensions = self.get_radio_extensions()?;
        settings.chunk_size = self.get_radio_chunk_size()?;
        settings.cadence = Duration::from_millis(self.get_radio_cadence_ms()?);
        settings.replay_capacity = self.get_radio_replay_capacity()?;
        settings.queue_capacity = self.get_radio_queue_capacity()?;
        Ok(settings)
    }
}

/// Lit un entier strictement positif ; toute autre valeur donne `default`.
fn positive_or_default(config: &Config, path: &[&str], default: u64) -> u64 {
    match config.get_value(path) {
        Ok(Value::Number(n)) => match n.as_u64() {
            Some(v) if v > 0 => v,
            _ => {
                warn!(
                    "Invalid value {} for {}, using default {}",
                    n,
                    path.join("."),
                    default
                );
                default
            }
        },
        Ok(Value::Null) | Err(_) => default,
        Ok(other) => {
            warn!(
                "{} is not a number ({:?}), using default {}",
                path.join("."),
                other,
                default
            );
            default
        }
    }
}
