//! # Configuration de PMORadio
//!
//! La configuration est un arbre YAML construit en trois couches :
//! 1. la configuration par défaut intégrée au binaire (`pmoradio.yaml`) ;
//! 2. le fichier `config.yaml` du répertoire de configuration ;
//! 3. les variables d'environnement `PMORADIO_CONFIG__SECTION__KEY=valeur`.
//!
//! Le résultat fusionné est réécrit dans `config.yaml` au chargement, ce qui
//! donne un fichier complet et commentable à l'utilisateur.
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! config.set_http_port(9000)?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Les crates de l'espace de travail ajoutent leurs propres réglages par des
//! traits d'extension sur [`Config`] (voir `pmoradio::RadioConfigExt`).

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmoradio.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMORadio configuration"));
}

const ENV_CONFIG_DIR: &str = "PMORADIO_CONFIG";
const ENV_PREFIX: &str = "PMORADIO_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmoradio";

const DEFAULT_BASE_URL: &str = "localhost";
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_LOG_BUFFER_CAPACITY: usize = 1000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_u64().map(|v| v as usize).unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, size: usize) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(size)))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Gestionnaire de configuration
///
/// Les clés sont insensibles à la casse (normalisées en minuscules). Chaque
/// `set_*` sauvegarde immédiatement le fichier.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    fn data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cherche le répertoire de configuration
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Crée le répertoire si besoin et vérifie les droits de lecture/écriture
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;
        fs::read_dir(path)?;

        Ok(())
    }

    /// Détermine et valide le répertoire de configuration
    ///
    /// Ordre de recherche :
    /// 1. `directory` s'il n'est pas vide
    /// 2. la variable d'environnement `PMORADIO_CONFIG`
    /// 3. `.pmoradio` dans le répertoire courant
    /// 4. `.pmoradio` dans le répertoire de l'utilisateur
    ///
    /// À défaut, `.pmoradio` est créé dans le répertoire courant.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))
            .map_err(|e| anyhow!("Invalid configuration directory {}: {}", dir_path, e))?;
        Ok(dir_path)
    }

    /// Charge la configuration depuis `directory` (vide = recherche automatique)
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut config_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path, "Loaded config file");
                let external: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut config_value, &lower_keys_value(external));
            }
            Err(_) => {
                info!(config_file = %path, "Config file not found, using default embedded config");
            }
        }
        let mut config_value = lower_keys_value(config_value);

        apply_env_overrides(&mut config_value, env::vars());

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Répertoire de configuration effectivement utilisé
    pub fn get_config_dir(&self) -> &str {
        &self.config_dir
    }

    /// Sauvegarde la configuration courante dans `config.yaml`
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.data())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Définit la valeur au chemin `path` (ex: `&["host", "http_port"]`) puis sauvegarde
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        set_value_internal(&mut self.data(), path, value)?;
        self.save()
    }

    /// Lit la valeur au chemin `path`
    ///
    /// # Errors
    ///
    /// Erreur si le chemin n'existe pas.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        get_value_internal(&self.data(), path)
    }

    /// Résout un chemin relatif au config_dir et crée le répertoire si nécessaire
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<String> {
        let path = Path::new(dir_path);

        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory = %absolute_path.display(), "Created directory");
        }

        Ok(absolute_path.to_string_lossy().to_string())
    }

    /// Récupère un répertoire géré par la configuration
    ///
    /// Le répertoire peut être absolu ou relatif au répertoire de
    /// configuration. Il est créé s'il n'existe pas ; `default` est enregistré
    /// dans la configuration si la clé est absente.
    ///
    /// ```no_run
    /// use pmoconfig::get_config;
    ///
    /// let config = get_config();
    /// let stations = config.get_managed_dir(&["radio", "directory"], "radio")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => {
                self.set_managed_dir(path, default.to_string())?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    /// Définit un répertoire géré (absolu ou relatif au config_dir)
    pub fn set_managed_dir(&self, path: &[&str], directory: String) -> Result<()> {
        self.set_value(path, Value::String(directory))
    }

    /// Nom d'hôte annoncé par le serveur HTTP (default: `localhost`)
    pub fn get_base_url(&self) -> String {
        match self.get_value(&["host", "base_url"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            Ok(Value::String(_)) | Ok(Value::Null) => DEFAULT_BASE_URL.to_string(),
            Ok(_) => {
                warn!("Base URL is not a string, using default {}", DEFAULT_BASE_URL);
                DEFAULT_BASE_URL.to_string()
            }
            Err(err) => {
                debug!("No base URL configured ({}), using {}", err, DEFAULT_BASE_URL);
                DEFAULT_BASE_URL.to_string()
            }
        }
    }

    pub fn set_base_url(&self, base_url: String) -> Result<()> {
        self.set_value(&["host", "base_url"], Value::String(base_url))
    }

    /// Port HTTP ; toute valeur invalide donne le port par défaut (8080)
    pub fn get_http_port(&self) -> u16 {
        let port = match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Ok(Value::String(s)) => s.trim().parse::<u16>().ok(),
            Ok(_) => None,
            Err(err) => {
                warn!("Failed to get HTTP port: {}, using default {}", err, DEFAULT_HTTP_PORT);
                return DEFAULT_HTTP_PORT;
            }
        };

        match port {
            Some(p) if p > 0 => p,
            _ => {
                warn!("Invalid HTTP port, using default {}", DEFAULT_HTTP_PORT);
                DEFAULT_HTTP_PORT
            }
        }
    }

    pub fn set_http_port(&self, port: u16) -> Result<()> {
        self.set_value(&["host", "http_port"], Value::Number(Number::from(port)))
    }

    impl_usize_config!(
        get_log_cache_size,
        set_log_cache_size,
        &["host", "logger", "buffer_capacity"],
        DEFAULT_LOG_BUFFER_CAPACITY
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Niveau de log minimum (ERROR, WARN, INFO, DEBUG ou TRACE)
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) => Ok(s),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }
}

/// Instance globale, chargée au premier accès
///
/// # Panics
///
/// Panique au premier accès si le répertoire de configuration est inutilisable.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((first, rest)) = path.split_first() else {
        *data = value;
        return Ok(());
    };

    if matches!(data, Value::Null) {
        *data = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(map) = data else {
        return Err(anyhow!("Cannot set {}: parent is not a map", path.join(".")));
    };

    let key = Value::String(first.to_lowercase());
    if rest.is_empty() {
        map.insert(key, value);
        Ok(())
    } else {
        let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
        set_value_internal(entry, rest, value)
    }
}

fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        let Value::Mapping(map) = current else {
            return Err(anyhow!("Path {} is not a map", path[..i].join(".")));
        };
        current = map
            .get(Value::String(key.to_lowercase()))
            .ok_or_else(|| anyhow!("Path {} does not exist", path[..=i].join(".")))?;
    }
    Ok(current.clone())
}

/// Applique les variables `PMORADIO_CONFIG__A__B=valeur` au chemin `a.b`
fn apply_env_overrides(config: &mut Value, vars: impl Iterator<Item = (String, String)>) {
    for (key, value) in vars {
        let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key_path: Vec<&str> = suffix.split("__").collect();
        if let Err(e) = set_value_internal(config, &key_path, convert_env_value(&value)) {
            warn!("Ignoring {}: {}", key, e);
        }
    }
}

/// Interprète la valeur comme du YAML (nombres, booléens, listes), sinon chaîne
fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let k = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (k, lower_keys_value(v))
                })
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Fusionne `external` dans `default`
///
/// Les tables sont fusionnées clé par clé ; scalaires et listes sont remplacés.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(dir: &tempfile::TempDir) -> Config {
        Config::load_config(&dir.path().to_string_lossy()).unwrap()
    }

    #[test]
    fn test_defaults_written_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);

        assert_eq!(config.get_http_port(), 8080);
        assert_eq!(config.get_base_url(), "localhost");
        assert_eq!(config.get_log_cache_size().unwrap(), 1000);
        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
        assert!(dir.path().join("config.yaml").is_file());
    }

    #[test]
    fn test_user_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "Host:\n  HTTP_Port: 9090\nradio:\n  extensions: [ogg]\n",
        )
        .unwrap();

        let config = load(&dir);
        assert_eq!(config.get_http_port(), 9090);
        assert!(config.get_log_enable_console().unwrap());
        let extensions = config.get_value(&["radio", "extensions"]).unwrap();
        assert_eq!(extensions, serde_yaml::from_str::<Value>("[ogg]").unwrap());
    }

    #[test]
    fn test_set_value_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);
        config.set_http_port(7000).unwrap();
        config
            .set_value(&["radio", "new", "key"], Value::Bool(true))
            .unwrap();

        let reloaded = load(&dir);
        assert_eq!(reloaded.get_http_port(), 7000);
        assert_eq!(
            reloaded.get_value(&["RADIO", "new", "key"]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_invalid_port_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);
        config
            .set_value(&["host", "http_port"], Value::Number(Number::from(70000)))
            .unwrap();
        assert_eq!(config.get_http_port(), DEFAULT_HTTP_PORT);
        config
            .set_value(&["host", "http_port"], Value::String("8181".into()))
            .unwrap();
        assert_eq!(config.get_http_port(), 8181);
    }

    #[test]
    fn test_managed_dir_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);
        let stations = config.get_managed_dir(&["radio", "directory"], "radio").unwrap();
        assert_eq!(Path::new(&stations), dir.path().join("radio"));
        assert!(Path::new(&stations).is_dir());
    }

    #[test]
    fn test_env_overrides() {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG).unwrap();
        let vars = vec![
            ("PMORADIO_CONFIG__RADIO__CADENCE_MS".to_string(), "50".to_string()),
            ("PMORADIO_CONFIG__HOST__BASE_URL".to_string(), "radio.local".to_string()),
            ("OTHER__HOST__HTTP_PORT".to_string(), "1".to_string()),
        ];
        apply_env_overrides(&mut value, vars.into_iter());

        assert_eq!(
            get_value_internal(&value, &["radio", "cadence_ms"]).unwrap(),
            Value::Number(Number::from(50))
        );
        assert_eq!(
            get_value_internal(&value, &["host", "base_url"]).unwrap(),
            Value::String("radio.local".into())
        );
        assert_eq!(
            get_value_internal(&value, &["host", "http_port"]).unwrap(),
            Value::Number(Number::from(8080))
        );
    }

    #[test]
    fn test_merge_replaces_sequences() {
        let mut base: Value = serde_yaml::from_str("a: {b: 1, c: [1, 2]}").unwrap();
        let other: Value = serde_yaml::from_str("a: {c: [3], d: x}").unwrap();
        merge_yaml(&mut base, &other);
        let expected: Value = serde_yaml::from_str("a: {b: 1, c: [3], d: x}").unwrap();
        assert_eq!(base, expected);
    }
}
