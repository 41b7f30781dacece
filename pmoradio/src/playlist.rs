//! Découverte des stations et de leurs pistes sur le système de fichiers.
//!
//! Une station = un sous-répertoire direct de la racine. Ses pistes sont les
//! fichiers de ce répertoire dont l'extension est acceptée, triés par nom : on ne
//! dépend jamais de l'ordre renvoyé par le système de fichiers.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Extensions acceptées par défaut
pub const DEFAULT_EXTENSIONS: &[&str] = &["mp3"];

/// Liste ordonnée des pistes d'une station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    tracks: Vec<PathBuf>,
}

impl Playlist {
    pub fn new(tracks: Vec<PathBuf>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[PathBuf] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Path> {
        self.tracks.get(index).map(PathBuf::as_path)
    }

    /// Type MIME commun aux pistes.
    ///
    /// Une playlist qui mélange des formats est servie en
    /// `application/octet-stream`.
    pub fn content_type(&self) -> &'static str {
        let mut types = self.tracks.iter().map(|p| content_type_for(p));
        let Some(first) = types.next() else {
            return "audio/mpeg";
        };
        if types.all(|t| t == first) {
            first
        } else {
            warn!(
                "Playlist mixes audio formats ({} track(s)), serving as application/octet-stream",
                self.tracks.len()
            );
            "application/octet-stream"
        }
    }

    /// Index suivant, avec retour à 0 après la dernière piste.
    pub fn next_index(&self, index: usize) -> usize {
        if self.tracks.is_empty() {
            0
        } else {
            (index + 1) % self.tracks.len()
        }
    }
}

pub struct PlaylistStore;

impl PlaylistStore {
    /// Charge les pistes d'un répertoire de station.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] si le répertoire est illisible
    /// * [`Error::EmptyPlaylist`] si aucune piste ne correspond
    pub fn load(station_dir: &Path, extensions: &[String]) -> Result<Playlist> {
        let entries = fs::read_dir(station_dir).map_err(|source| Error::NotFound {
            path: station_dir.to_path_buf(),
            source,
        })?;

        let mut tracks = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", station_dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || !has_accepted_extension(&path, extensions) {
                continue;
            }
            tracks.push(path);
        }

        if tracks.is_empty() {
            return Err(Error::EmptyPlaylist(station_dir.to_path_buf()));
        }

        tracks.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        debug!("Loaded {} track(s) from {}", tracks.len(), station_dir.display());
        Ok(Playlist::new(tracks))
    }
}

fn has_accepted_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|accepted| accepted.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Répertoire de station découvert à la racine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationDir {
    pub name: String,
    pub path: PathBuf,
}

/// Liste les sous-répertoires de `root`, triés par nom.
///
/// Les répertoires cachés (préfixe `.`) sont ignorés.
///
/// # Errors
///
/// [`Error::Configuration`] si la racine est illisible.
pub fn discover_stations(root: &Path) -> Result<Vec<StationDir>> {
    let entries = fs::read_dir(root).map_err(|e| {
        Error::Configuration(format!("cannot read radio directory {}: {}", root.display(), e))
    })?;

    let mut stations = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", root.display(), e);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            warn!("Ignoring station directory with non UTF-8 name: {}", path.display());
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        stations.push(StationDir { name, path });
    }

    stations.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(stations)
}

/// Type MIME déduit de l'extension d'une piste.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "aac" => "audio/aac",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}
