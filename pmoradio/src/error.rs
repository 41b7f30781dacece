//! Types d'erreurs pour pmoradio

use std::path::PathBuf;

/// Erreurs du moteur de diffusion
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Racine des stations illisible ou réglage invalide : fatal au démarrage.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Station directory not found: {}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No audio track found in {}", .0.display())]
    EmptyPlaylist(PathBuf),

    #[error("Station not found: {0}")]
    StationNotFound(String),

    #[error("Station unavailable: {0}")]
    StationUnavailable(String),

    /// Erreur d'entrée/sortie en cours de diffusion : le producteur s'arrête.
    #[error("Producer failed on {}: {source}", track.display())]
    ProducerFatal {
        track: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Type Result spécialisé pour pmoradio
pub type Result<T> = std::result::Result<T, Error>;
