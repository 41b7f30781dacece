//! # pmoradio - Stations de radio à partir de répertoires de fichiers audio
//!
//! Chaque sous-répertoire de la racine devient une station qui diffuse ses
//! fichiers en boucle, par ordre alphabétique, à cadence fixe. Tous les
//! auditeurs d'une station entendent le même direct ; un nouvel auditeur reçoit
//! d'abord les quelques secondes conservées dans le replay buffer.
//!
//! ## Architecture
//!
//! ```text
//!   playlist ──▶ ChannelProducer ──▶ ReplayBuffer (K derniers chunks)
//!                  (1 tâche/station)  │
//!                                     └─▶ SubscriberRegistry ──▶ file bornée par auditeur
//!                                                                   │
//!                                         StationStream ◀── snapshot + live
//! ```
//!
//! - [`ChannelProducer`] lit un chunk par tick du [`Pacer`], l'écrit dans le
//!   [`ReplayBuffer`] puis le propose à chaque auditeur sans jamais attendre :
//!   un auditeur lent perd des chunks, les autres ne sont pas affectés.
//! - [`BroadcastEngine`] découvre les stations et ouvre les flux.
//! - [`StationStream`] livre des séquences strictement croissantes, sans doublon.
//!
//! ## Exemple
//!
//! ```rust,no_run
//! use pmoradio::{BroadcastEngine, EngineSettings};
//!
//! #[tokio::main]
//! async fn main() -> pmoradio::Result<()> {
//!     let engine = BroadcastEngine::start(EngineSettings::new("/srv/radio"))?;
//!
//!     let station = &engine.list_stations()[0];
//!     let mut stream = engine.open_stream(&station.id)?;
//!     while let Some(chunk) = stream.next_chunk().await {
//!         println!("chunk #{} ({} bytes)", chunk.seq(), chunk.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `pmoconfig` : réglages lus depuis la section `radio` de la configuration
//! - `pmoserver` (défaut) : API REST et streaming HTTP via [`RadioServerExt`]

pub mod chunk;
pub mod engine;
pub mod error;
pub mod pacer;
pub mod playlist;
pub mod producer;
pub mod registry;
pub mod replay;
pub mod stream;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

#[cfg(feature = "pmoserver")]
pub mod api_rest;
#[cfg(feature = "pmoserver")]
pub mod pmoserver_ext;

pub use chunk::Chunk;
pub use engine::{station_id, BroadcastEngine, EngineSettings, StationInfo, StationStatus};
pub use error::{Error, Result};
pub use pacer::{IntervalPacer, Pacer};
pub use playlist::{content_type_for, discover_stations, Playlist, PlaylistStore, StationDir};
pub use producer::{ChannelProducer, ProducerState};
pub use registry::{FanOut, Subscriber, SubscriberId, SubscriberRegistry};
pub use replay::ReplayBuffer;
pub use stream::StationStream;

#[cfg(feature = "pmoconfig")]
pub use config_ext::RadioConfigExt;

#[cfg(feature = "pmoserver")]
pub use api_rest::{create_api_router, RadioApiDoc, RadioState};
#[cfg(feature = "pmoserver")]
pub use pmoserver_ext::RadioServerExt;
