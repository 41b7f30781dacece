//! Racine de composition : une station par sous-répertoire, un producteur par
//! station.
//!
//! Chaque station possède son propre [`ReplayBuffer`] et son propre
//! [`SubscriberRegistry`] ; aucun verrou n'est partagé entre stations. L'engine
//! n'est qu'une table de recherche immuable construite au démarrage.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    pacer::{IntervalPacer, Pacer},
    playlist::{discover_stations, Playlist, PlaylistStore, DEFAULT_EXTENSIONS},
    producer::{ChannelProducer, ProducerState, DEFAULT_CHUNK_SIZE},
    registry::SubscriberRegistry,
    replay::ReplayBuffer,
    stream::StationStream,
};

/// Intervalle par défaut entre deux chunks
pub const DEFAULT_CADENCE: Duration = Duration::from_millis(170);
/// Chunks gardés pour le rattrapage (~4.8 s à la cadence par défaut)
pub const DEFAULT_REPLAY_CAPACITY: usize = 28;
/// Profondeur de la file d'un auditeur
pub const DEFAULT_QUEUE_CAPACITY: usize = 2;

/// Réglages du moteur de diffusion.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Racine : un sous-répertoire par station.
    pub root: PathBuf,
    pub extensions: Vec<String>,
    pub chunk_size: usize,
    pub cadence: Duration,
    pub replay_capacity: usize,
    pub queue_capacity: usize,
}

impl EngineSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            cadence: DEFAULT_CADENCE,
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Configuration("chunk_size must be > 0".into()));
        }
        if self.cadence.is_zero() {
            return Err(Error::Configuration("cadence must be > 0".into()));
        }
        if self.replay_capacity == 0 {
            return Err(Error::Configuration("replay_capacity must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Configuration("queue_capacity must be > 0".into()));
        }
        if self.extensions.is_empty() {
            return Err(Error::Configuration("at least one audio extension is required".into()));
        }
        Ok(())
    }
}

/// Entrée de la liste des stations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "pmoserver", derive(utoipa::ToSchema))]
pub struct StationInfo {
    pub id: String,
    pub name: String,
}

/// État détaillé d'une station.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "pmoserver", derive(utoipa::ToSchema))]
pub struct StationStatus {
    pub id: String,
    pub name: String,
    pub available: bool,
    pub producer: ProducerState,
    pub tracks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_track: Option<String>,
    pub listeners: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seq: Option<u64>,
}

struct Station {
    info: StationInfo,
    playlist: Option<Playlist>,
    content_type: &'static str,
    buffer: Arc<ReplayBuffer>,
    registry: Arc<SubscriberRegistry>,
    state: watch::Receiver<ProducerState>,
}

impl Station {
    /// Vrai si le producteur a démarré et n'est ni en échec ni arrêté.
    fn is_available(&self) -> bool {
        self.playlist.is_some()
            && !matches!(
                *self.state.borrow(),
                ProducerState::Failed { .. } | ProducerState::Stopped
            )
    }

    fn status(&self) -> StationStatus {
        let producer = self.state.borrow().clone();
        let current_track = match (&producer, &self.playlist) {
            (
                ProducerState::Opening { track } | ProducerState::Streaming { track },
                Some(playlist),
            ) => playlist
                .get(*track)
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string()),
            _ => None,
        };
        StationStatus {
            id: self.info.id.clone(),
            name: self.info.name.clone(),
            available: self.is_available(),
            producer,
            tracks: self.playlist.as_ref().map(Playlist::len).unwrap_or(0),
            current_track,
            listeners: self.registry.len(),
            last_seq: self.buffer.last_seq(),
        }
    }
}

/// Identifiant stable d'une station, dérivé du nom de son répertoire.
pub fn station_id(name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

pub struct BroadcastEngine {
    stations: Vec<Station>,
    index: HashMap<String, usize>,
    settings: EngineSettings,
    stop: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl BroadcastEngine {
    /// Découvre les stations et démarre un producteur cadencé par station.
    ///
    /// Doit être appelé depuis un runtime tokio.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] si les réglages sont invalides ou la racine illisible.
    pub fn start(settings: EngineSettings) -> Result<Self> {
        let cadence = settings.cadence;
        Self::start_with_pacer(settings, move |_| Box::new(IntervalPacer::new(cadence)))
    }

    /// Comme [`start`](Self::start) avec une horloge fournie par station.
    pub fn start_with_pacer<F>(settings: EngineSettings, mut make_pacer: F) -> Result<Self>
    where
        F: FnMut(&StationInfo) -> Box<dyn Pacer>,
    {
        settings.validate()?;
        let dirs = discover_stations(&settings.root)?;
        info!(
            "📻 Found {} station(s) in {}",
            dirs.len(),
            settings.root.display()
        );

        let stop = CancellationToken::new();
        let mut stations = Vec::with_capacity(dirs.len());
        let mut index = HashMap::with_capacity(dirs.len());
        let mut tasks = Vec::new();

        for dir in dirs {
            let info = StationInfo {
                id: station_id(&dir.name),
                name: dir.name.clone(),
            };
            let buffer = Arc::new(ReplayBuffer::new(settings.replay_capacity));
            let registry = Arc::new(SubscriberRegistry::new(
                dir.name.clone(),
                settings.queue_capacity,
            ));

            let station = match PlaylistStore::load(&dir.path, &settings.extensions) {
                Ok(playlist) => {
                    let content_type = playlist.content_type();
                    let (producer, state) = ChannelProducer::new(
                        dir.name.clone(),
                        playlist.clone(),
                        buffer.clone(),
                        registry.clone(),
                        make_pacer(&info),
                        settings.chunk_size,
                    );

                    let name = dir.name.clone();
                    let token = stop.child_token();
                    tasks.push(tokio::spawn(async move {
                        if producer.run(token).await.is_err() {
                            warn!("Station {} is now unavailable until restart", name);
                        }
                    }));
                    info!(
                        "  ✅ {} ({} track(s)) - id {}",
                        info.name,
                        playlist.len(),
                        info.id
                    );

                    Station {
                        info,
                        playlist: Some(playlist),
                        content_type,
                        buffer,
                        registry,
                        state,
                    }
                }
                Err(e) => {
                    warn!("  ⚠️ {} listed but unavailable: {}", dir.name, e);
                    let (_, state) = watch::channel(ProducerState::Idle);
                    Station {
                        info,
                        playlist: None,
                        content_type: "audio/mpeg",
                        buffer,
                        registry,
                        state,
                    }
                }
            };

            index.insert(station.info.id.clone(), stations.len());
            stations.push(station);
        }

        Ok(Self {
            stations,
            index,
            settings,
            stop,
            tasks,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Stations dans l'ordre de découverte (trié par nom).
    pub fn list_stations(&self) -> Vec<StationInfo> {
        self.stations.iter().map(|s| s.info.clone()).collect()
    }

    pub fn station_status(&self, id: &str) -> Result<StationStatus> {
        self.station(id).map(Station::status)
    }

    /// Ouvre le flux d'un auditeur : backlog du replay buffer puis live.
    ///
    /// Le [`StationStream`] retourné détache l'auditeur quand il est relâché.
    ///
    /// # Errors
    ///
    /// * [`Error::StationNotFound`] pour un identifiant inconnu (rien n'est alloué)
    /// * [`Error::StationUnavailable`] si la station ne diffuse pas
    pub fn open_stream(&self, id: &str) -> Result<StationStream> {
        let station = self.station(id)?;
        if !station.is_available() {
            return Err(Error::StationUnavailable(station.info.name.clone()));
        }

        let subscriber = station.registry.attach();
        // Le producteur a pu échouer entre-temps et fermer les files avant
        // l'inscription : la nôtre ne serait alors jamais fermée.
        if !station.is_available() {
            return Err(Error::StationUnavailable(station.info.name.clone()));
        }
        let snapshot = station.buffer.snapshot();

        Ok(StationStream::new(
            station.info.id.clone(),
            station.content_type,
            snapshot,
            subscriber,
        ))
    }

    /// Nombre total d'auditeurs, toutes stations confondues.
    pub fn listeners(&self) -> usize {
        self.stations.iter().map(|s| s.registry.len()).sum()
    }

    /// Arrête tous les producteurs.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }

    fn station(&self, id: &str) -> Result<&Station> {
        self.index
            .get(id)
            .map(|&i| &self.stations[i])
            .ok_or_else(|| Error::StationNotFound(id.to_string()))
    }
}

impl Drop for BroadcastEngine {
    fn drop(&mut self) {
        self.stop.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::tests::ManualPacer;
    use std::fs;
    use tokio::sync::mpsc;

    fn settings(root: &std::path::Path) -> EngineSettings {
        let mut settings = EngineSettings::new(root);
        settings.chunk_size = 2;
        settings.replay_capacity = 3;
        settings.queue_capacity = 8;
        settings
    }

    fn start_manual(settings: EngineSettings) -> (BroadcastEngine, HashMap<String, mpsc::UnboundedSender<()>>) {
        let mut ticks = HashMap::new();
        let engine = BroadcastEngine::start_with_pacer(settings, |info| {
            let (pacer, tx) = ManualPacer::new();
            ticks.insert(info.name.clone(), tx);
            Box::new(pacer)
        })
        .unwrap();
        (engine, ticks)
    }

    #[test]
    fn test_station_id_is_stable() {
        assert_eq!(station_id("jazz"), station_id("jazz"));
        assert_ne!(station_id("jazz"), station_id("rock"));
    }

    #[test]
    fn test_invalid_settings() {
        let mut settings = EngineSettings::new("/tmp");
        settings.replay_capacity = 0;
        assert!(matches!(settings.validate(), Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_new_listener_gets_backlog_then_live() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("jazz")).unwrap();
        fs::write(root.path().join("jazz/01.mp3"), b"aabbccddeeff").unwrap();

        let (engine, ticks) = start_manual(settings(root.path()));
        let id = station_id("jazz");

        // Un auditeur témoin pour savoir quand les chunks sont produits
        let mut witness = engine.open_stream(&id).unwrap();
        for _ in 0..4 {
            ticks["jazz"].send(()).unwrap();
            witness.next_chunk().await.unwrap();
        }

        let mut stream = engine.open_stream(&id).unwrap();
        assert_eq!(stream.backlog_len(), 3);
        assert_eq!(stream.content_type(), "audio/mpeg");

        ticks["jazz"].send(()).unwrap();
        let mut seqs = Vec::new();
        for _ in 0..4 {
            seqs.push(stream.next_chunk().await.unwrap().seq());
        }
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(engine.station_status(&id).unwrap().listeners, 2);

        drop(stream);
        assert_eq!(engine.station_status(&id).unwrap().listeners, 1);
    }

    #[tokio::test]
    async fn test_live_duplicates_of_backlog_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("jazz")).unwrap();
        fs::write(root.path().join("jazz/01.mp3"), b"aabbccdd").unwrap();

        let (engine, ticks) = start_manual(settings(root.path()));
        let id = station_id("jazz");

        // Inscrit avant la production : chunk 0 arrive à la fois dans la file
        // et dans le backlog d'un second flux ouvert juste après.
        let mut early = engine.open_stream(&id).unwrap();
        ticks["jazz"].send(()).unwrap();
        assert_eq!(early.next_chunk().await.unwrap().seq(), 0);

        let station = engine.station(&id).unwrap();
        let subscriber = station.registry.attach();
        station.registry.fan_out(&station.buffer.snapshot()[0]);
        let mut stream = StationStream::new(id.clone(), "audio/mpeg", station.buffer.snapshot(), subscriber);

        ticks["jazz"].send(()).unwrap();
        assert_eq!(stream.next_chunk().await.unwrap().seq(), 0);
        assert_eq!(stream.next_chunk().await.unwrap().seq(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_station_is_listed() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("empty")).unwrap();
        fs::create_dir(root.path().join("jazz")).unwrap();
        fs::write(root.path().join("jazz/01.mp3"), b"aa").unwrap();

        let (engine, _ticks) = start_manual(settings(root.path()));
        let names: Vec<_> = engine.list_stations().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["empty", "jazz"]);

        let id = station_id("empty");
        assert!(matches!(
            engine.open_stream(&id),
            Err(Error::StationUnavailable(_))
        ));
        let status = engine.station_status(&id).unwrap();
        assert!(!status.available);
        assert_eq!(status.tracks, 0);
        assert_eq!(status.listeners, 0);
    }

    #[tokio::test]
    async fn test_failed_station_becomes_unavailable() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("jazz")).unwrap();
        fs::write(root.path().join("jazz/01.mp3"), b"").unwrap();

        let (engine, ticks) = start_manual(settings(root.path()));
        let id = station_id("jazz");
        let mut stream = engine.open_stream(&id).unwrap();

        ticks["jazz"].send(()).unwrap();
        assert!(stream.next_chunk().await.is_none());
        assert!(matches!(
            engine.open_stream(&id),
            Err(Error::StationUnavailable(_))
        ));
        assert!(matches!(
            engine.station_status(&id).unwrap().producer,
            ProducerState::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_unreadable_root_is_configuration_error() {
        let root = tempfile::tempdir().unwrap();
        let result = BroadcastEngine::start(EngineSettings::new(root.path().join("missing")));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
