//! Producteur d'une station : lit la playlist en boucle au rythme du pacer.
//!
//! ```text
//! Idle → Opening(i) → Streaming(i) → (EOF) → Opening(i+1 mod n) → …
//!                         └── erreur d'I/O ──→ Failed (terminal)
//! ```
//!
//! À chaque tick, exactement un chunk est lu (au plus `chunk_size` octets, le
//! dernier chunk d'une piste peut être plus court) puis :
//! 1. écrit dans le [`ReplayBuffer`] ;
//! 2. proposé à chaque auditeur via [`SubscriberRegistry::fan_out`].
//!
//! Le producteur ne garde aucun état par auditeur. Une erreur d'I/O est fatale
//! pour la station : elle passe `Failed`, les files des auditeurs sont fermées
//! et il n'y a pas de redémarrage automatique. L'arrêt demandé par l'engine
//! ferme aussi les files.

use std::{
    io::{self, ErrorKind},
    path::Path,
    sync::Arc,
};

use bytes::Bytes;
use serde::Serialize;
use tokio::{fs::File, io::AsyncReadExt, sync::watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::{
    chunk::Chunk,
    error::{Error, Result},
    pacer::Pacer,
    playlist::Playlist,
    registry::SubscriberRegistry,
    replay::ReplayBuffer,
};

/// Taille de chunk par défaut (4 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024;

/// État publié par le producteur.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "pmoserver", derive(utoipa::ToSchema))]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProducerState {
    /// Pas encore démarré, ou playlist inutilisable.
    Idle,
    Opening { track: usize },
    Streaming { track: usize },
    Failed { reason: String },
    /// Arrêté par l'engine.
    Stopped,
}

impl ProducerState {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Opening { .. } | Self::Streaming { .. })
    }
}

struct TrackCursor {
    index: usize,
    file: Option<File>,
}

pub struct ChannelProducer {
    label: String,
    playlist: Playlist,
    buffer: Arc<ReplayBuffer>,
    registry: Arc<SubscriberRegistry>,
    pacer: Box<dyn Pacer>,
    read_buf: Vec<u8>,
    next_seq: u64,
    state: watch::Sender<ProducerState>,
}

impl ChannelProducer {
    /// Crée un producteur et le récepteur de son état.
    ///
    /// # Panics
    ///
    /// Panique si `chunk_size` vaut 0.
    pub fn new(
        label: impl Into<String>,
        playlist: Playlist,
        buffer: Arc<ReplayBuffer>,
        registry: Arc<SubscriberRegistry>,
        pacer: Box<dyn Pacer>,
        chunk_size: usize,
    ) -> (Self, watch::Receiver<ProducerState>) {
        assert!(chunk_size > 0, "chunk size must be > 0");
        let (state, state_rx) = watch::channel(ProducerState::Idle);
        let producer = Self {
            label: label.into(),
            playlist,
            buffer,
            registry,
            pacer,
            read_buf: vec![0; chunk_size],
            next_seq: 0,
            state,
        };
        (producer, state_rx)
    }

    /// Boucle de diffusion. Ne se termine que sur annulation (`Ok`) ou sur
    /// erreur fatale.
    pub async fn run(mut self, stop: CancellationToken) -> Result<()> {
        let mut cursor = TrackCursor {
            index: 0,
            file: None,
        };

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    self.state.send_replace(ProducerState::Stopped);
                    let closed = self.registry.close_all();
                    debug!("Producer for {} stopped, {} listener(s) released", self.label, closed);
                    return Ok(());
                }
                _ = self.pacer.tick() => {}
            }

            match self.next_payload(&mut cursor).await {
                Ok(data) => self.emit(data),
                Err(e) => {
                    error!("Broadcast of {} stopped: {}", self.label, e);
                    self.state.send_replace(ProducerState::Failed {
                        reason: e.to_string(),
                    });
                    let closed = self.registry.close_all();
                    debug!("Closed {} listener queue(s) of {}", closed, self.label);
                    return Err(e);
                }
            }
        }
    }

    fn emit(&mut self, data: Bytes) {
        let chunk = Chunk::new(self.next_seq, data);
        self.next_seq += 1;

        self.buffer.write(chunk.clone());
        let report = self.registry.fan_out(&chunk);
        trace!(
            station = %self.label,
            seq = chunk.seq(),
            len = chunk.len(),
            delivered = report.delivered,
            dropped = report.dropped,
            "Chunk broadcast"
        );
    }

    /// Lit le prochain payload non vide, en passant aux pistes suivantes sur EOF.
    async fn next_payload(&mut self, cursor: &mut TrackCursor) -> Result<Bytes> {
        let mut exhausted = 0;
        loop {
            if cursor.file.is_none() {
                cursor.file = Some(self.open_track(cursor.index).await?);
            }
            let track = self.track_path(cursor.index);

            if let Some(file) = cursor.file.as_mut() {
                let n = read_full(file, &mut self.read_buf)
                    .await
                    .map_err(|source| Error::ProducerFatal {
                        track: track.clone(),
                        source,
                    })?;
                if n > 0 {
                    return Ok(Bytes::copy_from_slice(&self.read_buf[..n]));
                }
            }

            // EOF : piste suivante dans le même tick
            cursor.file = None;
            cursor.index = self.playlist.next_index(cursor.index);
            exhausted += 1;
            if exhausted > self.playlist.len() {
                return Err(Error::ProducerFatal {
                    track,
                    source: io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "every track of the playlist is empty",
                    ),
                });
            }
        }
    }

    async fn open_track(&self, index: usize) -> Result<File> {
        let path = self.track_path(index);
        self.state.send_replace(ProducerState::Opening { track: index });

        let file = File::open(&path)
            .await
            .map_err(|source| Error::ProducerFatal {
                track: path.clone(),
                source,
            })?;

        info!(
            "🎵 Streaming: {} | {}",
            self.label,
            path.file_name()
                .map(|n| n.to_string_lossy())
                .unwrap_or_default()
        );
        self.state.send_replace(ProducerState::Streaming { track: index });
        Ok(file)
    }

    fn track_path(&self, index: usize) -> std::path::PathBuf {
        self.playlist
            .get(index)
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// Remplit `buf` autant que possible ; retourne 0 uniquement en fin de fichier.
async fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{fs, path::PathBuf};
    use tokio::sync::mpsc;

    /// Pacer piloté par le test : un tick par message reçu.
    pub(crate) struct ManualPacer {
        rx: mpsc::UnboundedReceiver<()>,
    }

    impl ManualPacer {
        pub(crate) fn new() -> (Self, mpsc::UnboundedSender<()>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { rx }, tx)
        }
    }

    #[async_trait]
    impl Pacer for ManualPacer {
        async fn tick(&mut self) {
            if self.rx.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        tracks: Vec<PathBuf>,
    }

    fn fixture(contents: &[&[u8]]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let tracks = contents
            .iter()
            .enumerate()
            .map(|(i, data)| {
                let path = dir.path().join(format!("{:02}.mp3", i));
                fs::write(&path, data).unwrap();
                path
            })
            .collect();
        Fixture { _dir: dir, tracks }
    }

    struct Harness {
        buffer: Arc<ReplayBuffer>,
        registry: Arc<SubscriberRegistry>,
        ticks: mpsc::UnboundedSender<()>,
        state: watch::Receiver<ProducerState>,
        stop: CancellationToken,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    fn start(fixture: &Fixture, chunk_size: usize) -> Harness {
        let buffer = Arc::new(ReplayBuffer::new(8));
        let registry = Arc::new(SubscriberRegistry::new("test", 64));
        let (pacer, ticks) = ManualPacer::new();
        let (producer, state) = ChannelProducer::new(
            "test",
            Playlist::new(fixture.tracks.clone()),
            buffer.clone(),
            registry.clone(),
            Box::new(pacer),
            chunk_size,
        );
        let stop = CancellationToken::new();
        let handle = tokio::spawn(producer.run(stop.clone()));
        Harness {
            buffer,
            registry,
            ticks,
            state,
            stop,
            handle,
        }
    }

    #[tokio::test]
    async fn test_playlist_wraps_to_first_track() {
        let fixture = fixture(&[b"aaaaaaaaaa", b"bbbbbb"]);
        let harness = start(&fixture, 4);
        let mut sub = harness.registry.attach();

        let mut received = Vec::new();
        for _ in 0..8 {
            harness.ticks.send(()).unwrap();
            received.push(sub.recv().await.unwrap());
        }

        let shape: Vec<(u64, usize, u8)> = received
            .iter()
            .map(|c| (c.seq(), c.len(), c.data()[0]))
            .collect();
        assert_eq!(
            shape,
            vec![
                (0, 4, b'a'),
                (1, 4, b'a'),
                (2, 2, b'a'),
                (3, 4, b'b'),
                (4, 2, b'b'),
                (5, 4, b'a'),
                (6, 4, b'a'),
                (7, 2, b'a'),
            ]
        );
        assert_eq!(
            *harness.state.borrow(),
            ProducerState::Streaming { track: 0 }
        );
        assert!(!harness.handle.is_finished());
        assert_eq!(harness.buffer.last_seq(), Some(7));
    }

    #[tokio::test]
    async fn test_every_chunk_goes_to_replay_buffer() {
        let fixture = fixture(&[b"0123456789abcdef"]);
        let harness = start(&fixture, 4);
        let mut sub = harness.registry.attach();

        for _ in 0..3 {
            harness.ticks.send(()).unwrap();
            sub.recv().await.unwrap();
        }
        let snapshot = harness.buffer.snapshot();
        let seqs: Vec<u64> = snapshot.iter().map(Chunk::seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(snapshot[1].data().as_ref(), b"4567");
    }

    #[tokio::test]
    async fn test_missing_track_is_fatal() {
        let fixture = fixture(&[b"aaaaaaaaaa", b"bbbbbb"]);
        let mut harness = start(&fixture, 4);
        let mut sub = harness.registry.attach();

        for _ in 0..3 {
            harness.ticks.send(()).unwrap();
            sub.recv().await.unwrap();
        }
        fs::remove_file(&fixture.tracks[1]).unwrap();
        harness.ticks.send(()).unwrap();

        let result = (&mut harness.handle).await.unwrap();
        assert!(matches!(result, Err(Error::ProducerFatal { .. })));
        assert!(matches!(
            *harness.state.borrow(),
            ProducerState::Failed { .. }
        ));
        assert!(sub.recv().await.is_none());
        assert!(harness.registry.is_empty());
    }

    #[tokio::test]
    async fn test_all_empty_tracks_is_fatal() {
        let fixture = fixture(&[b"", b""]);
        let harness = start(&fixture, 4);
        harness.ticks.send(()).unwrap();

        let result = harness.handle.await.unwrap();
        assert!(matches!(result, Err(Error::ProducerFatal { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_stops_producer() {
        let fixture = fixture(&[b"aaaa"]);
        let harness = start(&fixture, 4);
        let mut sub = harness.registry.attach();
        harness.stop.cancel();

        let result = harness.handle.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(*harness.state.borrow(), ProducerState::Stopped);
        assert!(sub.recv().await.is_none());
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_run_future_is_send() {
        let fixture = fixture(&[b"aaaa"]);
        let (producer, _state) = ChannelProducer::new(
            "test",
            Playlist::new(fixture.tracks.clone()),
            Arc::new(ReplayBuffer::new(2)),
            Arc::new(SubscriberRegistry::new("test", 2)),
            Box::new(crate::pacer::IntervalPacer::new(std::time::Duration::from_millis(10))),
            4,
        );
        let run = producer.run(CancellationToken::new());
        assert_send(&run);
    }
}
