use std::{collections::VecDeque, io};

use bytes::Bytes;
use futures::Stream;

use crate::{chunk::Chunk, registry::Subscriber};

/// Flux d'un auditeur : le backlog du replay buffer puis le live.
///
/// L'abonné est inscrit *avant* la prise du snapshot, un même chunk peut donc
/// se trouver dans les deux : les chunks live dont la séquence n'est pas
/// strictement supérieure au dernier chunk livré sont ignorés. La livraison est
/// strictement croissante, sans doublon, avec des trous possibles quand la file
/// de l'auditeur déborde.
///
/// Relâcher le flux détache l'auditeur.
pub struct StationStream {
    station_id: String,
    content_type: &'static str,
    backlog: VecDeque<Chunk>,
    subscriber: Subscriber,
    last_seq: Option<u64>,
}

impl StationStream {
    pub(crate) fn new(
        station_id: impl Into<String>,
        content_type: &'static str,
        snapshot: Vec<Chunk>,
        subscriber: Subscriber,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            content_type,
            backlog: snapshot.into(),
            subscriber,
            last_seq: None,
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// Chunks du backlog pas encore livrés.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    /// Prochain chunk, ou `None` quand la station a fermé la file.
    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        if let Some(chunk) = self.backlog.pop_front() {
            self.last_seq = Some(chunk.seq());
            return Some(chunk);
        }

        loop {
            let chunk = self.subscriber.recv().await?;
            if self.last_seq.is_some_and(|last| chunk.seq() <= last) {
                continue;
            }
            self.last_seq = Some(chunk.seq());
            return Some(chunk);
        }
    }

    /// Détache l'auditeur ; les chunks déjà en file restent lisibles.
    pub fn detach(&mut self) {
        self.subscriber.detach();
    }

    /// Convertit en flux d'octets, directement utilisable comme corps HTTP.
    pub fn into_byte_stream(mut self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        async_stream::stream! {
            while let Some(chunk) = self.next_chunk().await {
                yield Ok(chunk.into_bytes());
            }
        }
    }
}
