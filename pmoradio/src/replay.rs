//! Buffer circulaire des derniers chunks d'une station.
//!
//! Un nouvel auditeur reçoit d'abord le contenu de ce buffer (quelques secondes
//! d'audio) avant le flux live, ce qui évite un démarrage à vide côté lecteur.
//!
//! - Un seul écrivain (le producteur de la station), lecteurs concurrents.
//! - Les slots jamais écrits sont `None` : on ne déduit jamais l'absence d'un
//!   chunk à partir d'un payload vide.
//! - `snapshot()` copie les chunks sous le verrou puis le relâche ; l'appelant
//!   fait ses I/O sans bloquer le producteur.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::chunk::Chunk;

struct Ring {
    slots: Vec<Option<Chunk>>,
    /// Prochain slot à écrire (donc le plus ancien quand le ring est plein).
    head: usize,
    filled: usize,
}

pub struct ReplayBuffer {
    ring: Mutex<Ring>,
    capacity: usize,
}

impl ReplayBuffer {
    /// Crée un buffer de `capacity` chunks.
    ///
    /// # Panics
    ///
    /// Panique si `capacity` vaut 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "replay capacity must be > 0");
        Self {
            ring: Mutex::new(Ring {
                slots: vec![None; capacity],
                head: 0,
                filled: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Nombre de chunks actuellement présents (au plus `capacity`).
    pub fn len(&self) -> usize {
        self.lock().filled
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Écrit un chunk en écrasant le plus ancien. O(1).
    pub fn write(&self, chunk: Chunk) {
        let mut ring = self.lock();
        let head = ring.head;
        ring.slots[head] = Some(chunk);
        ring.head = (head + 1) % self.capacity;
        if ring.filled < self.capacity {
            ring.filled += 1;
        }
    }

    /// Copie des chunks présents, du plus ancien au plus récent.
    pub fn snapshot(&self) -> Vec<Chunk> {
        let ring = self.lock();
        let mut out = Vec::with_capacity(ring.filled);
        // Tant que le ring n'est pas plein, les slots [head..] sont vides.
        let start = if ring.filled < self.capacity { 0 } else { ring.head };
        for i in 0..ring.filled {
            if let Some(chunk) = &ring.slots[(start + i) % self.capacity] {
                out.push(chunk.clone());
            }
        }
        out
    }

    /// Séquence du chunk le plus récent, si au moins un chunk a été écrit.
    pub fn last_seq(&self) -> Option<u64> {
        let ring = self.lock();
        if ring.filled == 0 {
            return None;
        }
        let last = (ring.head + self.capacity - 1) % self.capacity;
        ring.slots[last].as_ref().map(Chunk::seq)
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // Aucune section critique ne peut laisser le ring incohérent.
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u64) -> Chunk {
        Chunk::new(seq, vec![seq as u8; 4])
    }

    fn seqs(chunks: &[Chunk]) -> Vec<u64> {
        chunks.iter().map(Chunk::seq).collect()
    }

    #[test]
    fn test_empty_snapshot() {
        let buffer = ReplayBuffer::new(4);
        assert!(buffer.snapshot().is_empty());
        assert_eq!(buffer.last_seq(), None);
    }

    #[test]
    fn test_partial_fill_skips_unwritten_slots() {
        let buffer = ReplayBuffer::new(4);
        buffer.write(chunk(0));
        buffer.write(chunk(1));

        assert_eq!(seqs(&buffer.snapshot()), vec![0, 1]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.last_seq(), Some(1));
    }

    #[test]
    fn test_wraparound_keeps_chronological_order() {
        let buffer = ReplayBuffer::new(3);
        for seq in 0..7 {
            buffer.write(chunk(seq));
        }

        assert_eq!(seqs(&buffer.snapshot()), vec![4, 5, 6]);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.last_seq(), Some(6));
    }

    #[test]
    fn test_empty_payload_is_still_a_chunk() {
        let buffer = ReplayBuffer::new(2);
        buffer.write(Chunk::new(0, Vec::new()));

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].is_empty());
    }

    #[test]
    fn test_snapshot_never_exceeds_capacity() {
        let buffer = ReplayBuffer::new(5);
        for seq in 0..100 {
            buffer.write(chunk(seq));
            let snapshot = buffer.snapshot();
            assert!(snapshot.len() <= 5);
            assert!(snapshot.windows(2).all(|w| w[0].seq() < w[1].seq()));
        }
    }

    #[test]
    #[should_panic(expected = "replay capacity must be > 0")]
    fn test_zero_capacity_rejected() {
        let _ = ReplayBuffer::new(0);
    }
}
