use std::fmt;

use bytes::Bytes;

/// Tranche d'audio encodé produite par une station.
///
/// Le payload est un [`Bytes`] : le cloner ne copie pas les données, le buffer de
/// replay et chaque file d'abonné partagent la même allocation.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    seq: u64,
    data: Bytes,
}

impl Chunk {
    pub fn new(seq: u64, data: impl Into<Bytes>) -> Self {
        Self {
            seq,
            data: data.into(),
        }
    }

    /// Numéro de séquence, strictement croissant pour une station donnée.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("seq", &self.seq)
            .field("len", &self.data.len())
            .finish()
    }
}
