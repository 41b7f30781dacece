//! Registre des auditeurs d'une station et fan-out des chunks.
//!
//! Chaque abonné possède sa propre file bornée (`tokio::sync::mpsc`). Le
//! producteur pousse chaque chunk dans toutes les files avec `try_send` : si la
//! file d'un auditeur est pleine, le chunk est perdu pour lui seul. Un auditeur
//! lent ne ralentit donc jamais ni le producteur ni les autres auditeurs.
//!
//! Le verrou ne protège que l'appartenance. La liste des membres est partagée en
//! copy-on-write (`Arc<Vec<_>>`) : le fan-out clone l'`Arc` sous le verrou puis
//! livre sans le tenir.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, Weak,
};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::chunk::Chunk;

/// Identifiant d'un abonné, unique au sein d'un registre.
pub type SubscriberId = u64;

#[derive(Clone)]
struct Member {
    id: SubscriberId,
    tx: mpsc::Sender<Chunk>,
    dropped: Arc<AtomicU64>,
}

/// Bilan d'un fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct SubscriberRegistry {
    label: String,
    queue_capacity: usize,
    next_id: AtomicU64,
    members: Mutex<Arc<Vec<Member>>>,
}

impl SubscriberRegistry {
    /// # Panics
    ///
    /// Panique si `queue_capacity` vaut 0.
    pub fn new(label: impl Into<String>, queue_capacity: usize) -> Self {
        assert!(queue_capacity > 0, "queue capacity must be > 0");
        Self {
            label: label.into(),
            queue_capacity,
            next_id: AtomicU64::new(0),
            members: Mutex::new(Arc::new(Vec::new())),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Inscrit un nouvel auditeur.
    pub fn attach(self: &Arc<Self>) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        let count = {
            let mut members = self.lock();
            let mut next = Vec::with_capacity(members.len() + 1);
            next.extend(members.iter().cloned());
            next.push(Member {
                id,
                tx,
                dropped: dropped.clone(),
            });
            *members = Arc::new(next);
            members.len()
        };
        debug!(station = %self.label, subscriber = id, listeners = count, "Listener attached");

        Subscriber {
            id,
            rx,
            registry: Arc::downgrade(self),
            dropped,
            detached: false,
        }
    }

    /// Retire un auditeur. Idempotent : retourne `false` s'il n'était plus inscrit.
    pub fn detach(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut members = self.lock();
            if !members.iter().any(|m| m.id == id) {
                return false;
            }
            let next: Vec<Member> = members.iter().filter(|m| m.id != id).cloned().collect();
            *members = Arc::new(next);
            (true, members.len())
        };
        debug!(station = %self.label, subscriber = id, listeners = count, "Listener detached");
        removed
    }

    /// Retire tous les auditeurs ; leurs files se terminent une fois vidées.
    pub fn close_all(&self) -> usize {
        let mut members = self.lock();
        let count = members.len();
        *members = Arc::new(Vec::new());
        count
    }

    /// Pousse `chunk` dans la file de chaque auditeur sans jamais attendre.
    pub fn fan_out(&self, chunk: &Chunk) -> FanOut {
        let members = self.lock().clone();
        let mut report = FanOut::default();

        for member in members.iter() {
            match member.tx.try_send(chunk.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    member.dropped.fetch_add(1, Ordering::Relaxed);
                    report.dropped += 1;
                    trace!(station = %self.label, subscriber = member.id, seq = chunk.seq(), "Queue full, chunk dropped");
                }
                // Le handle a été relâché et son Drop va nous détacher.
                Err(TrySendError::Closed(_)) => {}
            }
        }
        report
    }

    /// Nombre d'auditeurs inscrits.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Arc<Vec<Member>>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle d'un auditeur connecté.
///
/// Le registre ne garde que le côté émetteur de la file ; ce handle en possède
/// le côté récepteur et se détache automatiquement quand il est relâché.
pub struct Subscriber {
    id: SubscriberId,
    rx: mpsc::Receiver<Chunk>,
    registry: Weak<SubscriberRegistry>,
    dropped: Arc<AtomicU64>,
    detached: bool,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Attend le prochain chunk live. `None` une fois détaché et la file vidée.
    pub async fn recv(&mut self) -> Option<Chunk> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Chunk> {
        self.rx.try_recv().ok()
    }

    /// Nombre de chunks perdus parce que la file était pleine.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Se retire du registre et ferme la file. Peut être appelé plusieurs fois.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
        self.rx.close();
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(capacity: usize) -> Arc<SubscriberRegistry> {
        Arc::new(SubscriberRegistry::new("test", capacity))
    }

    #[test]
    fn test_attach_detach_membership() {
        let registry = registry(2);
        let mut a = registry.attach();
        let b = registry.attach();
        assert_eq!(registry.len(), 2);
        assert_ne!(a.id(), b.id());

        a.detach();
        assert_eq!(registry.len(), 1);

        // Idempotent
        a.detach();
        assert!(!registry.detach(a.id()));
        assert_eq!(registry.len(), 1);

        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_full_queue_drops_only_for_that_subscriber() {
        let registry = registry(1);
        let mut slow = registry.attach();
        let mut fast = registry.attach();

        let first = registry.fan_out(&Chunk::new(0, vec![0]));
        assert_eq!(first, FanOut { delivered: 2, dropped: 0 });
        assert_eq!(fast.try_recv().map(|c| c.seq()), Some(0));

        let second = registry.fan_out(&Chunk::new(1, vec![1]));
        assert_eq!(second, FanOut { delivered: 1, dropped: 1 });
        assert_eq!(fast.try_recv().map(|c| c.seq()), Some(1));

        assert_eq!(slow.dropped(), 1);
        assert_eq!(fast.dropped(), 0);
        assert_eq!(slow.try_recv().map(|c| c.seq()), Some(0));
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_detach_closes_queue_after_drain() {
        let registry = registry(2);
        let mut sub = registry.attach();
        registry.fan_out(&Chunk::new(7, vec![7]));

        sub.detach();
        assert_eq!(sub.recv().await.map(|c| c.seq()), Some(7));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_all_ends_every_queue() {
        let registry = registry(2);
        let mut a = registry.attach();
        let mut b = registry.attach();

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
    }

    #[test]
    fn test_subscriber_outlives_registry() {
        let registry = registry(1);
        let mut sub = registry.attach();
        drop(registry);
        sub.detach();
        assert!(sub.is_detached());
    }
}
