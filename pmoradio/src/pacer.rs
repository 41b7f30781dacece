//! Horloge de cadence des producteurs.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Source des ticks d'un producteur : un chunk est émis par tick.
///
/// `Sync` est requis : le producteur garde `&self` à travers ses `await` et sa
/// tâche doit rester `Send`.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn tick(&mut self);
}

/// Cadence fixe basée sur `tokio::time::interval`.
///
/// Un tick manqué (disque lent) décale les suivants au lieu de les rattraper en
/// rafale.
pub struct IntervalPacer {
    interval: Interval,
}

impl IntervalPacer {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Pacer for IntervalPacer {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_interval_pacer_period() {
        let mut pacer = IntervalPacer::new(Duration::from_millis(170));
        let start = Instant::now();
        // Le premier tick est immédiat
        pacer.tick().await;
        pacer.tick().await;
        pacer.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(340));
    }
}
