//! Background expiry sweeper
//!
//! A low-priority tokio task that periodically calls
//! [`Sweepable::sweep_expired`] on a fixed set of caches. Foreground reads
//! never depend on it: expiry is checked on every lookup, the sweep only
//! reclaims memory.

use super::Sweepable;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Handle to a running sweeper
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<u64>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it; returns the total entries swept
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown_tx.send(()).await;
        self.task.await.unwrap_or(0)
    }
}

/// Spawn a sweeper over `caches` on the current tokio runtime
pub fn spawn_sweeper(caches: Vec<Arc<dyn Sweepable>>, every: Duration) -> SweeperHandle {
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let task = tokio::spawn(run(caches, every, shutdown_rx));
    SweeperHandle { shutdown_tx, task }
}

async fn run(
    caches: Vec<Arc<dyn Sweepable>>,
    every: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> u64 {
    info!(caches = caches.len(), interval_ms = every.as_millis() as u64, "Cache sweeper starting");

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut total: u64 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for cache in &caches {
                    let removed = cache.sweep_expired();
                    if removed > 0 {
                        debug!(cache = cache.name(), removed, "Swept expired entries");
                    }
                    total += removed as u64;
                }
            }

            _ = shutdown_rx.recv() => {
                info!("Cache sweeper shutting down");
                break;
            }
        }
    }

    info!(swept = total, "Cache sweeper stopped");
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let cache: Arc<TtlCache<String, u32>> = Arc::new(TtlCache::new(
            "sweep",
            Duration::from_millis(5),
            1024 * 1024,
        ));
        cache.set("a".into(), 1).unwrap();
        cache
            .set_with_ttl("b".into(), 2, Duration::from_secs(60))
            .unwrap();

        let handle = spawn_sweeper(vec![cache.clone() as Arc<dyn Sweepable>], Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        let swept = handle.shutdown().await;

        assert_eq!(swept, 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expirations, 1);
    }
}
