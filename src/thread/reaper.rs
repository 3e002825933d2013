//! Periodic eviction of expired threads

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::store::ThreadStore;

/// Default time between sweeps (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Background sweeper for a [`ThreadStore`]
///
/// Correctness never depends on the sweep: the store also evicts lazily on
/// every access. The reaper only bounds memory held by threads nobody reads.
#[derive(Debug, Clone)]
pub struct Reaper {
    store: Arc<ThreadStore>,
    interval: Duration,
}

impl Reaper {
    #[must_use]
    pub const fn new(store: Arc<ThreadStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run one sweep now, returning the number of evicted threads
    pub fn sweep(&self) -> usize {
        let evicted = self.store.purge_expired();
        if evicted > 0 {
            tracing::info!(
                evicted,
                remaining = self.store.resident_count(),
                "reaped expired threads"
            );
        } else {
            tracing::debug!(remaining = self.store.resident_count(), "reaper sweep found nothing");
        }
        evicted
    }

    /// Sweep on a fixed interval until the returned handle is shut down
    #[must_use]
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let period = self.interval.max(Duration::from_millis(1));

        tracing::info!(interval_secs = period.as_secs(), "thread reaper started");

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip the first immediate tick
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep();
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("thread reaper stopped");
                        break;
                    }
                }
            }
        });

        ReaperHandle { shutdown_tx, task }
    }
}

/// Handle to a running reaper task
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "thread reaper task failed");
        }
    }
}
