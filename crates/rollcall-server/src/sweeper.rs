//! Periodic cleanup of expired in-process state.
//!
//! One background task per target, each on its own interval. The tasks stop
//! when [`SweeperHandle::shutdown`] is called or the handle is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::cache::BoundedTtlCache;
use crate::processing::ProcessingRegistry;
use crate::rate_limit::RateLimiter;

/// Something with expired state to drop.
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Drop expired state. Returns how many items were removed.
    fn sweep(&self) -> usize;
}

impl<V> Sweep for BoundedTtlCache<V>
where
    V: Clone + Send + Sync,
{
    fn name(&self) -> &'static str {
        BoundedTtlCache::name(self)
    }

    fn sweep(&self) -> usize {
        self.cleanup()
    }
}

impl Sweep for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limiter"
    }

    fn sweep(&self) -> usize {
        self.cleanup()
    }
}

impl<T> Sweep for ProcessingRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "processing"
    }

    fn sweep(&self) -> usize {
        self.cleanup()
    }
}

pub struct Sweeper;

impl Sweeper {
    /// Spawn one sweep task per `(target, interval)`.
    pub fn start(targets: Vec<(Arc<dyn Sweep>, Duration)>) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = targets
            .into_iter()
            .map(|(target, period)| tokio::spawn(run(target, period, shutdown_rx.clone())))
            .collect();

        SweeperHandle { shutdown_tx, tasks }
    }
}

async fn run(target: Arc<dyn Sweep>, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    tracing::debug!(sweep = target.name(), period_ms = period.as_millis() as u64, "sweeper started");

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = target.sweep();
                if removed > 0 {
                    tracing::debug!(sweep = target.name(), removed, "sweep removed entries");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::debug!(sweep = target.name(), "sweeper stopping");
                    break;
                }
            }
        }
    }
}

/// Owner of the running sweep tasks.
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every sweep task and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "sweep task ended abnormally");
            }
        }
    }
}
