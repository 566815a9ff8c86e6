use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(j) = self.join.take() {
            let _ = j.await;
        }
    }
}

/// Runs a job on a fixed interval until shut down. Missed ticks are skipped,
/// so a slow job never causes a burst of catch-up runs.
#[derive(Debug)]
pub struct PeriodicWorker;

impl PeriodicWorker {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut job: F) -> WorkerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            info!(worker = name, period_secs = period.as_secs_f64(), "worker started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        debug!(worker = name, "tick");
                        job().await;
                    }
                }
            }
            info!(worker = name, "worker stopped");
        });

        WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}
