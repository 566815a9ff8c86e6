use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use jobrelay_agents::AgentStatus;

use crate::client::AgentApi;

/// Report liveness every `period` until `shutdown` flips. BUSY while any
/// task is in hand, IDLE otherwise. The first beat goes out immediately.
pub fn spawn_heartbeat(
    api: Arc<dyn AgentApi>,
    active: Arc<AtomicU32>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let active_tasks = active.load(Ordering::SeqCst);
                    let status = if active_tasks > 0 { AgentStatus::Busy } else { AgentStatus::Idle };
                    match api.heartbeat(status, active_tasks).await {
                        Ok(()) => debug!(status = status.as_str(), active_tasks, "heartbeat sent"),
                        Err(e) => warn!(error = %e, "heartbeat failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
