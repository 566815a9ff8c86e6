//! Background workers: heartbeat sweep, rate-window reset, scheduler tick.

mod periodic;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::agents::AgentRegistry;
use crate::blueprints::BlueprintService;

pub use periodic::{PeriodicWorker, WorkerHandle};

/// Flip silent agents to OFFLINE every `period`.
pub fn spawn_heartbeat_sweeper(registry: Arc<dyn AgentRegistry>, period: Duration) -> WorkerHandle {
    PeriodicWorker::spawn("heartbeat-sweeper", period, move || {
        let registry = registry.clone();
        async move {
            match registry.sweep(Utc::now()).await {
                Ok(0) => debug!("heartbeat sweep: no stale agents"),
                Ok(n) => info!(swept = n, "marked stale agents offline"),
                Err(e) => warn!(error = %e, "heartbeat sweep failed"),
            }
        }
    })
}

/// Reset elapsed hourly rate windows every `period`.
pub fn spawn_rate_limit_resetter(registry: Arc<dyn AgentRegistry>, period: Duration) -> WorkerHandle {
    PeriodicWorker::spawn("rate-limit-resetter", period, move || {
        let registry = registry.clone();
        async move {
            match registry.reset_sweep(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => info!(reset = n, "rate-limit windows rolled over"),
                Err(e) => warn!(error = %e, "rate-limit reset failed"),
            }
        }
    })
}

/// Evaluate all active blueprints every `period`.
pub fn spawn_blueprint_scheduler(service: Arc<BlueprintService>, period: Duration) -> WorkerHandle {
    PeriodicWorker::spawn("blueprint-scheduler", period, move || {
        let service = service.clone();
        async move {
            match service.tick(Utc::now()).await {
                Ok(report) if report.created > 0 || report.failed > 0 => info!(
                    created = report.created,
                    already_running = report.already_running,
                    failed = report.failed,
                    "scheduler tick"
                ),
                Ok(_) => debug!("scheduler tick: nothing due"),
                Err(e) => warn!(error = %e, "scheduler tick failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprints::{BlueprintStore, InMemoryBlueprintStore};
    use crate::tasks::{InMemoryTaskStore, TaskStore};
    use jobrelay_blueprints::{Blueprint, BlueprintFilters, BlueprintStatus, Portal};
    use jobrelay_core::OwnerId;
    use jobrelay_tasks::TaskType;

    #[tokio::test]
    async fn scheduler_worker_delivers_due_blueprints() {
        let tasks = InMemoryTaskStore::arc();
        let blueprints = Arc::new(InMemoryBlueprintStore::new());
        let owner = OwnerId::new();
        let bp = Blueprint::new(
            owner,
            "nightly",
            Portal::Indeed,
            BlueprintFilters {
                keywords: vec!["platform engineer".into()],
                ..Default::default()
            },
            86_400,
            Utc::now(),
        )
        .unwrap()
        .with_status(BlueprintStatus::AutoScrape)
        .unwrap();
        blueprints.create(bp).await.unwrap();

        let service = Arc::new(BlueprintService::new(blueprints.clone(), tasks.clone()));
        let handle = spawn_blueprint_scheduler(service, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.shutdown().await;

        // Later ticks find the blueprint not yet due again.
        let created = tasks.list_for_owner(owner, None, 10).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].task_type, TaskType::Scrape);
        assert_eq!(created[0].payload["portal"], "indeed");
    }
}
