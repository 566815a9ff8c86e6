//! In-memory task store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;

use jobrelay_core::{BlueprintId, OwnerId, TaskId};
use jobrelay_tasks::{Task, TaskStatus, TaskType};

use super::{NewTask, TaskStats, TaskStore, TaskStoreError, Transitioned};

/// All operations take the single write lock, so a claim is one
/// compare-and-set with respect to every other writer.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<TaskId, Task>>, TaskStoreError> {
        self.tasks
            .read()
            .map_err(|_| TaskStoreError::Storage("task store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<TaskId, Task>>, TaskStoreError> {
        self.tasks
            .write()
            .map_err(|_| TaskStoreError::Storage("task store lock poisoned".to_string()))
    }

    fn update<F, R>(&self, id: TaskId, f: F) -> Result<(Task, R), TaskStoreError>
    where
        F: FnOnce(&mut Task) -> Result<R, TaskStoreError>,
    {
        let mut tasks = self.write()?;
        let task = tasks.get_mut(&id).ok_or(TaskStoreError::NotFound(id))?;
        let r = f(task)?;
        Ok((task.clone(), r))
    }
}

/// `Conflict` if a task other than `except` is active for the pair.
fn ensure_no_active(
    tasks: &HashMap<TaskId, Task>,
    blueprint_id: BlueprintId,
    task_type: TaskType,
    except: Option<TaskId>,
) -> Result<(), TaskStoreError> {
    let duplicate = tasks.values().any(|t| {
        Some(t.id) != except
            && t.blueprint_id == Some(blueprint_id)
            && t.task_type == task_type
            && t.status.is_active()
    });
    if duplicate {
        return Err(TaskStoreError::Conflict {
            blueprint_id,
            task_type,
        });
    }
    Ok(())
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, new: NewTask) -> Result<Task, TaskStoreError> {
        let mut tasks = self.write()?;
        if let Some(blueprint_id) = new.blueprint_id {
            ensure_no_active(&tasks, blueprint_id, new.task_type, None)?;
        }

        let task = Task::new(new.owner, new.task_type, new.payload, new.blueprint_id, Utc::now())
            .with_priority(new.priority);
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn list_for_owner(
        &self,
        owner: OwnerId,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<Task>, TaskStoreError> {
        let tasks = self.read()?;
        let mut result: Vec<Task> = tasks
            .values()
            .filter(|t| t.owner == owner && status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        result.truncate(limit);
        Ok(result)
    }

    async fn stats(&self, owner: OwnerId) -> Result<TaskStats, TaskStoreError> {
        let tasks = self.read()?;
        let mut stats = TaskStats::default();
        for t in tasks.values().filter(|t| t.owner == owner) {
            stats.add(t.status, 1);
        }
        Ok(stats)
    }

    async fn claim_next(
        &self,
        owner: OwnerId,
        agent_id: &str,
    ) -> Result<Option<Task>, TaskStoreError> {
        let mut tasks = self.write()?;

        let next = tasks
            .values()
            .filter(|t| {
                t.owner == owner
                    && t.status == TaskStatus::Pending
                    && t.task_type.is_agent_executable()
            })
            .min_by_key(|t| t.claim_precedence())
            .map(|t| t.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let task = tasks.get_mut(&id).ok_or(TaskStoreError::NotFound(id))?;
        task.start(agent_id, Utc::now())?;
        Ok(Some(task.clone()))
    }

    async fn complete(&self, id: TaskId, result: JsonValue) -> Result<Transitioned, TaskStoreError> {
        let (task, outcome) = self.update(id, |t| Ok(t.complete(result, Utc::now())?))?;
        Ok(Transitioned { task, outcome })
    }

    async fn fail(&self, id: TaskId, error: String) -> Result<Transitioned, TaskStoreError> {
        let (task, outcome) = self.update(id, |t| Ok(t.fail(error, Utc::now())?))?;
        Ok(Transitioned { task, outcome })
    }

    async fn cancel(&self, id: TaskId) -> Result<Task, TaskStoreError> {
        let (task, _) = self.update(id, |t| Ok(t.cancel(Utc::now())))?;
        Ok(task)
    }

    async fn reset(&self, id: TaskId) -> Result<Task, TaskStoreError> {
        let mut tasks = self.write()?;
        let task = tasks.get(&id).ok_or(TaskStoreError::NotFound(id))?;
        if let Some(blueprint_id) = task.blueprint_id {
            ensure_no_active(&tasks, blueprint_id, task.task_type, Some(id))?;
        }
        let task = tasks.get_mut(&id).ok_or(TaskStoreError::NotFound(id))?;
        task.reset(Utc::now())?;
        Ok(task.clone())
    }

    async fn cancel_active_for_blueprint(
        &self,
        blueprint_id: BlueprintId,
        types: Option<&[TaskType]>,
    ) -> Result<usize, TaskStoreError> {
        let mut tasks = self.write()?;
        let now = Utc::now();
        let mut changed = 0;
        for task in tasks.values_mut().filter(|t| {
            t.blueprint_id == Some(blueprint_id)
                && t.status.is_active()
                && types.is_none_or(|ts| ts.contains(&t.task_type))
        }) {
            task.cancel(now);
            changed += 1;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scrape(owner: OwnerId) -> NewTask {
        NewTask::new(owner, TaskType::Scrape, json!({"portal": "linkedin", "keywords": "rust"}))
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_age() {
        let store = InMemoryTaskStore::new();
        let owner = OwnerId::new();
        let first = store.create(scrape(owner)).await.unwrap();
        let urgent = store.create(scrape(owner).with_priority(5)).await.unwrap();
        let second = store.create(scrape(owner)).await.unwrap();

        let order: Vec<TaskId> = [
            store.claim_next(owner, "a1").await.unwrap().unwrap().id,
            store.claim_next(owner, "a1").await.unwrap().unwrap().id,
            store.claim_next(owner, "a1").await.unwrap().unwrap().id,
        ]
        .into();
        assert_eq!(order, vec![urgent.id, first.id, second.id]);
        assert!(store.claim_next(owner, "a1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_skips_other_owners_and_server_side_work() {
        let store = InMemoryTaskStore::new();
        let owner = OwnerId::new();
        store.create(scrape(OwnerId::new())).await.unwrap();
        store
            .create(NewTask::new(owner, TaskType::ParseResume, json!({})))
            .await
            .unwrap();
        assert!(store.claim_next(owner, "a1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claimed_task_is_bound_to_agent() {
        let store = InMemoryTaskStore::new();
        let owner = OwnerId::new();
        let created = store.create(scrape(owner)).await.unwrap();
        let claimed = store.claim_next(owner, "laptop").await.unwrap().unwrap();
        assert_eq!(claimed.id, created.id);
        assert_eq!(claimed.status, TaskStatus::InProgress);
        assert_eq!(claimed.assigned_agent.as_deref(), Some("laptop"));
    }

    #[tokio::test]
    async fn one_active_task_per_blueprint_and_type() {
        let store = InMemoryTaskStore::new();
        let owner = OwnerId::new();
        let bp = BlueprintId::new();

        let first = store.create(scrape(owner).for_blueprint(bp)).await.unwrap();
        let err = store.create(scrape(owner).for_blueprint(bp)).await.unwrap_err();
        assert_eq!(
            err,
            TaskStoreError::Conflict {
                blueprint_id: bp,
                task_type: TaskType::Scrape
            }
        );

        // Other types and tasks without a blueprint are unaffected.
        store
            .create(NewTask::new(owner, TaskType::AutoApply, json!({})).for_blueprint(bp))
            .await
            .unwrap();
        store.create(scrape(owner)).await.unwrap();

        store.claim_next(owner, "a1").await.unwrap();
        store.complete(first.id, json!({"jobs": []})).await.unwrap();
        store.create(scrape(owner).for_blueprint(bp)).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_reports_do_not_overwrite_terminal_status() {
        let store = InMemoryTaskStore::new();
        let owner = OwnerId::new();
        let task = store.create(scrape(owner)).await.unwrap();
        store.claim_next(owner, "a1").await.unwrap();

        let done = store.complete(task.id, json!({"jobs_found": 3})).await.unwrap();
        assert!(done.applied());
        assert_eq!(done.task.status, TaskStatus::Completed);

        let repeat = store.complete(task.id, json!({"jobs_found": 3})).await.unwrap();
        assert!(!repeat.applied());

        let again = store.fail(task.id, "late failure".into()).await.unwrap();
        assert!(!again.applied());
        assert_eq!(again.task.status, TaskStatus::Completed);
        assert_eq!(again.task.result, Some(json!({"jobs_found": 3})));
        assert_eq!(again.task.error_log, None);
    }

    #[tokio::test]
    async fn completing_a_pending_task_is_rejected() {
        let store = InMemoryTaskStore::new();
        let task = store.create(scrape(OwnerId::new())).await.unwrap();
        let err = store.complete(task.id, json!({})).await.unwrap_err();
        assert!(matches!(err, TaskStoreError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn late_completion_of_cancelled_task_is_ignored() {
        let store = InMemoryTaskStore::new();
        let owner = OwnerId::new();
        let bp = BlueprintId::new();
        let task = store.create(scrape(owner).for_blueprint(bp)).await.unwrap();
        store.claim_next(owner, "a1").await.unwrap();

        let n = store.cancel_active_for_blueprint(bp, None).await.unwrap();
        assert_eq!(n, 1);
        let after = store.complete(task.id, json!({"jobs": []})).await.unwrap();
        assert!(!after.applied());
        assert_eq!(after.task.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_by_type_leaves_other_types_running() {
        let store = InMemoryTaskStore::new();
        let owner = OwnerId::new();
        let bp = BlueprintId::new();
        let scrape_task = store.create(scrape(owner).for_blueprint(bp)).await.unwrap();
        let apply_task = store
            .create(NewTask::new(owner, TaskType::AutoApply, json!({})).for_blueprint(bp))
            .await
            .unwrap();

        let n = store
            .cancel_active_for_blueprint(bp, Some(&[TaskType::AutoApply, TaskType::Apply]))
            .await
            .unwrap();
        assert_eq!(n, 1);
        let scrape_task = store.get(scrape_task.id).await.unwrap().unwrap();
        let apply_task = store.get(apply_task.id).await.unwrap().unwrap();
        assert_eq!(scrape_task.status, TaskStatus::Pending);
        assert_eq!(apply_task.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn reset_returns_failed_task_to_queue() {
        let store = InMemoryTaskStore::new();
        let owner = OwnerId::new();
        let task = store.create(scrape(owner)).await.unwrap();
        store.claim_next(owner, "a1").await.unwrap();
        store.fail(task.id, "timeout".into()).await.unwrap();

        let reset = store.reset(task.id).await.unwrap();
        assert_eq!(reset.status, TaskStatus::Pending);
        assert!(reset.assigned_agent.is_none());
        assert_eq!(store.claim_next(owner, "a2").await.unwrap().unwrap().id, task.id);

        let err = store.reset(task.id).await.unwrap_err();
        assert!(matches!(err, TaskStoreError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn reset_conflicts_with_a_newer_active_sibling() {
        let store = InMemoryTaskStore::new();
        let owner = OwnerId::new();
        let bp = BlueprintId::new();
        let failed = store.create(scrape(owner).for_blueprint(bp)).await.unwrap();
        store.claim_next(owner, "a1").await.unwrap();
        store.fail(failed.id, "timeout".into()).await.unwrap();
        let retry = store.create(scrape(owner).for_blueprint(bp)).await.unwrap();

        let err = store.reset(failed.id).await.unwrap_err();
        assert_eq!(
            err,
            TaskStoreError::Conflict {
                blueprint_id: bp,
                task_type: TaskType::Scrape
            }
        );
        let stats = store.stats(owner).await.unwrap();
        assert_eq!(stats.count(TaskStatus::Pending), 1);
        assert_eq!(stats.count(TaskStatus::Failed), 1);

        store.cancel(retry.id).await.unwrap();
        let reset = store.reset(failed.id).await.unwrap();
        assert_eq!(reset.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn stats_and_listing_are_per_owner() {
        let store = InMemoryTaskStore::new();
        let owner = OwnerId::new();
        store.create(scrape(owner)).await.unwrap();
        let cancelled = store.create(scrape(owner)).await.unwrap();
        store.cancel(cancelled.id).await.unwrap();
        store.create(scrape(OwnerId::new())).await.unwrap();

        let stats = store.stats(owner).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.count(TaskStatus::Pending), 1);
        assert_eq!(stats.count(TaskStatus::Cancelled), 1);

        let pending = store
            .list_for_owner(owner, Some(TaskStatus::Pending), 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(store.list_for_owner(owner, None, 1).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_never_share_a_task() {
        let store = InMemoryTaskStore::arc();
        let owner = OwnerId::new();
        for _ in 0..50 {
            store.create(scrape(owner)).await.unwrap();
        }

        let mut handles = Vec::new();
        for agent in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(task) = store.claim_next(owner, &format!("agent-{agent}")).await.unwrap() {
                    claimed.push(task.id);
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 50);
        assert_eq!(all.len(), 50);
    }
}
