//! In-process stand-in for the relay server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use jobrelay_agents::AgentStatus;
use jobrelay_core::TaskId;
use jobrelay_tasks::{Task, TaskReport};

use crate::client::{AgentApi, ClientError};

#[derive(Debug, Default)]
pub struct FakeApi {
    queue: Mutex<VecDeque<Task>>,
    reports: Mutex<Vec<TaskReport>>,
    heartbeats: Mutex<Vec<(AgentStatus, u32)>>,
    codes: Mutex<Vec<(TaskId, String)>>,
    claims: AtomicU32,
    failing_reports: AtomicU32,
    failure_status: AtomicU32,
    report_attempts: AtomicU32,
}

impl FakeApi {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enqueue(&self, task: Task) {
        self.queue.lock().unwrap().push_back(task);
    }

    pub fn set_code(&self, task_id: TaskId, code: &str) {
        self.codes.lock().unwrap().push((task_id, code.to_string()));
    }

    pub fn fail_next_reports(&self, n: u32) {
        self.fail_next_reports_with(n, 502);
    }

    pub fn fail_next_reports_with(&self, n: u32, status: u16) {
        self.failure_status.store(u32::from(status), Ordering::SeqCst);
        self.failing_reports.store(n, Ordering::SeqCst);
    }

    pub fn report_attempts(&self) -> u32 {
        self.report_attempts.load(Ordering::SeqCst)
    }

    pub fn reports(&self) -> Vec<TaskReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn heartbeats(&self) -> Vec<(AgentStatus, u32)> {
        self.heartbeats.lock().unwrap().clone()
    }

    pub fn claims(&self) -> u32 {
        self.claims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentApi for FakeApi {
    async fn register(&self, _name: Option<&str>, _metadata: JsonValue) -> Result<(), ClientError> {
        Ok(())
    }

    async fn heartbeat(&self, status: AgentStatus, active_tasks: u32) -> Result<(), ClientError> {
        self.heartbeats.lock().unwrap().push((status, active_tasks));
        Ok(())
    }

    async fn claim(&self) -> Result<Option<Task>, ClientError> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(self.queue.lock().unwrap().pop_front())
    }

    async fn report(&self, report: &TaskReport) -> Result<(), ClientError> {
        self.report_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_reports.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_reports.store(failing - 1, Ordering::SeqCst);
            let status = u16::try_from(self.failure_status.load(Ordering::SeqCst)).unwrap_or(502);
            return Err(ClientError::Status {
                status,
                body: "refused".into(),
            });
        }
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }

    async fn verification_code(&self, task_id: TaskId) -> Result<Option<String>, ClientError> {
        Ok(self
            .codes
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| *id == task_id)
            .map(|(_, code)| code.clone()))
    }
}
