//! Claim → execute → report loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use jobrelay_browser::{BrowserDriver, JobScraper, UserProfile};
use jobrelay_retry::{AutomationError, RetryPolicy};
use jobrelay_tasks::{Task, TaskPayload, TaskReport, TaskType};

use crate::client::{AgentApi, ClientError};
use crate::profile::LocalResumeStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub auto_apply: usize,
    pub deep_scrape: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            auto_apply: 5,
            deep_scrape: 10,
        }
    }
}

pub struct Runner {
    api: Arc<dyn AgentApi>,
    driver: Arc<BrowserDriver>,
    scraper: JobScraper,
    profile: UserProfile,
    resumes: LocalResumeStore,
    limits: Limits,
    active: Arc<AtomicU32>,
}

fn to_json<T: Serialize>(value: &T) -> Result<JsonValue, AutomationError> {
    serde_json::to_value(value).map_err(|e| AutomationError::Other(e.to_string()))
}

impl Runner {
    pub fn new(
        api: Arc<dyn AgentApi>,
        driver: Arc<BrowserDriver>,
        scraper: JobScraper,
        profile: UserProfile,
        resumes: LocalResumeStore,
        limits: Limits,
    ) -> Self {
        Self {
            api,
            driver,
            scraper,
            profile,
            resumes,
            limits,
            active: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Shared counter the heartbeat reports as `active_tasks`.
    pub fn active_tasks(&self) -> Arc<AtomicU32> {
        self.active.clone()
    }

    /// Claim and process at most one task. `Ok(false)` when the queue was empty.
    pub async fn run_once(&self) -> Result<bool, ClientError> {
        let Some(task) = self.api.claim().await? else {
            return Ok(false);
        };
        info!(task_id = %task.id, task_type = %task.task_type, "task claimed");

        self.active.fetch_add(1, Ordering::SeqCst);
        let report = match self.execute(&task).await {
            Ok(result) => TaskReport::completed(task.id, result),
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "task failed");
                TaskReport::failed(task.id, e.to_string())
            }
        };
        self.active.fetch_sub(1, Ordering::SeqCst);

        let api = &self.api;
        let report = &report;
        let sent = self
            .driver
            .retry_engine()
            .execute(&RetryPolicy::network(), "report_result", || async move {
                api.report(report).await.map_err(AutomationError::from)
            })
            .await;
        if let Err(e) = sent {
            error!(task_id = %task.id, error = %e, "could not report task result");
        }
        Ok(true)
    }

    /// Run one task in a fresh browser session.
    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type))]
    pub async fn execute(&self, task: &Task) -> Result<JsonValue, AutomationError> {
        let payload = TaskPayload::decode(task.task_type, &task.payload)
            .map_err(|e| AutomationError::NonRetryable(e.to_string()))?;

        match (task.task_type, payload) {
            (TaskType::Scrape, TaskPayload::Scrape(p)) => {
                self.driver
                    .run_in_session(|s| async move {
                        to_json(&self.scraper.scrape(s.page.as_ref(), &p).await?)
                    })
                    .await
            }
            (TaskType::DeepScrape, TaskPayload::Scrape(p)) => {
                let limit = self.limits.deep_scrape;
                self.driver
                    .run_in_session(|s| async move {
                        to_json(&self.scraper.deep_scrape(s.page.as_ref(), &p, limit).await?)
                    })
                    .await
            }
            (TaskType::AutoApply, TaskPayload::Scrape(p)) => {
                let resume = self.resumes.resolve(None);
                let limit = self.limits.auto_apply;
                self.driver
                    .run_in_session(|s| async move {
                        let report = self
                            .scraper
                            .auto_apply(
                                s.page.as_ref(),
                                &p,
                                &self.profile,
                                resume.as_deref(),
                                task.id,
                                limit,
                            )
                            .await?;
                        to_json(&report)
                    })
                    .await
            }
            (TaskType::Apply, TaskPayload::Apply(p)) => {
                let resume = self.resumes.resolve(Some(&p.resume_id));
                if resume.is_none() {
                    warn!(resume_id = %p.resume_id, "resume not found locally, applying without upload");
                }
                self.driver
                    .run_in_session(|s| async move {
                        let outcome = self
                            .scraper
                            .apply_one(
                                s.page.as_ref(),
                                &p.job_url,
                                &self.profile,
                                resume.as_deref(),
                                task.id,
                            )
                            .await;
                        if outcome.success {
                            to_json(&outcome)
                        } else {
                            Err(AutomationError::Other(
                                outcome.error.unwrap_or_else(|| "application failed".to_string()),
                            ))
                        }
                    })
                    .await
            }
            (other, _) => Err(AutomationError::NonRetryable(format!(
                "{other} tasks are not executed by browser agents"
            ))),
        }
    }

    /// Process tasks until `shutdown` flips to true. The task in hand is
    /// always finished and reported first.
    pub async fn run(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("agent loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let idle = match self.run_once().await {
                Ok(true) => false,
                Ok(false) => true,
                Err(e) if e.is_rate_limited() => {
                    info!("hourly task limit reached, backing off");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "claim failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
        info!("agent loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;
    use chrono::Utc;
    use jobrelay_browser::portals::{HeuristicFieldMapper, PortalRegistry};
    use jobrelay_browser::testing::FakeEngine;
    use jobrelay_browser::LaunchOptions;
    use jobrelay_core::OwnerId;
    use jobrelay_retry::RetryEngine;
    use jobrelay_tasks::ReportStatus;
    use serde_json::json;

    async fn runner(engine: &Arc<FakeEngine>, api: &Arc<FakeApi>) -> Runner {
        let driver = Arc::new(BrowserDriver::new(
            engine.clone(),
            Arc::new(RetryEngine::new()),
            LaunchOptions::default(),
        ));
        driver.start().await.unwrap();
        let portals = Arc::new(PortalRegistry::standard(
            driver.clone(),
            Arc::new(HeuristicFieldMapper),
            Arc::new(crate::client::ServerCodeSource(api.clone())),
        ));
        Runner::new(
            api.clone(),
            driver.clone(),
            JobScraper::new(driver, portals),
            UserProfile {
                first_name: "Ada".into(),
                email: "ada@example.com".into(),
                ..Default::default()
            },
            LocalResumeStore::new(std::env::temp_dir().join("jobrelay-no-resumes")),
            Limits::default(),
        )
    }

    fn task(task_type: TaskType, payload: JsonValue) -> Task {
        Task::new(OwnerId::new(), task_type, payload, None, Utc::now())
    }

    #[tokio::test(start_paused = true)]
    async fn scrape_task_is_completed_with_listings() {
        let engine = FakeEngine::arc();
        engine.script().on_evaluate(
            "jobs-search__results-list",
            [json!([{"title": "Rust Dev", "url": "https://www.linkedin.com/jobs/view/1"}])],
        );
        let api = FakeApi::arc();
        let t = task(TaskType::Scrape, json!({"portal": "linkedin", "keywords": "rust"}));
        api.enqueue(t.clone());
        let runner = runner(&engine, &api).await;

        assert!(runner.run_once().await.unwrap());
        let reports = api.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].task_id, t.id);
        assert_eq!(reports[0].status, ReportStatus::Completed);
        assert_eq!(reports[0].result_data.as_ref().unwrap()["jobs_found"], 1);
        assert_eq!(engine.contexts_closed(), 1);
        assert_eq!(runner.active_tasks().load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_application_reports_the_reason() {
        let engine = FakeEngine::arc();
        let api = FakeApi::arc();
        api.enqueue(task(
            TaskType::Apply,
            json!({"job_id": "j1", "job_url": "https://careers.acme.io/jobs/1", "resume_id": "r1"}),
        ));
        let runner = runner(&engine, &api).await;

        assert!(runner.run_once().await.unwrap());
        let report = &api.reports()[0];
        assert_eq!(report.status, ReportStatus::Failed);
        assert!(report.error_log.as_deref().unwrap().contains("no fillable form fields"));
    }

    #[tokio::test]
    async fn server_side_and_malformed_tasks_fail_fast() {
        let engine = FakeEngine::arc();
        let api = FakeApi::arc();
        api.enqueue(task(TaskType::ParseResume, json!({"resume_key": "k"})));
        api.enqueue(task(TaskType::Scrape, json!({"portal": "linkedin"})));
        let runner = runner(&engine, &api).await;

        assert!(runner.run_once().await.unwrap());
        assert!(runner.run_once().await.unwrap());
        assert!(!runner.run_once().await.unwrap());

        let reports = api.reports();
        assert!(reports.iter().all(|r| r.status == ReportStatus::Failed));
        assert!(reports[0].error_log.as_deref().unwrap().contains("PARSE_RESUME"));
        assert_eq!(engine.contexts_opened(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn report_is_retried_when_server_blips() {
        let engine = FakeEngine::arc();
        engine.script().on_evaluate("jobs-search__results-list", [json!([])]);
        let api = FakeApi::arc();
        api.fail_next_reports(2);
        api.enqueue(task(TaskType::Scrape, json!({"portal": "linkedin", "keywords": "rust"})));
        let runner = runner(&engine, &api).await;

        runner.run_once().await.unwrap();
        assert_eq!(api.reports().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_report_is_not_resent() {
        let engine = FakeEngine::arc();
        engine.script().on_evaluate("jobs-search__results-list", [json!([])]);
        let api = FakeApi::arc();
        api.fail_next_reports_with(5, 404);
        api.enqueue(task(TaskType::Scrape, json!({"portal": "linkedin", "keywords": "rust"})));
        let runner = runner(&engine, &api).await;

        assert!(runner.run_once().await.unwrap());
        assert_eq!(api.report_attempts(), 1);
        assert!(api.reports().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_on_shutdown() {
        let engine = FakeEngine::arc();
        let api = FakeApi::arc();
        let runner = Arc::new(runner(&engine, &api).await);
        let (tx, rx) = watch::channel(false);

        let r = runner.clone();
        let join = tokio::spawn(async move { r.run(Duration::from_secs(10), rx).await });
        tokio::time::sleep(Duration::from_secs(35)).await;
        tx.send(true).unwrap();
        join.await.unwrap();
        assert_eq!(api.claims(), 4);
    }
}
