//! Browser Automation Driver: session lifecycle plus the retried, humanized
//! interaction primitives every portal strategy is built from.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use jobrelay_retry::{AutomationError, RetryEngine, RetryPolicy};

use crate::engine::{BrowserContext, BrowserEngine, LaunchOptions, Page};
use crate::fingerprint::Fingerprint;
use crate::humanize;

pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const NETWORK_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const FILE_INPUT_TIMEOUT: Duration = Duration::from_secs(30);

/// A page inside its own context. Owned by exactly one task.
#[derive(Clone)]
pub struct Session {
    key: u64,
    pub context: Arc<dyn BrowserContext>,
    pub page: Arc<dyn Page>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("context", &self.context.id())
            .finish()
    }
}

pub struct BrowserDriver {
    engine: Arc<dyn BrowserEngine>,
    retry: Arc<RetryEngine>,
    launch: LaunchOptions,
    started: Mutex<bool>,
    contexts: Mutex<HashMap<u64, Arc<dyn BrowserContext>>>,
    next_key: AtomicU64,
}

impl std::fmt::Debug for BrowserDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserDriver")
            .field("launch", &self.launch)
            .finish_non_exhaustive()
    }
}

impl BrowserDriver {
    pub fn new(engine: Arc<dyn BrowserEngine>, retry: Arc<RetryEngine>, launch: LaunchOptions) -> Self {
        Self {
            engine,
            retry,
            launch,
            started: Mutex::new(false),
            contexts: Mutex::new(HashMap::new()),
            next_key: AtomicU64::new(1),
        }
    }

    pub fn retry_engine(&self) -> &Arc<RetryEngine> {
        &self.retry
    }

    /// Launch the shared browser process. Later calls are no-ops.
    pub async fn start(&self) -> Result<(), AutomationError> {
        let mut started = self.started.lock().await;
        if *started {
            return Ok(());
        }
        self.engine.launch(&self.launch).await?;
        *started = true;
        Ok(())
    }

    /// Fresh context with a randomized fingerprint.
    pub async fn create_context(&self) -> Result<(u64, Arc<dyn BrowserContext>), AutomationError> {
        if !*self.started.lock().await {
            return Err(AutomationError::Browser("driver not started".into()));
        }
        let fingerprint = Fingerprint::random(&mut rand::thread_rng());
        let context: Arc<dyn BrowserContext> = Arc::from(self.engine.new_context(&fingerprint).await?);
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.contexts.lock().await.insert(key, context.clone());
        debug!(context = context.id(), user_agent = %fingerprint.user_agent, "context created");
        Ok((key, context))
    }

    pub async fn create_session(&self) -> Result<Session, AutomationError> {
        let (key, context) = self.create_context().await?;
        match context.new_page().await {
            Ok(page) => Ok(Session {
                key,
                context,
                page: Arc::from(page),
            }),
            Err(e) => {
                self.release(key, &context).await;
                Err(e)
            }
        }
    }

    pub async fn close_session(&self, session: Session) {
        if let Err(e) = session.page.close().await {
            debug!(error = %e, "page close failed");
        }
        self.release(session.key, &session.context).await;
    }

    /// Run `f` in a fresh session that is closed afterwards whatever the outcome.
    pub async fn run_in_session<T, F, Fut>(&self, f: F) -> Result<T, AutomationError>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, AutomationError>>,
    {
        let session = self.create_session().await?;
        let result = f(session.clone()).await;
        self.close_session(session).await;
        result
    }

    async fn release(&self, key: u64, context: &Arc<dyn BrowserContext>) {
        self.contexts.lock().await.remove(&key);
        if let Err(e) = context.close().await {
            warn!(context = context.id(), error = %e, "context close failed");
        }
    }

    pub async fn open_contexts(&self) -> usize {
        self.contexts.lock().await.len()
    }

    #[instrument(skip(self, page), err)]
    pub async fn navigate_to_job(&self, page: &dyn Page, url: &str) -> Result<(), AutomationError> {
        self.retry
            .execute(&RetryPolicy::navigation(), "navigate_to_job", || async move {
                match page.goto(url, NAVIGATION_TIMEOUT).await? {
                    None => {
                        return Err(AutomationError::Navigation(format!("no response from {url}")));
                    }
                    Some(status) if status >= 400 => {
                        return Err(AutomationError::Navigation(format!("HTTP {status} from {url}")));
                    }
                    Some(_) => {}
                }
                page.wait_for_network_idle(NETWORK_IDLE_TIMEOUT).await
            })
            .await
    }

    /// Type `text` one character at a time with a random pause after each.
    /// Every attempt starts from an empty field.
    pub async fn type_slowly(
        &self,
        page: &dyn Page,
        selector: &str,
        text: &str,
    ) -> Result<(), AutomationError> {
        self.retry
            .execute(&RetryPolicy::form_fill(), "type_slowly", || async move {
                page.wait_for_selector(selector, ACTION_TIMEOUT).await?;
                page.clear_input(selector).await?;
                page.focus(selector).await?;
                let delays = humanize::typing_delays(text, &mut rand::thread_rng());
                for (ch, delay) in text.chars().zip(delays) {
                    let mut buf = [0u8; 4];
                    page.type_text(selector, ch.encode_utf8(&mut buf)).await?;
                    tokio::time::sleep(delay).await;
                }
                Ok(())
            })
            .await
    }

    /// Click a random point inside the element after a short pause.
    pub async fn click_human(&self, page: &dyn Page, selector: &str) -> Result<(), AutomationError> {
        self.retry
            .execute(&RetryPolicy::form_fill(), "click_human", || async move {
                page.wait_for_selector(selector, ACTION_TIMEOUT).await?;
                let bbox = page.bounding_box(selector).await?.ok_or_else(|| {
                    AutomationError::Form(format!("{selector} has no layout box"))
                })?;
                let (pause, (x, y)) = {
                    let mut rng = rand::thread_rng();
                    (humanize::pre_click_pause(&mut rng), humanize::click_point(&bbox, &mut rng))
                };
                tokio::time::sleep(pause).await;
                page.click_at(x, y).await
            })
            .await
    }

    /// Attach a local file to a file input. A missing file fails before the
    /// browser is touched and is never retried.
    pub async fn upload_file(
        &self,
        page: &dyn Page,
        selector: &str,
        path: &Path,
    ) -> Result<(), AutomationError> {
        self.retry
            .execute(&RetryPolicy::file_upload(), "upload_file", || async move {
                if !path.exists() {
                    return Err(AutomationError::FileUpload(format!(
                        "file not found: {}",
                        path.display()
                    )));
                }
                page.wait_for_selector(selector, FILE_INPUT_TIMEOUT).await?;
                page.set_input_files(selector, path).await
            })
            .await
    }

    /// Close every outstanding context, then the browser process.
    pub async fn stop(&self) -> Result<(), AutomationError> {
        let contexts: Vec<_> = self.contexts.lock().await.drain().collect();
        for (_, context) in &contexts {
            if let Err(e) = context.close().await {
                warn!(context = context.id(), error = %e, "context close failed during shutdown");
            }
        }
        let mut started = self.started.lock().await;
        if *started {
            self.engine.close().await?;
            *started = false;
        }
        info!(closed_contexts = contexts.len(), "browser driver stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Action, FakeEngine};
    use std::path::PathBuf;

    fn driver(engine: &Arc<FakeEngine>) -> BrowserDriver {
        BrowserDriver::new(engine.clone(), Arc::new(RetryEngine::new()), LaunchOptions::default())
    }

    #[tokio::test]
    async fn sessions_require_start() {
        let engine = FakeEngine::arc();
        let driver = driver(&engine);
        assert!(matches!(driver.create_session().await, Err(AutomationError::Browser(_))));

        driver.start().await.unwrap();
        driver.start().await.unwrap();
        assert_eq!(engine.launches(), 1);
    }

    #[tokio::test]
    async fn run_in_session_closes_context_on_failure() {
        let engine = FakeEngine::arc();
        let driver = driver(&engine);
        driver.start().await.unwrap();

        let out: Result<(), _> = driver
            .run_in_session(|_s| async { Err(AutomationError::Form("boom".into())) })
            .await;
        assert!(out.is_err());
        assert_eq!(driver.open_contexts().await, 0);
        assert_eq!(engine.contexts_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_retries_error_statuses() {
        let engine = FakeEngine::arc();
        engine.script().push_statuses([Some(503), None, Some(200)]);
        let driver = driver(&engine);
        driver.start().await.unwrap();
        let session = driver.create_session().await.unwrap();

        driver
            .navigate_to_job(session.page.as_ref(), "https://jobs.example.com/1")
            .await
            .unwrap();
        let gotos = engine
            .actions()
            .into_iter()
            .filter(|a| matches!(a, Action::Goto(_)))
            .count();
        assert_eq!(gotos, 3);
        assert_eq!(driver.retry_engine().recent_errors(10).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_gives_up_after_policy_attempts() {
        let engine = FakeEngine::arc();
        engine.script().push_statuses([Some(404), Some(404), Some(404), Some(200)]);
        let driver = driver(&engine);
        driver.start().await.unwrap();
        let session = driver.create_session().await.unwrap();

        let err = driver
            .navigate_to_job(session.page.as_ref(), "https://jobs.example.com/gone")
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::Navigation(ref m) if m.contains("404")));
    }

    #[tokio::test(start_paused = true)]
    async fn type_slowly_sends_one_key_per_character() {
        let engine = FakeEngine::arc();
        engine.script().add_element("#email");
        let driver = driver(&engine);
        driver.start().await.unwrap();
        let session = driver.create_session().await.unwrap();

        driver
            .type_slowly(session.page.as_ref(), "#email", "a@b.c")
            .await
            .unwrap();
        assert_eq!(engine.typed_into("#email"), "a@b.c");
    }

    #[tokio::test(start_paused = true)]
    async fn retried_typing_starts_from_an_empty_field() {
        let engine = FakeEngine::arc();
        engine
            .script()
            .add_element("#email")
            .fail_once_after("#email", 3);
        let driver = driver(&engine);
        driver.start().await.unwrap();
        let session = driver.create_session().await.unwrap();

        driver
            .type_slowly(session.page.as_ref(), "#email", "ada@example.com")
            .await
            .unwrap();
        assert_eq!(engine.value_of("#email"), "ada@example.com");
        let clears = engine
            .actions()
            .into_iter()
            .filter(|a| matches!(a, Action::Clear(s) if s == "#email"))
            .count();
        assert_eq!(clears, 2);
        assert_eq!(driver.retry_engine().recent_errors(10).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn click_lands_inside_the_element() {
        let engine = FakeEngine::arc();
        engine.script().add_element("button.submit");
        let driver = driver(&engine);
        driver.start().await.unwrap();
        let session = driver.create_session().await.unwrap();

        driver.click_human(session.page.as_ref(), "button.submit").await.unwrap();
        let (x, y) = engine
            .actions()
            .into_iter()
            .find_map(|a| match a {
                Action::Click { x, y, .. } => Some((x, y)),
                _ => None,
            })
            .unwrap();
        // FakeEngine lays every element out at (100, 200) sized 80x30.
        assert!((120.0..=160.0).contains(&x));
        assert!((207.5..=222.5).contains(&y));
    }

    #[tokio::test]
    async fn missing_upload_file_fails_without_touching_the_page() {
        let engine = FakeEngine::arc();
        engine.script().add_element("input[type=file]");
        let driver = driver(&engine);
        driver.start().await.unwrap();
        let session = driver.create_session().await.unwrap();
        let before = engine.actions().len();

        let err = driver
            .upload_file(
                session.page.as_ref(),
                "input[type=file]",
                &PathBuf::from("/definitely/not/here.pdf"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::FileUpload(_)));
        assert_eq!(engine.actions().len(), before);
        let recent = driver.retry_engine().recent_errors(1);
        assert!(!recent[0].retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_upload_failure_is_retried() {
        let engine = FakeEngine::arc();
        engine
            .script()
            .add_element("input[type=file]")
            .fail_once_after("input[type=file]", 0);
        let driver = driver(&engine);
        driver.start().await.unwrap();
        let session = driver.create_session().await.unwrap();
        let resume = std::env::temp_dir().join(format!("cv-{}.pdf", jobrelay_core::TaskId::new()));
        std::fs::write(&resume, b"%PDF").unwrap();

        let out = driver
            .upload_file(session.page.as_ref(), "input[type=file]", &resume)
            .await;
        std::fs::remove_file(&resume).ok();

        out.unwrap();
        let uploads = engine
            .actions()
            .into_iter()
            .filter(|a| matches!(a, Action::Upload(..)))
            .count();
        assert_eq!(uploads, 1);
        let recent = driver.retry_engine().recent_errors(1);
        assert!(recent[0].retryable);
    }

    #[tokio::test]
    async fn stop_closes_outstanding_contexts_then_browser() {
        let engine = FakeEngine::arc();
        let driver = driver(&engine);
        driver.start().await.unwrap();
        let _a = driver.create_session().await.unwrap();
        let _b = driver.create_session().await.unwrap();

        driver.stop().await.unwrap();
        assert_eq!(engine.contexts_closed(), 2);
        assert!(engine.is_closed());
        assert_eq!(driver.open_contexts().await, 0);
    }
}
