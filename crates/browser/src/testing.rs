//! Scripted in-memory browser for tests.
//!
//! Pages share one [`Script`] describing which elements exist, what each
//! navigation returns and what scripts evaluate to, and one action log that
//! tests assert against. Every element is laid out at (100, 200) sized 80x30.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use jobrelay_retry::AutomationError;

use crate::engine::{BoundingBox, BrowserContext, BrowserEngine, LaunchOptions, Page};
use crate::fingerprint::Fingerprint;

pub const FAKE_BOX: BoundingBox = BoundingBox {
    x: 100.0,
    y: 200.0,
    width: 80.0,
    height: 30.0,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Goto(String),
    Focus(String),
    Clear(String),
    Type(String, String),
    Click { selector: String, x: f64, y: f64 },
    Upload(String, PathBuf),
    Evaluate(String),
    ClosePage,
}

#[derive(Debug, Default)]
pub struct Script {
    statuses: VecDeque<Option<u16>>,
    elements: HashSet<String>,
    hidden: HashSet<String>,
    evaluations: Vec<(String, VecDeque<JsonValue>)>,
    reveals: HashMap<String, Vec<String>>,
    failures: HashMap<String, usize>,
}

impl Script {
    /// Statuses returned by successive navigations; `Some(200)` once drained.
    pub fn push_statuses(&mut self, statuses: impl IntoIterator<Item = Option<u16>>) -> &mut Self {
        self.statuses.extend(statuses);
        self
    }

    pub fn add_element(&mut self, selector: &str) -> &mut Self {
        self.elements.insert(selector.to_string());
        self
    }

    /// Present in the DOM but not visible.
    pub fn add_hidden_element(&mut self, selector: &str) -> &mut Self {
        self.elements.insert(selector.to_string());
        self.hidden.insert(selector.to_string());
        self
    }

    /// Clicking `trigger` makes `selectors` appear and hides `trigger`.
    pub fn reveal_on_click(&mut self, trigger: &str, selectors: &[&str]) -> &mut Self {
        self.reveals.insert(
            trigger.to_string(),
            selectors.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// After `calls` successful types or uploads into `selector`, the next
    /// one fails with a `Form` error. Later calls succeed.
    pub fn fail_once_after(&mut self, selector: &str, calls: usize) -> &mut Self {
        self.failures.insert(selector.to_string(), calls);
        self
    }

    fn take_failure(&mut self, selector: &str) -> Option<AutomationError> {
        let left = self.failures.get_mut(selector)?;
        if *left > 0 {
            *left -= 1;
            return None;
        }
        self.failures.remove(selector);
        Some(AutomationError::Form(format!("{selector} detached from the document")))
    }

    /// Scripts containing `needle` evaluate to the queued values in order;
    /// the last value repeats.
    pub fn on_evaluate(&mut self, needle: &str, values: impl IntoIterator<Item = JsonValue>) -> &mut Self {
        self.evaluations
            .push((needle.to_string(), values.into_iter().collect()));
        self
    }

    fn evaluate(&mut self, script: &str) -> JsonValue {
        for (needle, values) in &mut self.evaluations {
            if script.contains(needle.as_str()) {
                return if values.len() > 1 {
                    values.pop_front().unwrap_or(JsonValue::Null)
                } else {
                    values.front().cloned().unwrap_or(JsonValue::Null)
                };
            }
        }
        JsonValue::Null
    }
}

#[derive(Debug, Default)]
struct Log {
    actions: Vec<Action>,
    launches: usize,
    contexts_opened: usize,
    contexts_closed: usize,
    closed: bool,
    values: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    script: Mutex<Script>,
    log: Mutex<Log>,
}

impl Inner {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn log(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, action: Action) {
        self.log().actions.push(action);
    }
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    inner: Arc<Inner>,
}

impl FakeEngine {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.inner.script()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.inner.log().actions.clone()
    }

    pub fn launches(&self) -> usize {
        self.inner.log().launches
    }

    pub fn contexts_opened(&self) -> usize {
        self.inner.log().contexts_opened
    }

    pub fn contexts_closed(&self) -> usize {
        self.inner.log().contexts_closed
    }

    pub fn is_closed(&self) -> bool {
        self.inner.log().closed
    }

    /// Concatenation of everything typed into `selector`.
    pub fn typed_into(&self, selector: &str) -> String {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Type(s, text) if s == selector => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Current value of an input: typed text since its last clear.
    pub fn value_of(&self, selector: &str) -> String {
        self.inner.log().values.get(selector).cloned().unwrap_or_default()
    }

    pub fn clicked(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Click { selector, .. } => Some(selector),
                _ => None,
            })
            .collect()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Goto(url) => Some(url),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl BrowserEngine for FakeEngine {
    async fn launch(&self, _options: &LaunchOptions) -> Result<(), AutomationError> {
        self.inner.log().launches += 1;
        Ok(())
    }

    async fn new_context(
        &self,
        _fingerprint: &Fingerprint,
    ) -> Result<Box<dyn BrowserContext>, AutomationError> {
        let mut log = self.inner.log();
        log.contexts_opened += 1;
        Ok(Box::new(FakeContext {
            id: format!("ctx-{}", log.contexts_opened),
            inner: self.inner.clone(),
        }))
    }

    async fn close(&self) -> Result<(), AutomationError> {
        self.inner.log().closed = true;
        Ok(())
    }
}

struct FakeContext {
    id: String,
    inner: Arc<Inner>,
}

#[async_trait]
impl BrowserContext for FakeContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn new_page(&self) -> Result<Box<dyn Page>, AutomationError> {
        Ok(Box::new(FakePage {
            inner: self.inner.clone(),
            url: Mutex::new("about:blank".to_string()),
            last_box: Mutex::new(None),
        }))
    }

    async fn close(&self) -> Result<(), AutomationError> {
        self.inner.log().contexts_closed += 1;
        Ok(())
    }
}

struct FakePage {
    inner: Arc<Inner>,
    url: Mutex<String>,
    last_box: Mutex<Option<String>>,
}

impl FakePage {
    fn exists(&self, selector: &str) -> bool {
        self.inner.script().elements.contains(selector)
    }

    fn missing(selector: &str) -> AutomationError {
        AutomationError::PortalChange(format!("selector {selector} not found"))
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<Option<u16>, AutomationError> {
        self.inner.record(Action::Goto(url.to_string()));
        *self.url.lock().unwrap_or_else(|p| p.into_inner()) = url.to_string();
        Ok(self.inner.script().statuses.pop_front().unwrap_or(Some(200)))
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<(), AutomationError> {
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<(), AutomationError> {
        if self.exists(selector) {
            Ok(())
        } else {
            Err(Self::missing(selector))
        }
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, AutomationError> {
        let script = self.inner.script();
        Ok(script.elements.contains(selector) && !script.hidden.contains(selector))
    }

    async fn bounding_box(&self, selector: &str) -> Result<Option<BoundingBox>, AutomationError> {
        if !self.exists(selector) {
            return Ok(None);
        }
        *self.last_box.lock().unwrap_or_else(|p| p.into_inner()) = Some(selector.to_string());
        Ok(Some(FAKE_BOX))
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        let selector = self
            .last_box
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .unwrap_or_default();
        {
            let mut script = self.inner.script();
            if let Some(revealed) = script.reveals.remove(&selector) {
                script.elements.remove(&selector);
                script.elements.extend(revealed);
            }
        }
        self.inner.record(Action::Click { selector, x, y });
        Ok(())
    }

    async fn focus(&self, selector: &str) -> Result<(), AutomationError> {
        self.inner.record(Action::Focus(selector.to_string()));
        Ok(())
    }

    async fn clear_input(&self, selector: &str) -> Result<(), AutomationError> {
        self.inner.record(Action::Clear(selector.to_string()));
        self.inner.log().values.remove(selector);
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), AutomationError> {
        if !self.exists(selector) {
            return Err(Self::missing(selector));
        }
        if let Some(err) = self.inner.script().take_failure(selector) {
            return Err(err);
        }
        self.inner
            .record(Action::Type(selector.to_string(), text.to_string()));
        self.inner
            .log()
            .values
            .entry(selector.to_string())
            .or_default()
            .push_str(text);
        Ok(())
    }

    async fn set_input_files(&self, selector: &str, path: &Path) -> Result<(), AutomationError> {
        if !self.exists(selector) {
            return Err(Self::missing(selector));
        }
        if let Some(err) = self.inner.script().take_failure(selector) {
            return Err(err);
        }
        self.inner
            .record(Action::Upload(selector.to_string(), path.to_path_buf()));
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<JsonValue, AutomationError> {
        self.inner.record(Action::Evaluate(script.to_string()));
        Ok(self.inner.script().evaluate(script))
    }

    async fn url(&self) -> Result<String, AutomationError> {
        Ok(self.url.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    async fn close(&self) -> Result<(), AutomationError> {
        self.inner.record(Action::ClosePage);
        Ok(())
    }
}
