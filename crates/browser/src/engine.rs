//! The seam between the driver and a concrete browser.
//!
//! The driver only speaks these traits. `cdp` implements them over the Chrome
//! DevTools Protocol; `testing` implements them with a scripted fake.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobrelay_retry::AutomationError;

use crate::fingerprint::Fingerprint;

/// Browser process launch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Explicit browser binary; auto-detected when `None`.
    pub executable: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            extra_args: Vec::new(),
        }
    }
}

/// Element rectangle in CSS pixels, relative to the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One browser process.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<(), AutomationError>;

    /// A fresh isolated context (own cookies, storage and cache) whose pages
    /// present `fingerprint`.
    async fn new_context(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Box<dyn BrowserContext>, AutomationError>;

    /// Terminate the browser process.
    async fn close(&self) -> Result<(), AutomationError>;
}

#[async_trait]
pub trait BrowserContext: Send + Sync {
    fn id(&self) -> &str;

    async fn new_page(&self) -> Result<Box<dyn Page>, AutomationError>;

    async fn close(&self) -> Result<(), AutomationError>;
}

/// A single tab. Elements are addressed by CSS selector.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate and return the main document's HTTP status, if a response
    /// was received.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<Option<u16>, AutomationError>;

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), AutomationError>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
    -> Result<(), AutomationError>;

    async fn is_visible(&self, selector: &str) -> Result<bool, AutomationError>;

    async fn bounding_box(&self, selector: &str) -> Result<Option<BoundingBox>, AutomationError>;

    async fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError>;

    async fn focus(&self, selector: &str) -> Result<(), AutomationError>;

    /// Empty an input's current value.
    async fn clear_input(&self, selector: &str) -> Result<(), AutomationError>;

    /// Type `text` into the element as keyboard input.
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), AutomationError>;

    async fn set_input_files(&self, selector: &str, path: &Path) -> Result<(), AutomationError>;

    /// Evaluate a script expression and return its JSON value
    /// (`Null` for `undefined`).
    async fn evaluate(&self, script: &str) -> Result<JsonValue, AutomationError>;

    async fn url(&self) -> Result<String, AutomationError>;

    async fn close(&self) -> Result<(), AutomationError>;
}

/// JSON-quote `s` for embedding in a script.
pub(crate) fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}
