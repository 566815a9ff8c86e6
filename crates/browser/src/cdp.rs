//! Chrome DevTools Protocol engine built on `chromiumoxide`.
//!
//! One Chromium process per engine; each context is a CDP browser context,
//! so cookies and storage never leak between tasks.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::layout::Point;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use jobrelay_retry::AutomationError;

use crate::engine::{js_string, BoundingBox, BrowserContext, BrowserEngine, LaunchOptions, Page};
use crate::fingerprint::{Fingerprint, LAUNCH_ARGS};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Resource count must hold still this long to count as idle.
const IDLE_QUIET: Duration = Duration::from_millis(500);

fn browser_err(e: impl std::fmt::Display) -> AutomationError {
    AutomationError::Browser(e.to_string())
}

#[derive(Default)]
struct Shared {
    browser: RwLock<Option<Browser>>,
}

#[derive(Default)]
pub struct CdpEngine {
    shared: Arc<Shared>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl CdpEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for CdpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpEngine").finish_non_exhaustive()
    }
}

#[async_trait]
impl BrowserEngine for CdpEngine {
    async fn launch(&self, options: &LaunchOptions) -> Result<(), AutomationError> {
        let mut slot = self.shared.browser.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let mut builder = BrowserConfig::builder().args(
            LAUNCH_ARGS
                .iter()
                .map(|a| a.to_string())
                .chain(options.extra_args.iter().cloned()),
        );
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(exe) = &options.executable {
            builder = builder.chrome_executable(exe);
        }
        let config = builder.build().map_err(AutomationError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;
        let join = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "cdp handler event error");
                }
            }
        });

        *slot = Some(browser);
        *self.handler.lock().await = Some(join);
        info!(headless = options.headless, "browser launched");
        Ok(())
    }

    async fn new_context(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Box<dyn BrowserContext>, AutomationError> {
        let guard = self.shared.browser.read().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| AutomationError::Browser("browser not started".into()))?;
        let id = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(browser_err)?
            .result
            .browser_context_id;

        Ok(Box::new(CdpContext {
            shared: self.shared.clone(),
            id,
            fingerprint: fingerprint.clone(),
        }))
    }

    async fn close(&self) -> Result<(), AutomationError> {
        let browser = self.shared.browser.write().await.take();
        if let Some(mut browser) = browser {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "browser close failed");
            }
            let _ = browser.wait().await;
        }
        if let Some(join) = self.handler.lock().await.take() {
            join.abort();
        }
        info!("browser stopped");
        Ok(())
    }
}

struct CdpContext {
    shared: Arc<Shared>,
    id: BrowserContextId,
    fingerprint: Fingerprint,
}

#[async_trait]
impl BrowserContext for CdpContext {
    fn id(&self) -> &str {
        self.id.inner()
    }

    async fn new_page(&self) -> Result<Box<dyn Page>, AutomationError> {
        let guard = self.shared.browser.read().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| AutomationError::Browser("browser not started".into()))?;

        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(self.id.clone())
            .build()
            .map_err(AutomationError::Browser)?;
        let page = browser.new_page(params).await.map_err(browser_err)?;

        let fp = &self.fingerprint;
        let mut ua = SetUserAgentOverrideParams::new(fp.user_agent.clone());
        ua.accept_language = Some(fp.locale.clone());
        page.execute(ua).await.map_err(browser_err)?;
        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(fp.viewport_width),
            i64::from(fp.viewport_height),
            1.0,
            false,
        ))
        .await
        .map_err(browser_err)?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(fp.stealth_script()))
            .await
            .map_err(browser_err)?;

        Ok(Box::new(CdpPage { page }))
    }

    async fn close(&self) -> Result<(), AutomationError> {
        let guard = self.shared.browser.read().await;
        if let Some(browser) = guard.as_ref() {
            browser
                .execute(DisposeBrowserContextParams::new(self.id.clone()))
                .await
                .map_err(browser_err)?;
        }
        Ok(())
    }
}

struct CdpPage {
    page: chromiumoxide::Page,
}

impl CdpPage {
    async fn eval_value(&self, script: String) -> Result<JsonValue, AutomationError> {
        let result = self.page.evaluate(script).await.map_err(browser_err)?;
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }

    async fn resource_count(&self) -> Result<(bool, u64), AutomationError> {
        let v = self
            .eval_value(
                "[document.readyState === 'complete', performance.getEntriesByType('resource').length]"
                    .to_string(),
            )
            .await?;
        let ready = v.get(0).and_then(JsonValue::as_bool).unwrap_or(false);
        let count = v.get(1).and_then(JsonValue::as_u64).unwrap_or(0);
        Ok((ready, count))
    }
}

#[async_trait]
impl Page for CdpPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<Option<u16>, AutomationError> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Err(_) => {
                return Err(AutomationError::Navigation(format!(
                    "timed out after {}s loading {url}",
                    timeout.as_secs()
                )));
            }
            Ok(Err(e)) => return Err(AutomationError::Navigation(e.to_string())),
            Ok(Ok(_)) => {}
        }
        let status = self
            .eval_value(
                "(() => { const n = performance.getEntriesByType('navigation')[0]; \
                 return n && n.responseStatus ? n.responseStatus : null; })()"
                    .to_string(),
            )
            .await?;
        Ok(status.as_u64().and_then(|s| u16::try_from(s).ok()))
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), AutomationError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut last = None;
        let mut quiet_since = tokio::time::Instant::now();
        loop {
            let (ready, count) = self.resource_count().await?;
            let now = tokio::time::Instant::now();
            if last != Some(count) {
                last = Some(count);
                quiet_since = now;
            } else if ready && now - quiet_since >= IDLE_QUIET {
                return Ok(());
            }
            if now >= deadline {
                return Err(AutomationError::Navigation(format!(
                    "network not idle after {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), AutomationError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AutomationError::PortalChange(format!(
                    "selector {selector} not found within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, AutomationError> {
        let v = self
            .eval_value(format!(
                "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
                 const r = el.getBoundingClientRect(); const s = getComputedStyle(el); \
                 return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; }})()",
                sel = js_string(selector)
            ))
            .await?;
        Ok(v.as_bool().unwrap_or(false))
    }

    async fn bounding_box(&self, selector: &str) -> Result<Option<BoundingBox>, AutomationError> {
        let v = self
            .eval_value(format!(
                "(() => {{ const el = document.querySelector({sel}); if (!el) return null; \
                 el.scrollIntoView({{ block: 'center' }}); const r = el.getBoundingClientRect(); \
                 return {{ x: r.x, y: r.y, width: r.width, height: r.height }}; }})()",
                sel = js_string(selector)
            ))
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        serde_json::from_value(v).map(Some).map_err(browser_err)
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        self.page.click(Point { x, y }).await.map_err(browser_err)?;
        Ok(())
    }

    async fn focus(&self, selector: &str) -> Result<(), AutomationError> {
        self.eval_value(format!(
            "(() => {{ const el = document.querySelector({sel}); if (el) el.focus(); return !!el; }})()",
            sel = js_string(selector)
        ))
        .await?;
        Ok(())
    }

    async fn clear_input(&self, selector: &str) -> Result<(), AutomationError> {
        self.eval_value(format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; el.value = ''; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); return true; }})()",
            sel = js_string(selector)
        ))
        .await?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), AutomationError> {
        let el = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| AutomationError::Form(format!("{selector}: {e}")))?;
        el.type_str(text)
            .await
            .map_err(|e| AutomationError::Form(e.to_string()))?;
        Ok(())
    }

    async fn set_input_files(&self, selector: &str, path: &Path) -> Result<(), AutomationError> {
        let el = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| AutomationError::Form(format!("{selector}: {e}")))?;
        self.page
            .execute(SetFileInputFilesParams {
                files: vec![path.display().to_string()],
                node_id: None,
                backend_node_id: Some(el.backend_node_id),
                object_id: None,
            })
            .await
            .map_err(|e| AutomationError::Form(format!("{selector}: {e}")))?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<JsonValue, AutomationError> {
        self.eval_value(script.to_string()).await
    }

    async fn url(&self) -> Result<String, AutomationError> {
        Ok(self.page.url().await.map_err(browser_err)?.unwrap_or_default())
    }

    async fn close(&self) -> Result<(), AutomationError> {
        self.page.clone().close().await.map_err(browser_err)
    }
}
