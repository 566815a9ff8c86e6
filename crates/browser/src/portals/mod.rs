//! Portal Strategy Dispatcher.
//!
//! Strategies are registered as `(predicate, handler)` pairs and tried in
//! registration order; the generic form filler handles everything else.

pub mod fields;
pub mod generic;
pub mod indeed;
pub mod linkedin;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use jobrelay_core::TaskId;
use jobrelay_retry::AutomationError;

use crate::driver::BrowserDriver;
use crate::engine::Page;
use crate::profile::UserProfile;

pub use fields::{FieldMapping, FieldMappings, FormField, RESUME_UPLOAD};
pub use generic::GenericStrategy;
pub use indeed::IndeedStrategy;
pub use linkedin::LinkedinStrategy;

pub const VERIFICATION_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const VERIFICATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Maps discovered form fields to profile keys.
#[async_trait]
pub trait FieldMapper: Send + Sync {
    async fn map_fields(
        &self,
        fields: &[FormField],
        profile: &std::collections::BTreeMap<String, String>,
    ) -> Result<Vec<FieldMapping>, AutomationError>;
}

/// Maps with the built-in keyword rules, no network.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicFieldMapper;

#[async_trait]
impl FieldMapper for HeuristicFieldMapper {
    async fn map_fields(
        &self,
        fields: &[FormField],
        profile: &std::collections::BTreeMap<String, String>,
    ) -> Result<Vec<FieldMapping>, AutomationError> {
        let keys: Vec<&str> = profile.keys().map(String::as_str).collect();
        Ok(fields::heuristic_mappings(fields, &keys))
    }
}

/// Where a one-time code relayed by the owner can be picked up.
#[async_trait]
pub trait VerificationCodeSource: Send + Sync {
    async fn fetch_code(&self, task_id: TaskId) -> Result<Option<String>, AutomationError>;
}

/// Poll `source` every `interval` until a code arrives or `timeout` passes.
/// Fetch errors count as "no code yet".
pub async fn poll_verification_code(
    source: &dyn VerificationCodeSource,
    task_id: TaskId,
    interval: Duration,
    timeout: Duration,
) -> Option<String> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match source.fetch_code(task_id).await {
            Ok(Some(code)) => return Some(code),
            Ok(None) => {}
            Err(e) => debug!(task_id = %task_id, error = %e, "verification code poll failed"),
        }
        if tokio::time::Instant::now() + interval > deadline {
            return None;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Everything a strategy needs for one application.
pub struct ApplyRequest<'a> {
    pub page: &'a dyn Page,
    pub job_url: &'a str,
    pub profile: &'a UserProfile,
    pub resume_path: Option<&'a std::path::Path>,
    pub task_id: TaskId,
}

/// Strategy result. Strategies never return errors; a failed step becomes
/// `success: false` with the reason in `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub success: bool,
    pub portal: String,
    pub job_url: String,
    #[serde(default)]
    pub fields_filled: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApplyOutcome {
    pub fn submitted(portal: &str, job_url: &str, fields_filled: usize) -> Self {
        Self {
            success: true,
            portal: portal.to_string(),
            job_url: job_url.to_string(),
            fields_filled,
            error: None,
        }
    }

    pub fn failed(portal: &str, job_url: &str, error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            portal: portal.to_string(),
            job_url: job_url.to_string(),
            fields_filled: 0,
            error: Some(error.to_string()),
        }
    }
}

#[async_trait]
pub trait PortalStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, req: ApplyRequest<'_>) -> ApplyOutcome;
}

pub type UrlPredicate = fn(&str) -> bool;

/// Host of `url`, lowercased, without a leading `www.`.
pub(crate) fn host_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

pub fn is_linkedin(url: &str) -> bool {
    host_of(url).is_some_and(|h| h == "linkedin.com" || h.ends_with(".linkedin.com"))
}

pub fn is_indeed(url: &str) -> bool {
    host_of(url).is_some_and(|h| h == "indeed.com" || h.contains("indeed."))
}

pub struct PortalRegistry {
    routes: Vec<(UrlPredicate, Arc<dyn PortalStrategy>)>,
    fallback: Arc<dyn PortalStrategy>,
}

impl PortalRegistry {
    pub fn new(fallback: Arc<dyn PortalStrategy>) -> Self {
        Self {
            routes: Vec::new(),
            fallback,
        }
    }

    /// LinkedIn, then Indeed, then the generic filler.
    pub fn standard(
        driver: Arc<BrowserDriver>,
        mapper: Arc<dyn FieldMapper>,
        codes: Arc<dyn VerificationCodeSource>,
    ) -> Self {
        let generic = Arc::new(GenericStrategy::new(driver.clone(), mapper));
        Self::new(generic.clone())
            .route(
                is_linkedin,
                Arc::new(LinkedinStrategy::new(driver, generic.clone(), codes)),
            )
            .route(is_indeed, Arc::new(IndeedStrategy::new(generic)))
    }

    pub fn route(mut self, predicate: UrlPredicate, strategy: Arc<dyn PortalStrategy>) -> Self {
        self.routes.push((predicate, strategy));
        self
    }

    pub fn strategy_for(&self, url: &str) -> &Arc<dyn PortalStrategy> {
        self.routes
            .iter()
            .find(|(matches, _)| matches(url))
            .map(|(_, s)| s)
            .unwrap_or(&self.fallback)
    }

    pub async fn apply(&self, req: ApplyRequest<'_>) -> ApplyOutcome {
        let strategy = self.strategy_for(req.job_url);
        info!(task_id = %req.task_id, portal = strategy.name(), url = req.job_url, "applying");
        strategy.apply(req).await
    }
}

impl std::fmt::Debug for PortalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.routes.iter().map(|(_, s)| s.name()).collect();
        f.debug_struct("PortalRegistry")
            .field("routes", &names)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}
