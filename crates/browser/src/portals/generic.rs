//! Fallback strategy for arbitrary application forms: discover fields, ask
//! the mapper which profile value goes where, fill, then submit.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use jobrelay_retry::AutomationError;

use crate::driver::BrowserDriver;
use crate::engine::Page;

use super::fields::{EXTRACT_FIELDS_SCRIPT, FormField, RESUME_UPLOAD};
use super::{ApplyOutcome, ApplyRequest, FieldMapper, PortalStrategy};

/// Tried in order; the first visible one is clicked.
pub const SUBMIT_SELECTORS: &[&str] = &[
    "button[type=submit]",
    "input[type=submit]",
    "button[aria-label*=Submit]",
    "button[data-testid=submit]",
    "button.submit",
    "#submit",
    "button.apply-button",
];

pub struct GenericStrategy {
    driver: Arc<BrowserDriver>,
    mapper: Arc<dyn FieldMapper>,
}

impl GenericStrategy {
    pub fn new(driver: Arc<BrowserDriver>, mapper: Arc<dyn FieldMapper>) -> Self {
        Self { driver, mapper }
    }

    pub async fn extract_fields(&self, page: &dyn Page) -> Result<Vec<FormField>, AutomationError> {
        let raw = page.evaluate(EXTRACT_FIELDS_SCRIPT).await?;
        if raw.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(raw)
            .map_err(|e| AutomationError::PortalChange(format!("unexpected field list: {e}")))
    }

    /// Fill whatever the mapper can place on the current page. Individual
    /// field failures are logged and skipped. Returns how many were filled.
    pub async fn fill_form(&self, req: &ApplyRequest<'_>) -> Result<usize, AutomationError> {
        let fields = self.extract_fields(req.page).await?;
        if fields.is_empty() {
            return Ok(0);
        }
        let summary = req.profile.summary();
        let mappings = self.mapper.map_fields(&fields, &summary).await?;
        debug!(task_id = %req.task_id, fields = fields.len(), mappings = mappings.len(), "mapped form fields");

        let mut filled = 0;
        for mapping in &mappings {
            let Some(selector) = mapping.selector() else {
                continue;
            };
            let result = if mapping.field == RESUME_UPLOAD {
                match req.resume_path {
                    Some(path) => self.driver.upload_file(req.page, &selector, path).await,
                    None => {
                        debug!(task_id = %req.task_id, "no resume available for upload field");
                        continue;
                    }
                }
            } else {
                match summary.get(&mapping.field) {
                    Some(value) => self.driver.type_slowly(req.page, &selector, value).await,
                    None => continue,
                }
            };
            match result {
                Ok(()) => filled += 1,
                Err(e) => warn!(task_id = %req.task_id, field = %mapping.field, error = %e, "field fill failed"),
            }
        }
        Ok(filled)
    }

    /// Click the first visible submit control.
    pub async fn submit(&self, page: &dyn Page) -> Result<(), AutomationError> {
        for selector in SUBMIT_SELECTORS {
            if page.is_visible(selector).await? {
                return self.driver.click_human(page, selector).await;
            }
        }
        Err(AutomationError::PortalChange("no submit button found".into()))
    }

    async fn try_apply(&self, req: &ApplyRequest<'_>) -> Result<usize, AutomationError> {
        let fields = self.fill_form(req).await?;
        if fields == 0 {
            return Err(AutomationError::Form("no fillable form fields found".into()));
        }
        self.submit(req.page).await?;
        Ok(fields)
    }
}

#[async_trait]
impl PortalStrategy for GenericStrategy {
    fn name(&self) -> &'static str {
        "generic"
    }

    async fn apply(&self, req: ApplyRequest<'_>) -> ApplyOutcome {
        if let Err(e) = self.driver.navigate_to_job(req.page, req.job_url).await {
            return ApplyOutcome::failed(self.name(), req.job_url, e);
        }
        match self.try_apply(&req).await {
            Ok(filled) => {
                info!(task_id = %req.task_id, fields = filled, "application submitted");
                ApplyOutcome::submitted(self.name(), req.job_url, filled)
            }
            Err(e) => {
                warn!(task_id = %req.task_id, error = %e, "application failed");
                ApplyOutcome::failed(self.name(), req.job_url, e)
            }
        }
    }
}
