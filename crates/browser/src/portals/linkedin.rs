//! LinkedIn Easy Apply: open the modal, walk its steps filling each page
//! with the generic filler, and answer an emailed-code challenge if one
//! appears.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use jobrelay_retry::AutomationError;

use crate::driver::BrowserDriver;

use super::generic::GenericStrategy;
use super::{
    poll_verification_code, ApplyOutcome, ApplyRequest, PortalStrategy, VerificationCodeSource,
    VERIFICATION_POLL_INTERVAL, VERIFICATION_TIMEOUT,
};

pub const EASY_APPLY_BUTTON: &str = "button.jobs-apply-button";
pub const NEXT_BUTTON: &str = "button[aria-label='Continue to next step']";
pub const REVIEW_BUTTON: &str = "button[aria-label='Review your application']";
pub const SUBMIT_BUTTON: &str = "button[aria-label='Submit application']";
pub const PIN_INPUT: &str = "input#input__email_verification_pin";
pub const PIN_SUBMIT: &str = "button#email-pin-submit-button";

/// Modal pages walked before giving up.
const MAX_STEPS: usize = 8;

pub struct LinkedinStrategy {
    driver: Arc<BrowserDriver>,
    generic: Arc<GenericStrategy>,
    codes: Arc<dyn VerificationCodeSource>,
}

impl LinkedinStrategy {
    pub fn new(
        driver: Arc<BrowserDriver>,
        generic: Arc<GenericStrategy>,
        codes: Arc<dyn VerificationCodeSource>,
    ) -> Self {
        Self {
            driver,
            generic,
            codes,
        }
    }

    async fn answer_challenge(&self, req: &ApplyRequest<'_>) -> Result<(), AutomationError> {
        if !req.page.is_visible(PIN_INPUT).await? {
            return Ok(());
        }
        info!(task_id = %req.task_id, "verification code requested, waiting for owner");
        let code = poll_verification_code(
            self.codes.as_ref(),
            req.task_id,
            VERIFICATION_POLL_INTERVAL,
            VERIFICATION_TIMEOUT,
        )
        .await
        .ok_or_else(|| {
            AutomationError::NonRetryable("verification code not provided within 120s".into())
        })?;
        self.driver.type_slowly(req.page, PIN_INPUT, &code).await?;
        self.driver.click_human(req.page, PIN_SUBMIT).await?;
        self.driver.navigate_to_job(req.page, req.job_url).await
    }

    async fn try_apply(&self, req: &ApplyRequest<'_>) -> Result<usize, AutomationError> {
        self.driver.navigate_to_job(req.page, req.job_url).await?;
        self.answer_challenge(req).await?;

        if !req.page.is_visible(EASY_APPLY_BUTTON).await? {
            return Err(AutomationError::PortalChange("Easy Apply is not offered for this job".into()));
        }
        self.driver.click_human(req.page, EASY_APPLY_BUTTON).await?;

        let mut filled = 0;
        for _ in 0..MAX_STEPS {
            filled += self.generic.fill_form(req).await?;
            if req.page.is_visible(SUBMIT_BUTTON).await? {
                self.driver.click_human(req.page, SUBMIT_BUTTON).await?;
                return Ok(filled);
            }
            let advance = if req.page.is_visible(NEXT_BUTTON).await? {
                NEXT_BUTTON
            } else if req.page.is_visible(REVIEW_BUTTON).await? {
                REVIEW_BUTTON
            } else {
                return Err(AutomationError::PortalChange("Easy Apply modal has no way forward".into()));
            };
            self.driver.click_human(req.page, advance).await?;
        }
        Err(AutomationError::Form(format!("Easy Apply did not finish within {MAX_STEPS} steps")))
    }
}

#[async_trait]
impl PortalStrategy for LinkedinStrategy {
    fn name(&self) -> &'static str {
        "linkedin"
    }

    async fn apply(&self, req: ApplyRequest<'_>) -> ApplyOutcome {
        match self.try_apply(&req).await {
            Ok(filled) => {
                info!(task_id = %req.task_id, fields = filled, "easy apply submitted");
                ApplyOutcome::submitted(self.name(), req.job_url, filled)
            }
            Err(e) => {
                warn!(task_id = %req.task_id, error = %e, "easy apply failed");
                ApplyOutcome::failed(self.name(), req.job_url, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LaunchOptions;
    use crate::portals::HeuristicFieldMapper;
    use crate::profile::UserProfile;
    use crate::testing::FakeEngine;
    use jobrelay_core::TaskId;
    use jobrelay_retry::RetryEngine;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Mailbox(Mutex<Option<String>>);

    #[async_trait]
    impl VerificationCodeSource for Mailbox {
        async fn fetch_code(&self, _task_id: TaskId) -> Result<Option<String>, AutomationError> {
            Ok(self.0.lock().unwrap().take())
        }
    }

    fn strategy(engine: &Arc<FakeEngine>, mailbox: Arc<Mailbox>) -> (Arc<BrowserDriver>, LinkedinStrategy) {
        let driver = Arc::new(BrowserDriver::new(
            engine.clone(),
            Arc::new(RetryEngine::new()),
            LaunchOptions::default(),
        ));
        let generic = Arc::new(GenericStrategy::new(driver.clone(), Arc::new(HeuristicFieldMapper)));
        (driver.clone(), LinkedinStrategy::new(driver, generic, mailbox))
    }

    fn profile() -> UserProfile {
        UserProfile {
            first_name: "Linus".into(),
            email: "linus@example.com".into(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn walks_modal_steps_until_submit() {
        let engine = FakeEngine::arc();
        engine
            .script()
            .on_evaluate(
                "querySelectorAll('input, textarea, select')",
                [
                    json!([{"tag": "input", "type": "email", "name": "", "id": "mail", "placeholder": "", "label": "Email"}]),
                    json!([]),
                ],
            )
            .add_element(r#"[id="mail"]"#)
            .add_element(EASY_APPLY_BUTTON)
            .reveal_on_click(EASY_APPLY_BUTTON, &[NEXT_BUTTON])
            .reveal_on_click(NEXT_BUTTON, &[REVIEW_BUTTON])
            .reveal_on_click(REVIEW_BUTTON, &[SUBMIT_BUTTON]);
        let (driver, linkedin) = strategy(&engine, Arc::default());
        driver.start().await.unwrap();
        let session = driver.create_session().await.unwrap();
        let p = profile();

        let outcome = linkedin
            .apply(ApplyRequest {
                page: session.page.as_ref(),
                job_url: "https://www.linkedin.com/jobs/view/99",
                profile: &p,
                resume_path: None,
                task_id: TaskId::new(),
            })
            .await;

        assert!(outcome.success, "{outcome:?}");
        assert_eq!(outcome.fields_filled, 1);
        assert_eq!(
            engine.clicked(),
            vec![EASY_APPLY_BUTTON, NEXT_BUTTON, REVIEW_BUTTON, SUBMIT_BUTTON]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn challenge_code_is_typed_when_owner_supplies_it() {
        let engine = FakeEngine::arc();
        engine
            .script()
            .add_element(PIN_INPUT)
            .add_element(PIN_SUBMIT)
            .reveal_on_click(PIN_SUBMIT, &[EASY_APPLY_BUTTON])
            .reveal_on_click(EASY_APPLY_BUTTON, &[SUBMIT_BUTTON]);
        let mailbox = Arc::new(Mailbox::default());
        *mailbox.0.lock().unwrap() = Some("778899".into());
        let (driver, linkedin) = strategy(&engine, mailbox);
        driver.start().await.unwrap();
        let session = driver.create_session().await.unwrap();
        let p = profile();

        let outcome = linkedin
            .apply(ApplyRequest {
                page: session.page.as_ref(),
                job_url: "https://www.linkedin.com/jobs/view/100",
                profile: &p,
                resume_path: None,
                task_id: TaskId::new(),
            })
            .await;

        assert!(outcome.success, "{outcome:?}");
        assert_eq!(engine.typed_into(PIN_INPUT), "778899");
        assert_eq!(engine.navigations().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_challenge_fails_after_ceiling() {
        let engine = FakeEngine::arc();
        engine.script().add_element(PIN_INPUT);
        let (driver, linkedin) = strategy(&engine, Arc::default());
        driver.start().await.unwrap();
        let session = driver.create_session().await.unwrap();
        let p = profile();

        let outcome = linkedin
            .apply(ApplyRequest {
                page: session.page.as_ref(),
                job_url: "https://www.linkedin.com/jobs/view/101",
                profile: &p,
                resume_path: None,
                task_id: TaskId::new(),
            })
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("verification code"));
    }

    #[tokio::test(start_paused = true)]
    async fn job_without_easy_apply_fails_cleanly() {
        let engine = FakeEngine::arc();
        let (driver, linkedin) = strategy(&engine, Arc::default());
        driver.start().await.unwrap();
        let session = driver.create_session().await.unwrap();
        let p = profile();

        let outcome = linkedin
            .apply(ApplyRequest {
                page: session.page.as_ref(),
                job_url: "https://www.linkedin.com/jobs/view/102",
                profile: &p,
                resume_path: None,
                task_id: TaskId::new(),
            })
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Easy Apply"));
    }
}
