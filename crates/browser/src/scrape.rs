//! Job discovery: portal search URLs, listing extraction, deep scrape and
//! the scrape-then-apply loop.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use jobrelay_core::TaskId;
use jobrelay_retry::AutomationError;
use jobrelay_tasks::ScrapePayload;

use crate::driver::BrowserDriver;
use crate::engine::Page;
use crate::portals::{ApplyOutcome, ApplyRequest, PortalRegistry};
use crate::profile::UserProfile;

const LINKEDIN_SEARCH: &str = "https://www.linkedin.com/jobs/search/";
const INDEED_SEARCH: &str = "https://www.indeed.com/jobs";

const LINKEDIN_CARDS_SCRIPT: &str = r#"(() => Array.from(document.querySelectorAll('.jobs-search__results-list li, .job-card-container')).map((c) => ({
  title: (c.querySelector('.base-search-card__title, .job-card-list__title') || {}).innerText || '',
  company: (c.querySelector('.base-search-card__subtitle, .job-card-container__company-name') || {}).innerText || '',
  location: (c.querySelector('.job-search-card__location, .job-card-container__metadata-item') || {}).innerText || '',
  url: ((c.querySelector('a.base-card__full-link, a.job-card-list__title') || {}).href || '').split('?')[0],
})))()"#;

const INDEED_CARDS_SCRIPT: &str = r#"(() => Array.from(document.querySelectorAll('div.job_seen_beacon, .result')).map((c) => ({
  title: (c.querySelector('h2.jobTitle span[title], h2.jobTitle') || {}).innerText || '',
  company: (c.querySelector('[data-testid=company-name], .companyName') || {}).innerText || '',
  location: (c.querySelector('[data-testid=text-location], .companyLocation') || {}).innerText || '',
  url: (c.querySelector('h2.jobTitle a') || {}).href || '',
})))()"#;

const DESCRIPTION_SCRIPT: &str = r#"(() => {
  const el = document.querySelector('.show-more-less-html__markup, .jobs-description__content, #jobDescriptionText, main');
  return el ? el.innerText.trim() : null;
})()"#;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobListing {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeReport {
    pub jobs_found: usize,
    pub jobs: Vec<JobListing>,
}

impl ScrapeReport {
    fn new(jobs: Vec<JobListing>) -> Self {
        Self {
            jobs_found: jobs.len(),
            jobs,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApplyReport {
    pub jobs_found: usize,
    pub applied: usize,
    pub jobs: Vec<JobListing>,
    pub applications: Vec<ApplyOutcome>,
}

/// Search page for the payload's portal and filters.
pub fn search_url(payload: &ScrapePayload) -> Result<Url, AutomationError> {
    let mut params: Vec<(&str, String)> = Vec::new();
    let base = match payload.portal.as_str() {
        "linkedin" => {
            params.push(("keywords", payload.keywords.clone()));
            if !payload.location.is_empty() {
                params.push(("location", payload.location.clone()));
            }
            if let Some(v) = payload.experience.as_deref().and_then(linkedin_experience) {
                params.push(("f_E", v.to_string()));
            }
            if let Some(v) = payload.job_type.as_deref().and_then(linkedin_job_type) {
                params.push(("f_JT", v.to_string()));
            }
            if let Some(v) = payload.work_mode.as_deref().and_then(linkedin_work_mode) {
                params.push(("f_WT", v.to_string()));
            }
            if let Some(v) = payload.date_posted.as_deref().and_then(linkedin_date_posted) {
                params.push(("f_TPR", v.to_string()));
            }
            if let Some(bucket) = payload.min_salary.and_then(linkedin_salary_bucket) {
                params.push(("f_SB2", bucket.to_string()));
            }
            LINKEDIN_SEARCH
        }
        "indeed" => {
            params.push(("q", payload.keywords.clone()));
            if !payload.location.is_empty() {
                params.push(("l", payload.location.clone()));
            }
            if let Some(v) = payload.job_type.as_deref().and_then(indeed_job_type) {
                params.push(("jt", v.to_string()));
            }
            if let Some(v) = payload.experience.as_deref().and_then(indeed_experience) {
                params.push(("explvl", v.to_string()));
            }
            if let Some(v) = payload.date_posted.as_deref().and_then(indeed_days) {
                params.push(("fromage", v.to_string()));
            }
            INDEED_SEARCH
        }
        other => {
            return Err(AutomationError::NonRetryable(format!(
                "no job search available for portal {other}"
            )));
        }
    };
    Url::parse_with_params(base, &params).map_err(|e| AutomationError::NonRetryable(e.to_string()))
}

fn linkedin_experience(v: &str) -> Option<&'static str> {
    Some(match v {
        "internship" => "1",
        "entry_level" => "2",
        "associate" => "3",
        "mid_senior" => "4",
        "director" => "5",
        "executive" => "6",
        _ => return None,
    })
}

fn linkedin_job_type(v: &str) -> Option<&'static str> {
    Some(match v {
        "full_time" => "F",
        "part_time" => "P",
        "contract" => "C",
        "temporary" => "T",
        "internship" => "I",
        _ => return None,
    })
}

fn linkedin_work_mode(v: &str) -> Option<&'static str> {
    Some(match v {
        "on_site" => "1",
        "remote" => "2",
        "hybrid" => "3",
        _ => return None,
    })
}

fn linkedin_date_posted(v: &str) -> Option<&'static str> {
    Some(match v {
        "past_24_hours" => "r86400",
        "past_week" => "r604800",
        "past_month" => "r2592000",
        _ => return None,
    })
}

/// LinkedIn salary filter buckets start at 40k and step by 20k.
fn linkedin_salary_bucket(min_salary: u32) -> Option<u32> {
    (min_salary >= 40_000).then(|| (min_salary / 20_000 - 1).min(9))
}

fn indeed_job_type(v: &str) -> Option<&'static str> {
    Some(match v {
        "full_time" => "fulltime",
        "part_time" => "parttime",
        "contract" => "contract",
        "temporary" => "temporary",
        "internship" => "internship",
        _ => return None,
    })
}

fn indeed_experience(v: &str) -> Option<&'static str> {
    Some(match v {
        "internship" | "entry_level" => "ENTRY_LEVEL",
        "associate" | "mid_senior" => "MID_LEVEL",
        "director" | "executive" => "SENIOR_LEVEL",
        _ => return None,
    })
}

fn indeed_days(v: &str) -> Option<&'static str> {
    Some(match v {
        "past_24_hours" => "1",
        "past_week" => "7",
        "past_month" => "30",
        _ => return None,
    })
}

pub struct JobScraper {
    driver: Arc<BrowserDriver>,
    portals: Arc<PortalRegistry>,
}

impl JobScraper {
    pub fn new(driver: Arc<BrowserDriver>, portals: Arc<PortalRegistry>) -> Self {
        Self { driver, portals }
    }

    /// Listing cards from the first results page, deduplicated by URL.
    pub async fn scrape(
        &self,
        page: &dyn Page,
        payload: &ScrapePayload,
    ) -> Result<ScrapeReport, AutomationError> {
        let url = search_url(payload)?;
        self.driver.navigate_to_job(page, url.as_str()).await?;

        let script = match payload.portal.as_str() {
            "indeed" => INDEED_CARDS_SCRIPT,
            _ => LINKEDIN_CARDS_SCRIPT,
        };
        let raw = page.evaluate(script).await?;
        let cards: Vec<JobListing> = if raw.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(raw)
                .map_err(|e| AutomationError::PortalChange(format!("unexpected listing cards: {e}")))?
        };

        let mut seen = HashSet::new();
        let jobs: Vec<JobListing> = cards
            .into_iter()
            .map(|mut j| {
                j.title = j.title.trim().to_string();
                j.company = j.company.trim().to_string();
                j.location = j.location.trim().to_string();
                j
            })
            .filter(|j| !j.url.is_empty() && seen.insert(j.url.clone()))
            .collect();
        info!(portal = %payload.portal, jobs = jobs.len(), "search scraped");
        Ok(ScrapeReport::new(jobs))
    }

    /// `scrape` plus the description of up to `limit` listings. A listing
    /// that fails to load keeps `description: None`.
    pub async fn deep_scrape(
        &self,
        page: &dyn Page,
        payload: &ScrapePayload,
        limit: usize,
    ) -> Result<ScrapeReport, AutomationError> {
        let mut report = self.scrape(page, payload).await?;
        for job in report.jobs.iter_mut().take(limit) {
            if let Err(e) = self.driver.navigate_to_job(page, &job.url).await {
                warn!(url = %job.url, error = %e, "listing skipped");
                continue;
            }
            match page.evaluate(DESCRIPTION_SCRIPT).await {
                Ok(v) => job.description = v.as_str().map(str::to_string),
                Err(e) => debug!(url = %job.url, error = %e, "no description"),
            }
        }
        Ok(report)
    }

    /// `scrape`, then run the matching portal strategy on up to `limit`
    /// listings.
    pub async fn auto_apply(
        &self,
        page: &dyn Page,
        payload: &ScrapePayload,
        profile: &UserProfile,
        resume_path: Option<&Path>,
        task_id: TaskId,
        limit: usize,
    ) -> Result<AutoApplyReport, AutomationError> {
        let found = self.scrape(page, payload).await?;
        let mut applications = Vec::new();
        for job in found.jobs.iter().take(limit) {
            let outcome = self
                .portals
                .apply(ApplyRequest {
                    page,
                    job_url: &job.url,
                    profile,
                    resume_path,
                    task_id,
                })
                .await;
            applications.push(outcome);
        }
        let applied = applications.iter().filter(|o| o.success).count();
        info!(task_id = %task_id, attempted = applications.len(), applied, "auto-apply finished");
        Ok(AutoApplyReport {
            jobs_found: found.jobs_found,
            applied,
            jobs: found.jobs,
            applications,
        })
    }

    /// Single application to a known job URL.
    pub async fn apply_one(
        &self,
        page: &dyn Page,
        job_url: &str,
        profile: &UserProfile,
        resume_path: Option<&Path>,
        task_id: TaskId,
    ) -> ApplyOutcome {
        self.portals
            .apply(ApplyRequest {
                page,
                job_url,
                profile,
                resume_path,
                task_id,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LaunchOptions;
    use crate::portals::{HeuristicFieldMapper, VerificationCodeSource};
    use crate::testing::FakeEngine;
    use async_trait::async_trait;
    use jobrelay_retry::RetryEngine;
    use serde_json::json;

    fn payload(portal: &str) -> ScrapePayload {
        ScrapePayload {
            portal: portal.into(),
            keywords: "rust engineer".into(),
            location: "Berlin".into(),
            experience: Some("mid_senior".into()),
            job_type: Some("full_time".into()),
            work_mode: Some("remote".into()),
            date_posted: Some("past_week".into()),
            min_salary: Some(90_000),
            blueprint_id: None,
        }
    }

    #[test]
    fn linkedin_search_url_carries_filters() {
        let url = search_url(&payload("linkedin")).unwrap();
        assert_eq!(url.host_str(), Some("www.linkedin.com"));
        let q: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| q.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("keywords"), Some("rust engineer"));
        assert_eq!(get("location"), Some("Berlin"));
        assert_eq!(get("f_E"), Some("4"));
        assert_eq!(get("f_JT"), Some("F"));
        assert_eq!(get("f_WT"), Some("2"));
        assert_eq!(get("f_TPR"), Some("r604800"));
        assert_eq!(get("f_SB2"), Some("3"));
    }

    #[test]
    fn indeed_search_url_uses_its_vocabulary() {
        let url = search_url(&payload("indeed")).unwrap();
        let q: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(q.contains(&("q".into(), "rust engineer".into())));
        assert!(q.contains(&("jt".into(), "fulltime".into())));
        assert!(q.contains(&("fromage".into(), "7".into())));
        assert!(q.contains(&("explvl".into(), "MID_LEVEL".into())));
    }

    #[test]
    fn generic_portal_has_no_search() {
        let err = search_url(&payload("generic")).unwrap_err();
        assert!(err.is_non_retryable());
    }

    #[test]
    fn salary_buckets() {
        assert_eq!(linkedin_salary_bucket(30_000), None);
        assert_eq!(linkedin_salary_bucket(40_000), Some(1));
        assert_eq!(linkedin_salary_bucket(119_999), Some(4));
        assert_eq!(linkedin_salary_bucket(1_000_000), Some(9));
    }

    struct NoCodes;

    #[async_trait]
    impl VerificationCodeSource for NoCodes {
        async fn fetch_code(&self, _task_id: TaskId) -> Result<Option<String>, AutomationError> {
            Ok(None)
        }
    }

    async fn scraper(engine: &Arc<FakeEngine>) -> (JobScraper, crate::driver::Session) {
        let driver = Arc::new(BrowserDriver::new(
            engine.clone(),
            Arc::new(RetryEngine::new()),
            LaunchOptions::default(),
        ));
        driver.start().await.unwrap();
        let session = driver.create_session().await.unwrap();
        let portals = Arc::new(PortalRegistry::standard(
            driver.clone(),
            Arc::new(HeuristicFieldMapper),
            Arc::new(NoCodes),
        ));
        (JobScraper::new(driver, portals), session)
    }

    #[tokio::test(start_paused = true)]
    async fn scrape_dedupes_and_drops_cards_without_links() {
        let engine = FakeEngine::arc();
        engine.script().on_evaluate(
            "jobs-search__results-list",
            [json!([
                {"title": " Rust Dev ", "company": "Ferrous", "location": "Remote", "url": "https://www.linkedin.com/jobs/view/1"},
                {"title": "Rust Dev", "company": "Ferrous", "location": "Remote", "url": "https://www.linkedin.com/jobs/view/1"},
                {"title": "Ghost", "company": "", "location": "", "url": ""},
                {"title": "SRE", "company": "Oxide", "location": "Emeryville", "url": "https://www.linkedin.com/jobs/view/2"}
            ])],
        );
        let (scraper, session) = scraper(&engine).await;

        let report = scraper.scrape(session.page.as_ref(), &payload("linkedin")).await.unwrap();
        assert_eq!(report.jobs_found, 2);
        assert_eq!(report.jobs[0].title, "Rust Dev");
        assert!(engine.navigations()[0].starts_with(LINKEDIN_SEARCH));
    }

    #[tokio::test(start_paused = true)]
    async fn deep_scrape_visits_listings_up_to_limit() {
        let engine = FakeEngine::arc();
        engine
            .script()
            .on_evaluate(
                "job_seen_beacon",
                [json!([
                    {"title": "A", "url": "https://www.indeed.com/viewjob?jk=a"},
                    {"title": "B", "url": "https://www.indeed.com/viewjob?jk=b"},
                    {"title": "C", "url": "https://www.indeed.com/viewjob?jk=c"}
                ])],
            )
            .on_evaluate("jobDescriptionText", [json!("Build things in Rust.")]);
        let (scraper, session) = scraper(&engine).await;

        let report = scraper
            .deep_scrape(session.page.as_ref(), &payload("indeed"), 2)
            .await
            .unwrap();
        assert_eq!(engine.navigations().len(), 3);
        assert_eq!(report.jobs[0].description.as_deref(), Some("Build things in Rust."));
        assert_eq!(report.jobs[1].description.as_deref(), Some("Build things in Rust."));
        assert_eq!(report.jobs[2].description, None);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_apply_reports_each_attempt() {
        let engine = FakeEngine::arc();
        engine.script().on_evaluate(
            "jobs-search__results-list",
            [json!([
                {"title": "A", "url": "https://www.linkedin.com/jobs/view/1"},
                {"title": "B", "url": "https://www.linkedin.com/jobs/view/2"}
            ])],
        );
        let (scraper, session) = scraper(&engine).await;
        let profile = UserProfile::default();

        let report = scraper
            .auto_apply(
                session.page.as_ref(),
                &payload("linkedin"),
                &profile,
                None,
                TaskId::new(),
                5,
            )
            .await
            .unwrap();
        assert_eq!(report.jobs_found, 2);
        assert_eq!(report.applications.len(), 2);
        assert_eq!(report.applied, 0);
        assert!(report.applications.iter().all(|o| o.portal == "linkedin"));
    }
}
