use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use jobrelay_core::{BlueprintId, DomainError, DomainResult, OwnerId};
use jobrelay_tasks::{ScrapePayload, TaskType};

use crate::filters::{BlueprintFilters, Portal};

/// What a blueprint does on each delivery.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlueprintStatus {
    #[default]
    Idle,
    AutoScrape,
    AutoApply,
}

/// Which in-flight tasks a blueprint change must cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelScope {
    All,
    Only(Vec<TaskType>),
}

/// A recurring search/apply preference profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: BlueprintId,
    pub owner: OwnerId,
    pub name: String,
    pub portal: Portal,
    pub filters: BlueprintFilters,
    /// Minimum spacing between deliveries, in seconds.
    pub frequency_secs: u64,
    pub status: BlueprintStatus,
    pub is_active: bool,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub last_delivered_at: Option<DateTime<Utc>>,
    pub total_deliveries: u64,
    pub total_jobs_matched: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update. `snoozed_until: Some(None)` clears a snooze.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BlueprintPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub portal: Option<Portal>,
    #[serde(default)]
    pub filters: Option<BlueprintFilters>,
    #[serde(default)]
    pub frequency_secs: Option<u64>,
    #[serde(default)]
    pub status: Option<BlueprintStatus>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default, with = "double_option")]
    pub snoozed_until: Option<Option<DateTime<Utc>>>,
}

impl Blueprint {
    pub fn new(
        owner: OwnerId,
        name: impl Into<String>,
        portal: Portal,
        filters: BlueprintFilters,
        frequency_secs: u64,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        validate_frequency(frequency_secs)?;
        Ok(Self {
            id: BlueprintId::new(),
            owner,
            name: name.into(),
            portal,
            filters,
            frequency_secs,
            status: BlueprintStatus::Idle,
            is_active: true,
            snoozed_until: None,
            last_delivered_at: None,
            total_deliveries: 0,
            total_jobs_matched: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_status(mut self, status: BlueprintStatus) -> DomainResult<Self> {
        validate_schedule(self.portal, status)?;
        self.status = status;
        Ok(self)
    }

    /// active ∧ ¬snoozed ∧ (never delivered ∨ now − last_delivered_at ≥ frequency)
    pub fn should_deliver_now(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if self.snoozed_until.is_some_and(|until| until > now) {
            return false;
        }
        match self.last_delivered_at {
            None => true,
            Some(last) => now - last >= self.frequency(),
        }
    }

    pub fn frequency(&self) -> Duration {
        Duration::seconds(i64::try_from(self.frequency_secs).unwrap_or(i64::MAX / 1000))
    }

    /// Task type created per delivery; `None` while the blueprint is idle.
    pub fn delivery_task_type(&self) -> Option<TaskType> {
        match self.status {
            BlueprintStatus::Idle => None,
            BlueprintStatus::AutoScrape => Some(TaskType::Scrape),
            BlueprintStatus::AutoApply => Some(TaskType::AutoApply),
        }
    }

    /// Maps the enum filters into the scraping-payload vocabulary.
    pub fn scrape_payload(&self) -> ScrapePayload {
        ScrapePayload {
            portal: self.portal.as_str().to_string(),
            keywords: self.filters.keyword_query(),
            location: self.filters.primary_location(),
            experience: self.filters.experience.map(|e| e.payload_value().to_string()),
            job_type: self.filters.job_type.map(|j| j.payload_value().to_string()),
            work_mode: self.filters.work_mode.map(|w| w.payload_value().to_string()),
            date_posted: self.filters.date_posted.map(|d| d.payload_value().to_string()),
            min_salary: self.filters.min_salary,
            blueprint_id: Some(self.id),
        }
    }

    pub fn record_delivery(&mut self, now: DateTime<Utc>) {
        self.last_delivered_at = Some(now);
        self.total_deliveries += 1;
        self.updated_at = now;
    }

    pub fn record_matches(&mut self, jobs: u64, now: DateTime<Utc>) {
        self.total_jobs_matched += jobs;
        self.updated_at = now;
    }

    /// Apply `patch` and report which active tasks the change invalidates.
    pub fn apply_patch(
        &mut self,
        patch: BlueprintPatch,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<CancelScope>> {
        if let Some(freq) = patch.frequency_secs {
            validate_frequency(freq)?;
        }
        validate_schedule(
            patch.portal.unwrap_or(self.portal),
            patch.status.unwrap_or(self.status),
        )?;
        let before = self.clone();

        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(portal) = patch.portal {
            self.portal = portal;
        }
        if let Some(filters) = patch.filters {
            self.filters = filters;
        }
        if let Some(freq) = patch.frequency_secs {
            self.frequency_secs = freq;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(active) = patch.is_active {
            self.is_active = active;
        }
        if let Some(snooze) = patch.snoozed_until {
            self.snoozed_until = snooze;
        }
        self.updated_at = now;

        Ok(cancellation_scope(&before, self))
    }
}

/// Side effects of a state change on in-flight work.
///
/// Deactivation and a move to IDLE cancel everything; a switch to
/// AUTO_SCRAPE cancels application work; a switch to AUTO_APPLY cancels
/// plain scraping.
pub fn cancellation_scope(before: &Blueprint, after: &Blueprint) -> Option<CancelScope> {
    if before.is_active && !after.is_active {
        return Some(CancelScope::All);
    }
    if before.status == after.status {
        return None;
    }
    match after.status {
        BlueprintStatus::Idle => Some(CancelScope::All),
        BlueprintStatus::AutoScrape => {
            Some(CancelScope::Only(vec![TaskType::AutoApply, TaskType::Apply]))
        }
        BlueprintStatus::AutoApply => Some(CancelScope::Only(vec![TaskType::Scrape])),
    }
}

fn validate_frequency(secs: u64) -> DomainResult<()> {
    if secs == 0 {
        return Err(DomainError::validation("frequency_secs must be greater than zero"));
    }
    Ok(())
}

/// Generic boards have no search page to scrape.
fn validate_schedule(portal: Portal, status: BlueprintStatus) -> DomainResult<()> {
    if portal == Portal::Generic && status != BlueprintStatus::Idle {
        return Err(DomainError::validation(
            "generic portal blueprints cannot be scheduled; pick linkedin or indeed",
        ));
    }
    Ok(())
}

/// Distinguishes an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{DatePosted, ExperienceLevel, WorkMode};

    fn blueprint(now: DateTime<Utc>) -> Blueprint {
        Blueprint::new(
            OwnerId::new(),
            "rust roles",
            Portal::Linkedin,
            BlueprintFilters {
                keywords: vec!["rust".into(), "backend".into()],
                locations: vec!["Berlin".into()],
                experience: Some(ExperienceLevel::MidSenior),
                work_mode: Some(WorkMode::Remote),
                date_posted: Some(DatePosted::PastWeek),
                min_salary: Some(90_000),
                ..Default::default()
            },
            3600,
            now,
        )
        .unwrap()
        .with_status(BlueprintStatus::AutoScrape)
        .unwrap()
    }

    #[test]
    fn never_delivered_is_due() {
        let now = Utc::now();
        assert!(blueprint(now).should_deliver_now(now));
    }

    #[test]
    fn snoozed_blueprint_is_not_due() {
        let now = Utc::now();
        let mut bp = blueprint(now);
        bp.snoozed_until = Some(now + Duration::minutes(5));
        assert!(!bp.should_deliver_now(now));

        bp.snoozed_until = Some(now - Duration::minutes(5));
        assert!(bp.should_deliver_now(now));
    }

    #[test]
    fn due_only_after_frequency_elapses() {
        let now = Utc::now();
        let mut bp = blueprint(now);
        bp.record_delivery(now - Duration::seconds(3599));
        assert!(!bp.should_deliver_now(now));

        bp.last_delivered_at = Some(now - Duration::seconds(3600));
        assert!(bp.should_deliver_now(now));
    }

    #[test]
    fn inactive_blueprint_is_never_due() {
        let now = Utc::now();
        let mut bp = blueprint(now);
        bp.is_active = false;
        assert!(!bp.should_deliver_now(now));
    }

    #[test]
    fn scrape_payload_uses_payload_vocabulary() {
        let now = Utc::now();
        let bp = blueprint(now);
        let payload = bp.scrape_payload();
        assert_eq!(payload.portal, "linkedin");
        assert_eq!(payload.keywords, "rust backend");
        assert_eq!(payload.location, "Berlin");
        assert_eq!(payload.experience.as_deref(), Some("mid_senior"));
        assert_eq!(payload.work_mode.as_deref(), Some("remote"));
        assert_eq!(payload.date_posted.as_deref(), Some("past_week"));
        assert_eq!(payload.job_type, None);
        assert_eq!(payload.blueprint_id, Some(bp.id));
    }

    #[test]
    fn deactivation_cancels_everything() {
        let now = Utc::now();
        let mut bp = blueprint(now);
        let scope = bp
            .apply_patch(
                BlueprintPatch {
                    is_active: Some(false),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(scope, Some(CancelScope::All));
    }

    #[test]
    fn status_switches_cancel_the_other_kind_of_work() {
        let now = Utc::now();
        let mut bp = blueprint(now);

        let to_apply = bp
            .apply_patch(
                BlueprintPatch {
                    status: Some(BlueprintStatus::AutoApply),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(to_apply, Some(CancelScope::Only(vec![TaskType::Scrape])));

        let to_scrape = bp
            .apply_patch(
                BlueprintPatch {
                    status: Some(BlueprintStatus::AutoScrape),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(
            to_scrape,
            Some(CancelScope::Only(vec![TaskType::AutoApply, TaskType::Apply]))
        );

        let to_idle = bp
            .apply_patch(
                BlueprintPatch {
                    status: Some(BlueprintStatus::Idle),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(to_idle, Some(CancelScope::All));
    }

    #[test]
    fn unchanged_status_cancels_nothing() {
        let now = Utc::now();
        let mut bp = blueprint(now);
        let scope = bp
            .apply_patch(
                BlueprintPatch {
                    status: Some(BlueprintStatus::AutoScrape),
                    name: Some("renamed".into()),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(scope, None);
        assert_eq!(bp.name, "renamed");
    }

    #[test]
    fn patch_can_clear_snooze_with_null() {
        let patch: BlueprintPatch = serde_json::from_str(r#"{"snoozed_until": null}"#).unwrap();
        assert_eq!(patch.snoozed_until, Some(None));
        let patch: BlueprintPatch = serde_json::from_str("{}").unwrap();
        assert_eq!(patch.snoozed_until, None);
    }

    #[test]
    fn generic_portal_cannot_be_scheduled() {
        let now = Utc::now();
        let generic = Blueprint::new(
            OwnerId::new(),
            "company sites",
            Portal::Generic,
            BlueprintFilters::default(),
            3600,
            now,
        )
        .unwrap();
        assert!(matches!(
            generic.clone().with_status(BlueprintStatus::AutoApply),
            Err(DomainError::Validation(_))
        ));

        let mut idle = generic.with_status(BlueprintStatus::Idle).unwrap();
        let err = idle
            .apply_patch(
                BlueprintPatch {
                    status: Some(BlueprintStatus::AutoScrape),
                    ..Default::default()
                },
                now,
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(idle.status, BlueprintStatus::Idle);

        let mut scheduled = blueprint(now);
        let err = scheduled
            .apply_patch(
                BlueprintPatch {
                    portal: Some(Portal::Generic),
                    ..Default::default()
                },
                now,
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(scheduled.portal, Portal::Linkedin);
    }

    #[test]
    fn zero_frequency_is_rejected() {
        let now = Utc::now();
        let result = Blueprint::new(
            OwnerId::new(),
            "bad",
            Portal::Indeed,
            BlueprintFilters::default(),
            0,
            now,
        );
        assert!(result.is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

            #[test]
            fn once_due_stays_due(
                freq in 1u64..86_400,
                since in 0i64..200_000,
                extra in 0i64..200_000,
            ) {
                let now = Utc::now();
                let mut bp = blueprint(now);
                bp.frequency_secs = freq;
                bp.last_delivered_at = Some(now - Duration::seconds(since));
                if bp.should_deliver_now(now) {
                    prop_assert!(bp.should_deliver_now(now + Duration::seconds(extra)));
                }
                prop_assert_eq!(bp.should_deliver_now(now), since >= freq as i64);
            }
        }
    }
}
