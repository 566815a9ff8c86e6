//! Typed views over the opaque JSON payload carried by each task type.
//!
//! The store keeps payloads as JSON; these types are what producers build and
//! what the worker decodes before executing.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobrelay_core::{BlueprintId, DomainError, DomainResult};

use crate::task::TaskType;

/// Job discovery parameters (`SCRAPE`, `DEEP_SCRAPE`, `AUTO_APPLY`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapePayload {
    pub portal: String,
    pub keywords: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub experience: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub work_mode: Option<String>,
    #[serde(default)]
    pub date_posted: Option<String>,
    #[serde(default)]
    pub min_salary: Option<u32>,
    #[serde(default)]
    pub blueprint_id: Option<BlueprintId>,
}

/// Single application submission (`APPLY`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyPayload {
    pub job_id: String,
    pub job_url: String,
    pub resume_id: String,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

/// Decoded payload, keyed by the task type that carries it.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    Scrape(ScrapePayload),
    Apply(ApplyPayload),
    /// `PARSE_RESUME` payloads belong to the resume-parsing collaborator.
    Opaque(JsonValue),
}

impl TaskPayload {
    /// Decode `raw` according to `task_type`, rejecting shapes that do not fit.
    pub fn decode(task_type: TaskType, raw: &JsonValue) -> DomainResult<Self> {
        match task_type {
            TaskType::Scrape | TaskType::DeepScrape | TaskType::AutoApply => {
                let p: ScrapePayload = serde_json::from_value(raw.clone()).map_err(|e| {
                    DomainError::validation(format!("{task_type} payload: {e}"))
                })?;
                if p.keywords.trim().is_empty() {
                    return Err(DomainError::validation(format!(
                        "{task_type} payload: keywords must not be empty"
                    )));
                }
                Ok(TaskPayload::Scrape(p))
            }
            TaskType::Apply => {
                let p: ApplyPayload = serde_json::from_value(raw.clone()).map_err(|e| {
                    DomainError::validation(format!("{task_type} payload: {e}"))
                })?;
                if p.job_url.trim().is_empty() {
                    return Err(DomainError::validation("APPLY payload: job_url must not be empty"));
                }
                Ok(TaskPayload::Apply(p))
            }
            TaskType::ParseResume => Ok(TaskPayload::Opaque(raw.clone())),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            // Serializing plain derive structs into a Value cannot fail.
            TaskPayload::Scrape(p) => serde_json::to_value(p).unwrap_or(JsonValue::Null),
            TaskPayload::Apply(p) => serde_json::to_value(p).unwrap_or(JsonValue::Null),
            TaskPayload::Opaque(v) => v.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scrape_payload_decodes_with_defaults() {
        let raw = json!({"portal": "linkedin", "keywords": "rust engineer"});
        let decoded = TaskPayload::decode(TaskType::DeepScrape, &raw).unwrap();
        match decoded {
            TaskPayload::Scrape(p) => {
                assert_eq!(p.portal, "linkedin");
                assert_eq!(p.location, "");
                assert!(p.blueprint_id.is_none());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn scrape_payload_requires_keywords() {
        let raw = json!({"portal": "indeed", "keywords": "  "});
        assert!(TaskPayload::decode(TaskType::Scrape, &raw).is_err());
    }

    #[test]
    fn apply_payload_requires_job_url_field() {
        let raw = json!({"job_id": "j1", "resume_id": "r1"});
        let err = TaskPayload::decode(TaskType::Apply, &raw).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn parse_resume_payload_is_passed_through() {
        let raw = json!({"resume_key": "abc"});
        assert_eq!(
            TaskPayload::decode(TaskType::ParseResume, &raw).unwrap(),
            TaskPayload::Opaque(raw)
        );
    }
}
