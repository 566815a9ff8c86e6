//! Automation error taxonomy and the single classifier over it.

use serde::{Deserialize, Serialize};

/// Failure raised by a browser-automation step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AutomationError {
    #[error("browser error: {0}")]
    Browser(String),

    #[error("navigation error: {0}")]
    Navigation(String),

    #[error("form error: {0}")]
    Form(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("portal layout changed: {0}")]
    PortalChange(String),

    #[error("file upload error: {0}")]
    FileUpload(String),

    #[error("{0}")]
    NonRetryable(String),

    /// Anything not raised through one of the explicit kinds.
    #[error("{0}")]
    Other(String),
}

impl AutomationError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AutomationError::Browser(_) => "browser",
            AutomationError::Navigation(_) => "navigation",
            AutomationError::Form(_) => "form",
            AutomationError::Network(_) => "network",
            AutomationError::PortalChange(_) => "portal_change",
            AutomationError::FileUpload(_) => "file_upload",
            AutomationError::NonRetryable(_) => "non_retryable",
            AutomationError::Other(_) => "unclassified",
        }
    }

    /// Precondition failures that must escape the retry loop immediately.
    pub fn is_non_retryable(&self) -> bool {
        matches!(
            self,
            AutomationError::NonRetryable(_) | AutomationError::FileUpload(_)
        )
    }

    pub fn message(&self) -> &str {
        match self {
            AutomationError::Browser(m)
            | AutomationError::Navigation(m)
            | AutomationError::Form(m)
            | AutomationError::Network(m)
            | AutomationError::PortalChange(m)
            | AutomationError::FileUpload(m)
            | AutomationError::NonRetryable(m)
            | AutomationError::Other(m) => m,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Classification {
    pub retryable: bool,
    pub severity: Severity,
}

impl Classification {
    const fn new(retryable: bool, severity: Severity) -> Self {
        Self { retryable, severity }
    }
}

const CRITICAL_KEYWORDS: &[&str] = &["critical", "fatal", "crash"];
const AUTH_KEYWORDS: &[&str] = &["auth", "permission", "forbidden", "unauthorized"];
const THROTTLE_KEYWORDS: &[&str] = &["rate limit", "too many requests", "429"];
const TRANSIENT_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "temporarily",
    "502",
    "503",
];

/// Map an error to `{retryable, severity}`.
///
/// Explicit kinds are classified by type. Unclassified errors fall back to a
/// case-insensitive substring match on the message.
pub fn classify(err: &AutomationError) -> Classification {
    match err {
        AutomationError::Browser(_)
        | AutomationError::Navigation(_)
        | AutomationError::Form(_)
        | AutomationError::Network(_) => Classification::new(true, Severity::Medium),
        AutomationError::PortalChange(_) => Classification::new(true, Severity::High),
        AutomationError::FileUpload(_) | AutomationError::NonRetryable(_) => {
            Classification::new(false, Severity::High)
        }
        AutomationError::Other(msg) => classify_message(msg),
    }
}

fn classify_message(msg: &str) -> Classification {
    let msg = msg.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| msg.contains(w));

    if has(CRITICAL_KEYWORDS) {
        Classification::new(false, Severity::Critical)
    } else if has(AUTH_KEYWORDS) {
        Classification::new(false, Severity::High)
    } else if has(THROTTLE_KEYWORDS) {
        Classification::new(true, Severity::Low)
    } else if has(TRANSIENT_KEYWORDS) {
        Classification::new(true, Severity::Medium)
    } else {
        Classification::new(false, Severity::Medium)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_kinds_classify_by_type() {
        assert!(classify(&AutomationError::Network("reset".into())).retryable);
        assert!(classify(&AutomationError::Navigation("404".into())).retryable);
        assert_eq!(
            classify(&AutomationError::PortalChange("no apply button".into())).severity,
            Severity::High
        );
        assert!(!classify(&AutomationError::FileUpload("missing".into())).retryable);
    }

    #[test]
    fn keyword_heuristic_for_unclassified_errors() {
        let c = classify(&AutomationError::other("Request Timed Out after 30s"));
        assert_eq!(c, Classification::new(true, Severity::Medium));

        let c = classify(&AutomationError::other("connection refused"));
        assert!(c.retryable);

        let c = classify(&AutomationError::other("Rate limit exceeded"));
        assert_eq!(c, Classification::new(true, Severity::Low));

        let c = classify(&AutomationError::other("permission denied for upload"));
        assert_eq!(c, Classification::new(false, Severity::High));

        let c = classify(&AutomationError::other("renderer crash"));
        assert_eq!(c.severity, Severity::Critical);
    }

    #[test]
    fn unknown_messages_are_not_retried() {
        let c = classify(&AutomationError::other("element is not a select"));
        assert_eq!(c, Classification::new(false, Severity::Medium));
    }

    #[test]
    fn substring_matching_is_coarse() {
        // "author" contains "auth".
        let c = classify(&AutomationError::other("author field missing"));
        assert_eq!(c.severity, Severity::High);
    }
}
