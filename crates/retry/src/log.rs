use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Severity;

/// Maximum records kept; the oldest is evicted first.
pub const ERROR_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub error_kind: String,
    pub message: String,
    pub severity: Severity,
    pub context: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub total: usize,
    pub retryable: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

/// Append-only, bounded error history.
#[derive(Debug)]
pub struct ErrorLog {
    records: VecDeque<ErrorRecord>,
    capacity: usize,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::with_capacity(ERROR_LOG_CAPACITY)
    }
}

impl ErrorLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(ERROR_LOG_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, record: ErrorRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Up to `n` most recent records, newest last.
    pub fn recent(&self, n: usize) -> Vec<ErrorRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn summary(&self) -> ErrorSummary {
        let mut summary = ErrorSummary {
            total: self.records.len(),
            ..Default::default()
        };
        for r in &self.records {
            if r.retryable {
                summary.retryable += 1;
            }
            *summary.by_kind.entry(r.error_kind.clone()).or_default() += 1;
            *summary.by_severity.entry(r.severity).or_default() += 1;
        }
        summary
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
