//! Generic retry wrapper.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::error::{classify, AutomationError, Severity};
use crate::log::{ErrorLog, ErrorRecord, ErrorSummary};
use crate::policy::RetryPolicy;

/// Runs fallible async operations under a [`RetryPolicy`] and keeps the
/// resulting error history.
///
/// One instance is shared by every automation primitive of a worker process.
#[derive(Debug, Default)]
pub struct RetryEngine {
    log: Mutex<ErrorLog>,
}

impl RetryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            log: Mutex::new(ErrorLog::with_capacity(capacity)),
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// policy's attempts are exhausted. The last error is returned.
    pub async fn execute<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        context: &str,
        mut op: F,
    ) -> Result<T, AutomationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AutomationError>>,
    {
        let attempts = policy.attempts();
        let mut attempt = 0u32;

        loop {
            let err = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(context, attempts = attempt + 1, "operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_non_retryable() {
                self.record(&err, context, false, Severity::High);
                error!(context, error_kind = err.kind(), error = %err, "non-retryable failure");
                return Err(err);
            }

            let class = classify(&err);
            self.record(&err, context, class.retryable, class.severity);

            let remaining = attempt + 1 < attempts;
            if !(class.retryable && remaining) {
                error!(
                    context,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    retryable = class.retryable,
                    error_kind = err.kind(),
                    error = %err,
                    "operation failed"
                );
                return Err(err);
            }

            let delay = policy.delay(attempt);
            warn!(
                context,
                attempt = attempt + 1,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error_kind = err.kind(),
                error = %err,
                "retrying after failure"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    pub fn recent_errors(&self, n: usize) -> Vec<ErrorRecord> {
        self.log().recent(n)
    }

    pub fn error_summary(&self) -> ErrorSummary {
        self.log().summary()
    }

    pub fn clear_errors(&self) {
        self.log().clear();
    }

    fn record(&self, err: &AutomationError, context: &str, retryable: bool, severity: Severity) {
        self.log().push(ErrorRecord {
            timestamp: Utc::now(),
            error_kind: err.kind().to_string(),
            message: err.message().to_string(),
            severity,
            context: context.to_string(),
            retryable,
        });
    }

    // A panic while holding the lock leaves the history intact; keep using it.
    fn log(&self) -> MutexGuard<'_, ErrorLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::policy::BackoffStrategy;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
            jitter_range: 0.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_twice_then_value() {
        let engine = RetryEngine::new();
        let calls = &AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let value = engine
            .execute(&policy(3), "fetch listing", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AutomationError::Network("connection reset".into()))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let records = engine.recent_errors(10);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.retryable && r.error_kind == "network"));
        // 1s after the first failure, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_escapes_immediately() {
        let engine = RetryEngine::new();
        let calls = &AtomicU32::new(0);

        let err = engine
            .execute(&policy(5), "upload resume", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AutomationError::FileUpload("/tmp/missing.pdf".into()))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, AutomationError::FileUpload(_)));
        let records = engine.recent_errors(10);
        assert_eq!(records.len(), 1);
        assert!(!records[0].retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_return_last_error() {
        let engine = RetryEngine::new();
        let calls = &AtomicU32::new(0);

        let err = engine
            .execute(&policy(3), "navigate", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AutomationError::Navigation(format!("status 503 #{n}")))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err, AutomationError::Navigation("status 503 #2".into()));
        assert_eq!(engine.error_summary().total, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unclassified_errors_use_keyword_heuristic() {
        let engine = RetryEngine::new();
        let calls = &AtomicU32::new(0);

        let err = engine
            .execute(&policy(4), "fill form", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AutomationError::other("unauthorized"))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), "unclassified");

        calls.store(0, Ordering::SeqCst);
        let _ = engine
            .execute(&policy(4), "fill form", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AutomationError::other("socket timeout"))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_runs_once() {
        let engine = RetryEngine::new();
        let result = engine
            .execute(&policy(0), "noop", move || async move { Ok::<_, AutomationError>("done") })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert!(engine.recent_errors(1).is_empty());
    }
}
