//! One-shot verification codes relayed from the owner to an agent that is
//! blocked on a portal challenge.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use jobrelay_core::TaskId;

/// Codes older than this are discarded unread.
pub const CODE_TTL_SECS: i64 = 600;

#[derive(Debug, Default)]
pub struct VerificationMailbox {
    codes: Mutex<HashMap<TaskId, (String, DateTime<Utc>)>>,
}

impl VerificationMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a code for `task_id`, replacing any unread one.
    pub fn submit(&self, task_id: TaskId, code: impl Into<String>, now: DateTime<Utc>) {
        let mut codes = self.codes.lock().unwrap_or_else(|p| p.into_inner());
        codes.insert(task_id, (code.into(), now));
    }

    /// Consume the code for `task_id`, if a fresh one is waiting.
    pub fn take(&self, task_id: TaskId, now: DateTime<Utc>) -> Option<String> {
        let mut codes = self.codes.lock().unwrap_or_else(|p| p.into_inner());
        codes.retain(|_, (_, at)| now - *at <= Duration::seconds(CODE_TTL_SECS));
        codes.remove(&task_id).map(|(code, _)| code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_consumed_on_first_read() {
        let mailbox = VerificationMailbox::new();
        let task = TaskId::new();
        let now = Utc::now();
        assert_eq!(mailbox.take(task, now), None);

        mailbox.submit(task, "123456", now);
        assert_eq!(mailbox.take(task, now).as_deref(), Some("123456"));
        assert_eq!(mailbox.take(task, now), None);
    }

    #[test]
    fn stale_codes_expire() {
        let mailbox = VerificationMailbox::new();
        let task = TaskId::new();
        let now = Utc::now();
        mailbox.submit(task, "654321", now);
        assert_eq!(mailbox.take(task, now + Duration::seconds(CODE_TTL_SECS + 1)), None);
    }
}
