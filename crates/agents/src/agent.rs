use core::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobrelay_core::{AgentRecordId, DomainError, OwnerId};

/// An agent silent for longer than this is considered gone.
pub const HEARTBEAT_TIMEOUT_SECS: i64 = 120;

/// Length of the rate-limit accounting window.
pub const RATE_WINDOW_SECS: i64 = 3600;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Online,
    Offline,
    Busy,
    Idle,
    Error,
}

impl AgentStatus {
    /// Statuses that claim the agent is alive and must be backed by heartbeats.
    pub fn is_live(self) -> bool {
        matches!(self, AgentStatus::Online | AgentStatus::Busy | AgentStatus::Idle)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Online => "ONLINE",
            AgentStatus::Offline => "OFFLINE",
            AgentStatus::Busy => "BUSY",
            AgentStatus::Idle => "IDLE",
            AgentStatus::Error => "ERROR",
        }
    }
}

impl core::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            AgentStatus::Online,
            AgentStatus::Offline,
            AgentStatus::Busy,
            AgentStatus::Idle,
            AgentStatus::Error,
        ]
        .into_iter()
        .find(|v| v.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| DomainError::validation(format!("unknown agent status: {s}")))
    }
}

/// A paired remote worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentRecordId,
    pub owner: OwnerId,
    /// Stable pairing identity chosen by the agent process.
    pub agent_id: String,
    pub name: Option<String>,
    pub status: AgentStatus,
    pub metadata: JsonValue,
    pub active_tasks: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub tasks_this_hour: u32,
    pub max_tasks_per_hour: u32,
    pub rate_limit_reset_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// First-time pairing. The agent starts ONLINE with a fresh rate window.
    pub fn pair(
        owner: OwnerId,
        agent_id: impl Into<String>,
        name: Option<String>,
        metadata: JsonValue,
        max_tasks_per_hour: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AgentRecordId::new(),
            owner,
            agent_id: agent_id.into(),
            name,
            status: AgentStatus::Online,
            metadata,
            active_tasks: 0,
            last_heartbeat: Some(now),
            tasks_this_hour: 0,
            max_tasks_per_hour,
            rate_limit_reset_at: now + Duration::seconds(RATE_WINDOW_SECS),
            created_at: now,
            updated_at: now,
        }
    }

    /// Repeat pairing of a known agent: refresh identity details and liveness,
    /// keep counters.
    pub fn re_register(&mut self, name: Option<String>, metadata: JsonValue, now: DateTime<Utc>) {
        if name.is_some() {
            self.name = name;
        }
        self.metadata = metadata;
        self.status = AgentStatus::Online;
        self.last_heartbeat = Some(now);
        self.updated_at = now;
    }

    pub fn heartbeat(&mut self, status: AgentStatus, active_tasks: u32, now: DateTime<Utc>) {
        self.status = status;
        self.active_tasks = active_tasks;
        self.last_heartbeat = Some(now);
        self.updated_at = now;
    }

    /// True when the agent claims to be alive but has not been heard from
    /// for more than [`HEARTBEAT_TIMEOUT_SECS`].
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        if !self.status.is_live() {
            return false;
        }
        match self.last_heartbeat {
            Some(at) => now - at > Duration::seconds(HEARTBEAT_TIMEOUT_SECS),
            None => true,
        }
    }

    pub fn mark_offline(&mut self, now: DateTime<Utc>) {
        self.status = AgentStatus::Offline;
        self.updated_at = now;
    }

    /// Rate-limit check: another task may be handed out this hour.
    pub fn has_capacity(&self) -> bool {
        self.tasks_this_hour < self.max_tasks_per_hour
    }

    /// Count one claimed task against the hourly budget.
    ///
    /// Returns `false` (and changes nothing) when the budget is exhausted.
    pub fn record_claim(&mut self, now: DateTime<Utc>) -> bool {
        if !self.has_capacity() {
            return false;
        }
        self.tasks_this_hour += 1;
        self.updated_at = now;
        true
    }

    /// Zero the counter once the window has elapsed and move the window
    /// forward by one hour. Returns whether anything changed.
    pub fn roll_rate_window(&mut self, now: DateTime<Utc>) -> bool {
        if self.rate_limit_reset_at > now {
            return false;
        }
        self.tasks_this_hour = 0;
        self.rate_limit_reset_at += Duration::seconds(RATE_WINDOW_SECS);
        self.updated_at = now;
        true
    }
}
