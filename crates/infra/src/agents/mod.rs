//! Agent Registry & Heartbeat Monitor.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use jobrelay_agents::{Agent, AgentStatus};
use jobrelay_core::OwnerId;

pub use memory::InMemoryAgentRegistry;
pub use postgres::PostgresAgentRegistry;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentRegistryError {
    #[error("agent not registered: {0}")]
    NotFound(String),

    /// The pairing identity already belongs to another owner.
    #[error("agent {0} is paired with a different owner")]
    OwnershipMismatch(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Idempotent pairing: creates the agent or refreshes a known one.
    async fn register(
        &self,
        owner: OwnerId,
        agent_id: &str,
        name: Option<String>,
        metadata: JsonValue,
    ) -> Result<Agent, AgentRegistryError>;

    async fn heartbeat(
        &self,
        agent_id: &str,
        status: AgentStatus,
        active_tasks: u32,
    ) -> Result<Agent, AgentRegistryError>;

    async fn get(&self, agent_id: &str) -> Result<Option<Agent>, AgentRegistryError>;

    async fn list_for_owner(&self, owner: OwnerId) -> Result<Vec<Agent>, AgentRegistryError>;

    /// Flip live agents silent for more than two minutes to OFFLINE.
    /// Returns how many changed.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, AgentRegistryError>;

    /// True iff the agent may take another task this hour.
    async fn rate_limit_check(&self, agent_id: &str) -> Result<bool, AgentRegistryError>;

    /// Check and count one claim in a single step. `false` when over budget.
    async fn try_record_claim(&self, agent_id: &str) -> Result<bool, AgentRegistryError>;

    /// Zero counters whose window has elapsed and advance the window.
    /// Returns how many agents were reset.
    async fn reset_sweep(&self, now: DateTime<Utc>) -> Result<usize, AgentRegistryError>;
}

