use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

use jobrelay_agents::{Agent, AgentStatus};
use jobrelay_core::OwnerId;

use super::{AgentRegistry, AgentRegistryError};

/// In-memory registry keyed by pairing identity.
#[derive(Debug)]
pub struct InMemoryAgentRegistry {
    agents: RwLock<HashMap<String, Agent>>,
    default_max_tasks_per_hour: u32,
}

impl InMemoryAgentRegistry {
    pub fn new(default_max_tasks_per_hour: u32) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            default_max_tasks_per_hour,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Agent>>, AgentRegistryError> {
        self.agents
            .read()
            .map_err(|_| AgentRegistryError::Storage("agent registry lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Agent>>, AgentRegistryError> {
        self.agents
            .write()
            .map_err(|_| AgentRegistryError::Storage("agent registry lock poisoned".to_string()))
    }
}

#[async_trait]
impl AgentRegistry for InMemoryAgentRegistry {
    async fn register(
        &self,
        owner: OwnerId,
        agent_id: &str,
        name: Option<String>,
        metadata: JsonValue,
    ) -> Result<Agent, AgentRegistryError> {
        let now = Utc::now();
        let mut agents = self.write()?;
        if let Some(existing) = agents.get_mut(agent_id) {
            if existing.owner != owner {
                return Err(AgentRegistryError::OwnershipMismatch(agent_id.to_string()));
            }
            existing.re_register(name, metadata, now);
            return Ok(existing.clone());
        }

        let agent = Agent::pair(owner, agent_id, name, metadata, self.default_max_tasks_per_hour, now);
        agents.insert(agent_id.to_string(), agent.clone());
        info!(agent_id, owner = %owner, "agent paired");
        Ok(agent)
    }

    async fn heartbeat(
        &self,
        agent_id: &str,
        status: AgentStatus,
        active_tasks: u32,
    ) -> Result<Agent, AgentRegistryError> {
        let mut agents = self.write()?;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| AgentRegistryError::NotFound(agent_id.to_string()))?;
        agent.heartbeat(status, active_tasks, Utc::now());
        Ok(agent.clone())
    }

    async fn get(&self, agent_id: &str) -> Result<Option<Agent>, AgentRegistryError> {
        Ok(self.read()?.get(agent_id).cloned())
    }

    async fn list_for_owner(&self, owner: OwnerId) -> Result<Vec<Agent>, AgentRegistryError> {
        let mut agents: Vec<Agent> = self
            .read()?
            .values()
            .filter(|a| a.owner == owner)
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(agents)
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, AgentRegistryError> {
        let mut agents = self.write()?;
        let mut changed = 0;
        for agent in agents.values_mut().filter(|a| a.is_stale(now)) {
            agent.mark_offline(now);
            changed += 1;
        }
        Ok(changed)
    }

    async fn rate_limit_check(&self, agent_id: &str) -> Result<bool, AgentRegistryError> {
        self.read()?
            .get(agent_id)
            .map(Agent::has_capacity)
            .ok_or_else(|| AgentRegistryError::NotFound(agent_id.to_string()))
    }

    async fn try_record_claim(&self, agent_id: &str) -> Result<bool, AgentRegistryError> {
        let mut agents = self.write()?;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| AgentRegistryError::NotFound(agent_id.to_string()))?;
        Ok(agent.record_claim(Utc::now()))
    }

    async fn reset_sweep(&self, now: DateTime<Utc>) -> Result<usize, AgentRegistryError> {
        let mut agents = self.write()?;
        Ok(agents
            .values_mut()
            .map(|a| a.roll_rate_window(now))
            .filter(|rolled| *rolled)
            .count())
    }
}
