//! Infrastructure layer: stores, scheduler, background workers, config.

pub mod agents;
pub mod blueprints;
pub mod config;
pub mod db;
pub mod tasks;
pub mod verification;
pub mod workers;

pub use agents::{AgentRegistry, AgentRegistryError, InMemoryAgentRegistry, PostgresAgentRegistry};
pub use blueprints::{
    BlueprintService, BlueprintStore, BlueprintStoreError, Delivery, InMemoryBlueprintStore,
    PostgresBlueprintStore, SchedulerError,
};
pub use config::{ApiKeyEntry, ConfigError, ServerConfig};
pub use tasks::{
    InMemoryTaskStore, NewTask, PostgresTaskStore, TaskStats, TaskStore, TaskStoreError,
    Transitioned,
};
pub use verification::VerificationMailbox;
