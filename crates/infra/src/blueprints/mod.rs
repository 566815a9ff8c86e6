//! Blueprint persistence and the Blueprint Scheduler.

pub mod memory;
pub mod postgres;
pub mod scheduler;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jobrelay_blueprints::{Blueprint, BlueprintPatch};
use jobrelay_core::{BlueprintId, DomainError, OwnerId};

pub use memory::InMemoryBlueprintStore;
pub use postgres::PostgresBlueprintStore;
pub use scheduler::{BlueprintService, Delivery, SchedulerError, TickReport};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlueprintStoreError {
    #[error("blueprint not found: {0}")]
    NotFound(BlueprintId),

    #[error(transparent)]
    Invalid(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Result of [`BlueprintStore::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct BlueprintUpdate {
    pub previous: Blueprint,
    pub current: Blueprint,
}

#[async_trait]
pub trait BlueprintStore: Send + Sync {
    async fn create(&self, blueprint: Blueprint) -> Result<Blueprint, BlueprintStoreError>;

    async fn get(&self, id: BlueprintId) -> Result<Option<Blueprint>, BlueprintStoreError>;

    async fn list_for_owner(&self, owner: OwnerId) -> Result<Vec<Blueprint>, BlueprintStoreError>;

    /// Every blueprint with `is_active = true`.
    async fn list_active(&self) -> Result<Vec<Blueprint>, BlueprintStoreError>;

    async fn update(
        &self,
        id: BlueprintId,
        patch: BlueprintPatch,
        now: DateTime<Utc>,
    ) -> Result<BlueprintUpdate, BlueprintStoreError>;

    async fn record_delivery(
        &self,
        id: BlueprintId,
        now: DateTime<Utc>,
    ) -> Result<Blueprint, BlueprintStoreError>;

    async fn record_matches(
        &self,
        id: BlueprintId,
        jobs: u64,
        now: DateTime<Utc>,
    ) -> Result<Blueprint, BlueprintStoreError>;
}
