use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jobrelay_blueprints::{Blueprint, BlueprintPatch};
use jobrelay_core::{BlueprintId, OwnerId};

use super::{BlueprintStore, BlueprintStoreError, BlueprintUpdate};

#[derive(Debug, Default)]
pub struct InMemoryBlueprintStore {
    blueprints: RwLock<HashMap<BlueprintId, Blueprint>>,
}

impl InMemoryBlueprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<BlueprintId, Blueprint>>, BlueprintStoreError> {
        self.blueprints
            .read()
            .map_err(|_| BlueprintStoreError::Storage("blueprint store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<BlueprintId, Blueprint>>, BlueprintStoreError> {
        self.blueprints
            .write()
            .map_err(|_| BlueprintStoreError::Storage("blueprint store lock poisoned".to_string()))
    }

    fn modify<F>(&self, id: BlueprintId, f: F) -> Result<Blueprint, BlueprintStoreError>
    where
        F: FnOnce(&mut Blueprint),
    {
        let mut blueprints = self.write()?;
        let bp = blueprints.get_mut(&id).ok_or(BlueprintStoreError::NotFound(id))?;
        f(bp);
        Ok(bp.clone())
    }
}

#[async_trait]
impl BlueprintStore for InMemoryBlueprintStore {
    async fn create(&self, blueprint: Blueprint) -> Result<Blueprint, BlueprintStoreError> {
        self.write()?.insert(blueprint.id, blueprint.clone());
        Ok(blueprint)
    }

    async fn get(&self, id: BlueprintId) -> Result<Option<Blueprint>, BlueprintStoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn list_for_owner(&self, owner: OwnerId) -> Result<Vec<Blueprint>, BlueprintStoreError> {
        let mut result: Vec<Blueprint> = self
            .read()?
            .values()
            .filter(|b| b.owner == owner)
            .cloned()
            .collect();
        result.sort_by_key(|b| b.created_at);
        Ok(result)
    }

    async fn list_active(&self) -> Result<Vec<Blueprint>, BlueprintStoreError> {
        let mut result: Vec<Blueprint> = self
            .read()?
            .values()
            .filter(|b| b.is_active)
            .cloned()
            .collect();
        result.sort_by_key(|b| b.created_at);
        Ok(result)
    }

    async fn update(
        &self,
        id: BlueprintId,
        patch: BlueprintPatch,
        now: DateTime<Utc>,
    ) -> Result<BlueprintUpdate, BlueprintStoreError> {
        let mut blueprints = self.write()?;
        let bp = blueprints.get_mut(&id).ok_or(BlueprintStoreError::NotFound(id))?;
        let previous = bp.clone();
        let mut current = bp.clone();
        current.apply_patch(patch, now)?;
        *bp = current.clone();
        Ok(BlueprintUpdate { previous, current })
    }

    async fn record_delivery(
        &self,
        id: BlueprintId,
        now: DateTime<Utc>,
    ) -> Result<Blueprint, BlueprintStoreError> {
        self.modify(id, |bp| bp.record_delivery(now))
    }

    async fn record_matches(
        &self,
        id: BlueprintId,
        jobs: u64,
        now: DateTime<Utc>,
    ) -> Result<Blueprint, BlueprintStoreError> {
        self.modify(id, |bp| bp.record_matches(jobs, now))
    }
}
