//! Process-wide arena of live pools keyed by canonical criteria
//!
//! Lookups go through a read lock. Misses are resolved one at a time under
//! an async creation lock so two concurrent first joins for the same key
//! always end up in the same live pool.

use super::criteria::{Criteria, CriteriaKey};
use super::instance::Pool;
use super::storage::PoolStore;
use crate::error::{MatchmakingError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Where a pool handed out by the registry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolOrigin {
    /// Already live in this process
    Live,
    /// Loaded from storage on first access
    Hydrated,
    /// Newly created for a first join
    Created,
}

#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: RwLock<HashMap<CriteriaKey, Arc<Pool>>>,
    creation: Mutex<()>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live pool for a key, if any
    pub fn get(&self, key: &CriteriaKey) -> Result<Option<Arc<Pool>>> {
        let pools = self
            .pools
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("pool registry read"))?;
        Ok(pools.get(key).cloned())
    }

    fn insert(&self, pool: Arc<Pool>) -> Result<()> {
        let mut pools = self
            .pools
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("pool registry write"))?;
        pools.insert(pool.key().clone(), pool);
        Ok(())
    }

    async fn load(&self, key: &CriteriaKey, store: &dyn PoolStore) -> Result<Option<Arc<Pool>>> {
        let snapshot = store
            .find_pool(&key.fingerprint())
            .await
            .map_err(|e| MatchmakingError::storage("find pool", e))?;

        Ok(snapshot.map(|snapshot| {
            debug!(
                "Hydrated pool {} with {} waiting parties",
                snapshot.id,
                snapshot.waiting.len()
            );
            Arc::new(Pool::from_snapshot(snapshot))
        }))
    }

    /// Live pool for the criteria, loading it from storage or creating it
    /// on a miss
    pub async fn get_or_create(
        &self,
        criteria: &Criteria,
        store: &dyn PoolStore,
    ) -> Result<(Arc<Pool>, PoolOrigin)> {
        let key = criteria.key();
        if let Some(pool) = self.get(&key)? {
            return Ok((pool, PoolOrigin::Live));
        }

        let _guard = self.creation.lock().await;
        if let Some(pool) = self.get(&key)? {
            return Ok((pool, PoolOrigin::Live));
        }

        let (pool, origin) = match self.load(&key, store).await? {
            Some(pool) => (pool, PoolOrigin::Hydrated),
            None => {
                let pool = Arc::new(Pool::new(criteria.clone()));
                info!("Created pool {} for {}", pool.id(), key);
                (pool, PoolOrigin::Created)
            }
        };

        self.insert(pool.clone())?;
        Ok((pool, origin))
    }

    /// Live or stored pool for the criteria; never creates one
    pub async fn find(&self, criteria: &Criteria, store: &dyn PoolStore) -> Result<Option<Arc<Pool>>> {
        let key = criteria.key();
        if let Some(pool) = self.get(&key)? {
            return Ok(Some(pool));
        }

        let _guard = self.creation.lock().await;
        if let Some(pool) = self.get(&key)? {
            return Ok(Some(pool));
        }

        let pool = self.load(&key, store).await?;
        if let Some(pool) = &pool {
            self.insert(pool.clone())?;
        }
        Ok(pool)
    }

    /// Every pool for a game in a region, oldest first. Stored pools that
    /// are not live yet are hydrated.
    pub async fn scoped(&self, game_id: Uuid, region: &str, store: &dyn PoolStore) -> Result<Vec<Arc<Pool>>> {
        let stored = store
            .find_pools_in_scope(game_id, region)
            .await
            .map_err(|e| MatchmakingError::storage("find pools in scope", e))?;

        if !stored.is_empty() {
            let _guard = self.creation.lock().await;
            for snapshot in stored {
                if self.get(&snapshot.key)?.is_none() {
                    self.insert(Arc::new(Pool::from_snapshot(snapshot)))?;
                }
            }
        }

        let pools = self
            .pools
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("pool registry read"))?;
        let mut scoped: Vec<Arc<Pool>> = pools
            .values()
            .filter(|p| p.key().in_scope(game_id, region))
            .cloned()
            .collect();
        scoped.sort_by_key(|p| p.created_at());
        Ok(scoped)
    }

    /// All live pools
    pub fn pools(&self) -> Result<Vec<Arc<Pool>>> {
        let pools = self
            .pools
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("pool registry read"))?;
        Ok(pools.values().cloned().collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.pools()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Total parties waiting across all live pools
    pub fn waiting_parties(&self) -> Result<usize> {
        let mut total = 0;
        for pool in self.pools()? {
            total += pool.len()?;
        }
        Ok(total)
    }
}
