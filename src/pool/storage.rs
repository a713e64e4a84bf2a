//! Pool storage interface and the in-memory implementation

use super::instance::PoolSnapshot;
use crate::error::{MatchmakingError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Persistence for pool state, keyed by criteria fingerprint
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Look up a persisted pool by its criteria fingerprint
    async fn find_pool(&self, fingerprint: &str) -> Result<Option<PoolSnapshot>>;

    /// All persisted pools for a game in a region
    async fn find_pools_in_scope(&self, game_id: Uuid, region: &str) -> Result<Vec<PoolSnapshot>>;

    /// Store the pool, replacing any previous state (last writer wins)
    async fn save(&self, pool: PoolSnapshot) -> Result<PoolSnapshot>;
}

/// In-memory pool storage
#[derive(Debug, Default)]
pub struct InMemoryPoolStore {
    pools: RwLock<HashMap<String, PoolSnapshot>>,
}

impl InMemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        let pools = self
            .pools
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("pool store read"))?;
        Ok(pools.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl PoolStore for InMemoryPoolStore {
    async fn find_pool(&self, fingerprint: &str) -> Result<Option<PoolSnapshot>> {
        let pools = self
            .pools
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("pool store read"))?;
        Ok(pools.get(fingerprint).cloned())
    }

    async fn find_pools_in_scope(&self, game_id: Uuid, region: &str) -> Result<Vec<PoolSnapshot>> {
        let pools = self
            .pools
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("pool store read"))?;
        let mut found: Vec<PoolSnapshot> = pools
            .values()
            .filter(|p| p.key.in_scope(game_id, region))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn save(&self, pool: PoolSnapshot) -> Result<PoolSnapshot> {
        let mut pools = self
            .pools
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("pool store write"))?;
        pools.insert(pool.fingerprint.clone(), pool.clone());
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::criteria::{Criteria, SkillRange};
    use crate::pool::instance::Pool;

    #[tokio::test]
    async fn test_save_and_find() {
        let store = InMemoryPoolStore::new();
        let game = Uuid::new_v4();
        let pool = Pool::new(Criteria::new(game, "eu-west", 2, SkillRange::new(0, 100)));
        pool.join(Uuid::new_v4()).unwrap();

        let snapshot = pool.snapshot().unwrap();
        store.save(snapshot.clone()).await.unwrap();

        let found = store.find_pool(&snapshot.fingerprint).await.unwrap().unwrap();
        assert_eq!(found, snapshot);
        assert!(store.find_pool("missing").await.unwrap().is_none());

        let scoped = store.find_pools_in_scope(game, "EU-West").await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert!(store
            .find_pools_in_scope(game, "na-east")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let store = InMemoryPoolStore::new();
        let pool = Pool::new(Criteria::new(Uuid::new_v4(), "eu-west", 2, SkillRange::new(0, 100)));
        store.save(pool.snapshot().unwrap()).await.unwrap();

        pool.join(Uuid::new_v4()).unwrap();
        store.save(pool.snapshot().unwrap()).await.unwrap();

        assert_eq!(store.len().unwrap(), 1);
        let found = store
            .find_pool(&pool.key().fingerprint())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
