//! Pairs: the groups formed by draining a pool, and their storage

use crate::error::{MatchmakingError, Result};
use crate::schedule::Schedule;
use crate::types::{PairId, Party, PartyId, PoolId};
use crate::utils::{current_timestamp, generate_pair_id};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Conflict state of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    None,
    Flagged,
    Resolved,
}

impl std::fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictStatus::None => write!(f, "None"),
            ConflictStatus::Flagged => write!(f, "Flagged"),
            ConflictStatus::Resolved => write!(f, "Resolved"),
        }
    }
}

/// A completed match of `pair_size` parties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub id: PairId,
    pub pool_id: PoolId,
    /// Matched parties in drain order
    pub parties: Vec<Party>,
    pub conflict_status: ConflictStatus,
    pub conflict_reason: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    /// Party whose join completed the pair
    pub created_by: PartyId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pair {
    pub fn new(
        pool_id: PoolId,
        parties: Vec<Party>,
        tenant_id: Option<String>,
        client_id: Option<String>,
        created_by: PartyId,
    ) -> Self {
        let now = current_timestamp();
        Self {
            id: generate_pair_id(),
            pool_id,
            parties,
            conflict_status: ConflictStatus::None,
            conflict_reason: None,
            tenant_id,
            client_id,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn size(&self) -> usize {
        self.parties.len()
    }

    pub fn party_ids(&self) -> Vec<PartyId> {
        self.parties.iter().map(|p| p.id).collect()
    }

    pub fn get_party(&self, party_id: PartyId) -> Option<&Party> {
        self.parties.iter().find(|p| p.id == party_id)
    }

    pub fn contains(&self, party_id: PartyId) -> bool {
        self.get_party(party_id).is_some()
    }

    /// Every player across all matched parties
    pub fn player_ids(&self) -> Vec<uuid::Uuid> {
        self.parties
            .iter()
            .flat_map(|p| p.members.iter().copied())
            .collect()
    }

    /// Availability shared by every member that declared one
    pub fn collective_schedule(&self) -> Option<Schedule> {
        Schedule::collective(self.parties.iter().filter_map(|p| p.schedule.as_ref()))
    }

    /// Mark the pair as conflicting. Re-flagging refreshes the reason.
    ///
    /// Returns whether the status changed.
    pub fn flag(&mut self, reason: impl Into<String>) -> Result<bool> {
        let changed = match self.conflict_status {
            ConflictStatus::None => true,
            ConflictStatus::Flagged => false,
            ConflictStatus::Resolved => {
                return Err(MatchmakingError::InvalidConflictTransition {
                    pair_id: self.id.to_string(),
                    from: ConflictStatus::Resolved.to_string(),
                    to: ConflictStatus::Flagged.to_string(),
                }
                .into())
            }
        };

        self.conflict_status = ConflictStatus::Flagged;
        self.conflict_reason = Some(reason.into());
        self.updated_at = current_timestamp();
        Ok(changed)
    }

    /// Administrative resolution of a flagged conflict
    pub fn resolve(&mut self) -> Result<()> {
        if self.conflict_status != ConflictStatus::Flagged {
            return Err(MatchmakingError::InvalidConflictTransition {
                pair_id: self.id.to_string(),
                from: self.conflict_status.to_string(),
                to: ConflictStatus::Resolved.to_string(),
            }
            .into());
        }
        self.conflict_status = ConflictStatus::Resolved;
        self.updated_at = current_timestamp();
        Ok(())
    }
}

/// Persistence for pairs
#[async_trait]
pub trait PairStore: Send + Sync {
    async fn save(&self, pair: Pair) -> Result<Pair>;

    async fn get_by_id(&self, pair_id: PairId) -> Result<Pair>;

    /// Pairs containing the party, newest first
    async fn find_pairs_by_party(&self, party_id: PartyId) -> Result<Vec<Pair>>;
}

/// In-memory pair storage
#[derive(Debug, Default)]
pub struct InMemoryPairStore {
    pairs: RwLock<HashMap<PairId, Pair>>,
}

impl InMemoryPairStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        let pairs = self
            .pairs
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("pair store read"))?;
        Ok(pairs.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl PairStore for InMemoryPairStore {
    async fn save(&self, pair: Pair) -> Result<Pair> {
        let mut pairs = self
            .pairs
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("pair store write"))?;
        pairs.insert(pair.id, pair.clone());
        Ok(pair)
    }

    async fn get_by_id(&self, pair_id: PairId) -> Result<Pair> {
        let pairs = self
            .pairs
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("pair store read"))?;
        pairs.get(&pair_id).cloned().ok_or_else(|| {
            MatchmakingError::PairNotFound {
                pair_id: pair_id.to_string(),
            }
            .into()
        })
    }

    async fn find_pairs_by_party(&self, party_id: PartyId) -> Result<Vec<Pair>> {
        let pairs = self
            .pairs
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("pair store read"))?;
        let mut found: Vec<Pair> = pairs
            .values()
            .filter(|p| p.contains(party_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn create_test_pair() -> Pair {
        let a = Party::solo(Uuid::new_v4());
        let b = Party::solo(Uuid::new_v4());
        let creator = b.id;
        Pair::new(Uuid::new_v4(), vec![a, b], None, None, creator)
    }

    #[test]
    fn test_new_pair_has_no_conflict() {
        let pair = create_test_pair();
        assert_eq!(pair.size(), 2);
        assert_eq!(pair.conflict_status, ConflictStatus::None);
        assert!(pair.contains(pair.created_by));
        assert_eq!(pair.player_ids().len(), 2);
    }

    #[test]
    fn test_conflict_transitions() {
        let mut pair = create_test_pair();
        assert!(pair.resolve().is_err());

        assert!(pair.flag("first").unwrap());
        assert!(!pair.flag("second").unwrap());
        assert_eq!(pair.conflict_reason.as_deref(), Some("second"));

        pair.resolve().unwrap();
        assert_eq!(pair.conflict_status, ConflictStatus::Resolved);

        let err = pair.flag("again").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::InvalidConflictTransition { .. })
        ));
        assert!(pair.resolve().is_err());
    }

    #[test]
    fn test_conflict_status_serializes_snake_case() {
        let json = serde_json::to_string(&ConflictStatus::Flagged).unwrap();
        assert_eq!(json, "\"flagged\"");
    }

    #[tokio::test]
    async fn test_store_lookups() {
        let store = InMemoryPairStore::new();
        let pair = create_test_pair();
        let member = pair.parties[0].id;
        store.save(pair.clone()).await.unwrap();

        assert_eq!(store.get_by_id(pair.id).await.unwrap(), pair);
        assert_eq!(store.find_pairs_by_party(member).await.unwrap().len(), 1);
        assert!(store
            .find_pairs_by_party(Uuid::new_v4())
            .await
            .unwrap()
            .is_empty());

        let err = store.get_by_id(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::PairNotFound { .. })
        ));
    }
}
