//! Party and availability resolution

use crate::error::{MatchmakingError, Result};
use crate::schedule::Schedule;
use crate::types::{Party, PartyId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Resolves parties and their availability
#[async_trait]
pub trait PartyDirectory: Send + Sync {
    /// Current availability of a party, `None` when unknown
    async fn schedule_for_party(&self, party_id: PartyId) -> Result<Option<Schedule>>;

    /// Resolve the full party entity
    async fn get_party(&self, party_id: PartyId) -> Result<Party>;
}

/// In-memory party directory.
///
/// With `auto_register` enabled, unknown ids resolve to a solo party on
/// first lookup. The event-driven service uses this since players queue
/// individually and party membership lives elsewhere.
#[derive(Debug, Default)]
pub struct InMemoryPartyDirectory {
    parties: RwLock<HashMap<PartyId, Party>>,
    auto_register: bool,
}

impl InMemoryPartyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_register() -> Self {
        Self {
            parties: RwLock::new(HashMap::new()),
            auto_register: true,
        }
    }

    pub fn register(&self, party: Party) -> Result<()> {
        let mut parties = self
            .parties
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("party directory write"))?;
        parties.insert(party.id, party);
        Ok(())
    }

    /// Replace a registered party's availability
    pub fn set_schedule(&self, party_id: PartyId, schedule: Option<Schedule>) -> Result<()> {
        let mut parties = self
            .parties
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("party directory write"))?;
        let party = parties
            .get_mut(&party_id)
            .ok_or_else(|| MatchmakingError::PartyNotFound {
                party_id: party_id.to_string(),
            })?;
        party.schedule = schedule;
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let parties = self
            .parties
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("party directory read"))?;
        Ok(parties.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lookup(&self, party_id: PartyId) -> Result<Option<Party>> {
        let parties = self
            .parties
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("party directory read"))?;
        Ok(parties.get(&party_id).cloned())
    }
}

#[async_trait]
impl PartyDirectory for InMemoryPartyDirectory {
    async fn schedule_for_party(&self, party_id: PartyId) -> Result<Option<Schedule>> {
        Ok(self.lookup(party_id)?.and_then(|party| party.schedule))
    }

    async fn get_party(&self, party_id: PartyId) -> Result<Party> {
        if let Some(party) = self.lookup(party_id)? {
            return Ok(party);
        }

        if self.auto_register {
            debug!("Registering solo party {}", party_id);
            let party = Party::solo(party_id);
            self.register(party.clone())?;
            return Ok(party);
        }

        Err(MatchmakingError::PartyNotFound {
            party_id: party_id.to_string(),
        }
        .into())
    }
}
