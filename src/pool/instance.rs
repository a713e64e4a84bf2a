//! Pool instance: a criteria-scoped FIFO queue of waiting parties
//!
//! Every operation takes the pool's own lock; distinct pools never contend.
//! The lock is a plain mutex and is never held across an await point.
//! Tasks that want to wait for an empty pool to fill use [`Pool::peek_wait`],
//! which parks the task on a [`Notify`] instead of blocking a thread.

use super::criteria::{Criteria, CriteriaKey};
use crate::error::{MatchmakingError, Result};
use crate::types::{PartyId, PoolId};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

/// Serializable pool state handed to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub id: PoolId,
    pub fingerprint: String,
    pub key: CriteriaKey,
    pub criteria: Criteria,
    pub waiting: Vec<PartyId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PoolSnapshot {
    pub fn pair_size(&self) -> usize {
        self.key.pair_size
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

#[derive(Debug)]
struct PoolState {
    waiting: VecDeque<PartyId>,
    updated_at: DateTime<Utc>,
}

impl PoolState {
    fn touch(&mut self) {
        self.updated_at = current_timestamp();
    }

    fn take_front(&mut self, n: usize) -> Option<Vec<PartyId>> {
        if self.waiting.len() < n {
            return None;
        }
        let drained: Vec<PartyId> = self.waiting.drain(..n).collect();
        self.touch();
        Some(drained)
    }
}

#[derive(Debug)]
pub struct Pool {
    id: PoolId,
    key: CriteriaKey,
    criteria: Criteria,
    created_at: DateTime<Utc>,
    state: Mutex<PoolState>,
    joined: Notify,
}

impl Pool {
    /// Create an empty pool for the given criteria
    pub fn new(criteria: Criteria) -> Self {
        let now = current_timestamp();
        let mut criteria = criteria;
        // The creating party's schedule is not a pool attribute.
        criteria.schedule = None;
        Self {
            id: Uuid::new_v4(),
            key: criteria.key(),
            criteria,
            created_at: now,
            state: Mutex::new(PoolState {
                waiting: VecDeque::new(),
                updated_at: now,
            }),
            joined: Notify::new(),
        }
    }

    /// Rebuild a live pool from persisted state, dropping duplicate ids
    pub fn from_snapshot(snapshot: PoolSnapshot) -> Self {
        let mut waiting = VecDeque::with_capacity(snapshot.waiting.len());
        for id in snapshot.waiting {
            if !waiting.contains(&id) {
                waiting.push_back(id);
            }
        }

        Self {
            id: snapshot.id,
            key: snapshot.key,
            criteria: snapshot.criteria,
            created_at: snapshot.created_at,
            state: Mutex::new(PoolState {
                waiting,
                updated_at: snapshot.updated_at,
            }),
            joined: Notify::new(),
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn key(&self) -> &CriteriaKey {
        &self.key
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    pub fn pair_size(&self) -> usize {
        self.key.pair_size
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.state
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("pool state").into())
    }

    /// Append a party unless it is already waiting.
    ///
    /// Returns the party's 1-based position. Joining twice returns the
    /// existing position without changing the queue.
    pub fn join(&self, party_id: PartyId) -> Result<usize> {
        let position = {
            let mut state = self.lock()?;
            match state.waiting.iter().position(|id| *id == party_id) {
                Some(index) => {
                    debug!("Party {} already waiting in pool {}", party_id, self.id);
                    return Ok(index + 1);
                }
                None => {
                    state.waiting.push_back(party_id);
                    state.touch();
                    state.waiting.len()
                }
            }
        };

        self.joined.notify_waiters();
        Ok(position)
    }

    /// Take the first `n` waiting parties if at least `n` are waiting.
    ///
    /// Never blocks. With fewer than `n` waiting the pool is untouched and
    /// `None` is returned.
    pub fn peek(&self, n: usize) -> Result<Option<Vec<PartyId>>> {
        if n == 0 {
            return Err(MatchmakingError::InvalidCriteria {
                reason: "peek size must be at least 1".to_string(),
            }
            .into());
        }
        let mut state = self.lock()?;
        Ok(state.take_front(n))
    }

    /// Like [`Pool::peek`], but parks the task while the pool is empty.
    ///
    /// Once any party is waiting this behaves exactly like `peek`: a
    /// non-empty pool with fewer than `n` parties yields `None` right away.
    pub async fn peek_wait(&self, n: usize) -> Result<Option<Vec<PartyId>>> {
        if n == 0 {
            return self.peek(n);
        }

        loop {
            let notified = self.joined.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock()?;
                if !state.waiting.is_empty() {
                    return Ok(state.take_front(n));
                }
            }

            notified.await;
        }
    }

    pub fn remove(&self, party_id: PartyId) -> Result<()> {
        let mut state = self.lock()?;
        match state.waiting.iter().position(|id| *id == party_id) {
            Some(index) => {
                state.waiting.remove(index);
                state.touch();
                Ok(())
            }
            None => Err(MatchmakingError::PartyNotQueued {
                party_id: party_id.to_string(),
                pool_id: self.id.to_string(),
            }
            .into()),
        }
    }

    /// Remove exactly `ids` if every one of them is still waiting.
    ///
    /// Returns `false` and leaves the pool untouched otherwise.
    pub fn claim(&self, ids: &[PartyId]) -> Result<bool> {
        let mut state = self.lock()?;
        if !ids.iter().all(|id| state.waiting.contains(id)) {
            return Ok(false);
        }
        state.waiting.retain(|id| !ids.contains(id));
        state.touch();
        Ok(true)
    }

    /// Put previously drained parties back at the head of the queue in
    /// their original order. Parties that re-joined meanwhile keep their
    /// newer position.
    pub fn requeue_front(&self, ids: &[PartyId]) -> Result<()> {
        let restored = {
            let mut state = self.lock()?;
            let mut restored = 0;
            for id in ids.iter().rev() {
                if !state.waiting.contains(id) {
                    state.waiting.push_front(*id);
                    restored += 1;
                }
            }
            if restored > 0 {
                state.touch();
            }
            restored
        };

        if restored > 0 {
            self.joined.notify_waiters();
        }
        Ok(())
    }

    /// 1-based position of a waiting party
    pub fn position(&self, party_id: PartyId) -> Result<Option<usize>> {
        let state = self.lock()?;
        Ok(state
            .waiting
            .iter()
            .position(|id| *id == party_id)
            .map(|i| i + 1))
    }

    pub fn contains(&self, party_id: PartyId) -> Result<bool> {
        Ok(self.position(party_id)?.is_some())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.waiting.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Waiting parties in FIFO order
    pub fn waiting(&self) -> Result<Vec<PartyId>> {
        Ok(self.lock()?.waiting.iter().copied().collect())
    }

    pub fn snapshot(&self) -> Result<PoolSnapshot> {
        let state = self.lock()?;
        Ok(PoolSnapshot {
            id: self.id,
            fingerprint: self.key.fingerprint(),
            key: self.key.clone(),
            criteria: self.criteria.clone(),
            waiting: state.waiting.iter().copied().collect(),
            created_at: self.created_at,
            updated_at: state.updated_at,
        })
    }
}
