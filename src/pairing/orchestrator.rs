//! Join-then-drain orchestration
//!
//! [`PairingService::add_and_find_next_pair`] is the single entry point that
//! turns a queued party into a pair once enough compatible parties wait in
//! the same pool.

use super::conflicts::{ConflictDetector, ConflictReport};
use super::outcome::{Advisory, Outcome};
use super::pair::{Pair, PairStore};
use crate::directory::PartyDirectory;
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::pool::{Criteria, Pool, PoolOrigin, PoolRegistry, PoolSnapshot, PoolStore};
use crate::schedule::{Candidate, PartyScheduleMatcher};
use crate::types::{PairId, Party, PartyId, PoolId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Primary result of a join
#[derive(Debug, Clone)]
pub struct PairingResult {
    /// The pair formed by this join, if any
    pub pair: Option<Pair>,
    /// Pool state after the join (and drain, when one happened)
    pub pool: PoolSnapshot,
    /// 1-based position the party had right after joining
    pub position: usize,
}

/// A saved pair whose pool could not be persisted after the drain
#[derive(Debug, Clone, Copy)]
struct UnsettledPair {
    pair_id: PairId,
    pool_id: PoolId,
    position: usize,
}

pub struct PairingService {
    registry: Arc<PoolRegistry>,
    pools: Arc<dyn PoolStore>,
    pairs: Arc<dyn PairStore>,
    parties: Arc<dyn PartyDirectory>,
    conflicts: Option<ConflictDetector>,
    metrics: Option<Arc<MetricsCollector>>,
    /// Keyed by the party whose join formed the pair
    unsettled: Mutex<HashMap<PartyId, UnsettledPair>>,
}

impl PairingService {
    pub fn new(
        registry: Arc<PoolRegistry>,
        pools: Arc<dyn PoolStore>,
        pairs: Arc<dyn PairStore>,
        parties: Arc<dyn PartyDirectory>,
    ) -> Self {
        Self {
            registry,
            pools,
            pairs,
            parties,
            conflicts: None,
            metrics: None,
            unsettled: Mutex::new(HashMap::new()),
        }
    }

    /// Run the conflict detector for every member of each new pair
    pub fn with_conflict_detector(mut self, detector: ConflictDetector) -> Self {
        self.conflicts = Some(detector);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    pub fn pool_store(&self) -> &Arc<dyn PoolStore> {
        &self.pools
    }

    pub fn pair_store(&self) -> &Arc<dyn PairStore> {
        &self.pairs
    }

    /// Queue a party and form a pair if its pool now holds enough parties.
    ///
    /// A failed pool save right after the join is recorded as an advisory
    /// and the drain proceeds on in-memory state. Once parties have been
    /// drained, failing to resolve them or to save the pair puts them back
    /// at the head of the pool before the error is returned.
    ///
    /// If the pool cannot be saved after a pair was formed, the error is
    /// returned and the pair is remembered. Repeating the same join then
    /// settles that pair instead of queueing the party again.
    pub async fn add_and_find_next_pair(
        &self,
        party_id: PartyId,
        criteria: Criteria,
    ) -> Result<Outcome<PairingResult>> {
        let start = Instant::now();
        let mut criteria = criteria;
        criteria.validate()?;

        criteria.schedule = self
            .parties
            .schedule_for_party(party_id)
            .await
            .map_err(|e| MatchmakingError::storage("resolve schedule", e))?;

        let (pool, origin) = self
            .registry
            .get_or_create(&criteria, self.pools.as_ref())
            .await?;
        match origin {
            PoolOrigin::Created => self.with_metrics_do(|m| m.record_pool_opened("created")),
            PoolOrigin::Hydrated => self.with_metrics_do(|m| m.record_pool_opened("hydrated")),
            PoolOrigin::Live => {}
        }

        if let Some(unsettled) = self.unsettled_pair(party_id, pool.id())? {
            let pair = self.pairs.get_by_id(unsettled.pair_id).await?;
            info!(
                "Repeated join of {} settles pair {} in pool {}",
                party_id, pair.id, unsettled.pool_id
            );
            return self
                .settle(&pool, pair, party_id, unsettled.position, Outcome::new(()), start)
                .await;
        }

        let position = pool.join(party_id)?;
        self.with_metrics_do(|m| m.record_party_joined());
        debug!(
            "Party {} joined pool {} at position {}",
            party_id,
            pool.id(),
            position
        );

        let mut outcome = Outcome::new(());
        match self.pools.save(pool.snapshot()?).await {
            Ok(_) => outcome.push(Advisory::completed("persist pool after join")),
            Err(e) => {
                warn!(
                    "Failed to persist pool {} after join of {}, continuing in memory: {}",
                    pool.id(),
                    party_id,
                    e
                );
                self.with_metrics_do(|m| m.record_advisory_failure("persist pool after join"));
                outcome.push(Advisory::failed("persist pool after join", e));
            }
        }

        let drained = match self.drain(&pool, party_id, &criteria).await {
            Ok(drained) => drained,
            Err(e) => {
                self.with_metrics_do(|m| m.record_drain("failed", start.elapsed()));
                return Err(e);
            }
        };

        let Some(party_ids) = drained else {
            let snapshot = pool.snapshot()?;
            debug!(
                "Pool {} has {} of {} parties, no pair yet",
                pool.id(),
                snapshot.len(),
                pool.pair_size()
            );
            self.with_metrics_do(|m| m.record_drain("waiting", start.elapsed()));
            return Ok(Outcome::with_advisories(
                PairingResult {
                    pair: None,
                    pool: snapshot,
                    position,
                },
                outcome.advisories,
            ));
        };

        let pair = match self.build_pair(&pool, &party_ids, party_id, &criteria).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(
                    "Failed to form pair from pool {}, restoring {} parties: {}",
                    pool.id(),
                    party_ids.len(),
                    e
                );
                pool.requeue_front(&party_ids)?;
                self.with_metrics_do(|m| m.record_drain("failed", start.elapsed()));
                return Err(e);
            }
        };

        info!(
            "Pair {} formed in pool {} with parties {:?}",
            pair.id, pool.id(), party_ids
        );
        self.settle(&pool, pair, party_id, position, outcome, start).await
    }

    /// Persist the drained pool, then run conflict checks for the new pair
    async fn settle(
        &self,
        pool: &Pool,
        mut pair: Pair,
        party_id: PartyId,
        position: usize,
        mut outcome: Outcome<()>,
        start: Instant,
    ) -> Result<Outcome<PairingResult>> {
        let snapshot = match self.pools.save(pool.snapshot()?).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(
                    "Failed to persist pool {} after forming pair {}: {}",
                    pool.id(),
                    pair.id,
                    e
                );
                self.unsettled
                    .lock()
                    .map_err(|_| MatchmakingError::lock_poisoned("unsettled pairs"))?
                    .insert(
                        party_id,
                        UnsettledPair {
                            pair_id: pair.id,
                            pool_id: pool.id(),
                            position,
                        },
                    );
                self.with_metrics_do(|m| m.record_drain("failed", start.elapsed()));
                return Err(MatchmakingError::storage("persist pool after drain", e).into());
            }
        };
        self.unsettled
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("unsettled pairs"))?
            .remove(&party_id);

        let flagged = self.check_conflicts(&pair, &mut outcome).await;
        if flagged.contains(&pair.id) {
            match self.pairs.get_by_id(pair.id).await {
                Ok(fresh) => pair = fresh,
                Err(e) => warn!("Failed to reload flagged pair {}: {}", pair.id, e),
            }
        }

        self.with_metrics_do(|m| m.record_drain("paired", start.elapsed()));
        Ok(Outcome::with_advisories(
            PairingResult {
                pair: Some(pair),
                pool: snapshot,
                position,
            },
            outcome.advisories,
        ))
    }

    fn unsettled_pair(&self, party_id: PartyId, pool_id: PoolId) -> Result<Option<UnsettledPair>> {
        let mut unsettled = self
            .unsettled
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("unsettled pairs"))?;
        match unsettled.get(&party_id).copied() {
            Some(entry) if entry.pool_id == pool_id => Ok(Some(entry)),
            Some(_) => {
                // The pool was replaced since, so the pair cannot be settled here
                unsettled.remove(&party_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn drain(
        &self,
        pool: &Pool,
        joining: PartyId,
        criteria: &Criteria,
    ) -> Result<Option<Vec<PartyId>>> {
        let size = pool.pair_size();
        if !pool.key().match_on_schedule {
            return pool.peek(size);
        }

        let waiting = pool.waiting()?;
        if waiting.len() < size {
            return Ok(None);
        }

        let mut candidates = Vec::with_capacity(waiting.len());
        for id in waiting {
            let schedule = if id == joining {
                criteria.schedule.clone()
            } else {
                match self.parties.schedule_for_party(id).await {
                    Ok(schedule) => schedule,
                    Err(e) => {
                        warn!("Could not resolve schedule for waiting party {}: {}", id, e);
                        None
                    }
                }
            };
            candidates.push(Candidate::new(id, schedule));
        }

        let matcher_start = Instant::now();
        let selected = PartyScheduleMatcher::execute(&candidates, size);
        self.with_metrics_do(|m| m.record_matcher_run(matcher_start.elapsed()));

        match selected {
            Ok(selected) => {
                if pool.claim(&selected)? {
                    Ok(Some(selected))
                } else {
                    debug!(
                        "Schedule match in pool {} lost to a concurrent drain",
                        pool.id()
                    );
                    Ok(None)
                }
            }
            Err(e) => match e.downcast_ref::<MatchmakingError>() {
                Some(MatchmakingError::UnableToMatch { .. }) => {
                    debug!("No schedule-compatible group in pool {}: {}", pool.id(), e);
                    Ok(None)
                }
                _ => Err(e),
            },
        }
    }

    async fn build_pair(
        &self,
        pool: &Pool,
        party_ids: &[PartyId],
        created_by: PartyId,
        criteria: &Criteria,
    ) -> Result<Pair> {
        let mut parties: Vec<Party> = Vec::with_capacity(party_ids.len());
        for id in party_ids {
            parties.push(self.parties.get_party(*id).await?);
        }

        let pair = Pair::new(
            pool.id(),
            parties,
            criteria.tenant_id.clone(),
            criteria.client_id.clone(),
            created_by,
        );

        self.pairs
            .save(pair)
            .await
            .map_err(|e| MatchmakingError::storage("persist pair", e).into())
    }

    async fn check_conflicts(&self, pair: &Pair, outcome: &mut Outcome<()>) -> Vec<PairId> {
        let Some(detector) = &self.conflicts else {
            outcome.push(Advisory::skipped("conflict check", "disabled"));
            return Vec::new();
        };

        let mut flagged = Vec::new();
        for party_id in pair.party_ids() {
            let action = format!("conflict check for party {}", party_id);
            match detector.verify(party_id).await {
                Ok(report) => {
                    self.with_metrics_do(|m| m.record_conflict_check(true, report.flagged.len()));
                    flagged.extend(report.flagged);
                    outcome.push(Advisory::completed(action));
                }
                Err(e) => {
                    warn!("Conflict check for party {} failed: {}", party_id, e);
                    self.with_metrics_do(|m| m.record_conflict_check(false, 0));
                    outcome.push(Advisory::failed(action, e));
                }
            }
        }
        flagged
    }

    /// Take a party out of a pool and persist the pool
    pub async fn leave(&self, pool: &Pool, party_id: PartyId) -> Result<PoolSnapshot> {
        pool.remove(party_id)?;
        let snapshot = self
            .pools
            .save(pool.snapshot()?)
            .await
            .map_err(|e| MatchmakingError::storage("persist pool after leave", e))?;
        self.with_metrics_do(|m| m.record_party_left("removed"));
        info!("Party {} left pool {}", party_id, pool.id());
        Ok(snapshot)
    }

    /// Run the conflict detector for one party on demand
    pub async fn verify_conflicts(&self, party_id: PartyId) -> Result<ConflictReport> {
        match &self.conflicts {
            Some(detector) => detector.verify(party_id).await,
            None => Err(MatchmakingError::ConfigurationError {
                message: "conflict checks are disabled".to_string(),
            }
            .into()),
        }
    }

    /// Administrative resolution of a flagged pair
    pub async fn resolve_conflict(&self, pair_id: PairId) -> Result<Pair> {
        let mut pair = self.pairs.get_by_id(pair_id).await?;
        pair.resolve()?;
        let pair = self
            .pairs
            .save(pair)
            .await
            .map_err(|e| MatchmakingError::storage("persist resolved pair", e))?;
        info!("Conflict on pair {} resolved", pair.id);
        Ok(pair)
    }

    /// Refresh pool gauges from the registry
    pub fn refresh_pool_gauges(&self) -> Result<()> {
        if let Some(metrics) = &self.metrics {
            metrics.update_pool_gauges(self.registry.len()?, self.registry.waiting_parties()?);
        }
        Ok(())
    }

    fn with_metrics_do(&self, f: impl FnOnce(&MetricsCollector)) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }
}
