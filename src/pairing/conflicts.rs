//! Post-pair conflict detection
//!
//! For one party, looks at every pair the party belongs to and flags the
//! ones whose shared availability cannot be honoured: pairs that do not
//! fit the party's own schedule, and pairs that cannot both be attended.

use super::pair::{ConflictStatus, Pair, PairStore};
use crate::directory::PartyDirectory;
use crate::error::{MatchmakingError, Result};
use crate::schedule::Schedule;
use crate::types::{PairId, PartyId};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receives flagged pairs
#[async_trait]
pub trait ConflictNotifier: Send + Sync {
    async fn pair_flagged(&self, party_id: PartyId, pair: &Pair) -> Result<()>;
}

/// Notifier that only logs
#[derive(Debug, Default)]
pub struct LoggingConflictNotifier;

#[async_trait]
impl ConflictNotifier for LoggingConflictNotifier {
    async fn pair_flagged(&self, party_id: PartyId, pair: &Pair) -> Result<()> {
        info!(
            "Pair {} flagged for party {}: {}",
            pair.id,
            party_id,
            pair.conflict_reason.as_deref().unwrap_or("no reason recorded")
        );
        Ok(())
    }
}

/// Result of checking one party's pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictReport {
    pub party_id: PartyId,
    /// Every conflicting pair, in detection order
    pub conflicting_pairs: Vec<PairId>,
    /// Pairs whose status moved to flagged during this check
    pub flagged: Vec<PairId>,
    /// Pairs that could not be examined or flagged, with the reason
    pub skipped: Vec<(PairId, String)>,
}

impl ConflictReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicting_pairs.is_empty()
    }
}

pub struct ConflictDetector {
    pairs: Arc<dyn PairStore>,
    parties: Arc<dyn PartyDirectory>,
    notifier: Option<Arc<dyn ConflictNotifier>>,
    max_pairs_per_check: usize,
}

impl ConflictDetector {
    pub fn new(pairs: Arc<dyn PairStore>, parties: Arc<dyn PartyDirectory>) -> Self {
        Self {
            pairs,
            parties,
            notifier: None,
            max_pairs_per_check: 256,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ConflictNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_max_pairs(mut self, max_pairs_per_check: usize) -> Self {
        self.max_pairs_per_check = max_pairs_per_check.max(1);
        self
    }

    /// Check every pair of `party_id` for schedule conflicts and flag them.
    ///
    /// Only failing to list the party's pairs is an error; problems with
    /// individual pairs end up in [`ConflictReport::skipped`].
    pub async fn verify(&self, party_id: PartyId) -> Result<ConflictReport> {
        let mut report = ConflictReport {
            party_id,
            ..Default::default()
        };

        let mut pairs = self
            .pairs
            .find_pairs_by_party(party_id)
            .await
            .map_err(|e| MatchmakingError::storage("find pairs by party", e))?;
        if pairs.len() > self.max_pairs_per_check {
            debug!(
                "Party {} has {} pairs, checking the newest {}",
                party_id,
                pairs.len(),
                self.max_pairs_per_check
            );
            pairs.truncate(self.max_pairs_per_check);
        }

        let own = match self.parties.schedule_for_party(party_id).await {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(
                    "Could not resolve schedule for party {}, skipping availability check: {}",
                    party_id, e
                );
                None
            }
        };

        let collective: Vec<Option<Schedule>> = pairs
            .iter()
            .map(|pair| {
                let shared = pair.collective_schedule();
                if shared.is_none() {
                    report
                        .skipped
                        .push((pair.id, "no collective schedule".to_string()));
                }
                shared
            })
            .collect();

        let mut conflicts: Vec<(usize, String)> = Vec::new();
        let mut note = |index: usize, reason: String| {
            if !conflicts.iter().any(|(i, _)| *i == index) {
                conflicts.push((index, reason));
            }
        };

        if let Some(own) = &own {
            for (i, shared) in collective.iter().enumerate() {
                if let Some(shared) = shared {
                    if !own.is_compatible_with(shared) {
                        note(
                            i,
                            format!(
                                "shared availability {} does not fit party {} availability {}",
                                shared, party_id, own
                            ),
                        );
                    }
                }
            }
        }

        for i in 0..collective.len() {
            for j in (i + 1)..collective.len() {
                if let (Some(a), Some(b)) = (&collective[i], &collective[j]) {
                    if !a.is_compatible_with(b) {
                        note(
                            i,
                            format!("overlaps with pair {} for party {}", pairs[j].id, party_id),
                        );
                        note(
                            j,
                            format!("overlaps with pair {} for party {}", pairs[i].id, party_id),
                        );
                    }
                }
            }
        }

        for (index, reason) in conflicts {
            let pair = &mut pairs[index];
            report.conflicting_pairs.push(pair.id);

            if pair.conflict_status == ConflictStatus::Resolved {
                debug!("Pair {} conflict already resolved, not re-flagging", pair.id);
                continue;
            }

            match pair.flag(reason) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    report.skipped.push((pair.id, e.to_string()));
                    continue;
                }
            }

            match self.pairs.save(pair.clone()).await {
                Ok(saved) => {
                    report.flagged.push(saved.id);
                    if let Some(notifier) = &self.notifier {
                        if let Err(e) = notifier.pair_flagged(party_id, &saved).await {
                            warn!("Failed to notify about flagged pair {}: {}", saved.id, e);
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to persist flagged pair {}: {}", pair.id, e);
                    report.skipped.push((pair.id, e.to_string()));
                }
            }
        }

        if report.has_conflicts() {
            info!(
                "Party {} has {} conflicting pairs ({} newly flagged)",
                party_id,
                report.conflicting_pairs.len(),
                report.flagged.len()
            );
        }

        Ok(report)
    }
}
