//! Availability-based group selection
//!
//! Picks `qty` candidates whose schedules pairwise overlap. The search is a
//! backtracking walk over the candidate list in input order with a greedy
//! fast path: once a seed is committed, every later candidate compatible
//! with the whole group is added before any deeper branching happens.

use super::Schedule;
use crate::error::{MatchmakingError, Result};
use crate::types::PartyId;
use tracing::debug;

/// A queued party together with its resolved availability
#[derive(Debug, Clone)]
pub struct Candidate {
    pub party_id: PartyId,
    /// `None` when the availability could not be resolved; such
    /// candidates are never selected
    pub schedule: Option<Schedule>,
}

impl Candidate {
    pub fn new(party_id: PartyId, schedule: Option<Schedule>) -> Self {
        Self { party_id, schedule }
    }
}

/// Pairwise compatibility computed once per search
struct CompatibilityMatrix {
    known: Vec<bool>,
    compatible: Vec<Vec<bool>>,
}

impl CompatibilityMatrix {
    fn build(candidates: &[Candidate]) -> Self {
        let n = candidates.len();
        let known: Vec<bool> = candidates.iter().map(|c| c.schedule.is_some()).collect();
        let mut compatible = vec![vec![false; n]; n];

        for i in 0..n {
            for j in (i + 1)..n {
                if let (Some(a), Some(b)) = (&candidates[i].schedule, &candidates[j].schedule) {
                    let ok = a.is_compatible_with(b);
                    compatible[i][j] = ok;
                    compatible[j][i] = ok;
                }
            }
        }

        Self { known, compatible }
    }

    fn fits(&self, group: &[usize], candidate: usize) -> bool {
        group.iter().all(|&m| self.compatible[m][candidate])
    }
}

/// Backtracking matcher over party availability windows
pub struct PartyScheduleMatcher;

impl PartyScheduleMatcher {
    /// Select `qty` candidates with mutually overlapping availability.
    ///
    /// Returns the selected party ids in input order. The first feasible
    /// group in input order wins.
    pub fn execute(candidates: &[Candidate], qty: usize) -> Result<Vec<PartyId>> {
        if qty == 0 {
            return Err(MatchmakingError::InvalidCriteria {
                reason: "match quantity must be at least 1".to_string(),
            }
            .into());
        }

        let unable = || MatchmakingError::UnableToMatch {
            required: qty,
            candidates: candidates.len(),
        };

        if candidates.len() < qty {
            return Err(unable().into());
        }

        let matrix = CompatibilityMatrix::build(candidates);
        let mut group = Vec::with_capacity(qty);

        if Self::search(&matrix, 0, &mut group, qty) {
            debug!(
                "Schedule matcher selected {} of {} candidates",
                group.len(),
                candidates.len()
            );
            Ok(group.into_iter().map(|i| candidates[i].party_id).collect())
        } else {
            Err(unable().into())
        }
    }

    fn search(matrix: &CompatibilityMatrix, from: usize, group: &mut Vec<usize>, qty: usize) -> bool {
        if group.len() == qty {
            return true;
        }

        let n = matrix.known.len();
        for seed in from..n {
            if !matrix.known[seed] || !matrix.fits(group, seed) {
                continue;
            }

            let overlapping: Vec<usize> = ((seed + 1)..n)
                .filter(|&j| matrix.known[j] && matrix.compatible[seed][j] && matrix.fits(group, j))
                .collect();
            if group.len() + 1 + overlapping.len() < qty {
                continue;
            }

            group.push(seed);
            let committed = group.len();

            for &j in &overlapping {
                if group.len() == qty {
                    break;
                }
                if matrix.fits(group, j) {
                    group.push(j);
                }
            }
            if group.len() == qty {
                return true;
            }

            group.truncate(committed);
            if Self::search(matrix, seed + 1, group, qty) {
                return true;
            }
            group.pop();
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::TimeWindow;
    use chrono::Weekday;
    use uuid::Uuid;

    fn candidate(windows: &[(Weekday, u32, u32)]) -> Candidate {
        let windows = windows
            .iter()
            .map(|&(day, start, end)| TimeWindow::weekly(day, (start, 0), (end, 0)).unwrap())
            .collect();
        Candidate::new(Uuid::new_v4(), Some(Schedule::new(windows)))
    }

    #[test]
    fn test_pairs_overlapping_candidates() {
        let a = candidate(&[(Weekday::Mon, 10, 12)]);
        let b = candidate(&[(Weekday::Mon, 11, 13)]);
        let c = candidate(&[(Weekday::Tue, 10, 12)]);
        let candidates = vec![a.clone(), b.clone(), c];

        let selected = PartyScheduleMatcher::execute(&candidates, 2).unwrap();
        assert_eq!(selected, vec![a.party_id, b.party_id]);
    }

    #[test]
    fn test_group_of_three_fails_without_shared_overlap() {
        let candidates = vec![
            candidate(&[(Weekday::Mon, 10, 12)]),
            candidate(&[(Weekday::Mon, 11, 13)]),
            candidate(&[(Weekday::Tue, 10, 12)]),
        ];

        let err = PartyScheduleMatcher::execute(&candidates, 3).unwrap_err();
        match err.downcast_ref::<MatchmakingError>() {
            Some(MatchmakingError::UnableToMatch {
                required,
                candidates,
            }) => {
                assert_eq!(*required, 3);
                assert_eq!(*candidates, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_no_overlap_fails_for_any_group() {
        let candidates = vec![
            candidate(&[(Weekday::Mon, 10, 11)]),
            candidate(&[(Weekday::Tue, 10, 11)]),
            candidate(&[(Weekday::Wed, 10, 11)]),
        ];
        assert!(PartyScheduleMatcher::execute(&candidates, 2).is_err());
    }

    #[test]
    fn test_common_window_matches_any_quantity() {
        let candidates: Vec<Candidate> = (0..5)
            .map(|i| candidate(&[(Weekday::Fri, 18 + (i % 2), 22)]))
            .collect();
        for qty in 1..=5 {
            let selected = PartyScheduleMatcher::execute(&candidates, qty).unwrap();
            assert_eq!(selected.len(), qty);
            let expected: Vec<PartyId> = candidates[..qty].iter().map(|c| c.party_id).collect();
            assert_eq!(selected, expected);
        }
    }

    #[test]
    fn test_unknown_schedules_are_skipped() {
        let unknown = Candidate::new(Uuid::new_v4(), None);
        let a = candidate(&[(Weekday::Sat, 9, 12)]);
        let b = candidate(&[(Weekday::Sat, 10, 11)]);
        let candidates = vec![unknown, a.clone(), b.clone()];

        let selected = PartyScheduleMatcher::execute(&candidates, 2).unwrap();
        assert_eq!(selected, vec![a.party_id, b.party_id]);
    }

    #[test]
    fn test_backtracks_past_a_greedy_dead_end() {
        // Seed `a` greedily takes `b`, which rules out `c` and `d`.
        let a = candidate(&[(Weekday::Mon, 8, 12)]);
        let b = candidate(&[(Weekday::Mon, 8, 9)]);
        let c = candidate(&[(Weekday::Mon, 10, 12)]);
        let d = candidate(&[(Weekday::Mon, 11, 12)]);
        let candidates = vec![a.clone(), b, c.clone(), d.clone()];

        let selected = PartyScheduleMatcher::execute(&candidates, 3).unwrap();
        assert_eq!(selected, vec![a.party_id, c.party_id, d.party_id]);
    }

    #[test]
    fn test_group_requires_pairwise_compatibility() {
        // b and c both overlap a but not each other.
        let a = candidate(&[(Weekday::Thu, 8, 16)]);
        let b = candidate(&[(Weekday::Thu, 8, 10)]);
        let c = candidate(&[(Weekday::Thu, 14, 16)]);
        let candidates = vec![a, b, c];

        assert!(PartyScheduleMatcher::execute(&candidates, 3).is_err());
        assert_eq!(PartyScheduleMatcher::execute(&candidates, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_quantities() {
        let candidates = vec![candidate(&[(Weekday::Mon, 10, 12)])];

        let err = PartyScheduleMatcher::execute(&candidates, 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::InvalidCriteria { .. })
        ));

        assert!(PartyScheduleMatcher::execute(&candidates, 2).is_err());
        assert!(PartyScheduleMatcher::execute(&[], 1).is_err());
    }
}
