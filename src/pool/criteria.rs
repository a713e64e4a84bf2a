//! Matchmaking criteria and the canonical pool key derived from them

use crate::error::{MatchmakingError, Result};
use crate::schedule::Schedule;
use crate::utils::normalize_label;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inclusive rating window a party is willing to be matched within
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkillRange {
    pub min: i64,
    pub max: i64,
}

impl SkillRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Window of `radius` on either side of `rating`
    pub fn around(rating: i64, radius: i64) -> Self {
        Self {
            min: rating.saturating_sub(radius),
            max: rating.saturating_add(radius),
        }
    }

    /// Fixed band of `width` ratings that contains `rating`. Ratings in
    /// the same band get the same range and therefore share a pool.
    pub fn bucket(rating: i64, width: i64) -> Self {
        let width = width.max(1);
        let min = rating.div_euclid(width) * width;
        Self {
            min,
            max: min.saturating_add(width - 1),
        }
    }

    pub fn contains(&self, rating: i64) -> bool {
        rating >= self.min && rating <= self.max
    }
}

/// What a party is looking for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub game_id: Uuid,
    pub game_mode_id: Option<String>,
    /// Region slug
    pub region: String,
    pub pair_size: usize,
    pub skill: SkillRange,
    pub max_ping: Option<u32>,
    pub map_preferences: Vec<String>,
    pub tier: Option<String>,
    pub priority_boost: bool,
    /// Drain through the schedule matcher instead of plain FIFO
    pub match_on_schedule: bool,
    /// Resolved availability of the requesting party
    pub schedule: Option<Schedule>,
}

impl Criteria {
    pub fn new(game_id: Uuid, region: impl Into<String>, pair_size: usize, skill: SkillRange) -> Self {
        Self {
            tenant_id: None,
            client_id: None,
            game_id,
            game_mode_id: None,
            region: region.into(),
            pair_size,
            skill,
            max_ping: None,
            map_preferences: Vec::new(),
            tier: None,
            priority_boost: false,
            match_on_schedule: false,
            schedule: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_game_mode(mut self, game_mode_id: impl Into<String>) -> Self {
        self.game_mode_id = Some(game_mode_id.into());
        self
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn with_schedule_matching(mut self, enabled: bool) -> Self {
        self.match_on_schedule = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.pair_size < 2 {
            return Err(MatchmakingError::InvalidCriteria {
                reason: format!("pair size must be at least 2, got {}", self.pair_size),
            }
            .into());
        }

        if self.skill.min > self.skill.max {
            return Err(MatchmakingError::InvalidCriteria {
                reason: format!(
                    "skill range is inverted: min {} > max {}",
                    self.skill.min, self.skill.max
                ),
            }
            .into());
        }

        if self.region.trim().is_empty() {
            return Err(MatchmakingError::InvalidCriteria {
                reason: "region must not be empty".to_string(),
            }
            .into());
        }

        if let Some(schedule) = &self.schedule {
            for window in &schedule.windows {
                window.validate()?;
            }
        }

        Ok(())
    }

    /// The comparable fields that decide which pool a party lands in
    pub fn key(&self) -> CriteriaKey {
        CriteriaKey {
            tenant_id: self.tenant_id.as_deref().map(str::trim).map(String::from),
            client_id: self.client_id.as_deref().map(str::trim).map(String::from),
            game_id: self.game_id,
            game_mode_id: self.game_mode_id.as_deref().map(normalize_label),
            region: normalize_label(&self.region),
            pair_size: self.pair_size,
            skill: self.skill,
            tier: self.tier.as_deref().map(normalize_label),
            match_on_schedule: self.match_on_schedule,
        }
    }
}

/// Canonical pool identity. Per-request preferences (maps, ping ceiling,
/// priority boost, resolved schedule) are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CriteriaKey {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub game_id: Uuid,
    pub game_mode_id: Option<String>,
    pub region: String,
    pub pair_size: usize,
    pub skill: SkillRange,
    pub tier: Option<String>,
    pub match_on_schedule: bool,
}

impl CriteriaKey {
    /// Stable string form used as the storage key
    pub fn fingerprint(&self) -> String {
        fn opt(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or("-")
        }

        format!(
            "tenant={}|client={}|game={}|mode={}|region={}|size={}|skill={}..{}|tier={}|schedule={}",
            opt(&self.tenant_id),
            opt(&self.client_id),
            self.game_id,
            opt(&self.game_mode_id),
            self.region,
            self.pair_size,
            self.skill.min,
            self.skill.max,
            opt(&self.tier),
            self.match_on_schedule,
        )
    }

    /// Whether this key belongs to the given game and region slug
    pub fn in_scope(&self, game_id: Uuid, region: &str) -> bool {
        self.game_id == game_id && self.region == normalize_label(region)
    }
}

impl std::fmt::Display for CriteriaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Criteria {
        Criteria::new(Uuid::new_v4(), "eu-west", 2, SkillRange::around(1500, 200))
    }

    #[test]
    fn test_skill_range_around() {
        let range = SkillRange::around(1500, 200);
        assert_eq!(range, SkillRange::new(1300, 1700));
        assert!(range.contains(1300));
        assert!(range.contains(1700));
        assert!(!range.contains(1701));
    }

    #[test]
    fn test_skill_bucket_groups_nearby_ratings() {
        assert_eq!(SkillRange::bucket(1500, 400), SkillRange::new(1200, 1599));
        assert_eq!(SkillRange::bucket(1501, 400), SkillRange::bucket(1500, 400));
        assert_eq!(SkillRange::bucket(1599, 400), SkillRange::bucket(1200, 400));
        assert_ne!(SkillRange::bucket(1600, 400), SkillRange::bucket(1599, 400));
        assert_eq!(SkillRange::bucket(-1, 400), SkillRange::new(-400, -1));
        assert_eq!(SkillRange::bucket(7, 0), SkillRange::new(7, 7));
    }

    #[test]
    fn test_preferences_do_not_change_the_key() {
        let a = base();
        let mut b = a.clone();
        b.map_preferences = vec!["harbor".to_string()];
        b.max_ping = Some(80);
        b.priority_boost = true;
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().fingerprint(), b.key().fingerprint());
    }

    #[test]
    fn test_labels_are_normalized() {
        let a = base().with_tier("Gold");
        let mut b = a.clone();
        b.region = "  EU-West ".to_string();
        b.tier = Some("gold ".to_string());
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_comparable_fields_change_the_key() {
        let a = base();
        let mut b = a.clone();
        b.pair_size = 3;
        assert_ne!(a.key(), b.key());
        assert_ne!(a.key().fingerprint(), b.key().fingerprint());

        let c = a.clone().with_schedule_matching(true);
        assert_ne!(a.key().fingerprint(), c.key().fingerprint());

        let d = a.clone().with_tenant("acme", "web");
        assert_ne!(a.key().fingerprint(), d.key().fingerprint());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let game = Uuid::parse_str("6f1b6f0e-5a43-4a0c-9a55-6d2b1d1f4a10").unwrap();
        let criteria = Criteria::new(game, "na-east", 2, SkillRange::new(1000, 1400));
        assert_eq!(
            criteria.key().fingerprint(),
            "tenant=-|client=-|game=6f1b6f0e-5a43-4a0c-9a55-6d2b1d1f4a10|mode=-|region=na-east|size=2|skill=1000..1400|tier=-|schedule=false"
        );
    }

    #[test]
    fn test_validate() {
        assert!(base().validate().is_ok());

        let mut bad = base();
        bad.pair_size = 1;
        assert!(bad.validate().is_err());

        let mut bad = base();
        bad.skill = SkillRange::new(10, 5);
        assert!(bad.validate().is_err());

        let mut bad = base();
        bad.region = "  ".to_string();
        let err = bad.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::InvalidCriteria { .. })
        ));
    }

    #[test]
    fn test_in_scope() {
        let criteria = base();
        let key = criteria.key();
        assert!(key.in_scope(criteria.game_id, "EU-WEST"));
        assert!(!key.in_scope(criteria.game_id, "na-east"));
        assert!(!key.in_scope(Uuid::new_v4(), "eu-west"));
    }
}
