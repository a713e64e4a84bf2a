//! Common types used throughout the pairing service

use crate::schedule::Schedule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for parties (a single player queues as a party of one)
pub type PartyId = Uuid;

/// Unique identifier for pairs
pub type PairId = Uuid;

/// Unique identifier for pools
pub type PoolId = Uuid;

/// Unique identifier for lobbies announced alongside a created match
pub type LobbyId = Uuid;

/// The queueable unit: one or more players that always match together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub members: Vec<Uuid>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    /// Availability at the time the party was resolved
    pub schedule: Option<Schedule>,
    pub created_at: DateTime<Utc>,
}

impl Party {
    /// A party consisting of a single player whose id doubles as the party id
    pub fn solo(player_id: Uuid) -> Self {
        Self {
            id: player_id,
            members: vec![player_id],
            tenant_id: None,
            client_id: None,
            schedule: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// A geographic matchmaking region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.slug)
    }
}

/// Search filter for region lookups. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFilter {
    pub slug: Option<String>,
    pub name: Option<String>,
}

impl RegionFilter {
    pub fn by_slug(slug: impl Into<String>) -> Self {
        Self {
            slug: Some(slug.into()),
            name: None,
        }
    }
}
