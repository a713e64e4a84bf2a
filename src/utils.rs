//! Utility functions for the pairing service

use crate::error::{MatchmakingError, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique pair ID
pub fn generate_pair_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique lobby ID
pub fn generate_lobby_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Trim and lower-case a free-form label so equal labels compare equal
pub fn normalize_label(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Parse a UUID carried in an inbound message field
pub fn parse_uuid_field(field: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim()).map_err(|e| {
        MatchmakingError::InvalidEvent {
            reason: format!("{} '{}' is not a valid UUID: {}", field, value, e),
        }
        .into()
    })
}
