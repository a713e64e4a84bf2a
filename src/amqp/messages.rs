//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::{LobbyId, PairId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable queue carrying queue-joined/queue-left events
pub const QUEUE_EVENTS_QUEUE: &str = "matchmaking.queue_events";

/// Exchange that receives match-created events
pub const MATCH_EVENTS_EXCHANGE: &str = "matchmaking.match_events";

/// Routing keys
pub const QUEUE_JOINED_ROUTING_KEY: &str = "queue.joined";
pub const QUEUE_LEFT_ROUTING_KEY: &str = "queue.left";
pub const MATCH_CREATED_ROUTING_KEY: &str = "match.created";

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    pub fn new(payload: T, routing_key: impl Into<String>) -> Self {
        Self {
            payload,
            correlation_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            routing_key: routing_key.into(),
        }
    }

    /// Use a caller-chosen correlation id so redeliveries deduplicate
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidEvent {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// A player asked to be matched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueJoined {
    pub player_id: String,
    pub game_type: String,
    /// Region slug
    pub region: String,
    pub mmr: f64,
}

/// A player stopped waiting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueLeft {
    pub player_id: String,
    pub game_type: String,
    pub region: String,
}

/// A player entered a session lobby; informational only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyPlayerJoined {
    pub lobby_id: String,
    pub player_id: String,
}

/// Events consumed from [`QUEUE_EVENTS_QUEUE`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    QueueJoined(QueueJoined),
    QueueLeft(QueueLeft),
    LobbyPlayerJoined(LobbyPlayerJoined),
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::QueueJoined(_) => "queue_joined",
            InboundEvent::QueueLeft(_) => "queue_left",
            InboundEvent::LobbyPlayerJoined(_) => "lobby_player_joined",
            InboundEvent::Unknown => "unknown",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidEvent {
                reason: format!("Failed to deserialize event: {}", e),
            }
            .into()
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize event: {}", e),
            }
            .into()
        })
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            InboundEvent::QueueLeft(_) => QUEUE_LEFT_ROUTING_KEY,
            _ => QUEUE_JOINED_ROUTING_KEY,
        }
    }
}

/// Published once per formed pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCreated {
    pub match_id: PairId,
    pub lobby_id: LobbyId,
    pub game_type: Uuid,
    pub region: String,
    pub player_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_queue_joined() {
        let player = Uuid::new_v4();
        let game = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"queue_joined","player_id":"{}","game_type":"{}","region":"eu-west","mmr":1510}}"#,
            player, game
        );

        match InboundEvent::from_bytes(json.as_bytes()).unwrap() {
            InboundEvent::QueueJoined(event) => {
                assert_eq!(event.player_id, player.to_string());
                assert_eq!(event.region, "eu-west");
                assert_eq!(event.mmr, 1510.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_maps_to_unknown() {
        let event = InboundEvent::from_bytes(br#"{"type":"lobby_deleted","lobby_id":"x"}"#).unwrap();
        assert_eq!(event, InboundEvent::Unknown);
        assert_eq!(event.kind(), "unknown");
    }

    #[test]
    fn test_malformed_json_is_invalid_event() {
        let err = InboundEvent::from_bytes(b"{not json").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::InvalidEvent { .. })
        ));

        let err = InboundEvent::from_bytes(br#"{"type":"queue_left","player_id":"a"}"#).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::InvalidEvent { .. })
        ));
    }

    #[test]
    fn test_queue_left_serializes_with_tag() {
        let event = InboundEvent::QueueLeft(QueueLeft {
            player_id: "p".to_string(),
            game_type: "g".to_string(),
            region: "eu-west".to_string(),
        });
        let value: serde_json::Value = serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(value["type"], "queue_left");
        assert_eq!(event.routing_key(), QUEUE_LEFT_ROUTING_KEY);
    }

    #[test]
    fn test_message_envelope_creation() {
        let event = MatchCreated {
            match_id: Uuid::new_v4(),
            lobby_id: Uuid::new_v4(),
            game_type: Uuid::new_v4(),
            region: "eu-west".to_string(),
            player_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
            created_at: Utc::now(),
        };
        let envelope = MessageEnvelope::new(event.clone(), MATCH_CREATED_ROUTING_KEY)
            .with_correlation_id(event.match_id.to_string());

        assert_eq!(envelope.routing_key, MATCH_CREATED_ROUTING_KEY);
        assert_eq!(envelope.correlation_id, event.match_id.to_string());

        let decoded = MessageEnvelope::<MatchCreated>::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.payload, event);
    }
}
