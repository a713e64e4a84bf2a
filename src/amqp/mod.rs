//! AMQP integration for the matchmaking service
//!
//! Broker connections, inbound queue events, and match-created publishing.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{ConsumerAction, MatchmakingEventConsumer, QueueEventConsumer};
pub use messages::*;
pub use publisher::{AmqpEventPublisher, EventPublisher, MockEventPublisher, PublisherConfig};
