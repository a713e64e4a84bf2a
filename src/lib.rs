//! Pairing Room - criteria-keyed matchmaking service
//!
//! Parties queue into pools keyed by their matching criteria; once a pool
//! holds enough compatible parties (optionally by shared weekly
//! availability) they are drained into a pair, checked against the
//! parties' other pairs for schedule conflicts, and announced over AMQP.

pub mod amqp;
pub mod config;
pub mod directory;
pub mod error;
pub mod metrics;
pub mod pairing;
pub mod pool;
pub mod schedule;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{categorize, ErrorCategory, MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::handlers::{ConsumerAction, MatchmakingEventConsumer};
pub use amqp::publisher::EventPublisher;
pub use pairing::{ConflictDetector, Outcome, Pair, PairingService};
pub use pool::{Criteria, Pool, PoolRegistry};
pub use schedule::{PartyScheduleMatcher, Schedule, TimeWindow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
