//! Service layer for the pairing-room matchmaking service
//!
//! Application state, component wiring, health checks and background tasks.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{HealthCheck, HealthContext, HealthStatus, PoolStats, ServiceStats};
