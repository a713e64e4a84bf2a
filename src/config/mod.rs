//! Configuration management for the pairing-room service
//!
//! Loading from environment variables or a TOML file, validation, and
//! default values.

pub mod app;

pub use app::{
    parse_regions, validate_config, AmqpSettings, AppConfig, MatchmakingSettings, RegionEntry,
    ServiceSettings,
};
