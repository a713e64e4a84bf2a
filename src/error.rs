//! Error types for the pairing service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Callers that need to branch on the failure kind
//! downcast to [`MatchmakingError`] and inspect its [`ErrorCategory`].

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid event: {reason}")]
    InvalidEvent { reason: String },

    #[error("Invalid criteria: {reason}")]
    InvalidCriteria { reason: String },

    #[error("Region not found: {region}")]
    RegionNotFound { region: String },

    #[error("Party {party_id} is not queued in pool {pool_id}")]
    PartyNotQueued { party_id: String, pool_id: String },

    #[error("Party not found: {party_id}")]
    PartyNotFound { party_id: String },

    #[error("Pair not found: {pair_id}")]
    PairNotFound { pair_id: String },

    #[error("Pair {pair_id} cannot move from {from} to {to}")]
    InvalidConflictTransition {
        pair_id: String,
        from: String,
        to: String,
    },

    #[error("Unable to match {required} parties from {candidates} candidates: insufficient availability")]
    UnableToMatch { required: usize, candidates: usize },

    #[error("Storage failure during {phase}: {message}")]
    StorageFailed { phase: String, message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

/// Coarse failure classes used to map errors onto transport responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Infeasible,
    Storage,
    Internal,
}

impl ErrorCategory {
    /// HTTP status a request/response surface should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCategory::Validation => 400,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Infeasible => 409,
            ErrorCategory::Storage => 503,
            ErrorCategory::Internal => 500,
        }
    }

    /// Whether redelivering the same input may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Storage | ErrorCategory::Internal)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Infeasible => write!(f, "infeasible"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

impl MatchmakingError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            MatchmakingError::InvalidEvent { .. }
            | MatchmakingError::InvalidCriteria { .. }
            | MatchmakingError::ConfigurationError { .. }
            | MatchmakingError::InvalidConflictTransition { .. } => ErrorCategory::Validation,
            MatchmakingError::RegionNotFound { .. }
            | MatchmakingError::PartyNotQueued { .. }
            | MatchmakingError::PartyNotFound { .. }
            | MatchmakingError::PairNotFound { .. } => ErrorCategory::NotFound,
            MatchmakingError::UnableToMatch { .. } => ErrorCategory::Infeasible,
            MatchmakingError::StorageFailed { .. } => ErrorCategory::Storage,
            MatchmakingError::AmqpConnectionFailed { .. }
            | MatchmakingError::InternalError { .. } => ErrorCategory::Internal,
        }
    }

    /// Shorthand for a storage failure tagged with the phase it happened in
    pub fn storage(phase: impl Into<String>, err: impl std::fmt::Display) -> Self {
        MatchmakingError::StorageFailed {
            phase: phase.into(),
            message: err.to_string(),
        }
    }

    /// Lock poisoning is the only way a std lock can fail here
    pub fn lock_poisoned(what: &str) -> Self {
        MatchmakingError::InternalError {
            message: format!("Failed to acquire {} lock", what),
        }
    }
}

/// Categorize an arbitrary error, treating anything that is not a
/// [`MatchmakingError`] as internal.
pub fn categorize(err: &anyhow::Error) -> ErrorCategory {
    err.downcast_ref::<MatchmakingError>()
        .map(MatchmakingError::category)
        .unwrap_or(ErrorCategory::Internal)
}
