//! Primary results with their best-effort side effects recorded alongside

use serde::{Deserialize, Serialize};

/// What happened to a best-effort side effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdvisoryStatus {
    Completed,
    Failed { error: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub action: String,
    #[serde(flatten)]
    pub status: AdvisoryStatus,
}

impl Advisory {
    pub fn completed(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            status: AdvisoryStatus::Completed,
        }
    }

    pub fn failed(action: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            action: action.into(),
            status: AdvisoryStatus::Failed {
                error: error.to_string(),
            },
        }
    }

    pub fn skipped(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            status: AdvisoryStatus::Skipped {
                reason: reason.into(),
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, AdvisoryStatus::Failed { .. })
    }
}

/// A primary result plus the advisories gathered while producing it
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub value: T,
    pub advisories: Vec<Advisory>,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            advisories: Vec::new(),
        }
    }

    pub fn with_advisories(value: T, advisories: Vec<Advisory>) -> Self {
        Self { value, advisories }
    }

    pub fn push(&mut self, advisory: Advisory) {
        self.advisories.push(advisory);
    }

    pub fn failures(&self) -> impl Iterator<Item = &Advisory> {
        self.advisories.iter().filter(|a| a.is_failure())
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            advisories: self.advisories,
        }
    }
}
