//! Pair formation and post-pair conflict detection

pub mod conflicts;
pub mod orchestrator;
pub mod outcome;
pub mod pair;

pub use conflicts::{ConflictDetector, ConflictNotifier, ConflictReport, LoggingConflictNotifier};
pub use orchestrator::{PairingResult, PairingService};
pub use outcome::{Advisory, AdvisoryStatus, Outcome};
pub use pair::{ConflictStatus, InMemoryPairStore, Pair, PairStore};
