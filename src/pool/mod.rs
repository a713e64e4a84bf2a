//! Criteria-keyed waiting pools
//!
//! This module contains the pool queue itself, the criteria that select
//! a pool, the registry of live pools and the storage seam.

pub mod criteria;
pub mod instance;
pub mod registry;
pub mod storage;

pub use criteria::{Criteria, CriteriaKey, SkillRange};
pub use instance::{Pool, PoolSnapshot};
pub use registry::{PoolOrigin, PoolRegistry};
pub use storage::{InMemoryPoolStore, PoolStore};
