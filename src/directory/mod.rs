//! Lookups into systems that own parties and regions

pub mod party;
pub mod region;

pub use party::{InMemoryPartyDirectory, PartyDirectory};
pub use region::{RegionDirectory, StaticRegionDirectory};
