//! Region lookup

use crate::error::Result;
use crate::types::{Region, RegionFilter};
use crate::utils::normalize_label;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait RegionDirectory: Send + Sync {
    /// Regions matching the filter; empty when nothing matches
    async fn search(&self, filter: &RegionFilter) -> Result<Vec<Region>>;
}

/// Region directory backed by a fixed list, typically from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticRegionDirectory {
    regions: Vec<Region>,
}

impl StaticRegionDirectory {
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    /// Build from `(slug, name)` pairs. Region ids are derived from the
    /// slug so they stay the same across restarts.
    pub fn from_slugs<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let regions = entries
            .into_iter()
            .map(|(slug, name)| {
                let slug = normalize_label(slug);
                Region {
                    id: Uuid::new_v5(&Uuid::NAMESPACE_OID, slug.as_bytes()),
                    slug,
                    name: name.trim().to_string(),
                }
            })
            .collect();
        Self { regions }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

#[async_trait]
impl RegionDirectory for StaticRegionDirectory {
    async fn search(&self, filter: &RegionFilter) -> Result<Vec<Region>> {
        let slug = filter.slug.as_deref().map(normalize_label);
        let name = filter.name.as_deref().map(normalize_label);

        Ok(self
            .regions
            .iter()
            .filter(|r| slug.as_ref().map_or(true, |s| r.slug == *s))
            .filter(|r| name.as_ref().map_or(true, |n| normalize_label(&r.name) == *n))
            .cloned()
            .collect())
    }
}
