//! Per-keyspace region sources.
//!
//! Classic deployments register a single source under keyspace 0 named
//! [`DEFAULT_KEYSPACE`]. Isolated-keyspace deployments register one source per
//! keyspace; the registry is shared between splitters and coverage monitors.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::region_source::RegionSource;

/// Keyspace name used by classic (single-keyspace) deployments.
pub const DEFAULT_KEYSPACE: &str = "default";

/// Concurrent map from keyspace to its region source.
#[derive(Default)]
pub struct RegionSourceRegistry {
    by_id: DashMap<u32, Arc<dyn RegionSource>>,
    by_name: DashMap<String, Arc<dyn RegionSource>>,
}

impl RegionSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the source for a keyspace, building it on first use.
    ///
    /// Inputs:
    /// - `keyspace`, `keyspace_id`: the keyspace identity, indexed both ways.
    /// - `build`: constructs the source; only called when `keyspace_id` is not
    ///   registered yet. It runs with no registry lock held and may read the
    ///   registry.
    ///
    /// Output:
    /// - `Ok(())` when the keyspace is (now) registered. A failing `build`
    ///   returns its error and leaves the registry unchanged. When two callers
    ///   race, the first insert wins and the other build is dropped.
    pub fn register<F>(&self, keyspace: &str, keyspace_id: u32, build: F) -> anyhow::Result<()>
    where
        F: FnOnce() -> anyhow::Result<Arc<dyn RegionSource>>,
    {
        if self.by_id.contains_key(&keyspace_id) {
            return Ok(());
        }
        let source = build()?;
        match self.by_id.entry(keyspace_id) {
            Entry::Occupied(_) => {
                tracing::debug!(keyspace, keyspace_id, "region source registered concurrently");
            }
            Entry::Vacant(slot) => {
                self.by_name.insert(keyspace.to_string(), Arc::clone(&source));
                slot.insert(source);
                tracing::info!(keyspace, keyspace_id, "registered region source");
            }
        }
        Ok(())
    }

    pub fn get(&self, keyspace_id: u32) -> Option<Arc<dyn RegionSource>> {
        self.by_id.get(&keyspace_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_by_name(&self, keyspace: &str) -> Option<Arc<dyn RegionSource>> {
        self.by_name.get(keyspace).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;
    use anyhow::Context;
    use crate::region_source::MemoryRegionSource;
    use std::cell::Cell;

    fn memory_source(region_id: u64) -> Arc<dyn RegionSource> {
        Arc::new(MemoryRegionSource::from_regions([Region::new(
            region_id,
            Vec::new(),
            Vec::new(),
        )]))
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let registry = RegionSourceRegistry::new();
        let builds = Cell::new(0);

        registry
            .register(DEFAULT_KEYSPACE, 0, || {
                builds.set(builds.get() + 1);
                Ok(memory_source(1))
            })
            .expect("first register");
        registry
            .register(DEFAULT_KEYSPACE, 0, || {
                builds.set(builds.get() + 1);
                Ok(memory_source(2))
            })
            .expect("second register");

        assert_eq!(builds.get(), 1);
        assert_eq!(registry.len(), 1);

        let by_id = registry.get(0).expect("registered by id");
        let by_name = registry.get_by_name(DEFAULT_KEYSPACE).expect("registered by name");
        assert!(Arc::ptr_eq(&by_id, &by_name));
        let regions = by_id.regions_in_range(b"", b"").await.expect("regions");
        assert_eq!(regions[0].region_id, 1);
    }

    #[test]
    fn failed_build_registers_nothing() {
        let registry = RegionSourceRegistry::new();
        let err = registry
            .register("ks1", 1, || anyhow::bail!("pd client for ks1 unavailable"))
            .expect_err("build fails");
        assert!(err.to_string().contains("unavailable"));
        assert!(registry.is_empty());
        assert!(registry.get(1).is_none());
        assert!(registry.get_by_name("ks1").is_none());

        registry
            .register("ks1", 1, || Ok(memory_source(7)))
            .expect("retry register");
        assert!(registry.get(1).is_some());
    }

    #[test]
    fn build_may_read_the_registry() {
        let registry = RegionSourceRegistry::new();
        registry.register("ks1", 1, || Ok(memory_source(1))).expect("ks1");
        registry
            .register("ks2", 2, || {
                assert_eq!(registry.len(), 1);
                assert!(registry.get(2).is_none());
                registry.get(1).context("ks1 source")
            })
            .expect("ks2 shares the ks1 source");
        let ks1 = registry.get(1).expect("ks1");
        let ks2 = registry.get_by_name("ks2").expect("ks2");
        assert!(Arc::ptr_eq(&ks1, &ks2));
    }

    #[test]
    fn keyspaces_are_independent() {
        let registry = RegionSourceRegistry::new();
        registry.register("ks1", 1, || Ok(memory_source(1))).expect("ks1");
        registry.register("ks2", 2, || Ok(memory_source(2))).expect("ks2");
        assert_eq!(registry.len(), 2);
        assert!(registry.get(3).is_none());
        let ks1 = registry.get(1).expect("ks1");
        let ks2 = registry.get_by_name("ks2").expect("ks2");
        assert!(!Arc::ptr_eq(&ks1, &ks2));
    }
}
