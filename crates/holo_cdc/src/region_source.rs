//! Region-boundary and write-volume sources consumed by the splitter.
//!
//! The real implementations live next to the placement-driver client. This
//! module defines the contracts, a retrying wrapper, and an in-process region
//! table used by tests and by embedders that track regions themselves.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::region::Region;
use crate::retry::{retry, RetryPolicy};
use crate::span::TableSpan;
use crate::span_index::SpanIndex;

/// Supplies current region boundaries for a key range.
#[async_trait]
pub trait RegionSource: Send + Sync {
    /// Regions overlapping `[start_key, end_key)`, ordered by start key.
    ///
    /// Empty keys are unbounded. The list may be stale or partial; an error
    /// means the source is unavailable and no regions should be used.
    async fn regions_in_range(&self, start_key: &[u8], end_key: &[u8])
        -> anyhow::Result<Vec<Region>>;
}

/// Best-effort recent write volume per region.
pub trait WriteStatsSource: Send + Sync {
    /// Bytes written to `region_id` recently, or zero when unknown.
    fn recent_write_bytes(&self, region_id: u64) -> u64;
}

#[async_trait]
impl<S: RegionSource + ?Sized> RegionSource for Arc<S> {
    async fn regions_in_range(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> anyhow::Result<Vec<Region>> {
        (**self).regions_in_range(start_key, end_key).await
    }
}

/// Wraps a region source with bounded exponential backoff.
pub struct RetryRegionSource<S> {
    inner: S,
    policy: RetryPolicy,
    shutdown: CancellationToken,
}

impl<S: RegionSource> RetryRegionSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abort retries (and in-flight attempts) once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

#[async_trait]
impl<S: RegionSource> RegionSource for RetryRegionSource<S> {
    async fn regions_in_range(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> anyhow::Result<Vec<Region>> {
        retry(&self.policy, &self.shutdown, |_| {
            self.inner.regions_in_range(start_key, end_key)
        })
        .await
        .context("load regions in key range")
    }
}

#[derive(Debug, Default)]
struct MemoryRegionState {
    regions: SpanIndex<u64>,
    write_bytes: HashMap<u64, u64>,
    unavailable: bool,
}

/// In-process region table keyed by region start.
///
/// Regions are expected to be disjoint, like the store's own listing.
/// Implements both `RegionSource` and `WriteStatsSource`.
#[derive(Debug, Default)]
pub struct MemoryRegionSource {
    state: RwLock<MemoryRegionState>,
}

impl MemoryRegionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_regions(regions: impl IntoIterator<Item = Region>) -> Self {
        let source = Self::new();
        for region in regions {
            source.upsert_region(region);
        }
        source
    }

    /// Insert or replace the region starting at `region.start_key`.
    pub fn upsert_region(&self, region: Region) -> Option<u64> {
        let span = region_span(&region);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.regions.replace_or_insert(span, region.region_id)
    }

    /// Remove the region starting at `start_key`, returning its id.
    pub fn remove_region(&self, start_key: &[u8]) -> Option<u64> {
        let span = TableSpan::new(0, Some(start_key.to_vec()), None);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.regions.delete(&span)
    }

    pub fn set_write_bytes(&self, region_id: u64, bytes: u64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.write_bytes.insert(region_id, bytes);
    }

    /// Simulate a placement-driver outage: lookups fail while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.unavailable = unavailable;
    }

    pub fn region_count(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.regions.len()
    }
}

fn region_span(region: &Region) -> TableSpan {
    TableSpan::new(
        0,
        Some(region.start_key.clone()),
        Some(region.end_key.clone()),
    )
}

#[async_trait]
impl RegionSource for MemoryRegionSource {
    async fn regions_in_range(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> anyhow::Result<Vec<Region>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.unavailable {
            anyhow::bail!("region source unavailable");
        }
        let query = TableSpan::new(0, Some(start_key.to_vec()), Some(end_key.to_vec()));
        Ok(state
            .regions
            .overlapping(&query)
            .map(|(span, region_id)| {
                Region::new(*region_id, span.start_key().to_vec(), span.end_key().to_vec())
            })
            .collect())
    }
}

impl WriteStatsSource for MemoryRegionSource {
    fn recent_write_bytes(&self, region_id: u64) -> u64 {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.write_bytes.get(&region_id).copied().unwrap_or(0)
    }
}
