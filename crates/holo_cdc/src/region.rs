//! Region descriptors and region-coverage checks.
//!
//! Regions are the store's physical shards as reported by the placement
//! driver. They may be stale, so every consumer re-checks that a region list
//! still covers the span it is about to act on.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::span::{end_compare, start_compare, TableSpan};

/// Physical shard descriptor. Key ranges are lexicographic and end-exclusive;
/// an empty key is unbounded on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub region_id: u64,
    #[serde(default)]
    pub start_key: Vec<u8>,
    #[serde(default)]
    pub end_key: Vec<u8>,
}

impl Region {
    pub fn new(region_id: u64, start_key: Vec<u8>, end_key: Vec<u8>) -> Self {
        Self {
            region_id,
            start_key,
            end_key,
        }
    }

    /// A region with both bounds open (single-region clusters).
    pub fn is_whole_keyspace(&self) -> bool {
        self.start_key.is_empty() && self.end_key.is_empty()
    }

    /// Whether the region shares at least one key with `span`.
    pub fn intersects(&self, span: &TableSpan) -> bool {
        let start = std::cmp::max(self.start_key.as_slice(), span.start_key());
        let end = match end_compare(&self.end_key, span.end_key()) {
            Ordering::Less => self.end_key.as_slice(),
            _ => span.end_key(),
        };
        end.is_empty() || start < end
    }
}

/// Whether `regions`, walked in input order, cover all of `span`.
///
/// The first region must start at or before `span.start_key`; every next
/// region must start at or before the covered frontier and push it forward.
/// Returns true once the frontier reaches `span.end_key`. An empty region
/// list never covers anything, including the fully open span.
pub fn check_regions_left_cover(regions: &[Region], span: &TableSpan) -> bool {
    let Some(last) = cut_regions_left_cover_span(regions, span).last() else {
        return false;
    };
    // Each region in the chain extends the frontier, so the last end is it.
    end_compare(&last.end_key, span.end_key()) != Ordering::Less
}

/// Longest contiguous prefix of `regions` anchored at `span.start_key`.
///
/// Inputs:
/// - `regions`: region list in the store's listing order (sorted by start).
/// - `span`: span whose left edge anchors the chain.
///
/// Output:
/// - Sub-slice of `regions` up to (not including) the first gap or the first
///   region that fails to extend the frontier. Empty when the first region
///   starts after `span.start_key` or when `span` is collapsed.
pub fn cut_regions_left_cover_span<'a>(regions: &'a [Region], span: &TableSpan) -> &'a [Region] {
    if span.is_empty() {
        return &[];
    }
    let Some(first) = regions.first() else {
        return &[];
    };
    if start_compare(&first.start_key, span.start_key()) == Ordering::Greater {
        return &[];
    }

    let mut frontier = first.start_key.as_slice();
    let mut unbounded = false;
    for (idx, region) in regions.iter().enumerate() {
        if unbounded || start_compare(&region.start_key, frontier) == Ordering::Greater {
            return &regions[..idx];
        }
        if region.end_key.is_empty() {
            unbounded = true;
        } else if region.end_key.as_slice() > frontier {
            frontier = region.end_key.as_slice();
        } else {
            return &regions[..idx];
        }
    }
    regions
}
