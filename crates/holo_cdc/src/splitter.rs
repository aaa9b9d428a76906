//! Table splitter: cut a table span into sub-spans along region boundaries.
//!
//! Both strategies share one skeleton: fetch the regions overlapping the
//! span, keep the confirmed-contiguous prefix, group regions, then turn group
//! heads into cut keys clamped to the caller's span. Only the grouping rule
//! differs. Any failure to obtain usable regions yields `[span]` ("do not
//! split yet"), never an error.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::region::{cut_regions_left_cover_span, Region};
use crate::region_source::{RegionSource, WriteStatsSource};
use crate::span::{end_compare, start_compare, TableSpan};

/// Splitter tunables, usually loaded from the scheduler config.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SplitterConfig {
    /// Spans covering fewer regions than this are never split.
    pub region_threshold: usize,
    /// Regions per sub-span when the caller asks for an automatic count.
    pub region_count_per_span: usize,
    /// Spans with less recent write volume than this are never split by
    /// write bytes.
    pub write_bytes_threshold: u64,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            region_threshold: 1,
            region_count_per_span: 100,
            write_bytes_threshold: 0,
        }
    }
}

/// Grouping rule used by [`Splitter::split`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SplitType {
    /// Even number of regions per sub-span.
    RegionCount,
    /// Roughly even recent write volume per sub-span.
    WriteBytes,
}

impl SplitType {
    pub fn as_str(self) -> &'static str {
        match self {
            SplitType::RegionCount => "region-count",
            SplitType::WriteBytes => "write-bytes",
        }
    }
}

impl fmt::Display for SplitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SplitType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "region-count" | "region_count" | "regions" => Ok(SplitType::RegionCount),
            "write-bytes" | "write_bytes" | "bytes" => Ok(SplitType::WriteBytes),
            other => anyhow::bail!("unknown split type: {other}"),
        }
    }
}

/// Splits table spans for one keyspace.
///
/// Cheap to clone; the region and write-stats sources are shared.
#[derive(Clone)]
pub struct Splitter {
    keyspace_id: u32,
    regions: Arc<dyn RegionSource>,
    write_stats: Option<Arc<dyn WriteStatsSource>>,
    cfg: SplitterConfig,
}

impl Splitter {
    pub fn new(keyspace_id: u32, regions: Arc<dyn RegionSource>, cfg: SplitterConfig) -> Self {
        Self {
            keyspace_id,
            regions,
            write_stats: None,
            cfg,
        }
    }

    /// Attach the write-volume signal used by [`SplitType::WriteBytes`].
    pub fn with_write_stats(mut self, write_stats: Arc<dyn WriteStatsSource>) -> Self {
        self.write_stats = Some(write_stats);
        self
    }

    pub fn keyspace_id(&self) -> u32 {
        self.keyspace_id
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.cfg
    }

    /// Cut `span` into ordered, disjoint sub-spans whose union is `span`.
    ///
    /// Inputs:
    /// - `cancel`: aborts the region fetch; a cancelled split returns `[span]`.
    /// - `span`: the range to split.
    /// - `desired_count`: target number of sub-spans; `0` derives it from
    ///   `region_count_per_span`.
    /// - `split_type`: grouping rule.
    ///
    /// Output:
    /// - At least one span. The first starts at `span.start_key`, the last
    ///   ends at `span.end_key`, and inner boundaries are region start keys.
    pub async fn split(
        &self,
        cancel: &CancellationToken,
        span: &TableSpan,
        desired_count: usize,
        split_type: SplitType,
    ) -> Vec<TableSpan> {
        let Some(regions) = self.load_regions(cancel, span).await else {
            return vec![span.clone()];
        };
        if regions.len() < self.cfg.region_threshold {
            tracing::debug!(
                span = %span,
                regions = regions.len(),
                region_threshold = self.cfg.region_threshold,
                "span below region threshold, not splitting"
            );
            return vec![span.clone()];
        }

        let sizes = match split_type {
            SplitType::RegionCount => Some(self.group_by_region_count(regions.len(), desired_count)),
            SplitType::WriteBytes => self.group_by_write_bytes(&regions, desired_count),
        };
        let Some(sizes) = sizes else {
            return vec![span.clone()];
        };

        match clamp_groups(span, &regions, &sizes) {
            Some(spans) => {
                tracing::info!(
                    keyspace_id = self.keyspace_id,
                    span = %span,
                    split_type = %split_type,
                    regions = regions.len(),
                    spans = spans.len(),
                    "split table span"
                );
                spans
            }
            None => {
                tracing::warn!(
                    span = %span,
                    split_type = %split_type,
                    group_sizes = ?sizes,
                    "region boundaries do not yield valid cut keys, not splitting"
                );
                vec![span.clone()]
            }
        }
    }

    /// Regions usable for splitting `span`, or `None` to leave it whole.
    async fn load_regions(&self, cancel: &CancellationToken, span: &TableSpan) -> Option<Vec<Region>> {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!(span = %span, "region fetch cancelled, not splitting");
                return None;
            }
            res = self.regions.regions_in_range(span.start_key(), span.end_key()) => res,
        };
        let regions: Vec<Region> = match fetched {
            Ok(regions) => regions
                .into_iter()
                .filter(|region| region.intersects(span))
                .collect(),
            Err(err) => {
                tracing::warn!(
                    keyspace_id = self.keyspace_id,
                    span = %span,
                    error = ?err,
                    "region source unavailable, not splitting"
                );
                return None;
            }
        };
        let first = regions.first()?;

        // Anchor the chain at the first region so a stale head still lets the
        // confirmed part be split. The clamp restores the caller's start, so
        // the first span also owns any unlisted head keys.
        let anchor = TableSpan {
            start_key: Some(first.start_key.clone()),
            ..span.clone()
        };
        let contiguous = cut_regions_left_cover_span(&regions, &anchor).len();
        if contiguous < regions.len() {
            tracing::warn!(
                span = %span,
                regions = regions.len(),
                contiguous,
                "region list has a gap, splitting the contiguous prefix only"
            );
        }
        if contiguous == 0 {
            return None;
        }
        let mut regions = regions;
        regions.truncate(contiguous);
        Some(regions)
    }

    fn group_count(&self, total: usize, desired_count: usize) -> usize {
        let count = if desired_count == 0 {
            total.div_ceil(self.cfg.region_count_per_span.max(1))
        } else {
            desired_count
        };
        count.clamp(1, total.max(1))
    }

    /// Even partition: the first `total % count` groups take one extra region.
    fn group_by_region_count(&self, total: usize, desired_count: usize) -> Vec<usize> {
        let count = self.group_count(total, desired_count);
        let base = total / count;
        let extra = total % count;
        (0..count)
            .map(|idx| base + usize::from(idx < extra))
            .collect()
    }

    /// Greedy partition by recent write bytes.
    ///
    /// A group is closed before the region that would push its running sum
    /// over `ceil(total / count)`, as long as fewer than `count` groups exist.
    /// Returns `None` when the span is below `write_bytes_threshold`.
    fn group_by_write_bytes(&self, regions: &[Region], desired_count: usize) -> Option<Vec<usize>> {
        let Some(write_stats) = &self.write_stats else {
            tracing::debug!("no write stats source, splitting by region count");
            return Some(self.group_by_region_count(regions.len(), desired_count));
        };
        let weights: Vec<u64> = regions
            .iter()
            .map(|region| write_stats.recent_write_bytes(region.region_id))
            .collect();
        let total = weights.iter().fold(0u64, |acc, w| acc.saturating_add(*w));
        if total == 0 {
            tracing::debug!("write stats are all zero, splitting by region count");
            return Some(self.group_by_region_count(regions.len(), desired_count));
        }
        if total < self.cfg.write_bytes_threshold {
            tracing::debug!(
                total_write_bytes = total,
                write_bytes_threshold = self.cfg.write_bytes_threshold,
                "span below write bytes threshold, not splitting"
            );
            return None;
        }

        let count = self.group_count(regions.len(), desired_count);
        let target = total.div_ceil(count as u64);
        let mut sizes = Vec::with_capacity(count);
        let mut group_len = 0usize;
        let mut group_bytes = 0u64;
        for weight in weights {
            if group_len > 0
                && group_bytes.saturating_add(weight) > target
                && sizes.len() + 1 < count
            {
                sizes.push(group_len);
                group_len = 0;
                group_bytes = 0;
            }
            group_len += 1;
            group_bytes = group_bytes.saturating_add(weight);
        }
        sizes.push(group_len);
        Some(sizes)
    }
}

/// Turn group sizes into spans clamped to `span`.
///
/// Cut keys are the start keys of every group head except the first. They
/// must be strictly increasing and strictly inside `span`; otherwise `None`.
fn clamp_groups(span: &TableSpan, regions: &[Region], sizes: &[usize]) -> Option<Vec<TableSpan>> {
    let mut cuts: Vec<&[u8]> = Vec::with_capacity(sizes.len().saturating_sub(1));
    let mut offset = 0usize;
    for size in &sizes[..sizes.len().saturating_sub(1)] {
        offset += size;
        let key = regions.get(offset)?.start_key.as_slice();
        let floor = cuts.last().copied().unwrap_or(span.start_key());
        if key.is_empty()
            || start_compare(key, floor) != Ordering::Greater
            || end_compare(key, span.end_key()) != Ordering::Less
        {
            return None;
        }
        cuts.push(key);
    }

    let mut spans = Vec::with_capacity(cuts.len() + 1);
    let mut start_key = span.start_key.clone();
    for cut in cuts {
        spans.push(TableSpan {
            start_key,
            end_key: Some(cut.to_vec()),
            ..span.clone()
        });
        start_key = Some(cut.to_vec());
    }
    spans.push(TableSpan {
        start_key,
        end_key: span.end_key.clone(),
        ..span.clone()
    });
    Some(spans)
}
