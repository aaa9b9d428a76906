//! Span partitioning and region coverage for HoloStore change-data-capture.
//!
//! A changefeed replicates whole tables, but workers own table *spans*:
//! disjoint `[start, end)` key ranges cut along the store's region
//! boundaries. This crate provides:
//! - span algebra over optional byte-string bounds (`span`),
//! - an ordered span index with hole detection (`span_index`),
//! - region-coverage checks against possibly stale region listings (`region`),
//! - the table splitter with region-count and write-bytes strategies
//!   (`splitter`),
//! - the region-source contracts, retry plumbing, per-keyspace registry, and
//!   keyspace metadata cache the splitter runs on.

pub mod coverage;
pub mod data_range;
pub mod keyspace;
pub mod region;
pub mod region_source;
pub mod registry;
pub mod retry;
pub mod span;
pub mod span_index;
pub mod splitter;

pub use coverage::{verify_spans, CoverageDrift};
pub use data_range::DataRange;
pub use keyspace::{KernelType, KeyspaceManager, KeyspaceManagerConfig, KeyspaceMeta, KeyspaceMetaClient};
pub use region::{check_regions_left_cover, cut_regions_left_cover_span, Region};
pub use region_source::{MemoryRegionSource, RegionSource, RetryRegionSource, WriteStatsSource};
pub use registry::{RegionSourceRegistry, DEFAULT_KEYSPACE};
pub use retry::{retry, RetryError, RetryPolicy};
pub use span::{contains, end_compare, intersect, start_compare, TableSpan};
pub use span_index::SpanIndex;
pub use splitter::{SplitType, Splitter, SplitterConfig};
