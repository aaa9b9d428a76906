//! Pending-change windows over a table span.

use serde::{Deserialize, Serialize};

use crate::span::TableSpan;

/// Changes in `span` with commit timestamps in `[start_ts, end_ts)` that have
/// not been fully emitted yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRange {
    pub span: TableSpan,
    pub start_ts: u64,
    pub end_ts: u64,
}

impl DataRange {
    pub fn new(span: TableSpan, start_ts: u64, end_ts: u64) -> Self {
        Self {
            span,
            start_ts,
            end_ts,
        }
    }

    /// Merge two windows of the same span into their convex hull.
    ///
    /// The timestamp windows do not need to overlap; the result covers the
    /// gap between them too. Returns `None` when the spans differ.
    pub fn merge(&self, other: &DataRange) -> Option<DataRange> {
        if self.span != other.span {
            return None;
        }
        Some(DataRange {
            span: self.span.clone(),
            start_ts: self.start_ts.min(other.start_ts),
            end_ts: self.end_ts.max(other.end_ts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(table_id: i64, start: &str, end: &str) -> TableSpan {
        TableSpan::new(
            table_id,
            Some(start.as_bytes().to_vec()),
            Some(end.as_bytes().to_vec()),
        )
    }

    #[test]
    fn merge_takes_convex_hull_of_timestamps() {
        let a = DataRange::new(span(1, "a", "z"), 10, 20);

        let overlapping = DataRange::new(span(1, "a", "z"), 15, 25);
        assert_eq!(
            a.merge(&overlapping),
            Some(DataRange::new(span(1, "a", "z"), 10, 25))
        );

        let disjoint = DataRange::new(span(1, "a", "z"), 25, 30);
        assert_eq!(
            a.merge(&disjoint),
            Some(DataRange::new(span(1, "a", "z"), 10, 30))
        );
        assert_eq!(disjoint.merge(&a), a.merge(&disjoint));
    }

    #[test]
    fn merge_rejects_different_spans() {
        let a = DataRange::new(span(1, "a", "z"), 10, 20);
        let b = DataRange::new(span(1, "b", "y"), 10, 20);
        assert_eq!(a.merge(&b), None);

        let other_keyspace = DataRange::new(span(1, "a", "z").with_keyspace(2), 10, 20);
        assert_eq!(a.merge(&other_keyspace), None);
    }

    #[test]
    fn equality_is_structural() {
        let a = DataRange::new(span(1, "a", "z"), 10, 20);
        assert_eq!(a, DataRange::new(span(1, "a", "z"), 10, 20));
        assert_ne!(a, DataRange::new(span(1, "a", "z"), 15, 25));
        assert_ne!(a, DataRange::new(span(2, "b", "y"), 10, 20));
    }
}
