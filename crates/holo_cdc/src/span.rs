//! Table span algebra over raw byte-string key ranges.
//!
//! Spans are half-open `[start, end)` ranges scoped to a keyspace and table.
//! An absent bound means "unbounded": `-inf` for a start key and `+inf` for an
//! end key. An absent key and an empty key compare equal under
//! `start_compare`/`end_compare`, but they stay distinct values so structural
//! equality still tells them apart.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

const TABLE_PREFIX: &[u8] = b"t";
const RECORD_PREFIX_SEP: &[u8] = b"_r";
const SIGN_FLIP_MASK: u64 = 1u64 << 63;

/// Contiguous sub-range of one table's keyspace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableSpan {
    /// Isolated keyspace the span belongs to (0 for classic deployments).
    #[serde(default)]
    pub keyspace_id: u32,
    pub table_id: i64,
    /// Inclusive start key. `None` means `-inf`.
    #[serde(default)]
    pub start_key: Option<Vec<u8>>,
    /// Exclusive end key. `None` means `+inf`.
    #[serde(default)]
    pub end_key: Option<Vec<u8>>,
}

impl TableSpan {
    pub fn new(table_id: i64, start_key: Option<Vec<u8>>, end_key: Option<Vec<u8>>) -> Self {
        Self {
            keyspace_id: 0,
            table_id,
            start_key,
            end_key,
        }
    }

    /// Full physical key range owned by `table_id` in `keyspace_id`.
    pub fn for_table(keyspace_id: u32, table_id: i64) -> Self {
        let (start, end) = table_key_range(table_id);
        Self {
            keyspace_id,
            table_id,
            start_key: Some(start),
            end_key: Some(end),
        }
    }

    pub fn with_keyspace(mut self, keyspace_id: u32) -> Self {
        self.keyspace_id = keyspace_id;
        self
    }

    /// Start key bytes; empty when unbounded.
    pub fn start_key(&self) -> &[u8] {
        self.start_key.as_deref().unwrap_or_default()
    }

    /// End key bytes; empty when unbounded.
    pub fn end_key(&self) -> &[u8] {
        self.end_key.as_deref().unwrap_or_default()
    }

    /// True when both bounds are open.
    pub fn is_whole_keyspace(&self) -> bool {
        self.start_key().is_empty() && self.end_key().is_empty()
    }

    /// True when the range collapses under half-open semantics (`start >= end`).
    pub fn is_empty(&self) -> bool {
        !self.end_key().is_empty() && self.start_key() >= self.end_key()
    }

    /// Whether `self` and `other` live in the same keyspace and table.
    pub fn same_table(&self, other: &TableSpan) -> bool {
        self.keyspace_id == other.keyspace_id && self.table_id == other.table_id
    }
}

impl Ord for TableSpan {
    fn cmp(&self, other: &Self) -> Ordering {
        // Absent and empty bounds are equal under the key comparators; the
        // trailing `is_some` comparisons keep the order consistent with `Eq`.
        self.keyspace_id
            .cmp(&other.keyspace_id)
            .then(self.table_id.cmp(&other.table_id))
            .then_with(|| start_compare(self.start_key(), other.start_key()))
            .then_with(|| self.start_key.is_some().cmp(&other.start_key.is_some()))
            .then_with(|| end_compare(self.end_key(), other.end_key()))
            .then_with(|| self.end_key.is_some().cmp(&other.end_key.is_some()))
    }
}

impl PartialOrd for TableSpan {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TableSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:[{}, {})",
            self.keyspace_id,
            self.table_id,
            format_key_bound(self.start_key(), true),
            format_key_bound(self.end_key(), false)
        )
    }
}

/// Render a key bound for logs: printable UTF-8 as-is, anything else as hex.
pub fn format_key_bound(key: &[u8], is_start: bool) -> String {
    if key.is_empty() {
        return if is_start {
            "-inf".to_string()
        } else {
            "+inf".to_string()
        };
    }
    if let Ok(s) = std::str::from_utf8(key) {
        if s.chars().all(|c| !c.is_control()) {
            return s.to_string();
        }
    }
    format!("0x{}", hex::encode(key))
}

/// Compare two start keys. Empty keys are the minimum.
pub fn start_compare(lhs: &[u8], rhs: &[u8]) -> Ordering {
    lhs.cmp(rhs)
}

/// Compare two end keys. Empty keys are the maximum.
pub fn end_compare(lhs: &[u8], rhs: &[u8]) -> Ordering {
    match (lhs.is_empty(), rhs.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => lhs.cmp(rhs),
    }
}

/// Intersect two spans.
///
/// Inputs:
/// - `lhs`, `rhs`: spans of the same keyspace and table.
///
/// Output:
/// - `Some(span)` with the larger start and smaller end, or `None` when the
///   spans belong to different tables or the overlap is empty. Touching
///   ranges (`[a, b)` and `[b, c)`) do not intersect.
pub fn intersect(lhs: &TableSpan, rhs: &TableSpan) -> Option<TableSpan> {
    if !lhs.same_table(rhs) {
        return None;
    }
    let start_key = match start_compare(lhs.start_key(), rhs.start_key()) {
        Ordering::Less => &rhs.start_key,
        Ordering::Greater => &lhs.start_key,
        // Tie between `None` and `Some([])`: pick one independent of argument
        // order so the operation stays symmetric.
        Ordering::Equal => std::cmp::max(&lhs.start_key, &rhs.start_key),
    };
    let end_key = match end_compare(lhs.end_key(), rhs.end_key()) {
        Ordering::Less => &lhs.end_key,
        Ordering::Greater => &rhs.end_key,
        Ordering::Equal => std::cmp::max(&lhs.end_key, &rhs.end_key),
    };
    let out = TableSpan {
        keyspace_id: lhs.keyspace_id,
        table_id: lhs.table_id,
        start_key: start_key.clone(),
        end_key: end_key.clone(),
    };
    (!out.is_empty()).then_some(out)
}

/// Whether `outer` fully contains `inner`.
pub fn contains(outer: &TableSpan, inner: &TableSpan) -> bool {
    outer.same_table(inner)
        && start_compare(outer.start_key(), inner.start_key()) != Ordering::Greater
        && end_compare(inner.end_key(), outer.end_key()) != Ordering::Greater
}

fn encode_i64_ordered(value: i64) -> [u8; 8] {
    (value as u64 ^ SIGN_FLIP_MASK).to_be_bytes()
}

/// Key prefix shared by every key of `table_id` (`t{id}`).
pub fn table_prefix(table_id: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(TABLE_PREFIX.len() + 8);
    out.extend_from_slice(TABLE_PREFIX);
    out.extend_from_slice(&encode_i64_ordered(table_id));
    out
}

/// Key prefix of the row records of `table_id` (`t{id}_r`).
pub fn record_prefix(table_id: i64) -> Vec<u8> {
    let mut out = table_prefix(table_id);
    out.extend_from_slice(RECORD_PREFIX_SEP);
    out
}

/// Derive the physical `[start, end)` key range owned by a table.
///
/// The range starts at the table prefix and ends at the next table's prefix,
/// so it strictly contains the table's record prefix. The last table id ends
/// at the successor of the table namespace byte.
pub fn table_key_range(table_id: i64) -> (Vec<u8>, Vec<u8>) {
    let start = table_prefix(table_id);
    let end = match table_id.checked_add(1) {
        Some(next) => table_prefix(next),
        None => {
            let mut end = TABLE_PREFIX.to_vec();
            if let Some(last) = end.last_mut() {
                *last += 1;
            }
            end
        }
    };
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn span(start: Option<&[u8]>, end: Option<&[u8]>) -> TableSpan {
        TableSpan::new(0, start.map(<[u8]>::to_vec), end.map(<[u8]>::to_vec))
    }

    #[test]
    fn start_and_end_compare_treat_empty_as_unbounded() {
        let cases: [(&[u8], &[u8], Ordering); 5] = [
            (&[], &[], Ordering::Equal),
            (&[1], &[2], Ordering::Less),
            (&[2], &[1], Ordering::Greater),
            (&[3], &[3], Ordering::Equal),
            (&[1, 0], &[1], Ordering::Greater),
        ];
        for (lhs, rhs, expected) in cases {
            assert_eq!(start_compare(lhs, rhs), expected, "start {lhs:?} {rhs:?}");
            assert_eq!(end_compare(lhs, rhs), expected, "end {lhs:?} {rhs:?}");
        }
        assert_eq!(start_compare(&[], &[0]), Ordering::Less);
        assert_eq!(end_compare(&[], &[0]), Ordering::Greater);
        assert_eq!(end_compare(&[0xff], &[]), Ordering::Less);

        let absent = span(None, None);
        let empty = span(Some(&[]), Some(&[]));
        assert_eq!(start_compare(absent.start_key(), empty.start_key()), Ordering::Equal);
        assert_eq!(end_compare(absent.end_key(), empty.end_key()), Ordering::Equal);
        assert_ne!(absent, empty, "absent and empty stay distinct values");
    }

    #[test]
    fn intersect_matches_half_open_semantics() {
        let cases = [
            (span(None, Some(&[1])), span(Some(&[1]), None), None),
            (span(None, None), span(None, None), Some(span(None, None))),
            (
                span(None, None),
                span(Some(&[1]), Some(&[2])),
                Some(span(Some(&[1]), Some(&[2]))),
            ),
            (
                span(Some(&[0]), Some(&[3])),
                span(Some(&[1]), Some(&[2])),
                Some(span(Some(&[1]), Some(&[2]))),
            ),
            (
                span(Some(&[0]), Some(&[2])),
                span(Some(&[1]), Some(&[2])),
                Some(span(Some(&[1]), Some(&[2]))),
            ),
            (span(Some(&[0]), Some(&[1])), span(Some(&[2]), Some(&[3])), None),
        ];
        for (lhs, rhs, expected) in cases {
            assert_eq!(intersect(&lhs, &rhs), expected, "{lhs} & {rhs}");
            assert_eq!(intersect(&rhs, &lhs), expected, "{rhs} & {lhs}");
        }
    }

    #[test]
    fn intersect_rejects_other_tables_and_keyspaces() {
        let a = TableSpan::new(1, None, None);
        let b = TableSpan::new(2, None, None);
        assert_eq!(intersect(&a, &b), None);
        assert_eq!(intersect(&a, &a.clone().with_keyspace(7)), None);
    }

    #[test]
    fn contains_respects_open_bounds() {
        let outer = span(None, Some(b"m"));
        assert!(contains(&outer, &span(Some(b"a"), Some(b"b"))));
        assert!(contains(&outer, &span(None, Some(b"m"))));
        assert!(!contains(&outer, &span(Some(b"a"), None)));
        assert!(contains(&span(None, None), &span(Some(b"a"), None)));
    }

    #[test]
    fn ordering_is_table_then_start_then_end() {
        let a = TableSpan::new(1, Some(b"a".to_vec()), Some(b"z".to_vec()));
        let b = TableSpan::new(2, Some(b"b".to_vec()), Some(b"y".to_vec()));
        let c = TableSpan::new(2, Some(b"c".to_vec()), Some(b"x".to_vec()));
        assert!(a < b);
        assert!(b > a);
        assert!(b < c);

        let open_start = TableSpan::new(2, None, Some(b"a".to_vec()));
        assert!(open_start < b);
        let short = TableSpan::new(2, Some(b"b".to_vec()), Some(b"c".to_vec()));
        let open_end = TableSpan::new(2, Some(b"b".to_vec()), None);
        assert!(short < b);
        assert!(b < open_end);
    }

    #[test]
    fn table_key_range_contains_record_prefix() {
        for table_id in [0, 1, 123, -5, i64::MAX] {
            let (start, end) = table_key_range(table_id);
            assert!(start < end, "table {table_id}");
            let mut prefix = record_prefix(table_id);
            assert!(start <= prefix, "table {table_id}");
            if let Some(last) = prefix.last_mut() {
                *last += 1;
            }
            assert!(end >= prefix, "table {table_id}");
        }
        let span = TableSpan::for_table(3, 42);
        assert_eq!(span.keyspace_id, 3);
        assert!(!span.is_empty());
        assert!(TableSpan::for_table(0, 41).end_key() <= span.start_key());
    }

    fn bound_strategy() -> impl Strategy<Value = Option<Vec<u8>>> {
        proptest::option::of(proptest::collection::vec(0u8..4, 0..3))
    }

    proptest! {
        #[test]
        fn intersect_is_symmetric_and_contained(
            a_start in bound_strategy(),
            a_end in bound_strategy(),
            b_start in bound_strategy(),
            b_end in bound_strategy(),
        ) {
            let a = TableSpan::new(0, a_start, a_end);
            let b = TableSpan::new(0, b_start, b_end);
            let ab = intersect(&a, &b);
            prop_assert_eq!(&ab, &intersect(&b, &a));
            if let Some(out) = ab {
                prop_assert!(contains(&a, &out));
                prop_assert!(contains(&b, &out));
                prop_assert!(!out.is_empty());
            }
            if !a.is_empty() {
                let self_cut = intersect(&a, &a).expect("non-empty span intersects itself");
                prop_assert_eq!(self_cut.start_key(), a.start_key());
                prop_assert_eq!(self_cut.end_key(), a.end_key());
            }
        }

        #[test]
        fn bound_comparators_are_total_orders(
            a in bound_strategy(),
            b in bound_strategy(),
            c in bound_strategy(),
        ) {
            let (a, b, c) = (
                a.unwrap_or_default(),
                b.unwrap_or_default(),
                c.unwrap_or_default(),
            );
            for compare in [start_compare, end_compare] {
                prop_assert_eq!(compare(&a, &b), compare(&b, &a).reverse());
                prop_assert_eq!(compare(&a, &a), Ordering::Equal);
                if compare(&a, &b) != Ordering::Greater && compare(&b, &c) != Ordering::Greater {
                    prop_assert_ne!(compare(&a, &c), Ordering::Greater);
                }
            }
        }
    }

    #[test]
    fn display_renders_bounds() {
        assert_eq!(span(None, None).to_string(), "0/0:[-inf, +inf)");
        assert_eq!(
            span(Some(b"a"), Some(&[0x01])).to_string(),
            "0/0:[a, 0x01)"
        );
    }
}
