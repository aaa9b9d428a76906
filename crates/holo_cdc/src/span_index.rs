//! Ordered span-keyed index with range scans and hole detection.
//!
//! Entries are non-overlapping spans, so an entry is identified by where it
//! starts: `(keyspace, table, start_key)`. Upserting a span that starts at an
//! existing entry's start replaces that entry. Keeping entries disjoint is the
//! caller's job; the index does not check it on insert.
//!
//! The index is not synchronized. Share it behind a `std::sync::RwLock`:
//! readers (`get`, `iter`, `find_holes`) take the read side, `replace_or_insert`
//! and `delete` take the write side.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::ops::Range;

use crate::span::{intersect, start_compare, TableSpan};

/// Position of an entry in the index.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct SpanKey {
    keyspace_id: u32,
    table_id: i64,
    // Empty sorts first, which matches `start_compare` treating it as -inf.
    start: Vec<u8>,
}

impl SpanKey {
    fn of(span: &TableSpan) -> Self {
        Self {
            keyspace_id: span.keyspace_id,
            table_id: span.table_id,
            start: span.start_key().to_vec(),
        }
    }

    fn table_floor(span: &TableSpan) -> Self {
        Self {
            keyspace_id: span.keyspace_id,
            table_id: span.table_id,
            start: Vec::new(),
        }
    }
}

/// Sorted map from table spans to values.
#[derive(Clone, Debug)]
pub struct SpanIndex<V> {
    entries: BTreeMap<SpanKey, (TableSpan, V)>,
}

impl<V> Default for SpanIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ascending iterator over `(span, value)` pairs.
pub struct Iter<'a, V> {
    inner: std::iter::Flatten<std::option::IntoIter<btree_map::Range<'a, SpanKey, (TableSpan, V)>>>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a TableSpan, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, (span, value))| (span, value))
    }
}

impl<V> DoubleEndedIterator for Iter<'_, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, (span, value))| (span, value))
    }
}

impl<V> SpanIndex<V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert `value` for `span`, returning the value previously stored at the
    /// same start position.
    pub fn replace_or_insert(&mut self, span: TableSpan, value: V) -> Option<V> {
        self.entries
            .insert(SpanKey::of(&span), (span, value))
            .map(|(_, old)| old)
    }

    pub fn get(&self, span: &TableSpan) -> Option<&V> {
        self.entries.get(&SpanKey::of(span)).map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, span: &TableSpan) -> Option<&mut V> {
        self.entries
            .get_mut(&SpanKey::of(span))
            .map(|(_, value)| value)
    }

    pub fn has(&self, span: &TableSpan) -> bool {
        self.entries.contains_key(&SpanKey::of(span))
    }

    pub fn delete(&mut self, span: &TableSpan) -> Option<V> {
        self.entries.remove(&SpanKey::of(span)).map(|(_, value)| value)
    }

    /// All entries in ascending order. Calling it again restarts the scan.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            inner: Some(self.entries.range::<SpanKey, _>(..))
                .into_iter()
                .flatten(),
        }
    }

    /// Entries whose position `k` satisfies `lo <= k < hi`.
    ///
    /// An empty or inverted range yields nothing.
    pub fn range(&self, lo: &TableSpan, hi: &TableSpan) -> Iter<'_, V> {
        let lo = SpanKey::of(lo);
        let hi = SpanKey::of(hi);
        let bounds: Option<Range<SpanKey>> = (lo < hi).then_some(lo..hi);
        Iter {
            inner: bounds
                .map(|bounds| self.entries.range(bounds))
                .into_iter()
                .flatten(),
        }
    }

    /// Visit entries in ascending order until `visit` returns `false`.
    pub fn ascend<F>(&self, mut visit: F)
    where
        F: FnMut(&TableSpan, &V) -> bool,
    {
        for (span, value) in self.iter() {
            if !visit(span, value) {
                break;
            }
        }
    }

    /// Visit entries in `[lo, hi)` until `visit` returns `false`.
    pub fn ascend_range<F>(&self, lo: &TableSpan, hi: &TableSpan, mut visit: F)
    where
        F: FnMut(&TableSpan, &V) -> bool,
    {
        for (span, value) in self.range(lo, hi) {
            if !visit(span, value) {
                break;
            }
        }
    }

    /// Entries of `span`'s table whose interval intersects `span`, ascending.
    ///
    /// Includes an entry that starts before `span` but reaches into it.
    pub fn overlapping<'a>(
        &'a self,
        span: &TableSpan,
    ) -> impl Iterator<Item = (&'a TableSpan, &'a V)> + 'a {
        let query = span.clone();
        let lo = SpanKey::of(span);
        let straddling = self
            .entries
            .range(SpanKey::table_floor(span)..lo.clone())
            .next_back()
            .filter(|(_, (entry, _))| intersect(entry, span).is_some());
        let following = self
            .entries
            .range(lo..)
            .take_while(move |(key, _)| {
                key.keyspace_id == query.keyspace_id
                    && key.table_id == query.table_id
                    && (query.end_key().is_empty() || key.start.as_slice() < query.end_key())
            });
        straddling
            .into_iter()
            .chain(following)
            .map(|(_, (entry, value))| (entry, value))
    }

    /// Report which parts of `[lo.start_key, hi.start_key)` are covered.
    ///
    /// Inputs:
    /// - `lo`: keyspace, table, and inclusive start of the query.
    /// - `hi`: its start key is the exclusive end of the query (absent means
    ///   the end of the keyspace).
    ///
    /// Output:
    /// - `(found, holes)`: the entries intersecting the query in ascending
    ///   order, and the uncovered gaps between them. Sorted together and
    ///   clipped to the query they tile it exactly. An empty query yields two
    ///   empty vectors.
    pub fn find_holes(&self, lo: &TableSpan, hi: &TableSpan) -> (Vec<TableSpan>, Vec<TableSpan>) {
        let query = TableSpan {
            keyspace_id: lo.keyspace_id,
            table_id: lo.table_id,
            start_key: lo.start_key.clone(),
            end_key: hi.start_key.clone(),
        };
        let mut found = Vec::new();
        let mut holes = Vec::new();
        if query.is_empty() {
            return (found, holes);
        }

        let hole = |start_key: Option<Vec<u8>>, end_key: Option<Vec<u8>>| TableSpan {
            keyspace_id: query.keyspace_id,
            table_id: query.table_id,
            start_key,
            end_key,
        };

        // Cursor is a start position; `None`/empty is -inf. `reached_end`
        // flips once an entry extends to +inf.
        let mut cursor = query.start_key.clone();
        let mut reached_end = false;
        for (entry, _) in self.overlapping(&query) {
            let cursor_key = cursor.as_deref().unwrap_or_default();
            if !reached_end && start_compare(entry.start_key(), cursor_key).is_gt() {
                holes.push(hole(cursor.clone(), entry.start_key.clone()));
            }
            found.push(entry.clone());
            if entry.end_key().is_empty() {
                reached_end = true;
            } else if entry.end_key() > cursor_key {
                cursor = entry.end_key.clone();
            }
        }

        let cursor_key = cursor.as_deref().unwrap_or_default();
        if !reached_end && (query.end_key().is_empty() || cursor_key < query.end_key()) {
            holes.push(hole(cursor, query.end_key.clone()));
        }
        (found, holes)
    }
}

impl<V: Default + Clone> SpanIndex<V> {
    /// Stored value for `span`, or `V::default()` when absent.
    pub fn get_or_default(&self, span: &TableSpan) -> V {
        self.get(span).cloned().unwrap_or_default()
    }
}

impl<'a, V> IntoIterator for &'a SpanIndex<V> {
    type Item = (&'a TableSpan, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
