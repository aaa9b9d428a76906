//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use holo_cdc::{contains, MemoryRegionSource, Region, TableSpan};

pub fn key(s: &str) -> Option<Vec<u8>> {
    Some(s.as_bytes().to_vec())
}

pub fn span(table_id: i64, start: &str, end: &str) -> TableSpan {
    TableSpan::new(table_id, key(start), key(end))
}

pub fn region(region_id: u64, start: &str, end: &str) -> Region {
    Region::new(region_id, start.as_bytes().to_vec(), end.as_bytes().to_vec())
}

/// Contiguous regions with ids 1.. cut at `bounds` (`""` is unbounded).
pub fn chained_regions(bounds: &[&str]) -> Vec<Region> {
    bounds
        .windows(2)
        .zip(1u64..)
        .map(|(pair, id)| region(id, pair[0], pair[1]))
        .collect()
}

pub fn region_source(bounds: &[&str]) -> MemoryRegionSource {
    MemoryRegionSource::from_regions(chained_regions(bounds))
}

/// Panic unless `spans` are ordered, gap-free, and exactly cover `parent`.
pub fn assert_tiles(parent: &TableSpan, spans: &[TableSpan]) {
    assert!(!spans.is_empty(), "no spans for {parent}");
    assert_eq!(spans[0].start_key, parent.start_key, "first span start");
    assert_eq!(
        spans[spans.len() - 1].end_key,
        parent.end_key,
        "last span end"
    );
    for pair in spans.windows(2) {
        assert_eq!(pair[0].end_key, pair[1].start_key, "{} then {}", pair[0], pair[1]);
        assert!(!pair[0].is_empty(), "collapsed span {}", pair[0]);
    }
    for span in spans {
        assert!(contains(parent, span), "{span} escapes {parent}");
    }
}

/// Unique scratch directory for one test.
pub fn test_dir(name: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let pid = std::process::id();
    let dir = std::env::temp_dir()
        .join("holo_cdc-tests")
        .join(format!("{name}-{pid}-{ts}"));
    std::fs::create_dir_all(&dir).expect("create test dir");
    dir
}

/// Best-effort cleanup of a test directory.
pub fn cleanup_dir(path: &Path) {
    let _ = std::fs::remove_dir_all(path);
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write test input");
    path
}

/// Run the span planner binary built by cargo.
pub fn run_split_cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_holo_cdc_split"))
        .args(args)
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1")
        .output()
        .expect("run holo_cdc_split")
}
