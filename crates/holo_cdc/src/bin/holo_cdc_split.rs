//! Offline span planner: split a table span against a region listing, find
//! holes in a span set, or check span coverage.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use holo_cdc::span::format_key_bound;
use holo_cdc::{
    verify_spans, MemoryRegionSource, Region, RetryPolicy, RetryRegionSource, SpanIndex,
    SplitType, Splitter, SplitterConfig, TableSpan,
};

#[derive(Parser)]
#[command(name = "holo_cdc_split")]
#[command(about = "Plan changefeed table spans against region boundaries", long_about = None)]
struct Args {
    /// Optional JSON config with `splitter` and `retry` sections.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Interpret every key argument and JSON key as hex bytes (no 0x prefix).
    #[arg(long, global = true, default_value_t = false)]
    hex: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split a table span along the regions in a JSON listing.
    Split {
        /// JSON array of `{region_id, start_key, end_key, write_bytes}`.
        #[arg(long)]
        regions: PathBuf,
        #[arg(long)]
        table_id: i64,
        #[arg(long, default_value_t = 0)]
        keyspace_id: u32,
        /// Span start key; omitted means the table's first key.
        #[arg(long)]
        start: Option<String>,
        /// Span end key; omitted means the table's last key.
        #[arg(long)]
        end: Option<String>,
        /// Desired number of spans; 0 derives it from `region_count_per_span`.
        #[arg(long, default_value_t = 0)]
        count: usize,
        /// `region-count` or `write-bytes`.
        #[arg(long, default_value = "region-count")]
        strategy: SplitType,
    },
    /// Report covered spans and holes between two keys.
    Holes {
        /// JSON array of `{start_key, end_key}`.
        #[arg(long)]
        spans: PathBuf,
        #[arg(long)]
        table_id: i64,
        /// Query start; omitted means -inf.
        #[arg(long)]
        start: Option<String>,
        /// Query end; omitted means +inf.
        #[arg(long)]
        end: Option<String>,
    },
    /// Check that every span in a JSON file is covered by the region listing.
    Verify {
        #[arg(long)]
        regions: PathBuf,
        #[arg(long)]
        spans: PathBuf,
        #[arg(long)]
        table_id: i64,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    splitter: SplitterConfig,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct RegionView {
    region_id: u64,
    #[serde(default)]
    start_key: String,
    #[serde(default)]
    end_key: String,
    #[serde(default)]
    write_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct SpanView {
    #[serde(default)]
    start_key: Option<String>,
    #[serde(default)]
    end_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let ansi = std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => load_json::<CliConfig>(path)?,
        None => CliConfig::default(),
    };
    let cancel = CancellationToken::new();

    match args.command {
        Command::Split {
            regions,
            table_id,
            keyspace_id,
            start,
            end,
            count,
            strategy,
        } => {
            let source = Arc::new(load_regions(&regions, args.hex)?);
            let table = TableSpan::for_table(keyspace_id, table_id);
            let span = TableSpan {
                start_key: decode_bound(start.as_deref(), args.hex)?.or(table.start_key.clone()),
                end_key: decode_bound(end.as_deref(), args.hex)?.or(table.end_key.clone()),
                ..table
            };
            let retrying = RetryRegionSource::new(Arc::clone(&source), cfg.retry)
                .with_shutdown(cancel.clone());
            let splitter = Splitter::new(keyspace_id, Arc::new(retrying), cfg.splitter)
                .with_write_stats(source);
            let spans = splitter.split(&cancel, &span, count, strategy).await;

            let rows = spans
                .iter()
                .enumerate()
                .map(|(idx, span)| {
                    vec![
                        idx.to_string(),
                        format_key_bound(span.start_key(), true),
                        format_key_bound(span.end_key(), false),
                    ]
                })
                .collect::<Vec<_>>();
            print_ascii_table(&["#", "start", "end"], &rows);
        }
        Command::Holes {
            spans,
            table_id,
            start,
            end,
        } => {
            let mut index = SpanIndex::new();
            for span in load_spans(&spans, table_id, args.hex)? {
                index.replace_or_insert(span, ());
            }
            let lo = TableSpan::new(table_id, decode_bound(start.as_deref(), args.hex)?, None);
            let hi = TableSpan::new(table_id, decode_bound(end.as_deref(), args.hex)?, None);
            let (found, holes) = index.find_holes(&lo, &hi);

            let mut rows = found
                .iter()
                .map(|span| ("found", span))
                .chain(holes.iter().map(|span| ("hole", span)))
                .collect::<Vec<_>>();
            rows.sort_by(|a, b| a.1.cmp(b.1));
            let rows = rows
                .into_iter()
                .map(|(kind, span)| {
                    vec![
                        kind.to_string(),
                        format_key_bound(span.start_key(), true),
                        format_key_bound(span.end_key(), false),
                    ]
                })
                .collect::<Vec<_>>();
            print_ascii_table(&["kind", "start", "end"], &rows);
            if !holes.is_empty() {
                println!("{} hole(s)", holes.len());
            }
        }
        Command::Verify {
            regions,
            spans,
            table_id,
        } => {
            let source = load_regions(&regions, args.hex)?;
            let spans = load_spans(&spans, table_id, args.hex)?;
            let drifted = verify_spans(&source, &spans, &cancel).await?;
            let rows = drifted
                .iter()
                .map(|drift| {
                    vec![
                        drift.span.to_string(),
                        drift.region_count.to_string(),
                        drift
                            .covered_until
                            .as_deref()
                            .map(|key| format_key_bound(key, false))
                            .unwrap_or_else(|| "-".to_string()),
                    ]
                })
                .collect::<Vec<_>>();
            print_ascii_table(&["span", "regions", "covered until"], &rows);
            println!("{}/{} span(s) covered", spans.len() - drifted.len(), spans.len());
        }
    }
    Ok(())
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

fn load_regions(path: &Path, hex: bool) -> anyhow::Result<MemoryRegionSource> {
    let views: Vec<RegionView> = load_json(path)?;
    let source = MemoryRegionSource::new();
    for view in views {
        let region = Region::new(
            view.region_id,
            decode_key(&view.start_key, hex)?,
            decode_key(&view.end_key, hex)?,
        );
        source.upsert_region(region);
        source.set_write_bytes(view.region_id, view.write_bytes);
    }
    Ok(source)
}

fn load_spans(path: &Path, table_id: i64, hex: bool) -> anyhow::Result<Vec<TableSpan>> {
    let views: Vec<SpanView> = load_json(path)?;
    views
        .into_iter()
        .map(|view| {
            Ok(TableSpan::new(
                table_id,
                decode_bound(view.start_key.as_deref(), hex)?,
                decode_bound(view.end_key.as_deref(), hex)?,
            ))
        })
        .collect()
}

fn decode_key(raw: &str, hex: bool) -> anyhow::Result<Vec<u8>> {
    if hex {
        hex::decode(raw).with_context(|| format!("decode hex key {raw:?}"))
    } else {
        Ok(raw.as_bytes().to_vec())
    }
}

fn decode_bound(raw: Option<&str>, hex: bool) -> anyhow::Result<Option<Vec<u8>>> {
    raw.map(|raw| decode_key(raw, hex)).transpose()
}

fn print_ascii_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths = headers.iter().map(|h| h.len()).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            match widths.get_mut(idx) {
                Some(width) => *width = (*width).max(cell.len()),
                None => widths.push(cell.len()),
            }
        }
    }

    let separator = widths.iter().fold(String::from("+"), |mut line, width| {
        line.push_str(&"-".repeat(width + 2));
        line.push('+');
        line
    });

    println!("{separator}");
    println!("{}", render_row(headers.iter().copied(), &widths));
    println!("{separator}");
    for row in rows {
        println!("{}", render_row(row.iter().map(String::as_str), &widths));
    }
    println!("{separator}");
}

fn render_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let mut line = String::from("|");
    for (cell, &width) in cells.zip(widths) {
        line.push_str(&format!(" {cell:width$} |"));
    }
    line
}
