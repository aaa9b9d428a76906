//! Periodic check that tracked spans are still fully backed by regions.

use anyhow::Context;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::region::{check_regions_left_cover, cut_regions_left_cover_span};
use crate::region_source::RegionSource;
use crate::span::TableSpan;

/// A tracked span whose regions no longer cover it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CoverageDrift {
    pub span: TableSpan,
    /// End of the contiguous region chain anchored at the span start, or
    /// `None` when not even the start key is covered.
    pub covered_until: Option<Vec<u8>>,
    /// Regions returned by the source for this span.
    pub region_count: usize,
}

/// Re-fetch regions for every span and report the ones with gaps.
///
/// Inputs:
/// - `source`: region boundaries, usually a retrying source.
/// - `spans`: the spans currently assigned to workers.
/// - `cancel`: stops between spans and aborts the in-flight fetch.
///
/// Output:
/// - Drifted spans in input order. A source error aborts the whole pass, so
///   an unavailable source is never mistaken for missing coverage.
pub async fn verify_spans(
    source: &dyn RegionSource,
    spans: &[TableSpan],
    cancel: &CancellationToken,
) -> anyhow::Result<Vec<CoverageDrift>> {
    let mut drifted = Vec::new();
    for span in spans {
        let regions = tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("coverage check cancelled"),
            res = source.regions_in_range(span.start_key(), span.end_key()) => {
                res.with_context(|| format!("load regions for span {span}"))?
            }
        };
        if check_regions_left_cover(&regions, span) {
            continue;
        }

        // Every region in the chain extends the frontier, so the last end is it.
        let covered_until = cut_regions_left_cover_span(&regions, span)
            .last()
            .map(|region| region.end_key.clone());
        tracing::warn!(
            span = %span,
            regions = regions.len(),
            covered_until = ?covered_until.as_deref().map(hex::encode),
            "span lost region coverage"
        );
        drifted.push(CoverageDrift {
            span: span.clone(),
            covered_until,
            region_count: regions.len(),
        });
    }
    tracing::debug!(spans = spans.len(), drifted = drifted.len(), "coverage check finished");
    Ok(drifted)
}
