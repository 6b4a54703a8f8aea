//! Row-by-row drivers for the matching pass and the three filter passes.
//!
//! Each pass takes the current stage and returns the stage it produced, so the caller
//! only commits progress once every row has been processed. Per-pair engine failures
//! become empty records; anything touching global invariants aborts the pass.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::buffer::{MatchTable, MatchVariant, RowScratch};
use crate::engine::{
    DenseVerifyParams, EngineResult, FeatureEngine, FilterEngine, GeometryParams, MatchParams,
    PairView, SurfaceAreaParams,
};
use crate::error::{PipelineError, Result};
use crate::frames::CachedFrameStore;
use crate::stage::{Operation, PipelineStage};
use crate::types::{Correspondence, FeatureSet, ImagePair};

/// Read-only inputs shared by every pair of a pass.
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    pub features: &'a [FeatureSet],
    pub frames: Option<&'a CachedFrameStore>,
}

impl<'a> PassContext<'a> {
    pub fn num_images(&self) -> usize {
        self.features.len()
    }

    fn view(&self, prev: usize, cur: usize) -> PairView<'a> {
        PairView {
            pair: ImagePair { i: prev, j: cur },
            src: &self.features[prev],
            dst: &self.features[cur],
            src_frame: self.frames.and_then(|f| f.get(prev)),
            dst_frame: self.frames.and_then(|f| f.get(cur)),
        }
    }
}

/// Staging rows reused across all rows of all passes.
#[derive(Debug, Clone)]
pub struct PassScratch {
    /// Raw row, raw capacity.
    pub raw: RowScratch,
    /// Filtered row read back as filter input.
    pub filtered_in: RowScratch,
    /// Filter output, filtered capacity.
    pub filtered_out: RowScratch,
}

impl PassScratch {
    pub fn new(raw_capacity: usize, filtered_capacity: usize) -> Self {
        Self {
            raw: RowScratch::new(raw_capacity),
            filtered_in: RowScratch::new(filtered_capacity),
            filtered_out: RowScratch::new(filtered_capacity),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchAllReport {
    /// Pairs handed to the engine.
    pub pairs: usize,
    pub failed_pairs: usize,
    pub truncated_pairs: usize,
    /// Images skipped because they have no features.
    pub empty_images: usize,
    /// Pairs with more raw matches than the configured minimum, in storage order.
    pub candidates: Vec<ImagePair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub operation: Operation,
    /// Pairs with a non-empty input record.
    pub pairs: usize,
    pub kept: usize,
    pub rejected: usize,
    pub failed_pairs: usize,
    pub truncated_pairs: usize,
}

impl PassReport {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            pairs: 0,
            kept: 0,
            rejected: 0,
            failed_pairs: 0,
            truncated_pairs: 0,
        }
    }
}

/// Matches every image against all of its predecessors and fills the raw records.
pub fn match_all<E: FeatureEngine + ?Sized>(
    stage: PipelineStage,
    table: &mut MatchTable,
    scratch: &mut RowScratch,
    ctx: &PassContext<'_>,
    engine: &E,
    params: &MatchParams,
    min_num_matches: usize,
) -> Result<(PipelineStage, MatchAllReport)> {
    let next = stage.begin(Operation::MatchAll)?;
    let num_images = ctx.num_images();
    table.check_image_count(num_images)?;

    let t0 = Instant::now();
    let mut report = MatchAllReport::default();

    for cur in 1..num_images {
        scratch.reset(cur);

        if ctx.features[cur].is_empty() {
            debug!("image {cur} has no features, row left empty");
            report.empty_images += 1;
        } else {
            for prev in 0..cur {
                if ctx.features[prev].is_empty() {
                    continue;
                }
                report.pairs += 1;
                match engine.match_features(&ctx.view(prev, cur), params) {
                    Ok(matches) => {
                        let kept = scratch.set_pair(prev, &matches);
                        if kept < matches.len() {
                            report.truncated_pairs += 1;
                            warn!("pair ({prev}, {cur}): {} raw matches truncated to {kept}", matches.len());
                        }
                    }
                    Err(e) => {
                        report.failed_pairs += 1;
                        warn!("matching pair ({prev}, {cur}) failed: {e}");
                        scratch.clear_pair(prev);
                    }
                }
            }
        }

        table.store_scratch(MatchVariant::Raw, scratch)?;
        report.candidates.extend(
            scratch
                .counts()
                .iter()
                .enumerate()
                .filter(|&(_, &count)| count as usize > min_num_matches)
                .map(|(prev, _)| ImagePair { i: prev, j: cur }),
        );
    }

    info!(
        "matched {} pairs over {num_images} images in {:?}: {} candidates, {} failed, {} truncated",
        report.pairs,
        t0.elapsed(),
        report.candidates.len(),
        report.failed_pairs,
        report.truncated_pairs
    );
    Ok((next, report))
}

/// Shared driver of the filter passes: load each row of `source` into `input`, run
/// `filter` on every non-empty pair, and store the result as the filtered row.
#[allow(clippy::too_many_arguments)]
fn filter_rows<F>(
    op: Operation,
    stage: PipelineStage,
    table: &mut MatchTable,
    source: MatchVariant,
    input: &mut RowScratch,
    output: &mut RowScratch,
    ctx: &PassContext<'_>,
    mut filter: F,
) -> Result<(PipelineStage, PassReport)>
where
    F: FnMut(&PairView<'_>, &[Correspondence]) -> EngineResult<Vec<Correspondence>>,
{
    let next = stage.begin(op)?;
    let num_images = ctx.num_images();
    table.check_image_count(num_images)?;

    let t0 = Instant::now();
    let mut report = PassReport::new(op);

    for cur in 1..num_images {
        table.load_scratch(source, cur, input)?;
        output.reset(cur);

        for prev in 0..cur {
            let matches = input.pair(prev);
            if matches.is_empty() {
                continue;
            }
            report.pairs += 1;

            let mut kept = match filter(&ctx.view(prev, cur), &matches) {
                Ok(kept) => kept,
                Err(e) => {
                    report.failed_pairs += 1;
                    warn!("{op:?} failed for pair ({prev}, {cur}): {e}");
                    continue;
                }
            };
            if kept.len() > matches.len() {
                warn!(
                    "{op:?} grew pair ({prev}, {cur}) from {} to {} matches, truncating",
                    matches.len(),
                    kept.len()
                );
                kept.truncate(matches.len());
            }
            let stored = output.set_pair(prev, &kept);
            if stored < kept.len() {
                report.truncated_pairs += 1;
                debug!("pair ({prev}, {cur}): {} filtered matches truncated to {stored}", kept.len());
            }
            if stored == 0 {
                report.rejected += 1;
            } else {
                report.kept += 1;
            }
        }

        table.store_scratch(MatchVariant::Filtered, output)?;
    }

    info!(
        "{op:?}: {} pairs, {} kept, {} rejected, {} failed in {:?}",
        report.pairs,
        report.kept,
        report.rejected,
        report.failed_pairs,
        t0.elapsed()
    );
    Ok((next, report))
}

/// Geometric (RANSAC) filter: raw records in, filtered records out.
pub fn filter_by_geometry<E: FilterEngine + ?Sized>(
    stage: PipelineStage,
    table: &mut MatchTable,
    scratch: &mut PassScratch,
    ctx: &PassContext<'_>,
    engine: &E,
    params: &GeometryParams,
) -> Result<(PipelineStage, PassReport)> {
    filter_rows(
        Operation::FilterByGeometry,
        stage,
        table,
        MatchVariant::Raw,
        &mut scratch.raw,
        &mut scratch.filtered_out,
        ctx,
        |view, matches| engine.filter_by_geometry(view, matches, params),
    )
}

pub fn filter_by_surface_area<E: FilterEngine + ?Sized>(
    stage: PipelineStage,
    table: &mut MatchTable,
    scratch: &mut PassScratch,
    ctx: &PassContext<'_>,
    engine: &E,
    params: &SurfaceAreaParams,
) -> Result<(PipelineStage, PassReport)> {
    filter_rows(
        Operation::FilterBySurfaceArea,
        stage,
        table,
        MatchVariant::Filtered,
        &mut scratch.filtered_in,
        &mut scratch.filtered_out,
        ctx,
        |view, matches| engine.filter_by_surface_area(view, matches, params),
    )
}

/// Dense verification against cached frames. Fails up front when the frames are missing.
pub fn filter_by_dense_verify<E: FilterEngine + ?Sized>(
    stage: PipelineStage,
    table: &mut MatchTable,
    scratch: &mut PassScratch,
    ctx: &PassContext<'_>,
    engine: &E,
    params: &DenseVerifyParams,
) -> Result<(PipelineStage, PassReport)> {
    // stage errors take precedence over missing frames
    stage.begin(Operation::FilterByDenseVerify)?;
    match ctx.frames {
        Some(frames) if frames.len() >= ctx.num_images() => {}
        _ => {
            return Err(PipelineError::Configuration(
                "dense verification needs a cached frame for every image".to_string(),
            ))
        }
    }
    filter_rows(
        Operation::FilterByDenseVerify,
        stage,
        table,
        MatchVariant::Filtered,
        &mut scratch.filtered_in,
        &mut scratch.filtered_out,
        ctx,
        |view, matches| engine.filter_by_dense_verify(view, matches, params),
    )
}
