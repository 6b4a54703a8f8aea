//! Classifies filtering decisions against a reference trajectory.

use nalgebra::{Matrix3, Vector3};
use tracing::{debug, info};

use crate::buffer::{MatchTable, MatchVariant, PairRecord};
use crate::config::{NegativeSampling, ValidatorConfig};
use crate::error::Result;
use crate::geometry::max_residual2;
use crate::stage::{Operation, PipelineStage};
use crate::types::{lift_keypoint, FeatureSet, ImagePair, ReferenceTrajectory};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Candidate pairs with ground truth for both images.
    pub evaluated: usize,
    pub accepted: usize,
    pub false_positives: Vec<ImagePair>,
    pub false_negatives: Vec<ImagePair>,
    pub missing_ground_truth: Vec<ImagePair>,
}

pub struct ValidationContext<'a> {
    pub table: &'a MatchTable,
    /// Pairs that passed the raw-count minimum; nothing else is classified.
    pub candidates: &'a [ImagePair],
    pub features: &'a [FeatureSet],
    pub trajectory: &'a ReferenceTrajectory,
    pub inverse_intrinsics: &'a Matrix3<f32>,
    pub min_num_matches: usize,
    pub config: &'a ValidatorConfig,
}

impl ValidationContext<'_> {
    /// Camera-space end points of every liftable correspondence in `record`.
    fn lift(&self, pair: ImagePair, record: &PairRecord) -> (Vec<Vector3<f32>>, Vec<Vector3<f32>>) {
        let src_set = &self.features[pair.i];
        let dst_set = &self.features[pair.j];
        record
            .key_indices
            .iter()
            .filter_map(|k| {
                let s = src_set.keypoints.get(k.src as usize)?;
                let d = dst_set.keypoints.get(k.dst as usize)?;
                Some((
                    lift_keypoint(s, self.inverse_intrinsics)?,
                    lift_keypoint(d, self.inverse_intrinsics)?,
                ))
            })
            .unzip()
    }
}

/// Runs the classification for every candidate pair of the matching pass.
///
/// A pair counts as accepted when its filtered record is non-empty; before any filter
/// pass has run nothing is accepted.
pub fn validate(stage: PipelineStage, ctx: &ValidationContext<'_>) -> Result<ValidationReport> {
    stage.begin(Operation::Validate)?;
    let thresh = ctx.config.max_residual2;
    let mut report = ValidationReport::default();

    for &pair in ctx.candidates {
        let raw = ctx.table.read(MatchVariant::Raw, pair.i, pair.j)?;
        if raw.is_empty() {
            continue;
        }
        let Some(relative) = ctx.trajectory.relative(pair) else {
            debug!("no ground truth for pair {pair}, skipped");
            report.missing_ground_truth.push(pair);
            continue;
        };
        report.evaluated += 1;

        let filtered = if stage.has_filtered_matches() {
            ctx.table.read(MatchVariant::Filtered, pair.i, pair.j)?
        } else {
            PairRecord::default()
        };

        if !filtered.is_empty() {
            report.accepted += 1;
            let (src, dst) = ctx.lift(pair, &filtered);
            if max_residual2(&relative, &src, &dst).is_some_and(|r| r > thresh) {
                report.false_positives.push(pair);
            }
        } else {
            let sampled = match ctx.config.negative_sampling {
                NegativeSampling::FirstMinMatches => ctx.min_num_matches.min(raw.count()),
                NegativeSampling::All => raw.count(),
            };
            let head = PairRecord {
                distances: raw.distances[..sampled].to_vec(),
                key_indices: raw.key_indices[..sampled].to_vec(),
            };
            let (src, dst) = ctx.lift(pair, &head);
            if max_residual2(&relative, &src, &dst).is_some_and(|r| r <= thresh) {
                report.false_negatives.push(pair);
            }
        }
    }

    info!(
        "validation: {} pairs evaluated, {} accepted, {} false positives, {} false negatives, {} without ground truth",
        report.evaluated,
        report.accepted,
        report.false_positives.len(),
        report.false_negatives.len(),
        report.missing_ground_truth.len()
    );
    Ok(report)
}
