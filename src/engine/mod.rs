//! Feature and filter engines the orchestrator drives pair by pair.
//!
//! Engines see one pair at a time through a [`PairView`] and return a fresh list of
//! correspondences. Source key indices refer to `pair.i`, destination indices to `pair.j`.
//! They never keep references past the call.

mod cpu;
mod filters;

pub use cpu::CpuEngine;

use nalgebra::Matrix3;
use thiserror::Error;

use crate::frames::CachedFrame;
use crate::types::{Correspondence, FeatureSet, ImagePair, Intrinsics, RgbdFrame};

/// Failure confined to a single image or pair.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("operation not supported by this engine: {0}")]
    Unsupported(&'static str),

    #[error("degenerate input: {0}")]
    Degenerate(String),

    #[error("engine failure: {0}")]
    Failed(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Read-only borrows of everything an engine may look at for one pair.
#[derive(Debug, Clone, Copy)]
pub struct PairView<'a> {
    pub pair: ImagePair,
    pub src: &'a FeatureSet,
    pub dst: &'a FeatureSet,
    pub src_frame: Option<&'a CachedFrame>,
    pub dst_frame: Option<&'a CachedFrame>,
}

impl<'a> PairView<'a> {
    /// Both cached frames, or `Degenerate` when either is missing.
    pub fn frames(&self) -> EngineResult<(&'a CachedFrame, &'a CachedFrame)> {
        match (self.src_frame, self.dst_frame) {
            (Some(s), Some(d)) => Ok((s, d)),
            _ => Err(EngineError::Degenerate(format!("no cached frames for pair {}", self.pair))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchParams {
    pub distance_thresh: f32,
    pub ratio_max: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryParams {
    pub inverse_intrinsics: Matrix3<f32>,
    pub min_matches: usize,
    pub max_residual2: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceAreaParams {
    pub inverse_intrinsics: Matrix3<f32>,
    pub min_matches: usize,
    pub area_thresh: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DenseVerifyParams {
    /// Key point lifting, working resolution.
    pub inverse_intrinsics: Matrix3<f32>,
    /// Projection into cached frames, downsampled resolution.
    pub depth_intrinsics: Intrinsics,
    pub min_matches: usize,
    pub dist_thresh: f32,
    pub normal_thresh: f32,
    pub color_thresh: f32,
    pub err_thresh: f32,
    pub corr_thresh: f32,
    pub depth_min: f32,
    pub depth_max: f32,
}

pub trait FeatureEngine {
    /// Key points and descriptors of one image.
    fn detect(&self, image: usize, frame: &RgbdFrame) -> EngineResult<FeatureSet>;

    /// Nearest-neighbour matches from `view.src` to `view.dst`, best first.
    fn match_features(
        &self,
        view: &PairView<'_>,
        params: &MatchParams,
    ) -> EngineResult<Vec<Correspondence>>;
}

/// Filters only ever return a subset of the correspondences they were given.
pub trait FilterEngine {
    fn filter_by_geometry(
        &self,
        view: &PairView<'_>,
        matches: &[Correspondence],
        params: &GeometryParams,
    ) -> EngineResult<Vec<Correspondence>>;

    fn filter_by_surface_area(
        &self,
        view: &PairView<'_>,
        matches: &[Correspondence],
        params: &SurfaceAreaParams,
    ) -> EngineResult<Vec<Correspondence>>;

    fn filter_by_dense_verify(
        &self,
        view: &PairView<'_>,
        matches: &[Correspondence],
        params: &DenseVerifyParams,
    ) -> EngineResult<Vec<Correspondence>>;
}
