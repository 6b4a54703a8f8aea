#![allow(dead_code)]

use std::cell::Cell;
use std::collections::{HashMap, HashSet};

use nalgebra::Matrix4;
use rgbd_pair_matcher::buffer::{MatchTable, MatchVariant};
use rgbd_pair_matcher::dataset::SensorData;
use rgbd_pair_matcher::engine::{
    DenseVerifyParams, EngineError, EngineResult, FeatureEngine, FilterEngine, GeometryParams,
    MatchParams, PairView, SurfaceAreaParams,
};
use rgbd_pair_matcher::types::{
    Calibration, ColorFrame, Correspondence, DepthFrame, FeatureSet, ImagePair, Intrinsics,
    KeyPoint, ReferenceTrajectory, RgbdFrame, DESCRIPTOR_LEN,
};
use rgbd_pair_matcher::{Pipeline, PipelineConfig};

pub const WIDTH: usize = 32;
pub const HEIGHT: usize = 24;

/// Deterministic engine: pair `(i, j)` gets `raw_count(i, j)` matches `k -> k`, filters
/// keep a configurable prefix.
#[derive(Default)]
pub struct FakeEngine {
    pub default_raw: usize,
    pub raw: HashMap<ImagePair, usize>,
    pub geometry_keep: Option<usize>,
    /// Extra matches the geometric filter invents on top of its input.
    pub geometry_extra: usize,
    pub reject_surface: HashSet<ImagePair>,
    pub reject_dense: HashSet<ImagePair>,
    pub fail_match: HashSet<ImagePair>,
    pub fail_filter: HashSet<ImagePair>,
    pub calls: Cell<usize>,
}

impl FakeEngine {
    pub fn new(default_raw: usize) -> Self {
        Self {
            default_raw,
            ..Default::default()
        }
    }

    fn call(&self, pair: ImagePair, failing: &HashSet<ImagePair>) -> EngineResult<()> {
        self.calls.set(self.calls.get() + 1);
        if failing.contains(&pair) {
            return Err(EngineError::Failed(format!("scripted failure for {pair}")));
        }
        Ok(())
    }
}

impl FeatureEngine for FakeEngine {
    fn detect(&self, image: usize, _frame: &RgbdFrame) -> EngineResult<FeatureSet> {
        Ok(features(if image == 0 { 0 } else { 8 }))
    }

    fn match_features(&self, view: &PairView<'_>, _params: &MatchParams) -> EngineResult<Vec<Correspondence>> {
        self.call(view.pair, &self.fail_match)?;
        let n = *self.raw.get(&view.pair).unwrap_or(&self.default_raw);
        Ok((0..n as u32)
            .map(|k| Correspondence::new(k, k, 0.01 * k as f32))
            .collect())
    }
}

impl FilterEngine for FakeEngine {
    fn filter_by_geometry(
        &self,
        view: &PairView<'_>,
        matches: &[Correspondence],
        _params: &GeometryParams,
    ) -> EngineResult<Vec<Correspondence>> {
        self.call(view.pair, &self.fail_filter)?;
        let keep = self.geometry_keep.unwrap_or(matches.len()).min(matches.len());
        let mut out = matches[..keep].to_vec();
        out.extend((0..self.geometry_extra as u32).map(|k| Correspondence::new(100 + k, k, 0.5)));
        Ok(out)
    }

    fn filter_by_surface_area(
        &self,
        view: &PairView<'_>,
        matches: &[Correspondence],
        _params: &SurfaceAreaParams,
    ) -> EngineResult<Vec<Correspondence>> {
        self.call(view.pair, &self.fail_filter)?;
        if self.reject_surface.contains(&view.pair) {
            return Ok(Vec::new());
        }
        Ok(matches.to_vec())
    }

    fn filter_by_dense_verify(
        &self,
        view: &PairView<'_>,
        matches: &[Correspondence],
        _params: &DenseVerifyParams,
    ) -> EngineResult<Vec<Correspondence>> {
        self.call(view.pair, &self.fail_filter)?;
        view.frames()?;
        if self.reject_dense.contains(&view.pair) {
            return Ok(Vec::new());
        }
        // keep the best half
        Ok(matches[..matches.len().div_ceil(2)].to_vec())
    }
}

pub fn intrinsics(width: usize, height: usize) -> Intrinsics {
    Intrinsics {
        width,
        height,
        fx: width as f32,
        fy: width as f32,
        ppx: width as f32 / 2.0,
        ppy: height as f32 / 2.0,
    }
}

pub fn config() -> PipelineConfig {
    PipelineConfig {
        max_num_images: 8,
        max_matches_raw: 16,
        max_matches_filtered: 6,
        working_width: WIDTH,
        working_height: HEIGHT,
        downsampled_width: WIDTH / 2,
        downsampled_height: HEIGHT / 2,
        ..Default::default()
    }
}

/// `n` flat-wall frames at 1.5 m with identity ground truth.
pub fn sensor(n: usize) -> SensorData {
    let frame = RgbdFrame {
        depth: DepthFrame { width: WIDTH, height: HEIGHT, timestamp: 0.0, data: vec![1.5; WIDTH * HEIGHT] },
        color: ColorFrame { width: WIDTH, height: HEIGHT, timestamp: 0.0, data: vec![[128, 64, 32, 255]; WIDTH * HEIGHT] },
    };
    SensorData {
        calibration: Calibration { color: intrinsics(WIDTH, HEIGHT), depth: intrinsics(WIDTH, HEIGHT) },
        frames: vec![frame; n],
        trajectory: ReferenceTrajectory::new(vec![Matrix4::identity(); n]),
    }
}

/// `n` key points on a row, all at 1.5 m depth, zero descriptors.
pub fn features(n: usize) -> FeatureSet {
    let keys = (0..n)
        .map(|k| KeyPoint { pos: [2.0 + 3.0 * k as f32, 12.0], scale: 1.0, depth: 1.5 })
        .collect();
    FeatureSet::new(keys, vec![0; n * DESCRIPTOR_LEN])
}

pub fn pipeline_with(n: usize, keys_per_image: &[usize]) -> Pipeline {
    let mut pipeline = Pipeline::new(config()).unwrap();
    pipeline.initialize(sensor(n)).unwrap();
    pipeline
        .set_features(keys_per_image.iter().map(|&k| features(k)).collect())
        .unwrap();
    pipeline
}

pub fn pipeline(n: usize) -> Pipeline {
    pipeline_with(n, &vec![20; n])
}

/// Byte image of every row of both variants.
pub fn snapshot(table: &MatchTable, num_images: usize) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    for cur in 1..num_images {
        for variant in [MatchVariant::Raw, MatchVariant::Filtered] {
            out.push(table.row(variant, cur).unwrap().to_bytes());
        }
    }
    out
}
