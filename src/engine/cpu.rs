use rayon::prelude::*;

use super::{
    filters, DenseVerifyParams, EngineError, EngineResult, FeatureEngine, FilterEngine,
    GeometryParams, MatchParams, PairView, SurfaceAreaParams,
};
use crate::config::RansacConfig;
use crate::types::{Correspondence, FeatureSet, RgbdFrame, DESCRIPTOR_LEN};

/// Reference engine running everything on the CPU.
///
/// Descriptor matching is brute force with a ratio test and a mutual-best check.
/// Detection is not provided; feature sets are loaded from a key point file.
#[derive(Debug, Clone, Default)]
pub struct CpuEngine {
    ransac: RansacConfig,
}

impl CpuEngine {
    pub fn new(ransac: RansacConfig) -> Self {
        Self { ransac }
    }
}

/// Descriptors as unit-length rows, `DESCRIPTOR_LEN` floats each.
fn normalized(set: &FeatureSet) -> EngineResult<Vec<f32>> {
    if set.descriptors.len() != set.len() * DESCRIPTOR_LEN {
        return Err(EngineError::Degenerate(format!(
            "{} descriptor bytes for {} key points",
            set.descriptors.len(),
            set.len()
        )));
    }
    let mut out: Vec<f32> = set.descriptors.iter().map(|&b| b as f32).collect();
    for row in out.chunks_exact_mut(DESCRIPTOR_LEN) {
        let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            row.iter_mut().for_each(|x| *x /= norm);
        }
    }
    Ok(out)
}

/// Angle between two unit descriptors.
#[inline]
fn angle(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot.clamp(-1.0, 1.0).acos()
}

#[derive(Debug, Clone, Copy)]
struct Nearest {
    idx: usize,
    best: f32,
    second: f32,
}

/// Best and second-best neighbour in `targets` for every row of `queries`.
fn nearest(queries: &[f32], targets: &[f32]) -> Vec<Nearest> {
    queries
        .par_chunks_exact(DESCRIPTOR_LEN)
        .map(|q| {
            let mut n = Nearest {
                idx: 0,
                best: f32::INFINITY,
                second: f32::INFINITY,
            };
            for (t_idx, t) in targets.chunks_exact(DESCRIPTOR_LEN).enumerate() {
                let d = angle(q, t);
                if d < n.best {
                    n.second = n.best;
                    n.best = d;
                    n.idx = t_idx;
                } else if d < n.second {
                    n.second = d;
                }
            }
            n
        })
        .collect()
}

impl FeatureEngine for CpuEngine {
    fn detect(&self, _image: usize, _frame: &RgbdFrame) -> EngineResult<FeatureSet> {
        Err(EngineError::Unsupported("detect"))
    }

    fn match_features(
        &self,
        view: &PairView<'_>,
        params: &MatchParams,
    ) -> EngineResult<Vec<Correspondence>> {
        if view.src.is_empty() || view.dst.is_empty() {
            return Ok(Vec::new());
        }
        let src = normalized(view.src)?;
        let dst = normalized(view.dst)?;

        let forward = nearest(&src, &dst);
        let backward = nearest(&dst, &src);

        let mut out: Vec<Correspondence> = forward
            .iter()
            .enumerate()
            .filter(|(s_idx, n)| {
                n.best < params.distance_thresh
                    && n.best < params.ratio_max * n.second
                    && backward[n.idx].idx == *s_idx
            })
            .map(|(s_idx, n)| Correspondence::new(s_idx as u32, n.idx as u32, n.best))
            .collect();
        out.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.keys.src.cmp(&b.keys.src))
        });
        Ok(out)
    }
}

impl FilterEngine for CpuEngine {
    fn filter_by_geometry(
        &self,
        view: &PairView<'_>,
        matches: &[Correspondence],
        params: &GeometryParams,
    ) -> EngineResult<Vec<Correspondence>> {
        filters::geometry(view, matches, params, &self.ransac)
    }

    fn filter_by_surface_area(
        &self,
        view: &PairView<'_>,
        matches: &[Correspondence],
        params: &SurfaceAreaParams,
    ) -> EngineResult<Vec<Correspondence>> {
        filters::surface_area(view, matches, params)
    }

    fn filter_by_dense_verify(
        &self,
        view: &PairView<'_>,
        matches: &[Correspondence],
        params: &DenseVerifyParams,
    ) -> EngineResult<Vec<Correspondence>> {
        filters::dense_verify(view, matches, params)
    }
}
