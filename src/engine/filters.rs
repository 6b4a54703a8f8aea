//! CPU versions of the three correspondence filters.

use nalgebra::{Isometry3, Matrix3, Point3, Vector3};
use rand::{rngs::StdRng, SeedableRng};

use super::{
    DenseVerifyParams, EngineError, EngineResult, GeometryParams, PairView, SurfaceAreaParams,
};
use crate::config::RansacConfig;
use crate::frames::CachedFrame;
use crate::geometry::{kabsch, planar_extent};
use crate::pair_index::pair_index;
use crate::types::{lift_keypoint, Correspondence, FeatureSet};

const MIN_SAMPLES: usize = 3;

/// Matches whose key points both have depth, with their camera-space positions.
struct Lifted {
    slots: Vec<usize>,
    src: Vec<Vector3<f32>>,
    dst: Vec<Vector3<f32>>,
}

fn key_point(set: &FeatureSet, idx: u32, side: &str) -> EngineResult<crate::types::KeyPoint> {
    set.keypoints.get(idx as usize).copied().ok_or_else(|| {
        EngineError::Degenerate(format!("{side} key index {idx} out of range ({} keys)", set.len()))
    })
}

fn lift(view: &PairView<'_>, matches: &[Correspondence], inv: &Matrix3<f32>) -> EngineResult<Lifted> {
    let mut out = Lifted {
        slots: Vec::with_capacity(matches.len()),
        src: Vec::with_capacity(matches.len()),
        dst: Vec::with_capacity(matches.len()),
    };
    for (slot, m) in matches.iter().enumerate() {
        let ks = key_point(view.src, m.keys.src, "source")?;
        let kd = key_point(view.dst, m.keys.dst, "target")?;
        if let (Some(ps), Some(pd)) = (lift_keypoint(&ks, inv), lift_keypoint(&kd, inv)) {
            out.slots.push(slot);
            out.src.push(ps);
            out.dst.push(pd);
        }
    }
    Ok(out)
}

fn inliers(model: &Isometry3<f32>, lifted: &Lifted, max_residual2: f32) -> Vec<usize> {
    (0..lifted.src.len())
        .filter(|&k| {
            let p = model * Point3::from(lifted.src[k]);
            (p.coords - lifted.dst[k]).norm_squared() <= max_residual2
        })
        .collect()
}

fn subset(lifted: &Lifted, idx: &[usize]) -> (Vec<Vector3<f32>>, Vec<Vector3<f32>>) {
    idx.iter().map(|&k| (lifted.src[k], lifted.dst[k])).unzip()
}

/// Seeded RANSAC over rigid fits. Keeps the consensus set when it reaches
/// `min_matches`, otherwise rejects the pair.
pub(super) fn geometry(
    view: &PairView<'_>,
    matches: &[Correspondence],
    params: &GeometryParams,
    ransac: &RansacConfig,
) -> EngineResult<Vec<Correspondence>> {
    let lifted = lift(view, matches, &params.inverse_intrinsics)?;
    let n = lifted.src.len();
    if n < MIN_SAMPLES.max(params.min_matches) {
        return Ok(Vec::new());
    }

    let seed = ransac
        .seed
        .wrapping_add(pair_index(view.pair.i, view.pair.j) as u64);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut best: Vec<usize> = Vec::new();
    for _ in 0..ransac.max_iters {
        let sample = rand::seq::index::sample(&mut rng, n, MIN_SAMPLES).into_vec();
        let (src, dst) = subset(&lifted, &sample);
        let Some(model) = kabsch(&src, &dst) else {
            continue;
        };
        let found = inliers(&model, &lifted, params.max_residual2);
        if found.len() > best.len() {
            best = found;
            if best.len() == n {
                break;
            }
        }
    }

    if best.len() < params.min_matches.max(MIN_SAMPLES) {
        return Ok(Vec::new());
    }

    // refit on the consensus set; keep it only if it does not lose support
    let (src, dst) = subset(&lifted, &best);
    if let Some(refit) = kabsch(&src, &dst) {
        let refined = inliers(&refit, &lifted, params.max_residual2);
        if refined.len() >= best.len() {
            best = refined;
        }
    }

    Ok(best.iter().map(|&k| matches[lifted.slots[k]]).collect())
}

/// Rejects pairs whose matched points cover too small an area in either image.
pub(super) fn surface_area(
    view: &PairView<'_>,
    matches: &[Correspondence],
    params: &SurfaceAreaParams,
) -> EngineResult<Vec<Correspondence>> {
    let lifted = lift(view, matches, &params.inverse_intrinsics)?;
    if lifted.src.len() < params.min_matches.max(MIN_SAMPLES) {
        return Ok(Vec::new());
    }
    let area_src = planar_extent(&lifted.src);
    let area_dst = planar_extent(&lifted.dst);
    if area_src < params.area_thresh || area_dst < params.area_thresh {
        return Ok(Vec::new());
    }
    Ok(matches.to_vec())
}

#[derive(Debug, Default, Clone, Copy)]
struct ProjectionStats {
    err_sum: f32,
    num_corr: usize,
    num_valid: usize,
}

impl std::ops::AddAssign for ProjectionStats {
    fn add_assign(&mut self, rhs: Self) {
        self.err_sum += rhs.err_sum;
        self.num_corr += rhs.num_corr;
        self.num_valid += rhs.num_valid;
    }
}

fn in_range(z: f32, params: &DenseVerifyParams) -> bool {
    z >= params.depth_min && z <= params.depth_max
}

/// Projects every valid point of `from` into `to` through `t` and counts consistent pixels.
fn project(
    from: &CachedFrame,
    to: &CachedFrame,
    t: &Isometry3<f32>,
    params: &DenseVerifyParams,
) -> ProjectionStats {
    let intr = &params.depth_intrinsics;
    let (w, h) = (to.width() as isize, to.height() as isize);
    let mut stats = ProjectionStats::default();

    for ((idx, p), n) in from.positions.indexed_iter().zip(from.normals.iter()) {
        if !p.z.is_finite() || !in_range(p.z, params) {
            continue;
        }
        let q = t * Point3::from(*p);
        if q.z <= 0.0 {
            continue;
        }
        let u = (q.x / q.z * intr.fx + intr.ppx).round() as isize;
        let v = (q.y / q.z * intr.fy + intr.ppy).round() as isize;
        if u < 0 || v < 0 || u >= w || v >= h {
            continue;
        }
        let target = [v as usize, u as usize];
        let tp = to.positions[target];
        if !tp.z.is_finite() || !in_range(tp.z, params) {
            continue;
        }
        stats.num_valid += 1;

        let dist = (q.coords - tp).norm();
        let normal_dot = (t.rotation * *n).dot(&to.normals[target]);
        let color_diff = (from.color[idx] - to.color[target]).norm();
        // NaN normals fail the comparison
        if dist <= params.dist_thresh
            && normal_dot >= params.normal_thresh
            && color_diff <= params.color_thresh
        {
            stats.num_corr += 1;
            stats.err_sum += dist * dist;
        }
    }
    stats
}

/// Checks the rigid motion implied by `matches` against the dense cached frames of
/// both images, in both directions.
pub(super) fn dense_verify(
    view: &PairView<'_>,
    matches: &[Correspondence],
    params: &DenseVerifyParams,
) -> EngineResult<Vec<Correspondence>> {
    let (src_frame, dst_frame) = view.frames()?;
    let lifted = lift(view, matches, &params.inverse_intrinsics)?;
    if lifted.src.len() < params.min_matches.max(MIN_SAMPLES) {
        return Ok(Vec::new());
    }
    let Some(t) = kabsch(&lifted.src, &lifted.dst) else {
        return Ok(Vec::new());
    };

    let mut stats = project(src_frame, dst_frame, &t, params);
    stats += project(dst_frame, src_frame, &t.inverse(), params);

    if stats.num_corr == 0 || stats.num_valid == 0 {
        return Ok(Vec::new());
    }
    let err = stats.err_sum / stats.num_corr as f32;
    let ratio = stats.num_corr as f32 / stats.num_valid as f32;
    if err > params.err_thresh || ratio < params.corr_thresh {
        return Ok(Vec::new());
    }
    Ok(matches.to_vec())
}
