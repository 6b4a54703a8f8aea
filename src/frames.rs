//! Downsampled per-image geometry consumed by dense verification.

use nalgebra::Vector3;
use ndarray::Array2;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::types::{Intrinsics, RgbdFrame};

/// Nearest-neighbour resample of a row-major `src_w` x `src_h` image.
pub fn resample_nearest<T: Copy>(
    src: &[T],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<T> {
    let mut out = Vec::with_capacity(dst_w * dst_h);
    for v in 0..dst_h {
        let sv = ((v * src_h) / dst_h).min(src_h - 1);
        for u in 0..dst_w {
            let su = ((u * src_w) / dst_w).min(src_w - 1);
            out.push(src[sv * src_w + su]);
        }
    }
    out
}

/// One image at the downsampled resolution. Arrays are indexed `[[row, col]]`; invalid
/// positions and normals are NaN.
#[derive(Debug, Clone)]
pub struct CachedFrame {
    pub depth: Array2<f32>,
    pub color: Array2<Vector3<f32>>, // RGB in [0, 1]
    pub positions: Array2<Vector3<f32>>,
    pub normals: Array2<Vector3<f32>>,
}

impl CachedFrame {
    /// Resamples `frame` to `intr`'s resolution and back-projects its depth with `intr`.
    pub fn build(frame: &RgbdFrame, intr: &Intrinsics) -> Self {
        let (w, h) = (intr.width, intr.height);
        let depth_src = &frame.depth;
        let color_src = &frame.color;

        let depth = resample_nearest(&depth_src.data, depth_src.width, depth_src.height, w, h);
        let color = resample_nearest(&color_src.data, color_src.width, color_src.height, w, h);

        let depth = Array2::from_shape_fn((h, w), |(v, u)| {
            let d = depth[v * w + u];
            if d.is_finite() && d > 0.0 { d } else { f32::NAN }
        });
        let color = Array2::from_shape_fn((h, w), |(v, u)| {
            let [r, g, b, _] = color[v * w + u];
            Vector3::new(r as f32, g as f32, b as f32) / 255.0
        });

        // de-project; NaN depth propagates into NaN positions
        let positions = Array2::from_shape_fn((h, w), |(v, u)| {
            let d = depth[[v, u]];
            Vector3::new(
                (u as f32 - intr.ppx) * d / intr.fx,
                (v as f32 - intr.ppy) * d / intr.fy,
                d,
            )
        });

        let normals = Array2::from_shape_fn((h, w), |(v, u)| {
            let nan = Vector3::repeat(f32::NAN);
            if u == 0 || v == 0 || u + 1 >= w || v + 1 >= h {
                return nan;
            }
            let dx = positions[[v, u + 1]] - positions[[v, u - 1]];
            let dy = positions[[v + 1, u]] - positions[[v - 1, u]];
            let n = dx.cross(&dy);
            let len = n.norm();
            if len.is_finite() && len > 0.0 { n / len } else { nan }
        });

        Self { depth, color, positions, normals }
    }

    pub fn width(&self) -> usize {
        self.depth.ncols()
    }

    pub fn height(&self) -> usize {
        self.depth.nrows()
    }
}

/// Cached frames of every image, all at the same downsampled resolution.
#[derive(Debug, Clone)]
pub struct CachedFrameStore {
    intrinsics: Intrinsics,
    frames: Vec<CachedFrame>,
}

impl CachedFrameStore {
    /// Builds one cached frame per image. `depth_intr` is the native depth calibration;
    /// every depth image must match its resolution and every colour image must share one size.
    pub fn build(
        images: &[RgbdFrame],
        depth_intr: &Intrinsics,
        width: usize,
        height: usize,
    ) -> Result<Self> {
        check_resolutions(images, depth_intr)?;

        let intrinsics = depth_intr.rescaled(width, height);
        let t0 = std::time::Instant::now();
        let frames: Vec<CachedFrame> = images
            .par_iter()
            .map(|frame| CachedFrame::build(frame, &intrinsics))
            .collect();
        debug!("built {} cached frames at {width}x{height} in {:?}", frames.len(), t0.elapsed());

        Ok(Self { intrinsics, frames })
    }

    /// Depth intrinsics at the downsampled resolution.
    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn get(&self, image: usize) -> Option<&CachedFrame> {
        self.frames.get(image)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Every colour frame must have the calibrated colour size.
pub(crate) fn check_color_resolution(images: &[RgbdFrame], color_intr: &Intrinsics) -> Result<()> {
    let expected = (color_intr.width, color_intr.height);
    for (idx, frame) in images.iter().enumerate() {
        let c = &frame.color;
        if (c.width, c.height) != expected {
            return Err(PipelineError::Configuration(format!(
                "image {idx}: colour is {}x{}, calibration expects {}x{}",
                c.width, c.height, expected.0, expected.1
            )));
        }
        if c.width == 0 || c.height == 0 || c.data.len() != c.width * c.height {
            return Err(PipelineError::Configuration(format!(
                "image {idx}: colour frame of {}x{} holds {} pixels",
                c.width,
                c.height,
                c.data.len()
            )));
        }
    }
    Ok(())
}

fn check_resolutions(images: &[RgbdFrame], depth_intr: &Intrinsics) -> Result<()> {
    let Some(first) = images.first() else {
        return Ok(());
    };
    let color_dims = (first.color.width, first.color.height);
    for (idx, frame) in images.iter().enumerate() {
        let depth_dims = (frame.depth.width, frame.depth.height);
        if depth_dims != (depth_intr.width, depth_intr.height) {
            return Err(PipelineError::Configuration(format!(
                "image {idx}: depth is {}x{}, calibration expects {}x{}",
                depth_dims.0, depth_dims.1, depth_intr.width, depth_intr.height
            )));
        }
        if (frame.color.width, frame.color.height) != color_dims {
            return Err(PipelineError::Configuration(format!(
                "image {idx}: colour is {}x{}, image 0 is {}x{}",
                frame.color.width, frame.color.height, color_dims.0, color_dims.1
            )));
        }
        if frame.depth.data.len() != depth_dims.0 * depth_dims.1
            || frame.color.data.len() != color_dims.0 * color_dims.1
            || color_dims.0 == 0
            || color_dims.1 == 0
            || depth_dims.0 == 0
            || depth_dims.1 == 0
        {
            return Err(PipelineError::Configuration(format!(
                "image {idx}: pixel buffer does not match its declared size"
            )));
        }
    }
    Ok(())
}
