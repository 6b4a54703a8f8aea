//! Input files: recorded sensor streams and per-image key point sets.
//!
//! Both are zstd-compressed `bincode` payloads.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bincode::{Decode, Encode};
use nalgebra::Matrix4;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::types::{
    Calibration, ColorFrame, DepthFrame, FeatureSet, Intrinsics, ReferenceTrajectory, RgbdFrame,
};

const ZSTD_LEVEL: i32 = 3;

#[derive(Encode, Decode)]
struct IntrinsicsRecord {
    width: u32,
    height: u32,
    fx: f32,
    fy: f32,
    ppx: f32,
    ppy: f32,
}

impl From<&Intrinsics> for IntrinsicsRecord {
    fn from(i: &Intrinsics) -> Self {
        Self {
            width: i.width as u32,
            height: i.height as u32,
            fx: i.fx,
            fy: i.fy,
            ppx: i.ppx,
            ppy: i.ppy,
        }
    }
}

impl From<IntrinsicsRecord> for Intrinsics {
    fn from(r: IntrinsicsRecord) -> Self {
        Self {
            width: r.width as usize,
            height: r.height as usize,
            fx: r.fx,
            fy: r.fy,
            ppx: r.ppx,
            ppy: r.ppy,
        }
    }
}

#[derive(Encode, Decode)]
struct FrameRecord {
    timestamp: f64,
    depth_width: u32,
    depth_height: u32,
    depth: Vec<f32>,
    color_width: u32,
    color_height: u32,
    color: Vec<[u8; 4]>,
}

#[derive(Encode, Decode)]
struct SensorRecord {
    color_intrinsics: IntrinsicsRecord,
    depth_intrinsics: IntrinsicsRecord,
    frames: Vec<FrameRecord>,
    trajectory: Vec<[f32; 16]>, // column-major, -inf marks a missing pose
}

/// A recorded RGB-D sequence with its calibration and optional ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorData {
    pub calibration: Calibration,
    pub frames: Vec<RgbdFrame>,
    pub trajectory: ReferenceTrajectory,
}

/// Which recorded frames a run uses: `start..end` (end clamped to the recording), then
/// every `skip`-th frame of that range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSelection {
    pub range: Option<(usize, usize)>,
    pub skip: usize,
}

impl Default for FrameSelection {
    fn default() -> Self {
        Self { range: None, skip: 1 }
    }
}

impl FrameSelection {
    /// Indices kept out of `total` recorded frames, ascending.
    pub fn indices(&self, total: usize) -> Result<Vec<usize>> {
        if self.skip == 0 {
            return Err(PipelineError::Configuration("frame skip must be at least 1".to_string()));
        }
        let (start, end) = match self.range {
            Some((start, end)) => {
                let end = end.min(total);
                if start >= end {
                    return Err(PipelineError::Configuration(format!(
                        "frame range {start}..{end} is empty ({total} frames recorded)"
                    )));
                }
                (start, end)
            }
            None => (0, total),
        };
        Ok((start..end).step_by(self.skip).collect())
    }

    /// Keeps the selected entries of a per-frame list.
    pub fn select<T>(&self, items: Vec<T>) -> Result<Vec<T>> {
        let keep = self.indices(items.len())?;
        Ok(items
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| keep.binary_search(idx).is_ok())
            .map(|(_, item)| item)
            .collect())
    }
}

fn write_compressed<T: Encode>(path: &Path, value: &T) -> Result<()> {
    let encoded = bincode::encode_to_vec(value, bincode::config::standard())?;
    let compressed = zstd::encode_all(encoded.as_slice(), ZSTD_LEVEL)?;
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&compressed)?;
    out.flush()?;
    Ok(())
}

fn read_compressed<T: Decode<()>>(path: &Path) -> Result<T> {
    let decompressed = zstd::decode_all(BufReader::new(File::open(path)?))?;
    let (value, _) = bincode::decode_from_slice(&decompressed, bincode::config::standard())?;
    Ok(value)
}

pub fn write_sensor(path: &Path, data: &SensorData) -> Result<()> {
    let record = SensorRecord {
        color_intrinsics: (&data.calibration.color).into(),
        depth_intrinsics: (&data.calibration.depth).into(),
        frames: data
            .frames
            .iter()
            .map(|f| FrameRecord {
                timestamp: f.depth.timestamp,
                depth_width: f.depth.width as u32,
                depth_height: f.depth.height as u32,
                depth: f.depth.data.clone(),
                color_width: f.color.width as u32,
                color_height: f.color.height as u32,
                color: f.color.data.clone(),
            })
            .collect(),
        trajectory: data
            .trajectory
            .as_slice()
            .iter()
            .map(|m| {
                let mut cols = [0.0; 16];
                cols.copy_from_slice(m.as_slice());
                cols
            })
            .collect(),
    };
    write_compressed(path, &record)
}

/// Reads a sensor file, keeping the frames picked by `selection`.
pub fn read_sensor(path: &Path, selection: &FrameSelection) -> Result<SensorData> {
    let record: SensorRecord = read_compressed(path)?;

    let frames: Vec<RgbdFrame> = record
        .frames
        .into_iter()
        .map(|f| RgbdFrame {
            depth: DepthFrame {
                width: f.depth_width as usize,
                height: f.depth_height as usize,
                timestamp: f.timestamp,
                data: f.depth,
            },
            color: ColorFrame {
                width: f.color_width as usize,
                height: f.color_height as usize,
                timestamp: f.timestamp,
                data: f.color,
            },
        })
        .collect();
    let poses: Vec<Matrix4<f32>> = record
        .trajectory
        .iter()
        .map(|cols| Matrix4::from_column_slice(cols))
        .collect();
    if !poses.is_empty() && poses.len() != frames.len() {
        return Err(PipelineError::Configuration(format!(
            "{} trajectory poses for {} frames",
            poses.len(),
            frames.len()
        )));
    }

    let frames = selection.select(frames)?;
    let trajectory = if poses.is_empty() {
        ReferenceTrajectory::default()
    } else {
        ReferenceTrajectory::new(selection.select(poses)?)
    };

    info!("loaded {} frames from {}", frames.len(), path.display());
    Ok(SensorData {
        calibration: Calibration {
            color: record.color_intrinsics.into(),
            depth: record.depth_intrinsics.into(),
        },
        frames,
        trajectory,
    })
}

pub fn write_keypoints(path: &Path, features: &[FeatureSet]) -> Result<()> {
    write_compressed(path, &features)
}

/// One feature set per image, in image order.
pub fn read_keypoints(path: &Path) -> Result<Vec<FeatureSet>> {
    let features: Vec<FeatureSet> = read_compressed(path)?;
    info!("loaded key points for {} images from {}", features.len(), path.display());
    Ok(features)
}
