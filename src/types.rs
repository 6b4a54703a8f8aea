use bincode::{Decode, Encode};
use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

/// Bytes per feature descriptor.
pub const DESCRIPTOR_LEN: usize = 128;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct KeyPoint {
    pub pos: [f32; 2], // pixels, working resolution
    pub scale: f32,
    pub depth: f32, // metres, non-positive when unknown
}

/// Key points and descriptors of one image, as produced by the feature engine.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct FeatureSet {
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Vec<u8>, // DESCRIPTOR_LEN bytes per key point
}

impl FeatureSet {
    pub fn new(keypoints: Vec<KeyPoint>, descriptors: Vec<u8>) -> Self {
        Self { keypoints, descriptors }
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn descriptor(&self, idx: usize) -> Option<&[u8]> {
        self.descriptors
            .get(idx * DESCRIPTOR_LEN..(idx + 1) * DESCRIPTOR_LEN)
    }

    /// Drops key points past `max`. Returns how many were dropped.
    pub fn truncate(&mut self, max: usize) -> usize {
        let dropped = self.keypoints.len().saturating_sub(max);
        self.keypoints.truncate(max);
        self.descriptors.truncate(max * DESCRIPTOR_LEN);
        dropped
    }
}

/// Feature-point indices of one correspondence, local to each image's `FeatureSet`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct KeyIndexPair {
    pub src: u32,
    pub dst: u32,
}

impl KeyIndexPair {
    pub const fn new(src: u32, dst: u32) -> Self {
        Self { src, dst }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub keys: KeyIndexPair,
    pub distance: f32, // lower is better
}

impl Correspondence {
    pub const fn new(src: u32, dst: u32, distance: f32) -> Self {
        Self {
            keys: KeyIndexPair::new(src, dst),
            distance,
        }
    }
}

/// Unordered image pair, stored smaller index first.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImagePair {
    pub i: usize,
    pub j: usize,
}

impl ImagePair {
    pub fn new(a: usize, b: usize) -> Self {
        if a <= b {
            Self { i: a, j: b }
        } else {
            Self { i: b, j: a }
        }
    }
}

impl std::fmt::Display for ImagePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.i, self.j)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    pub width: usize,
    pub height: usize,
    pub timestamp: f64,
    pub data: Vec<f32>, // distances in meters
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorFrame {
    pub width: usize,
    pub height: usize,
    pub timestamp: f64,
    pub data: Vec<[u8; 4]>, // RGBA8
}

#[derive(Debug, Clone, PartialEq)]
pub struct RgbdFrame {
    pub depth: DepthFrame,
    pub color: ColorFrame,
}

/// Pinhole intrinsics at a given image resolution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub width: usize,
    pub height: usize,
    pub fx: f32,
    pub fy: f32,
    pub ppx: f32,
    pub ppy: f32,
}

impl Intrinsics {
    pub fn matrix(&self) -> Matrix3<f32> {
        Matrix3::new(
            self.fx, 0.0, self.ppx, //
            0.0, self.fy, self.ppy, //
            0.0, 0.0, 1.0,
        )
    }

    pub fn inverse(&self) -> Matrix3<f32> {
        Matrix3::new(
            1.0 / self.fx, 0.0, -self.ppx / self.fx, //
            0.0, 1.0 / self.fy, -self.ppy / self.fy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Same camera seen at `width` x `height`.
    pub fn rescaled(&self, width: usize, height: usize) -> Self {
        let sx = width as f32 / self.width as f32;
        let sy = height as f32 / self.height as f32;
        Self {
            width,
            height,
            fx: self.fx * sx,
            fy: self.fy * sy,
            ppx: self.ppx * sx,
            ppy: self.ppy * sy,
        }
    }
}

/// Colour and depth sensor calibration.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub color: Intrinsics,
    pub depth: Intrinsics,
}

/// Optional ground-truth camera-to-world poses, one per image.
///
/// An entry whose first element is `-inf` is invalid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceTrajectory {
    poses: Vec<Matrix4<f32>>,
}

impl ReferenceTrajectory {
    pub fn new(poses: Vec<Matrix4<f32>>) -> Self {
        Self { poses }
    }

    pub fn invalid_pose() -> Matrix4<f32> {
        Matrix4::from_element(f32::NEG_INFINITY)
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn pose(&self, image: usize) -> Option<&Matrix4<f32>> {
        self.poses
            .get(image)
            .filter(|m| m[(0, 0)] != f32::NEG_INFINITY)
    }

    /// Ground-truth transform taking points of image `pair.i` into image `pair.j`.
    pub fn relative(&self, pair: ImagePair) -> Option<Matrix4<f32>> {
        let src = self.pose(pair.i)?;
        let tgt = self.pose(pair.j)?;
        Some(tgt.try_inverse()? * src)
    }

    pub fn as_slice(&self) -> &[Matrix4<f32>] {
        &self.poses
    }
}

/// Lifts a key point into camera space using the inverse intrinsics.
pub fn lift_keypoint(key: &KeyPoint, inverse_intrinsics: &Matrix3<f32>) -> Option<Vector3<f32>> {
    if !key.depth.is_finite() || key.depth <= 0.0 {
        return None;
    }
    Some(inverse_intrinsics * (key.depth * Vector3::new(key.pos[0], key.pos[1], 1.0)))
}
