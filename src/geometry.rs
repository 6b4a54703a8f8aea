//! Small rigid-geometry helpers shared by the CPU filters and the validator.

use nalgebra::{
    Isometry3, Matrix3, Matrix4, Point3, Rotation3, SymmetricEigen, Translation3, UnitQuaternion,
    Vector3,
};

/// Least-squares rigid transform taking `src[k]` onto `dst[k]` (Kabsch).
///
/// Returns `None` for fewer than three points or when the SVD does not converge.
pub fn kabsch(src: &[Vector3<f32>], dst: &[Vector3<f32>]) -> Option<Isometry3<f32>> {
    if src.len() != dst.len() || src.len() < 3 {
        return None;
    }

    let n = src.len() as f32;
    let c_src = src.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;
    let c_dst = dst.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;

    let mut h = Matrix3::zeros();
    for (ps, pd) in src.iter().zip(dst) {
        h += (pd - c_dst) * (ps - c_src).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        // flip the axis of the smallest singular value
        let weakest = svd.singular_values.imin();
        let mut u_fix = u;
        u_fix.column_mut(weakest).neg_mut();
        r = u_fix * v_t;
    }
    if !r.iter().all(|x| x.is_finite()) {
        return None;
    }

    let t = c_dst - r * c_src;
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Some(Isometry3::from_parts(Translation3::from(t), rot))
}

/// Applies a homogeneous 4x4 transform to a 3D point.
#[inline]
pub fn transform_point(t: &Matrix4<f32>, p: &Vector3<f32>) -> Vector3<f32> {
    t.transform_point(&Point3::from(*p)).coords
}

/// Largest squared distance between `t * src[k]` and `dst[k]`, or `None` when empty.
pub fn max_residual2(t: &Matrix4<f32>, src: &[Vector3<f32>], dst: &[Vector3<f32>]) -> Option<f32> {
    src.iter()
        .zip(dst)
        .map(|(s, d)| (transform_point(t, s) - d).norm_squared())
        .reduce(f32::max)
}

/// Spread of a point set in its dominant plane: `sqrt(λ1 * λ2)` of the covariance.
pub fn planar_extent(points: &[Vector3<f32>]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let n = points.len() as f32;
    let mean = points.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;
    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p - mean;
        cov += d * d.transpose();
    }
    cov /= n;

    let mut eig = SymmetricEigen::new(cov).eigenvalues;
    eig.as_mut_slice().sort_by(|a, b| b.total_cmp(a));
    (eig[0].max(0.0) * eig[1].max(0.0)).sqrt()
}
