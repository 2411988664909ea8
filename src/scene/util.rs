use nalgebra as na;
use na::{vector, Matrix4, Vector3, Vector4};

/// Lengths below this are treated as zero when normalizing.
pub const NORMALIZE_EPSILON: f32 = 1e-6;

/// Transformation of a point to homogenous coordinates.
pub fn to_hom_point(v: Vector3<f32>) -> Vector4<f32> {
    return vector![v.x, v.y, v.z, 1.0];
}

/// Transformation of a vector to homogenous coordinates.
pub fn to_hom_vector(v: Vector3<f32>) -> Vector4<f32> {
    return vector![v.x, v.y, v.z, 0.0];
}

/// Transformation of a point from homogenous coordinates.
/// Returns None for points at infinity (w close to zero).
pub fn from_hom_point(v: Vector4<f32>) -> Option<Vector3<f32>> {
    if v.w.abs() < f32::EPSILON {
        return None;
    }
    return Some(vector![v.x / v.w, v.y / v.w, v.z / v.w]);
}

/// Transformation of a vector from homogenous coordinates.
pub fn from_hom_vector(v: Vector4<f32>) -> Vector3<f32> {
    return vector![v.x, v.y, v.z];
}

/// Unit vector in the direction of v, or fallback if v has (almost) zero length.
pub fn normalized_or(v: Vector3<f32>, fallback: Vector3<f32>) -> Vector3<f32> {
    return v.try_normalize(NORMALIZE_EPSILON).unwrap_or(fallback);
}

/// (M^-1)^T, which carries normals along with the points transformed by M.
pub fn inverse_transpose(m: &Matrix4<f32>) -> Option<Matrix4<f32>> {
    return m.try_inverse().map(|inverse| inverse.transpose());
}

/// Transforms a point by a full homogeneous matrix, including the perspective divide.
pub fn transform_point(m: &Matrix4<f32>, p: Vector3<f32>) -> Option<Vector3<f32>> {
    return from_hom_point(m * to_hom_point(p));
}

/// Transforms a direction by a homogeneous matrix, ignoring translation and w.
pub fn transform_vector(m: &Matrix4<f32>, v: Vector3<f32>) -> Vector3<f32> {
    return from_hom_vector(m * to_hom_vector(v));
}

/// Reflection of the direction to light l about the normal n, both unit length.
pub fn reflect(l: Vector3<f32>, n: Vector3<f32>) -> Vector3<f32> {
    return n * (2.0 * n.dot(&l)) - l;
}
