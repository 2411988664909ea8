//! View, projection and viewport matrices.
//!
//! The camera looks down its local -z axis. The viewport flips z so that the value stored in a
//! depth buffer grows with the distance to the camera: smaller depth means closer.

use nalgebra as na;
use na::{matrix, Matrix4, Vector3};

use super::util::transform_point;

/// World to camera transform. Degenerate (NaN) if `up` is parallel to `eye - center`.
pub fn look_at(eye: Vector3<f32>, center: Vector3<f32>, up: Vector3<f32>) -> Matrix4<f32> {
    // New coordinate system x, y, z around camera position.
    let z = (eye - center).normalize();
    let x = up.cross(&z).normalize();
    let y = z.cross(&x);
    // Rotation into camera space is the transpose of the camera basis.
    let rotation = matrix![x.x, x.y, x.z, 0.0;
                           y.x, y.y, y.z, 0.0;
                           z.x, z.y, z.z, 0.0;
                           0.0, 0.0, 0.0, 1.0];
    let translation = matrix![1.0, 0.0, 0.0, -eye.x;
                              0.0, 1.0, 0.0, -eye.y;
                              0.0, 0.0, 1.0, -eye.z;
                              0.0, 0.0, 0.0, 1.0];
    return rotation * translation;
}

/// Perspective projection with coeff = -1 / focal length. Zero coeff is orthographic.
pub fn projection(coeff: f32) -> Matrix4<f32> {
    return matrix![1.0, 0.0, 0.0,   0.0;
                   0.0, 1.0, 0.0,   0.0;
                   0.0, 0.0, 1.0,   0.0;
                   0.0, 0.0, coeff, 1.0];
}

/// Maps [-1, 1] x [-1, 1] to [x, x + w] x [y, y + h] and z in [-1, 1] to [depth, 0].
pub fn viewport(x: f32, y: f32, w: f32, h: f32, depth: f32) -> Matrix4<f32> {
    return matrix![w / 2.0, 0.0,     0.0,          x + w / 2.0;
                   0.0,     h / 2.0, 0.0,          y + h / 2.0;
                   0.0,     0.0,     -depth / 2.0, depth / 2.0;
                   0.0,     0.0,     0.0,          1.0];
}

/// The transform triple read by every draw call of a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderContext {
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
    pub viewport: Matrix4<f32>,
}

impl Default for RenderContext {
    fn default() -> Self {
        return Self::new();
    }
}

impl RenderContext {
    /// Context with all three matrices set to identity.
    pub fn new() -> Self {
        return Self {
            view: Matrix4::identity(),
            projection: Matrix4::identity(),
            viewport: Matrix4::identity(),
        };
    }

    pub fn set_view(
        &mut self,
        eye: Vector3<f32>,
        center: Vector3<f32>,
        up: Vector3<f32>,
    ) -> &mut Self {
        self.view = look_at(eye, center, up);
        return self;
    }

    pub fn set_projection(&mut self, coeff: f32) -> &mut Self {
        self.projection = projection(coeff);
        return self;
    }

    pub fn set_viewport(&mut self, x: f32, y: f32, w: f32, h: f32, depth: f32) -> &mut Self {
        self.viewport = viewport(x, y, w, h, depth);
        return self;
    }

    /// Object space to clip space.
    pub fn clip_transform(&self) -> Matrix4<f32> {
        return self.projection * self.view;
    }

    /// Object space to screen space, before the perspective divide.
    pub fn screen_transform(&self) -> Matrix4<f32> {
        return self.viewport * self.projection * self.view;
    }

    /// Screen position (pixel x, pixel y, depth) of an object space point.
    pub fn to_screen(&self, point: Vector3<f32>) -> Option<Vector3<f32>> {
        return transform_point(&self.screen_transform(), point);
    }
}
