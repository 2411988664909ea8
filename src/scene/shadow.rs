//! Two pass shadow mapping for a directional light.
//!
//! The first pass renders the depth of the scene as seen from the light with an orthographic
//! projection. The second pass, done with a `ShadowShader`, maps every camera fragment back to
//! the light's screen and compares depths.

use log::debug;
use nalgebra as na;
use na::{Matrix4, Vector3};

use super::buffer::{DepthBuffer, FrameBuffer};
use super::model::Mesh;
use super::raster::Rasterizer;
use super::shader::DepthShader;
use super::transform::RenderContext;
use super::util::normalized_or;

/// Bias against self shadowing, as a fraction of the depth range.
pub const DEFAULT_SHADOW_BIAS_RATIO: f32 = 0.02;

/// Depth of the scene as seen from the light, with the transform that produced it.
pub struct ShadowMap {
    context: RenderContext,
    depth: DepthBuffer,
    depth_range: f32,
}

impl ShadowMap {
    /// Orthographic context looking from `center + light_dir` at `center`, covering
    /// [-1, 1] x [-1, 1] around it with a width x height buffer.
    pub fn light_context(
        light_dir: Vector3<f32>,
        center: Vector3<f32>,
        width: u32,
        height: u32,
        depth_range: f32,
    ) -> RenderContext {
        let light_dir = normalized_or(light_dir, Vector3::z());
        // Any up works as long as it is not parallel to the light.
        let up = if light_dir.y.abs() > 0.99 { Vector3::x() } else { Vector3::y() };
        let mut context = RenderContext::new();
        context
            .set_view(center + light_dir, center, up)
            .set_projection(0.0)
            .set_viewport(0.0, 0.0, width as f32, height as f32, depth_range);
        return context;
    }

    /// First pass: depth of every face of the mesh from the light. No culling, since the faces
    /// turned away from the light may still face the camera.
    pub fn render(
        mesh: &dyn Mesh,
        context: RenderContext,
        width: u32,
        height: u32,
        depth_range: f32,
    ) -> Self {
        let mut frame = FrameBuffer::new(width, height);
        let mut depth = DepthBuffer::new(width, height);
        let mut shader = DepthShader::new(mesh, &context, depth_range);
        let stats =
            Rasterizer::new(&context).draw(mesh.face_count(), &mut shader, &mut frame, &mut depth);
        debug!("Shadow pass: {} of {} faces drawn", stats.drawn, stats.faces);
        return Self::from_depth(context, depth, depth_range);
    }

    /// Shadow map from an already rendered light space depth buffer.
    pub fn from_depth(context: RenderContext, depth: DepthBuffer, depth_range: f32) -> Self {
        return Self { context, depth, depth_range };
    }

    pub fn depth(&self) -> &DepthBuffer {
        return &self.depth;
    }

    pub fn default_bias(&self) -> f32 {
        return DEFAULT_SHADOW_BIAS_RATIO * self.depth_range;
    }

    /// Maps camera screen positions to light screen positions, None if the camera transform
    /// can not be inverted.
    pub fn reprojection(&self, camera: &RenderContext) -> Option<Matrix4<f32>> {
        let screen_to_world = camera.screen_transform().try_inverse()?;
        return Some(self.context.screen_transform() * screen_to_world);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::model::MeshData;
    use crate::scene::raster::CullMode;
    use crate::scene::shader::{ShadowOutput, ShadowShader};
    use crate::scene::Color;
    use na::{vector, Vector2};

    const SIZE: u32 = 128;
    const DEPTH: f32 = 255.0;

    /// Ground square at z = 0 and a triangle floating above it at z = 0.5.
    fn scene() -> MeshData {
        let uv = [Vector2::zeros(); 3];
        let mut mesh = MeshData::default();
        let (a, b) = (vector![-1.0, -1.0, 0.0], vector![1.0, -1.0, 0.0]);
        let (c, d) = (vector![1.0, 1.0, 0.0], vector![-1.0, 1.0, 0.0]);
        mesh.push_triangle([a, b, c], uv);
        mesh.push_triangle([a, c, d], uv);
        let occluder = [vector![0.2, -0.4, 0.5], vector![0.6, -0.4, 0.5], vector![0.4, 0.4, 0.5]];
        mesh.push_triangle(occluder, uv);
        return mesh;
    }

    /// Orthographic camera straight above the scene, world x and y map directly to the screen.
    fn camera() -> RenderContext {
        let mut context = RenderContext::new();
        context
            .set_view(vector![0.0, 0.0, 3.0], Vector3::zeros(), vector![0.0, 1.0, 0.0])
            .set_projection(0.0)
            .set_viewport(0.0, 0.0, SIZE as f32, SIZE as f32, DEPTH);
        return context;
    }

    fn pixel(x: f32, y: f32) -> (i32, i32) {
        let half = SIZE as f32 / 2.0;
        return ((half * (1.0 + x)).round() as i32, (half * (1.0 + y)).round() as i32);
    }

    #[test]
    fn test_light_context_up_is_never_parallel() {
        let context =
            ShadowMap::light_context(vector![0.0, 1.0, 0.0], Vector3::zeros(), 8, 8, DEPTH);
        assert!(context.view.iter().all(|value| value.is_finite()));
        assert_eq!(context.projection, Matrix4::identity());
    }

    #[test]
    fn test_light_pass_sees_occluder_first() {
        let mesh = scene();
        let light_dir = vector![0.0, 0.0, 1.0];
        let context = ShadowMap::light_context(light_dir, Vector3::zeros(), SIZE, SIZE, DEPTH);
        let shadow_map = ShadowMap::render(&mesh, context, SIZE, SIZE, DEPTH);
        let (x, y) = pixel(0.4, 0.0);
        let (gx, gy) = pixel(-0.6, 0.0);
        let occluder = shadow_map.depth().get(x, y).unwrap();
        let ground = shadow_map.depth().get(gx, gy).unwrap();
        assert!(occluder.is_finite() && ground.is_finite());
        assert!(occluder < ground);
    }

    #[test]
    fn test_shadow_occlusion_scenario() {
        let mesh = scene();
        let light_dir = vector![1.0, 0.0, 1.0];
        let light = ShadowMap::light_context(light_dir, Vector3::zeros(), SIZE, SIZE, DEPTH);
        let shadow_map = ShadowMap::render(&mesh, light, SIZE, SIZE, DEPTH);

        let camera = camera();
        let mut shader =
            ShadowShader::new(&mesh, &camera, light_dir, &shadow_map, ShadowOutput::Mask).unwrap();
        let mut frame = FrameBuffer::new(SIZE, SIZE);
        let mut depth = DepthBuffer::new(SIZE, SIZE);
        let stats = Rasterizer::new(&camera)
            .with_cull(CullMode::Back)
            .draw(mesh.face_count(), &mut shader, &mut frame, &mut depth);
        assert_eq!(stats.drawn, 3);

        // The occluder's shadow falls 0.5 towards -x on the ground.
        let (x, y) = pixel(-0.1, -0.1);
        assert_eq!(frame.get(x, y), Some(Color::BLACK));
        let (x, y) = pixel(-0.7, 0.5);
        assert_eq!(frame.get(x, y), Some(Color::WHITE));
        let (x, y) = pixel(0.6, 0.6);
        assert_eq!(frame.get(x, y), Some(Color::WHITE));
        // Nothing is above the occluder itself.
        let (x, y) = pixel(0.4, 0.0);
        assert_eq!(frame.get(x, y), Some(Color::WHITE));
    }

    #[test]
    fn test_lit_output_dims_shadowed_ground() {
        let mesh = scene();
        let light_dir = vector![1.0, 0.0, 1.0];
        let light = ShadowMap::light_context(light_dir, Vector3::zeros(), SIZE, SIZE, DEPTH);
        let shadow_map = ShadowMap::render(&mesh, light, SIZE, SIZE, DEPTH);
        let camera = camera();
        let output = ShadowOutput::Lit { diffuse: &Color::WHITE, occluded: 0.3 };
        let mut shader = ShadowShader::new(&mesh, &camera, light_dir, &shadow_map, output).unwrap();
        let mut frame = FrameBuffer::new(SIZE, SIZE);
        let mut depth = DepthBuffer::new(SIZE, SIZE);
        Rasterizer::new(&camera).draw(mesh.face_count(), &mut shader, &mut frame, &mut depth);

        let (x, y) = pixel(-0.1, -0.1);
        let shadowed = frame.get(x, y).unwrap();
        let (x, y) = pixel(-0.7, 0.5);
        let lit = frame.get(x, y).unwrap();
        assert!(lit.r > 150);
        assert!(shadowed.r < lit.r / 2);
        assert!(shadowed.r > 0);
    }
}
