//! Programmable stages of the pipeline.
//!
//! The vertex stage runs once per vertex of a face, in order 0, 1, 2, returns the clip space
//! position and fills the shader's varyings. The fragment stage runs at most once per covered
//! pixel with the barycentric weights of that pixel and either keeps a color or discards.

use log::warn;
use nalgebra as na;
use na::{vector, Matrix2x3, Matrix3, Matrix4, Vector3, Vector4};

use super::buffer::DepthBuffer;
use super::model::{Mesh, Sampler};
use super::shadow::ShadowMap;
use super::transform::RenderContext;
use super::util::{
    inverse_transpose, normalized_or, reflect, to_hom_point, transform_point, transform_vector,
};
use super::Color;

/// Everything the rasterizer knows about a covered pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentInput {
    /// Perspective correct barycentric weights, used to interpolate varyings.
    pub bar: Vector3<f32>,
    /// Barycentric weights in screen space.
    pub screen_bar: Vector3<f32>,
    /// Pixel x, pixel y and interpolated depth.
    pub position: Vector3<f32>,
}

/// Result of the fragment stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragment {
    Keep(Color),
    /// Neither the frame nor the depth buffer is touched.
    Discard,
}

pub trait Shader: Sync {
    /// Clip space position (before the division by w) of a vertex of a face.
    fn vertex(&mut self, face: usize, nth_vertex: usize) -> Vector4<f32>;

    fn fragment(&self, input: &FragmentInput) -> Fragment;
}

/// Frame constants shared by the lit shaders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uniforms {
    /// Object to clip space (projection * view).
    pub m: Matrix4<f32>,
    /// Inverse transpose of m, applied to normals.
    pub mit: Matrix4<f32>,
    /// Unit direction towards the light, transformed by m.
    pub light: Vector3<f32>,
}

impl Uniforms {
    /// A singular projection * view leaves normals untransformed (`mit` is the identity).
    pub fn new(context: &RenderContext, light_dir: Vector3<f32>) -> Self {
        let m = context.clip_transform();
        let mit = inverse_transpose(&m).unwrap_or_else(|| {
            warn!("Projection * view is singular, normals are left untransformed");
            Matrix4::identity()
        });
        let light = normalized_or(transform_vector(&m, light_dir), Vector3::z());
        return Self { m, mit, light };
    }

    fn clip(&self, position: Vector3<f32>) -> Vector4<f32> {
        return self.m * to_hom_point(position);
    }

    fn normal(&self, normal: Vector3<f32>) -> Vector3<f32> {
        return normalized_or(transform_vector(&self.mit, normal), Vector3::z());
    }

    /// Lambert term for an untransformed normal.
    fn intensity(&self, normal: Vector3<f32>) -> f32 {
        return self.normal(normal).dot(&self.light).max(0.0);
    }
}

/// One light intensity per face, from the face normal.
pub struct FlatShader<'a> {
    mesh: &'a dyn Mesh,
    uniforms: Uniforms,
    pub tint: Color,
    face_intensity: f32,
}

impl<'a> FlatShader<'a> {
    pub fn new(mesh: &'a dyn Mesh, context: &RenderContext, light_dir: Vector3<f32>) -> Self {
        return Self {
            mesh,
            uniforms: Uniforms::new(context, light_dir),
            tint: Color::WHITE,
            face_intensity: 0.0,
        };
    }
}

impl Shader for FlatShader<'_> {
    fn vertex(&mut self, face: usize, nth_vertex: usize) -> Vector4<f32> {
        let position = self.mesh.position(face, nth_vertex);
        if nth_vertex == 0 {
            let b = self.mesh.position(face, 1);
            let c = self.mesh.position(face, 2);
            let face_normal = (b - position).cross(&(c - position));
            self.face_intensity = self.uniforms.intensity(face_normal);
        }
        return self.uniforms.clip(position);
    }

    fn fragment(&self, _input: &FragmentInput) -> Fragment {
        return Fragment::Keep(self.tint.scale(self.face_intensity));
    }
}

/// Light intensity computed at the vertices and interpolated across the face.
pub struct GouraudShader<'a> {
    mesh: &'a dyn Mesh,
    uniforms: Uniforms,
    pub tint: Color,
    /// Posterizes the intensity into this many levels (toon shading).
    pub bands: Option<u32>,
    varying_intensity: Vector3<f32>,
}

impl<'a> GouraudShader<'a> {
    pub fn new(mesh: &'a dyn Mesh, context: &RenderContext, light_dir: Vector3<f32>) -> Self {
        return Self {
            mesh,
            uniforms: Uniforms::new(context, light_dir),
            tint: Color::WHITE,
            bands: None,
            varying_intensity: Vector3::zeros(),
        };
    }

    pub fn toon(mut self, bands: u32) -> Self {
        self.bands = Some(bands.max(1));
        return self;
    }
}

impl Shader for GouraudShader<'_> {
    fn vertex(&mut self, face: usize, nth_vertex: usize) -> Vector4<f32> {
        self.varying_intensity[nth_vertex] =
            self.uniforms.intensity(self.mesh.normal(face, nth_vertex));
        return self.uniforms.clip(self.mesh.position(face, nth_vertex));
    }

    fn fragment(&self, input: &FragmentInput) -> Fragment {
        let mut intensity = self.varying_intensity.dot(&input.bar);
        if let Some(bands) = self.bands {
            let bands = bands as f32;
            intensity = (intensity * bands).ceil() / bands;
        }
        return Fragment::Keep(self.tint.scale(intensity));
    }
}

/// Diffuse texture lit by the interpolated vertex normal.
pub struct TextureShader<'a> {
    mesh: &'a dyn Mesh,
    uniforms: Uniforms,
    diffuse: &'a dyn Sampler,
    varying_uv: Matrix2x3<f32>,
    varying_nrm: Matrix3<f32>,
}

impl<'a> TextureShader<'a> {
    pub fn new(
        mesh: &'a dyn Mesh,
        context: &RenderContext,
        light_dir: Vector3<f32>,
        diffuse: &'a dyn Sampler,
    ) -> Self {
        return Self {
            mesh,
            uniforms: Uniforms::new(context, light_dir),
            diffuse,
            varying_uv: Matrix2x3::zeros(),
            varying_nrm: Matrix3::zeros(),
        };
    }
}

impl Shader for TextureShader<'_> {
    fn vertex(&mut self, face: usize, nth_vertex: usize) -> Vector4<f32> {
        self.varying_uv.set_column(nth_vertex, &self.mesh.uv(face, nth_vertex));
        self.varying_nrm
            .set_column(nth_vertex, &self.uniforms.normal(self.mesh.normal(face, nth_vertex)));
        return self.uniforms.clip(self.mesh.position(face, nth_vertex));
    }

    fn fragment(&self, input: &FragmentInput) -> Fragment {
        let uv = self.varying_uv * input.bar;
        let normal = normalized_or(self.varying_nrm * input.bar, Vector3::z());
        let diffuse = normal.dot(&self.uniforms.light).max(0.0);
        return Fragment::Keep(self.diffuse.sample(uv).scale(diffuse));
    }
}

/// Per pixel normals with ambient, diffuse and specular terms.
pub struct PhongShader<'a> {
    mesh: &'a dyn Mesh,
    uniforms: Uniforms,
    diffuse: &'a dyn Sampler,
    /// Per texel shininess (red channel). Falls back to `shininess` when absent.
    specular: Option<&'a dyn Sampler>,
    pub shininess: f32,
    pub ambient: f32,
    pub specular_weight: f32,
    varying_uv: Matrix2x3<f32>,
    varying_nrm: Matrix3<f32>,
}

impl<'a> PhongShader<'a> {
    pub fn new(
        mesh: &'a dyn Mesh,
        context: &RenderContext,
        light_dir: Vector3<f32>,
        diffuse: &'a dyn Sampler,
        specular: Option<&'a dyn Sampler>,
    ) -> Self {
        return Self {
            mesh,
            uniforms: Uniforms::new(context, light_dir),
            diffuse,
            specular,
            shininess: 16.0,
            ambient: 0.02,
            specular_weight: 0.6,
            varying_uv: Matrix2x3::zeros(),
            varying_nrm: Matrix3::zeros(),
        };
    }
}

impl Shader for PhongShader<'_> {
    fn vertex(&mut self, face: usize, nth_vertex: usize) -> Vector4<f32> {
        self.varying_uv.set_column(nth_vertex, &self.mesh.uv(face, nth_vertex));
        self.varying_nrm
            .set_column(nth_vertex, &self.uniforms.normal(self.mesh.normal(face, nth_vertex)));
        return self.uniforms.clip(self.mesh.position(face, nth_vertex));
    }

    fn fragment(&self, input: &FragmentInput) -> Fragment {
        let uv = self.varying_uv * input.bar;
        let n = normalized_or(self.varying_nrm * input.bar, Vector3::z());
        let l = self.uniforms.light;
        let shininess = match self.specular {
            Some(map) => (map.sample(uv).r as f32).max(1.0),
            None => self.shininess,
        };
        // The camera looks down -z, so only the z of the reflection matters.
        let r = normalized_or(reflect(l, n), n);
        let specular = r.z.max(0.0).powf(shininess);
        let diffuse = n.dot(&l).max(0.0);
        let intensity = self.ambient + diffuse + self.specular_weight * specular;
        return Fragment::Keep(self.diffuse.sample(uv).scale(intensity));
    }
}

/// Normals read from a tangent space normal map, carried to clip space through the per pixel
/// Darboux frame.
pub struct NormalMapShader<'a> {
    mesh: &'a dyn Mesh,
    uniforms: Uniforms,
    diffuse: &'a dyn Sampler,
    normal_map: &'a dyn Sampler,
    varying_uv: Matrix2x3<f32>,
    varying_nrm: Matrix3<f32>,
    /// Normalized device coordinates of the vertices as columns.
    ndc_tri: Matrix3<f32>,
}

impl<'a> NormalMapShader<'a> {
    pub fn new(
        mesh: &'a dyn Mesh,
        context: &RenderContext,
        light_dir: Vector3<f32>,
        diffuse: &'a dyn Sampler,
        normal_map: &'a dyn Sampler,
    ) -> Self {
        return Self {
            mesh,
            uniforms: Uniforms::new(context, light_dir),
            diffuse,
            normal_map,
            varying_uv: Matrix2x3::zeros(),
            varying_nrm: Matrix3::zeros(),
            ndc_tri: Matrix3::zeros(),
        };
    }

    /// Shading normal at the interpolated uv. Falls back to the interpolated geometric normal when
    /// the triangle gives no usable tangent basis.
    fn shading_normal(&self, bar: Vector3<f32>) -> Vector3<f32> {
        let bn = normalized_or(self.varying_nrm * bar, Vector3::z());
        let uv = self.varying_uv * bar;

        let a = Matrix3::from_rows(&[
            (self.ndc_tri.column(1) - self.ndc_tri.column(0)).transpose(),
            (self.ndc_tri.column(2) - self.ndc_tri.column(0)).transpose(),
            bn.transpose(),
        ]);
        let ai = match a.try_inverse() {
            Some(ai) if ai.iter().all(|value| value.is_finite()) => ai,
            _ => return bn,
        };
        let i = ai * vector![
            self.varying_uv[(0, 1)] - self.varying_uv[(0, 0)],
            self.varying_uv[(0, 2)] - self.varying_uv[(0, 0)],
            0.0
        ];
        let j = ai * vector![
            self.varying_uv[(1, 1)] - self.varying_uv[(1, 0)],
            self.varying_uv[(1, 2)] - self.varying_uv[(1, 0)],
            0.0
        ];
        let (i, j) = match (i.try_normalize(f32::EPSILON), j.try_normalize(f32::EPSILON)) {
            (Some(i), Some(j)) => (i, j),
            _ => return bn,
        };
        let b = Matrix3::from_columns(&[i, j, bn]);
        return normalized_or(b * self.normal_map.sample_normal(uv), bn);
    }
}

impl Shader for NormalMapShader<'_> {
    fn vertex(&mut self, face: usize, nth_vertex: usize) -> Vector4<f32> {
        self.varying_uv.set_column(nth_vertex, &self.mesh.uv(face, nth_vertex));
        self.varying_nrm
            .set_column(nth_vertex, &self.uniforms.normal(self.mesh.normal(face, nth_vertex)));
        let clip = self.uniforms.clip(self.mesh.position(face, nth_vertex));
        let w = if clip.w.abs() > f32::EPSILON { clip.w } else { 1.0 };
        self.ndc_tri.set_column(nth_vertex, &(clip.xyz() / w));
        return clip;
    }

    fn fragment(&self, input: &FragmentInput) -> Fragment {
        let uv = self.varying_uv * input.bar;
        let n = self.shading_normal(input.bar);
        let diffuse = n.dot(&self.uniforms.light).max(0.0);
        return Fragment::Keep(self.diffuse.sample(uv).scale(diffuse));
    }
}

/// Writes depth only: the color is a grey level, brighter when closer. Never discards.
pub struct DepthShader<'a> {
    mesh: &'a dyn Mesh,
    m: Matrix4<f32>,
    depth: f32,
}

impl<'a> DepthShader<'a> {
    /// `depth` is the depth range of the context's viewport.
    pub fn new(mesh: &'a dyn Mesh, context: &RenderContext, depth: f32) -> Self {
        return Self { mesh, m: context.clip_transform(), depth };
    }
}

impl Shader for DepthShader<'_> {
    fn vertex(&mut self, face: usize, nth_vertex: usize) -> Vector4<f32> {
        return self.m * to_hom_point(self.mesh.position(face, nth_vertex));
    }

    fn fragment(&self, input: &FragmentInput) -> Fragment {
        let closeness = 1.0 - input.position.z / self.depth.max(f32::EPSILON);
        return Fragment::Keep(Color::grey((closeness * 255.0).clamp(0.0, 255.0) as u8));
    }
}

/// What the shadow test produces.
pub enum ShadowOutput<'a> {
    /// White where lit, black where occluded.
    Mask,
    /// Gouraud lit diffuse color, dimmed to `occluded` times its intensity in shadow.
    Lit { diffuse: &'a dyn Sampler, occluded: f32 },
}

/// Occluded fragments are dimmed to this fraction of their light.
pub const DEFAULT_OCCLUDED_INTENSITY: f32 = 0.3;

/// Single sample shadow test against a light space depth buffer.
pub struct ShadowShader<'a> {
    mesh: &'a dyn Mesh,
    uniforms: Uniforms,
    shadow_depth: &'a DepthBuffer,
    /// Camera screen to light screen.
    reprojection: Matrix4<f32>,
    /// Depth tolerance against self shadowing.
    pub bias: f32,
    output: ShadowOutput<'a>,
    varying_intensity: Vector3<f32>,
    varying_uv: Matrix2x3<f32>,
}

impl<'a> ShadowShader<'a> {
    /// None if the camera transform can not be inverted.
    pub fn new(
        mesh: &'a dyn Mesh,
        camera: &RenderContext,
        light_dir: Vector3<f32>,
        shadow_map: &'a ShadowMap,
        output: ShadowOutput<'a>,
    ) -> Option<Self> {
        let reprojection = shadow_map.reprojection(camera)?;
        return Some(Self {
            mesh,
            uniforms: Uniforms::new(camera, light_dir),
            shadow_depth: shadow_map.depth(),
            reprojection,
            bias: shadow_map.default_bias(),
            output,
            varying_intensity: Vector3::zeros(),
            varying_uv: Matrix2x3::zeros(),
        });
    }

    /// Whether the light reaches the fragment at a camera screen position.
    /// Anything reprojected outside of the shadow buffer counts as lit.
    fn is_lit(&self, position: Vector3<f32>) -> bool {
        let light_position = match transform_point(&self.reprojection, position) {
            Some(light_position) => light_position,
            None => return true,
        };
        let x = light_position.x.round();
        let y = light_position.y.round();
        let limit = i32::MAX as f32;
        if !x.is_finite() || !y.is_finite() || x.abs() > limit || y.abs() > limit {
            return true;
        }
        match self.shadow_depth.get(x as i32, y as i32) {
            Some(stored) => return light_position.z <= stored + self.bias,
            None => return true,
        }
    }
}

impl Shader for ShadowShader<'_> {
    fn vertex(&mut self, face: usize, nth_vertex: usize) -> Vector4<f32> {
        if let ShadowOutput::Lit { .. } = self.output {
            self.varying_intensity[nth_vertex] =
                self.uniforms.intensity(self.mesh.normal(face, nth_vertex));
            self.varying_uv.set_column(nth_vertex, &self.mesh.uv(face, nth_vertex));
        }
        return self.uniforms.clip(self.mesh.position(face, nth_vertex));
    }

    fn fragment(&self, input: &FragmentInput) -> Fragment {
        let lit = self.is_lit(input.position);
        match &self.output {
            ShadowOutput::Mask => {
                return Fragment::Keep(if lit { Color::WHITE } else { Color::BLACK });
            }
            ShadowOutput::Lit { diffuse, occluded } => {
                let shadow = if lit { 1.0 } else { *occluded };
                let uv = self.varying_uv * input.bar;
                let intensity = self.varying_intensity.dot(&input.bar) * shadow;
                return Fragment::Keep(diffuse.sample(uv).scale(intensity));
            }
        }
    }
}
