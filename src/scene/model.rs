//! Geometry and texture sources consumed by the shaders.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use log::{info, warn};
use nalgebra as na;
use na::{vector, Vector2, Vector3};
use obj::{load_obj, Obj, TexturedVertex};

use super::Color;

/// Triangulated mesh, addressed by face and vertex number inside the face.
pub trait Mesh: Sync {
    fn face_count(&self) -> usize;
    fn position(&self, face: usize, nth_vertex: usize) -> Vector3<f32>;
    fn uv(&self, face: usize, nth_vertex: usize) -> Vector2<f32>;
    fn normal(&self, face: usize, nth_vertex: usize) -> Vector3<f32>;
}

/// Anything that gives a color for a texture coordinate.
pub trait Sampler: Sync {
    fn sample(&self, uv: Vector2<f32>) -> Color;

    /// Sample decoded as a normal: each channel mapped from [0, 255] to [-1, 1].
    fn sample_normal(&self, uv: Vector2<f32>) -> Vector3<f32> {
        let color = self.sample(uv);
        return vector![color.r as f32, color.g as f32, color.b as f32] * (2.0 / 255.0)
            - vector![1.0, 1.0, 1.0];
    }
}

/// A solid color samples the same everywhere.
impl Sampler for Color {
    fn sample(&self, _uv: Vector2<f32>) -> Color {
        return *self;
    }
}

/// Indexed triangle list. Positions, uvs and normals share one index per vertex.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub positions: Vec<Vector3<f32>>,
    pub uvs: Vec<Vector2<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub faces: Vec<[usize; 3]>,
}

impl MeshData {
    /// Adds a triangle with its own three vertices, normals set to the face normal.
    pub fn push_triangle(&mut self, vertices: [Vector3<f32>; 3], uvs: [Vector2<f32>; 3]) {
        let normal = (vertices[1] - vertices[0])
            .cross(&(vertices[2] - vertices[0]))
            .try_normalize(f32::EPSILON)
            .unwrap_or(vector![0.0, 0.0, 1.0]);
        let first = self.positions.len();
        for i in 0..3 {
            self.positions.push(vertices[i]);
            self.uvs.push(uvs[i]);
            self.normals.push(normal);
        }
        self.faces.push([first, first + 1, first + 2]);
    }

    fn vertex_index(&self, face: usize, nth_vertex: usize) -> usize {
        return self.faces[face][nth_vertex];
    }
}

impl Mesh for MeshData {
    fn face_count(&self) -> usize {
        return self.faces.len();
    }

    fn position(&self, face: usize, nth_vertex: usize) -> Vector3<f32> {
        return self.positions[self.vertex_index(face, nth_vertex)];
    }

    fn uv(&self, face: usize, nth_vertex: usize) -> Vector2<f32> {
        return self.uvs
            .get(self.vertex_index(face, nth_vertex))
            .copied()
            .unwrap_or_else(Vector2::zeros);
    }

    fn normal(&self, face: usize, nth_vertex: usize) -> Vector3<f32> {
        return self.normals
            .get(self.vertex_index(face, nth_vertex))
            .copied()
            .unwrap_or(vector![0.0, 0.0, 1.0]);
    }
}

/// Image texture. Coordinates are clamped to [0, 1], v = 0 is the bottom row of the image.
pub struct Texture {
    image: RgbImage,
}

impl Texture {
    pub fn new(image: RgbImage) -> Self {
        return Self { image };
    }

    pub fn load(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("failed to read texture {}", path.display()))?
            .to_rgb8();
        return Ok(Self::new(image));
    }
}

impl Sampler for Texture {
    fn sample(&self, uv: Vector2<f32>) -> Color {
        if self.image.width() == 0 || self.image.height() == 0 {
            return Color::BLACK;
        }
        let max_x = self.image.width() - 1;
        let max_y = self.image.height() - 1;
        let u = if uv.x.is_finite() { uv.x.clamp(0.0, 1.0) } else { 0.0 };
        let v = if uv.y.is_finite() { uv.y.clamp(0.0, 1.0) } else { 0.0 };
        let x = ((u * self.image.width() as f32) as u32).min(max_x);
        let y = (((1.0 - v) * self.image.height() as f32) as u32).min(max_y);
        return (*self.image.get_pixel(x, y)).into();
    }
}

/// Mesh loaded from an obj file together with the texture maps found next to it.
pub struct Model {
    pub mesh: MeshData,
    pub diffuse: Option<Texture>,
    /// Tangent space normal map.
    pub normal_map: Option<Texture>,
    pub specular: Option<Texture>,
}

impl Model {
    /// Loads `<prefix>.obj` and, when present, `<prefix>_diffuse.tga`, `<prefix>_nm_tangent.tga`
    /// and `<prefix>_spec.tga`.
    pub fn load(prefix: &str) -> Result<Self> {
        let obj_path = format!("{prefix}.obj");
        let file = File::open(&obj_path).with_context(|| format!("failed to open {obj_path}"))?;
        let obj: Obj<TexturedVertex, u32> = load_obj(BufReader::new(file))
            .with_context(|| format!("failed to parse {obj_path}"))?;
        let mesh = mesh_from_obj(&obj);
        info!("Number of vertices - {}", mesh.positions.len());
        info!("Number of faces    - {}", mesh.faces.len());

        return Ok(Self {
            mesh,
            diffuse: load_optional_texture(&format!("{prefix}_diffuse.tga")),
            normal_map: load_optional_texture(&format!("{prefix}_nm_tangent.tga")),
            specular: load_optional_texture(&format!("{prefix}_spec.tga")),
        });
    }

    /// Diffuse map, or plain white if the model has none.
    pub fn diffuse_sampler(&self) -> &dyn Sampler {
        return match &self.diffuse {
            Some(texture) => texture as &dyn Sampler,
            None => &Color::WHITE,
        };
    }

    /// Normal map, or one encoding the unperturbed tangent space normal (0, 0, 1).
    pub fn normal_sampler(&self) -> &dyn Sampler {
        const FLAT_NORMAL: Color = Color::new(128, 128, 255);
        return match &self.normal_map {
            Some(texture) => texture as &dyn Sampler,
            None => &FLAT_NORMAL,
        };
    }

    pub fn specular_sampler(&self) -> Option<&dyn Sampler> {
        return self.specular.as_ref().map(|texture| texture as &dyn Sampler);
    }
}

fn mesh_from_obj(obj: &Obj<TexturedVertex, u32>) -> MeshData {
    let positions = obj.vertices.iter().map(|v| Vector3::from(v.position)).collect();
    let uvs = obj.vertices.iter().map(|v| vector![v.texture[0], v.texture[1]]).collect();
    let normals = obj.vertices.iter().map(|v| Vector3::from(v.normal)).collect();
    let faces = obj
        .indices
        .chunks_exact(3)
        .map(|face| [face[0] as usize, face[1] as usize, face[2] as usize])
        .collect();
    return MeshData { positions, uvs, normals, faces };
}

fn load_optional_texture(path: &str) -> Option<Texture> {
    let path = Path::new(path);
    if !path.exists() {
        warn!("No texture at {}, using a flat default", path.display());
        return None;
    }
    match Texture::load(path) {
        Ok(texture) => return Some(texture),
        Err(error) => {
            warn!("{error:#}");
            return None;
        }
    }
}
