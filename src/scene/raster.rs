//! Triangle rasterization with depth test and fragment shading.

use log::{debug, trace};
use nalgebra as na;
use na::{vector, Matrix4, Vector2, Vector3, Vector4};
use rayon::prelude::*;

use super::buffer::{DepthBuffer, FrameBuffer};
use super::shader::{Fragment, FragmentInput, Shader};
use super::transform::RenderContext;
use super::Color;

/// Triangles with twice the screen area below this are skipped as degenerate.
pub const DEGENERACY_EPSILON: f32 = 1e-2;

/// Bounding boxes with at least this many rows and pixels are shaded in parallel row bands.
const PARALLEL_ROWS: u32 = 16;
const PARALLEL_PIXELS: u64 = 64 * 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    #[default]
    None,
    /// Skip triangles wound clockwise on screen (y up).
    Back,
}

/// What happened to one triangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// Rasterized, `fragments` pixels were written.
    Drawn { fragments: usize },
    Culled,
    /// Zero area on screen, or a vertex at infinity.
    Degenerate,
    /// Bounding box entirely outside of the buffers.
    Offscreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawStats {
    pub faces: usize,
    pub drawn: usize,
    pub culled: usize,
    pub degenerate: usize,
    pub offscreen: usize,
    pub fragments: usize,
}

impl DrawStats {
    fn record(&mut self, coverage: Coverage) {
        match coverage {
            Coverage::Drawn { fragments } => {
                self.drawn += 1;
                self.fragments += fragments;
            }
            Coverage::Culled => self.culled += 1,
            Coverage::Degenerate => self.degenerate += 1,
            Coverage::Offscreen => self.offscreen += 1,
        }
    }
}

/// Barycentric coordinates of p in the triangle, None if the triangle is degenerate.
/// The vertices themselves get exactly (1, 0, 0), (0, 1, 0) and (0, 0, 1).
pub fn barycentric(pts: &[Vector2<f32>; 3], p: Vector2<f32>) -> Option<Vector3<f32>> {
    let [a, b, c] = pts;
    let raw_cross = vector![b.x - a.x, c.x - a.x, a.x - p.x]
        .cross(&vector![b.y - a.y, c.y - a.y, a.y - p.y]);
    if raw_cross.z.abs() < DEGENERACY_EPSILON {
        return None;
    }
    return Some(vector![
        1.0 - (raw_cross.x + raw_cross.y) / raw_cross.z,
        raw_cross.x / raw_cross.z,
        raw_cross.y / raw_cross.z
    ]);
}

/// Twice the signed screen area, positive for counter clockwise triangles.
fn signed_double_area(pts: &[Vector2<f32>; 3]) -> f32 {
    let [a, b, c] = pts;
    return (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y);
}

/// Triangle after viewport transform and perspective divide.
#[derive(Debug, Clone, Copy)]
struct ScreenTriangle {
    pts: [Vector2<f32>; 3],
    /// Screen depth of every vertex.
    z: Vector3<f32>,
    /// Clip space w of every vertex.
    w: Vector3<f32>,
}

impl ScreenTriangle {
    fn new(viewport: &Matrix4<f32>, clip: &[Vector4<f32>; 3]) -> Option<Self> {
        let mut pts = [Vector2::zeros(); 3];
        let mut z = Vector3::zeros();
        let mut w = Vector3::zeros();
        for i in 0..3 {
            let screen = viewport * clip[i];
            if screen.w.abs() < f32::EPSILON {
                return None;
            }
            let projected = screen / screen.w;
            if !projected.iter().all(|value| value.is_finite()) {
                return None;
            }
            pts[i] = projected.xy();
            z[i] = projected.z;
            w[i] = clip[i].w;
        }
        return Some(Self { pts, z, w });
    }

    /// Weights for varyings: screen weights divided by w and renormalized.
    fn perspective_correct(&self, screen_bar: Vector3<f32>) -> Vector3<f32> {
        let bar = screen_bar.component_div(&self.w);
        let sum = bar.x + bar.y + bar.z;
        if sum.abs() < f32::EPSILON || !sum.is_finite() {
            return screen_bar;
        }
        return bar / sum;
    }
}

/// Inclusive pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BoundingBox {
    x_min: u32,
    y_min: u32,
    x_max: u32,
    y_max: u32,
}

impl BoundingBox {
    /// Bounding box of the triangle clipped to [0, width - 1] x [0, height - 1].
    fn clipped(pts: &[Vector2<f32>; 3], width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let min_x = pts.iter().map(|p| p.x).fold(f32::INFINITY, f32::min).floor().max(0.0);
        let min_y = pts.iter().map(|p| p.y).fold(f32::INFINITY, f32::min).floor().max(0.0);
        let max_x = pts
            .iter()
            .map(|p| p.x)
            .fold(f32::NEG_INFINITY, f32::max)
            .ceil()
            .min((width - 1) as f32);
        let max_y = pts
            .iter()
            .map(|p| p.y)
            .fold(f32::NEG_INFINITY, f32::max)
            .ceil()
            .min((height - 1) as f32);
        if min_x > max_x || min_y > max_y {
            return None;
        }
        return Some(Self {
            x_min: min_x as u32,
            y_min: min_y as u32,
            x_max: max_x as u32,
            y_max: max_y as u32,
        });
    }

    fn rows(&self) -> u32 {
        return self.y_max - self.y_min + 1;
    }

    fn pixels(&self) -> u64 {
        return (self.x_max - self.x_min + 1) as u64 * self.rows() as u64;
    }
}

/// Shades one row of the bounding box. Returns the number of pixels written.
fn shade_row<S: Shader + ?Sized>(
    triangle: &ScreenTriangle,
    bbox: &BoundingBox,
    shader: &S,
    y: u32,
    colors: &mut [Color],
    depths: &mut [f32],
) -> usize {
    let mut fragments = 0;
    for x in bbox.x_min..=bbox.x_max {
        let p = vector![x as f32, y as f32];
        let screen_bar = match barycentric(&triangle.pts, p) {
            Some(screen_bar) => screen_bar,
            None => return fragments,
        };
        if screen_bar.x < 0.0 || screen_bar.y < 0.0 || screen_bar.z < 0.0 {
            // If any of the coordinates are negative, point is not in the triangle.
            continue;
        }
        let depth = screen_bar.dot(&triangle.z);
        let index = x as usize;
        // Strictly closer only, NaN never passes.
        if !(depth < depths[index]) {
            continue;
        }
        let input = FragmentInput {
            bar: triangle.perspective_correct(screen_bar),
            screen_bar,
            position: vector![x as f32, y as f32, depth],
        };
        if let Fragment::Keep(color) = shader.fragment(&input) {
            colors[index] = color;
            depths[index] = depth;
            fragments += 1;
        }
    }
    return fragments;
}

/// Fills triangles into a frame and depth buffer pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rasterizer {
    viewport: Matrix4<f32>,
    pub cull: CullMode,
    /// Whether large triangles are shaded in parallel row bands.
    pub parallel: bool,
}

impl Rasterizer {
    /// Rasterizer using the viewport of the context.
    pub fn new(context: &RenderContext) -> Self {
        return Self { viewport: context.viewport, cull: CullMode::None, parallel: true };
    }

    pub fn with_cull(mut self, cull: CullMode) -> Self {
        self.cull = cull;
        return self;
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        return self;
    }

    /// Rasterizes one triangle given by its clip space vertices.
    pub fn triangle<S: Shader + ?Sized>(
        &self,
        clip: &[Vector4<f32>; 3],
        shader: &S,
        frame: &mut FrameBuffer,
        depth: &mut DepthBuffer,
    ) -> Coverage {
        let triangle = match ScreenTriangle::new(&self.viewport, clip) {
            Some(triangle) => triangle,
            None => return Coverage::Degenerate,
        };
        let area = signed_double_area(&triangle.pts);
        if area.abs() < DEGENERACY_EPSILON {
            return Coverage::Degenerate;
        }
        if self.cull == CullMode::Back && area < 0.0 {
            return Coverage::Culled;
        }

        let width = frame.width().min(depth.width());
        let height = frame.height().min(depth.height());
        let bbox = match BoundingBox::clipped(&triangle.pts, width, height) {
            Some(bbox) => bbox,
            None => return Coverage::Offscreen,
        };

        let frame_width = frame.width() as usize;
        let depth_width = depth.width() as usize;
        let color_rows = frame.rows_mut(bbox.y_min, bbox.y_max);
        let depth_rows = depth.rows_mut(bbox.y_min, bbox.y_max);
        let parallel =
            self.parallel && bbox.rows() >= PARALLEL_ROWS && bbox.pixels() >= PARALLEL_PIXELS;
        let fragments = if parallel {
            color_rows
                .par_chunks_mut(frame_width)
                .zip(depth_rows.par_chunks_mut(depth_width))
                .enumerate()
                .map(|(row, (colors, depths))| {
                    shade_row(&triangle, &bbox, shader, bbox.y_min + row as u32, colors, depths)
                })
                .sum()
        } else {
            color_rows
                .chunks_mut(frame_width)
                .zip(depth_rows.chunks_mut(depth_width))
                .enumerate()
                .map(|(row, (colors, depths))| {
                    shade_row(&triangle, &bbox, shader, bbox.y_min + row as u32, colors, depths)
                })
                .sum()
        };
        return Coverage::Drawn { fragments };
    }

    /// Runs the vertex stage for every face and rasterizes the result.
    pub fn draw<S: Shader + ?Sized>(
        &self,
        face_count: usize,
        shader: &mut S,
        frame: &mut FrameBuffer,
        depth: &mut DepthBuffer,
    ) -> DrawStats {
        let mut stats = DrawStats { faces: face_count, ..Default::default() };
        for face in 0..face_count {
            let clip = [shader.vertex(face, 0), shader.vertex(face, 1), shader.vertex(face, 2)];
            let coverage = self.triangle(&clip, &*shader, frame, depth);
            if coverage == Coverage::Degenerate {
                trace!("Skipping degenerate face {face}");
            }
            stats.record(coverage);
        }
        debug!(
            "Drew {} of {} faces ({} culled, {} degenerate, {} offscreen), {} fragments",
            stats.drawn,
            stats.faces,
            stats.culled,
            stats.degenerate,
            stats.offscreen,
            stats.fragments
        );
        return stats;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Shader with fixed screen space triangles, one color per face.
    struct Preset {
        triangles: Vec<[Vector4<f32>; 3]>,
        colors: Vec<Color>,
        discard: bool,
        current: Color,
        vertex_calls: Vec<(usize, usize)>,
        fragments: Mutex<Vec<FragmentInput>>,
    }

    impl Preset {
        fn new(triangles: Vec<[Vector3<f32>; 3]>, colors: Vec<Color>) -> Self {
            let triangles = triangles
                .iter()
                .map(|t| [t[0].push(1.0), t[1].push(1.0), t[2].push(1.0)])
                .collect();
            return Self {
                triangles,
                colors,
                discard: false,
                current: Color::BLACK,
                vertex_calls: Vec::new(),
                fragments: Mutex::new(Vec::new()),
            };
        }
    }

    impl Shader for Preset {
        fn vertex(&mut self, face: usize, nth_vertex: usize) -> Vector4<f32> {
            self.vertex_calls.push((face, nth_vertex));
            self.current = self.colors[face];
            return self.triangles[face][nth_vertex];
        }

        fn fragment(&self, input: &FragmentInput) -> Fragment {
            self.fragments.lock().unwrap().push(*input);
            if self.discard {
                return Fragment::Discard;
            }
            return Fragment::Keep(self.current);
        }
    }

    /// Identity viewport: clip coordinates are pixel coordinates.
    fn rasterizer() -> Rasterizer {
        return Rasterizer::new(&RenderContext::new());
    }

    fn buffers(width: u32, height: u32) -> (FrameBuffer, DepthBuffer) {
        return (FrameBuffer::new(width, height), DepthBuffer::new(width, height));
    }

    const RED: Color = Color::new(255, 0, 0);
    const BLUE: Color = Color::new(0, 0, 255);

    #[test]
    fn test_barycentric_partition() {
        let pts = [vector![1.0, 1.0], vector![30.0, 4.0], vector![10.0, 25.0]];
        for p in [vector![10.0, 8.0], vector![13.7, 10.2], vector![20.0, 6.0]] {
            let bar = barycentric(&pts, p).unwrap();
            assert!(bar.iter().all(|w| *w >= 0.0), "{bar:?}");
            assert!((bar.sum() - 1.0).abs() < 1e-5);
        }
        assert_eq!(barycentric(&pts, pts[0]), Some(vector![1.0, 0.0, 0.0]));
        assert_eq!(barycentric(&pts, pts[1]), Some(vector![0.0, 1.0, 0.0]));
        assert_eq!(barycentric(&pts, pts[2]), Some(vector![0.0, 0.0, 1.0]));
        let outside = barycentric(&pts, vector![0.0, 30.0]).unwrap();
        assert!(outside.iter().any(|w| *w < 0.0));
    }

    #[test]
    fn test_barycentric_degenerate() {
        let line = [vector![1.0, 5.0], vector![8.0, 5.0], vector![20.0, 5.0]];
        assert_eq!(barycentric(&line, vector![4.0, 5.0]), None);
        let point = [vector![3.0, 3.0]; 3];
        assert_eq!(barycentric(&point, vector![3.0, 3.0]), None);
    }

    #[test]
    fn test_vertex_stage_order() {
        let tri = [vector![0.0, 0.0, 1.0], vector![4.0, 0.0, 1.0], vector![0.0, 4.0, 1.0]];
        let mut shader = Preset::new(vec![tri, tri], vec![RED, BLUE]);
        let (mut frame, mut depth) = buffers(8, 8);
        let stats = rasterizer().draw(2, &mut shader, &mut frame, &mut depth);
        assert_eq!(shader.vertex_calls, vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);
        assert_eq!(stats.faces, 2);
        assert_eq!(stats.drawn, 2);
        // Same depth: the second triangle loses every tie.
        assert_eq!(frame.get(1, 1), Some(RED));
    }

    #[test]
    fn test_fills_covered_pixels_only() {
        let tri = [vector![0.0, 0.0, 1.0], vector![4.0, 0.0, 1.0], vector![0.0, 4.0, 1.0]];
        let mut shader = Preset::new(vec![tri], vec![RED]);
        let (mut frame, mut depth) = buffers(8, 8);
        let stats = rasterizer().draw(1, &mut shader, &mut frame, &mut depth);
        // Pixels with x + y <= 4, edges included.
        assert_eq!(stats.fragments, 15);
        assert_eq!(frame.get(0, 4), Some(RED));
        assert_eq!(frame.get(2, 2), Some(RED));
        assert_eq!(frame.get(3, 2), Some(Color::BLACK));
        assert_eq!(depth.get(1, 1), Some(1.0));
        assert_eq!(depth.get(4, 4), Some(f32::INFINITY));
        assert_eq!(shader.fragments.lock().unwrap().len(), 15);
    }

    #[test]
    fn test_depth_order_independence() {
        let near = [vector![0.0, 0.0, 2.0], vector![12.0, 0.0, 2.0], vector![0.0, 12.0, 2.0]];
        let far = [vector![2.0, 2.0, 7.0], vector![15.0, 2.0, 3.0], vector![2.0, 15.0, 9.0]];

        let mut near_first = Preset::new(vec![near, far], vec![RED, BLUE]);
        let (mut frame_a, mut depth_a) = buffers(16, 16);
        rasterizer().draw(2, &mut near_first, &mut frame_a, &mut depth_a);

        let mut far_first = Preset::new(vec![far, near], vec![BLUE, RED]);
        let (mut frame_b, mut depth_b) = buffers(16, 16);
        rasterizer().draw(2, &mut far_first, &mut frame_b, &mut depth_b);

        assert_eq!(frame_a, frame_b);
        assert_eq!(depth_a, depth_b);
        // Overlap goes to the closer triangle, the rest to whoever covers it.
        assert_eq!(frame_a.get(3, 3), Some(RED));
        assert_eq!(depth_a.get(3, 3), Some(2.0));
        assert_eq!(frame_a.get(8, 8), Some(BLUE));
        assert!(depth_a.get(8, 8).unwrap() > 2.0);
    }

    #[test]
    fn test_degenerate_triangles_write_nothing() {
        let flat = [vector![1.0, 3.0, 1.0], vector![6.0, 3.0, 1.0], vector![9.0, 3.0, 1.0]];
        let point = [vector![4.0, 4.0, 1.0]; 3];
        let mut shader = Preset::new(vec![flat, point], vec![RED, RED]);
        let (mut frame, mut depth) = buffers(10, 10);
        let stats = rasterizer().draw(2, &mut shader, &mut frame, &mut depth);
        assert_eq!(stats.degenerate, 2);
        assert_eq!(stats.fragments, 0);
        assert_eq!(frame, FrameBuffer::new(10, 10));
        assert_eq!(depth, DepthBuffer::new(10, 10));
        assert!(shader.fragments.lock().unwrap().is_empty());
    }

    #[test]
    fn test_discard_leaves_buffers_unchanged() {
        let tri = [vector![0.0, 0.0, 1.0], vector![9.0, 0.0, 1.0], vector![0.0, 9.0, 1.0]];
        let mut shader = Preset::new(vec![tri], vec![RED]);
        shader.discard = true;
        let (mut frame, mut depth) = buffers(10, 10);
        frame.set(0, 0, BLUE);
        depth.set(9, 9, 4.0);
        let (frame_before, depth_before) = (frame.clone(), depth.clone());
        let stats = rasterizer().draw(1, &mut shader, &mut frame, &mut depth);
        assert_eq!(stats.fragments, 0);
        assert!(!shader.fragments.lock().unwrap().is_empty());
        assert_eq!(frame, frame_before);
        assert_eq!(depth, depth_before);
    }

    #[test]
    fn test_bounding_box_is_clipped() {
        let huge =
            [vector![-50.0, -50.0, 1.0], vector![100.0, -50.0, 1.0], vector![-50.0, 100.0, 1.0]];
        let mut shader = Preset::new(vec![huge], vec![RED]);
        let (mut frame, mut depth) = buffers(6, 5);
        let stats = rasterizer().draw(1, &mut shader, &mut frame, &mut depth);
        assert_eq!(stats.fragments, 30);
        assert!(frame.as_slice().iter().all(|c| *c == RED));

        let away = [vector![20.0, 20.0, 1.0], vector![30.0, 20.0, 1.0], vector![20.0, 30.0, 1.0]];
        let mut shader = Preset::new(vec![away], vec![RED]);
        let stats = rasterizer().draw(1, &mut shader, &mut frame, &mut depth);
        assert_eq!(stats.offscreen, 1);
    }

    #[test]
    fn test_back_face_culling() {
        let ccw = [vector![0.0, 0.0, 1.0], vector![5.0, 0.0, 1.0], vector![0.0, 5.0, 1.0]];
        let cw = [ccw[0], ccw[2], ccw[1]];
        let mut shader = Preset::new(vec![ccw, cw], vec![RED, BLUE]);
        let (mut frame, mut depth) = buffers(8, 8);
        let stats = rasterizer()
            .with_cull(CullMode::Back)
            .draw(2, &mut shader, &mut frame, &mut depth);
        assert_eq!(stats.drawn, 1);
        assert_eq!(stats.culled, 1);

        // Without culling both windings fill the same pixels.
        let mut shader = Preset::new(vec![cw], vec![BLUE]);
        let (mut frame, mut depth) = buffers(8, 8);
        rasterizer().draw(1, &mut shader, &mut frame, &mut depth);
        assert_eq!(frame.get(1, 1), Some(BLUE));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        struct Gradient;
        impl Shader for Gradient {
            fn vertex(&mut self, _face: usize, nth_vertex: usize) -> Vector4<f32> {
                let pts = [
                    vector![3.0, 5.0, 1.0, 1.0],
                    vector![190.0, 20.0, 5.0, 1.0],
                    vector![40.0, 170.0, 9.0, 1.0],
                ];
                return pts[nth_vertex];
            }
            fn fragment(&self, input: &FragmentInput) -> Fragment {
                let bar = input.bar * 255.0;
                return Fragment::Keep(Color::new(bar.x as u8, bar.y as u8, bar.z as u8));
            }
        }
        let (mut frame_a, mut depth_a) = buffers(200, 180);
        let (mut frame_b, mut depth_b) = buffers(200, 180);
        let parallel = rasterizer().draw(1, &mut Gradient, &mut frame_a, &mut depth_a);
        let sequential =
            rasterizer().sequential().draw(1, &mut Gradient, &mut frame_b, &mut depth_b);
        assert!(parallel.fragments > 10_000);
        assert_eq!(parallel, sequential);
        assert_eq!(frame_a, frame_b);
        assert_eq!(depth_a, depth_b);
    }

    #[test]
    fn test_perspective_correct_weights() {
        // Second and third vertex twice as far away (w = 2) as the first one.
        let clip = [
            vector![0.0, 0.0, 1.0, 1.0],
            vector![16.0, 0.0, 2.0, 2.0],
            vector![0.0, 16.0, 2.0, 2.0],
        ];
        let shader = Preset::new(vec![], vec![]);
        let (mut frame, mut depth) = buffers(10, 10);
        rasterizer().triangle(&clip, &shader, &mut frame, &mut depth);
        let fragments = shader.fragments.lock().unwrap();
        let at = fragments.iter().find(|f| f.position.xy() == vector![4.0, 0.0]).unwrap();
        assert!((at.screen_bar - vector![0.5, 0.5, 0.0]).norm() < 1e-5);
        // Screen weights divided by w: (0.5, 0.25, 0) renormalized.
        assert!((at.bar - vector![2.0 / 3.0, 1.0 / 3.0, 0.0]).norm() < 1e-5);
        for fragment in fragments.iter() {
            assert!((fragment.bar.sum() - 1.0).abs() < 1e-5);
        }
    }
}
