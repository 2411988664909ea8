pub mod buffer;
pub mod model;
pub mod raster;
pub mod shader;
pub mod shadow;
pub mod transform;
pub mod util;

pub use buffer::{Buffer2d, DepthBuffer, FrameBuffer};
pub use model::{Mesh, MeshData, Model, Sampler, Texture};
pub use raster::{CullMode, DrawStats, Rasterizer};
pub use shader::{Fragment, FragmentInput, Shader};
pub use shadow::ShadowMap;
pub use transform::RenderContext;

use image::Rgb;

/// Struct, representing raw rgb8 pixel data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255 };
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Color {
        return Color { r, g, b };
    }

    /// Grey level with all three channels equal.
    pub const fn grey(level: u8) -> Color {
        return Color { r: level, g: level, b: level };
    }

    /// Get convex combination of two colors: t * c_1 + (1 - t) * c_2.
    /// t is unrestricted, channels saturate at 0 and 255.
    pub fn blend(color_1: Color, color_2: Color, t: f32) -> Color {
        fn mix(a: u8, b: u8, t: f32) -> u8 {
            return (t * a as f32 + (1.0 - t) * b as f32).clamp(0.0, 255.0) as u8;
        }
        return Color {
            r: mix(color_1.r, color_2.r, t),
            g: mix(color_1.g, color_2.g, t),
            b: mix(color_1.b, color_2.b, t),
        };
    }

    /// Color multiplied by a light intensity. Negative intensities give black.
    pub fn scale(self, intensity: f32) -> Color {
        return Color::blend(self, Color::BLACK, intensity.max(0.0));
    }
}

impl From<Color> for Rgb<u8> {
    fn from(color: Color) -> Self {
        return Rgb([color.r, color.g, color.b]);
    }
}

impl From<Rgb<u8>> for Color {
    fn from(pixel: Rgb<u8>) -> Self {
        return Color { r: pixel.0[0], g: pixel.0[1], b: pixel.0[2] };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_blend() {
        let color = Color::blend(Color::WHITE, Color::BLACK, 0.5);
        assert_eq!(color, Color::grey(127));
    }

    #[test]
    fn test_color_scale_saturates() {
        assert_eq!(Color::new(200, 100, 0).scale(2.0), Color::new(255, 200, 0));
        assert_eq!(Color::WHITE.scale(-1.0), Color::BLACK);
    }
}
