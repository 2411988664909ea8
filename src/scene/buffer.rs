use image::{GrayImage, Luma, RgbImage};

use super::Color;

/// Fixed size 2D grid, stored row by row starting from y = 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer2d<T> {
    width: u32,
    height: u32,
    data: Vec<T>,
}

/// Color of every pixel of a frame.
pub type FrameBuffer = Buffer2d<Color>;

/// Per pixel depth, smaller is closer. Starts out at infinity.
pub type DepthBuffer = Buffer2d<f32>;

impl<T: Copy> Buffer2d<T> {
    /// Buffer of width * height cells, all set to value.
    pub fn filled(width: u32, height: u32, value: T) -> Self {
        let size = (width as usize) * (height as usize);
        return Self { width, height, data: vec![value; size] };
    }

    pub fn width(&self) -> u32 {
        return self.width;
    }

    pub fn height(&self) -> u32 {
        return self.height;
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        return Some(x as usize + y as usize * self.width as usize);
    }

    /// Value at (x, y), None outside of the buffer.
    pub fn get(&self, x: i32, y: i32) -> Option<T> {
        return self.index(x, y).map(|index| self.data[index]);
    }

    /// Sets value at (x, y). Returns false and does nothing outside of the buffer.
    pub fn set(&mut self, x: i32, y: i32, value: T) -> bool {
        match self.index(x, y) {
            Some(index) => {
                self.data[index] = value;
                return true;
            }
            None => return false,
        }
    }

    /// Resets every cell to value.
    pub fn fill(&mut self, value: T) {
        self.data.iter_mut().for_each(|cell| *cell = value);
    }

    pub fn as_slice(&self) -> &[T] {
        return &self.data[..];
    }

    /// Rows y_begin..=y_end as one mutable slice, row y_begin first.
    pub(crate) fn rows_mut(&mut self, y_begin: u32, y_end: u32) -> &mut [T] {
        let width = self.width as usize;
        return &mut self.data[y_begin as usize * width..(y_end as usize + 1) * width];
    }
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        return Self::filled(width, height, Color::BLACK);
    }

    /// Image with (0, 0) of the frame in the bottom left corner.
    pub fn to_image(&self) -> RgbImage {
        return RgbImage::from_fn(self.width, self.height, |x, y| {
            self.data[(x + (self.height - 1 - y) * self.width) as usize].into()
        });
    }
}

impl DepthBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        return Self::filled(width, height, f32::INFINITY);
    }

    /// Resets all depths to infinitely far.
    pub fn clear(&mut self) {
        self.fill(f32::INFINITY);
    }

    /// Range of the finite depth values, None if nothing was drawn.
    pub fn depth_range(&self) -> Option<(f32, f32)> {
        return self
            .data
            .iter()
            .filter(|depth| depth.is_finite())
            .fold(None, |range, &depth| match range {
                None => Some((depth, depth)),
                Some((min, max)) => Some((min.min(depth), max.max(depth))),
            });
    }

    /// Greyscale picture of the buffer: closest drawn depth is white, farthest is dark grey,
    /// untouched pixels are black. Bottom left origin as in FrameBuffer::to_image.
    pub fn to_image(&self) -> GrayImage {
        let (z_min, z_max) = self.depth_range().unwrap_or((0.0, 1.0));
        let scale = (z_max - z_min).max(f32::EPSILON);
        return GrayImage::from_fn(self.width, self.height, |x, y| {
            let depth = self.data[(x + (self.height - 1 - y) * self.width) as usize];
            if !depth.is_finite() {
                return Luma([0]);
            }
            let closeness = 1.0 - (depth - z_min) / scale;
            Luma([(32.0 + closeness * 223.0) as u8])
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_checked_access() {
        let mut frame = FrameBuffer::new(4, 3);
        assert!(frame.set(3, 2, Color::WHITE));
        assert_eq!(frame.get(3, 2), Some(Color::WHITE));
        assert!(!frame.set(4, 0, Color::WHITE));
        assert!(!frame.set(0, -1, Color::WHITE));
        assert_eq!(frame.get(0, 3), None);
        assert_eq!(frame.as_slice().iter().filter(|&&c| c == Color::WHITE).count(), 1);
    }

    #[test]
    fn test_depth_starts_infinitely_far() {
        let mut depth = DepthBuffer::new(2, 2);
        assert!(depth.as_slice().iter().all(|z| *z == f32::INFINITY));
        assert_eq!(depth.depth_range(), None);
        depth.set(1, 1, 5.0);
        depth.set(0, 1, 2.0);
        assert_eq!(depth.depth_range(), Some((2.0, 5.0)));
        depth.clear();
        assert_eq!(depth.get(1, 1), Some(f32::INFINITY));
    }

    #[test]
    fn test_to_image_flips_rows() {
        let mut frame = FrameBuffer::new(2, 2);
        frame.set(0, 0, Color::WHITE);
        let image = frame.to_image();
        assert_eq!(image.get_pixel(0, 1).0, [255, 255, 255]);
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn test_depth_image_closer_is_brighter() {
        let mut depth = DepthBuffer::new(3, 1);
        depth.set(0, 0, 1.0);
        depth.set(1, 0, 9.0);
        let image = depth.to_image();
        assert_eq!(image.get_pixel(0, 0).0, [255]);
        assert_eq!(image.get_pixel(1, 0).0, [32]);
        assert_eq!(image.get_pixel(2, 0).0, [0]);
    }

    #[test]
    fn test_rows_mut() {
        let mut depth = DepthBuffer::new(3, 4);
        let rows = depth.rows_mut(1, 2);
        assert_eq!(rows.len(), 6);
        rows[0] = 1.0;
        assert_eq!(depth.get(0, 1), Some(1.0));
    }
}
