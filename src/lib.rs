//! Software rasterizer: transform, triangle rasterization and programmable shading on the CPU.

pub mod scene;
