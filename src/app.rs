use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time;

use anyhow::{anyhow, bail, Context, Result};
use image::{DynamicImage, RgbImage};
use log::{debug, info};
use nalgebra::Vector3;
use show_image::{create_window, event, ImageInfo, ImageView, WindowOptions};

use tiny_gl::scene::shader::{
    DepthShader, FlatShader, GouraudShader, NormalMapShader, PhongShader, ShadowOutput,
    ShadowShader, TextureShader, DEFAULT_OCCLUDED_INTENSITY,
};
use tiny_gl::scene::{
    CullMode, DepthBuffer, FrameBuffer, Mesh, Model, Rasterizer, RenderContext, Shader, ShadowMap,
};

const DEPTH: f32 = 255.0;
const EYE: [f32; 3] = [1.0, 1.0, 3.0];
const CENTER: [f32; 3] = [0.0, 0.0, 0.0];
const UP: [f32; 3] = [0.0, 1.0, 0.0];
const LIGHT_DIR: [f32; 3] = [1.0, 1.0, 1.0];
const TOON_BANDS: u32 = 6;

/// Shader pipeline used for the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    Flat,
    Gouraud,
    Toon,
    Texture,
    Phong,
    NormalMap,
    Depth,
    Shadow,
    ShadowMask,
}

impl Pipeline {
    const ALL: [(Pipeline, &'static str); 9] = [
        (Pipeline::Flat, "flat"),
        (Pipeline::Gouraud, "gouraud"),
        (Pipeline::Toon, "toon"),
        (Pipeline::Texture, "texture"),
        (Pipeline::Phong, "phong"),
        (Pipeline::NormalMap, "normal_map"),
        (Pipeline::Depth, "depth"),
        (Pipeline::Shadow, "shadow"),
        (Pipeline::ShadowMask, "shadow_mask"),
    ];

    fn name(self) -> &'static str {
        return Self::ALL
            .iter()
            .find(|(pipeline, _)| *pipeline == self)
            .map(|(_, name)| *name)
            .unwrap_or("unknown");
    }
}

impl FromStr for Pipeline {
    type Err = anyhow::Error;

    fn from_str(name: &str) -> Result<Self> {
        if let Some((pipeline, _)) = Self::ALL.iter().find(|(_, known)| *known == name) {
            return Ok(*pipeline);
        }
        let known: Vec<&str> = Self::ALL.iter().map(|(_, known)| *known).collect();
        bail!("unknown pipeline {name}, expected one of: {}", known.join(", "));
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(self.name());
    }
}

pub struct Params {
    pub width: u32,
    pub height: u32,
    /// Model path without extension, textures are looked up next to it.
    pub asset_path: String,
    pub pipeline: Pipeline,
    /// Image file to write instead of opening a window.
    pub output: Option<PathBuf>,
}

/// Helper, defining exit event to be an Escape key press.
fn is_exit_event(window_event: event::WindowEvent) -> bool {
    if let event::WindowEvent::KeyboardInput(event) = window_event {
        if event.input.key_code == Some(event::VirtualKeyCode::Escape)
            && event.input.state.is_released()
        {
            return true;
        }
    }

    return false;
}

/// Camera looking from `EYE` at `CENTER`, with the frame inset by an eighth on every side.
fn camera_context(width: u32, height: u32) -> RenderContext {
    let eye = Vector3::from(EYE);
    let center = Vector3::from(CENTER);
    let (w, h) = (width as f32, height as f32);

    let mut context = RenderContext::new();
    context
        .set_view(eye, center, Vector3::from(UP))
        .set_projection(-1.0 / (eye - center).norm())
        .set_viewport(w / 8.0, h / 8.0, w * 3.0 / 4.0, h * 3.0 / 4.0, DEPTH);
    debug!("Screen transform {}", context.screen_transform());
    return context;
}

fn draw<S: Shader>(
    rasterizer: &Rasterizer,
    mesh: &dyn Mesh,
    shader: &mut S,
    frame: &mut FrameBuffer,
    depth: &mut DepthBuffer,
) {
    let stats = rasterizer.draw(mesh.face_count(), shader, frame, depth);
    info!(
        "Drew {} of {} faces ({} culled, {} degenerate), {} fragments",
        stats.drawn, stats.faces, stats.culled, stats.degenerate, stats.fragments
    );
}

/// Renders one frame of the model with the chosen pipeline.
pub fn render(model: &Model, pipeline: Pipeline, width: u32, height: u32) -> Result<RgbImage> {
    let context = camera_context(width, height);
    let light_dir = Vector3::from(LIGHT_DIR);
    let mesh = &model.mesh;
    let rasterizer = Rasterizer::new(&context).with_cull(CullMode::Back);
    let mut frame = FrameBuffer::new(width, height);
    let mut depth = DepthBuffer::new(width, height);

    match pipeline {
        Pipeline::Flat => {
            let mut shader = FlatShader::new(mesh, &context, light_dir);
            draw(&rasterizer, mesh, &mut shader, &mut frame, &mut depth);
        }
        Pipeline::Gouraud => {
            let mut shader = GouraudShader::new(mesh, &context, light_dir);
            draw(&rasterizer, mesh, &mut shader, &mut frame, &mut depth);
        }
        Pipeline::Toon => {
            let mut shader = GouraudShader::new(mesh, &context, light_dir).toon(TOON_BANDS);
            draw(&rasterizer, mesh, &mut shader, &mut frame, &mut depth);
        }
        Pipeline::Texture => {
            let mut shader = TextureShader::new(mesh, &context, light_dir, model.diffuse_sampler());
            draw(&rasterizer, mesh, &mut shader, &mut frame, &mut depth);
        }
        Pipeline::Phong => {
            let mut shader = PhongShader::new(
                mesh,
                &context,
                light_dir,
                model.diffuse_sampler(),
                model.specular_sampler(),
            );
            draw(&rasterizer, mesh, &mut shader, &mut frame, &mut depth);
        }
        Pipeline::NormalMap => {
            let mut shader = NormalMapShader::new(
                mesh,
                &context,
                light_dir,
                model.diffuse_sampler(),
                model.normal_sampler(),
            );
            draw(&rasterizer, mesh, &mut shader, &mut frame, &mut depth);
        }
        Pipeline::Depth => {
            let mut shader = DepthShader::new(mesh, &context, DEPTH);
            draw(&rasterizer, mesh, &mut shader, &mut frame, &mut depth);
            // Normalized to the depths actually present, which shows more detail than the
            // shader's fixed range.
            return Ok(DynamicImage::ImageLuma8(depth.to_image()).to_rgb8());
        }
        Pipeline::Shadow | Pipeline::ShadowMask => {
            let center = Vector3::from(CENTER);
            let light = ShadowMap::light_context(light_dir, center, width, height, DEPTH);
            let shadow_map = ShadowMap::render(mesh, light, width, height, DEPTH);
            let output = match pipeline {
                Pipeline::ShadowMask => ShadowOutput::Mask,
                _ => ShadowOutput::Lit {
                    diffuse: model.diffuse_sampler(),
                    occluded: DEFAULT_OCCLUDED_INTENSITY,
                },
            };
            let mut shader = ShadowShader::new(mesh, &context, light_dir, &shadow_map, output)
                .context("camera transform is not invertible")?;
            draw(&rasterizer, mesh, &mut shader, &mut frame, &mut depth);
        }
    }

    return Ok(frame.to_image());
}

/// Shows the image in a window until Escape is pressed or the window is closed.
fn show(image: &RgbImage) -> Result<()> {
    let window_options: WindowOptions = WindowOptions {
        size: Some([image.width(), image.height()]),
        ..Default::default()
    };
    let window = create_window("output", window_options)
        .map_err(|error| anyhow!("failed to create window: {error}"))?;
    let image_data = ImageView::new(ImageInfo::rgb8(image.width(), image.height()), image.as_raw());
    window
        .set_image("image", image_data)
        .map_err(|error| anyhow!("failed to show image: {error}"))?;

    let event_channel = window
        .event_channel()
        .map_err(|error| anyhow!("failed to listen to window events: {error}"))?;
    for window_event in event_channel.iter() {
        if is_exit_event(window_event) {
            break;
        }
    }

    return Ok(());
}

/// Loads the model, renders a single frame and shows or saves it.
pub fn run(params: Params) -> Result<()> {
    let model = Model::load(&params.asset_path)?;

    let time_begin = time::Instant::now();
    let image = render(&model, params.pipeline, params.width, params.height)?;
    info!(
        "Rendered {} pipeline at {}x{} in {:.1} ms",
        params.pipeline,
        params.width,
        params.height,
        time_begin.elapsed().as_secs_f32() * 1000.0
    );

    match &params.output {
        Some(path) => {
            image
                .save(path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Saved {}", path.display());
        }
        None => show(&image)?,
    }

    return Ok(());
}
