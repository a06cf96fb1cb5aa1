//! kiln - drives the renderer for a fixed number of offscreen frames.
//!
//! Environment:
//! - `KILN_FRAMES`: frames to render (default 120)
//! - `KILN_BACKEND`: `headless` (default) or `vulkan`
//! - `KILN_VS`, `KILN_PS`: SPIR-V for the default materials, required by the
//!   Vulkan backend
//! - `RUST_LOG`: log filter

use std::time::Duration;

use anyhow::{Context, Result};
use glam::{Mat4, Vec2, Vec3, Vec4};
use tracing::{info, warn};

use kiln_core::RendererConfig;
use kiln_renderer::{
    Camera, DefaultMaterials, MaterialConfig, Renderer, ShaderSource, TextureCreateInfo, VertexPcu,
};
use kiln_rhi::headless::HeadlessDevice;
use kiln_rhi::vulkan::VulkanDevice;
use kiln_rhi::{RenderDevice, SamplerMode, SurfaceDesc, TextureFormat, VertexLayout};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const DEFAULT_FRAMES: u64 = 120;

/// Placeholder bytecode for backends that never compile it.
const HEADLESS_BYTECODE: [u8; 4] = [0x03, 0x02, 0x23, 0x07];

fn env_frames() -> Result<u64> {
    match std::env::var("KILN_FRAMES") {
        Ok(value) => value.parse().map_err(|_| {
            kiln_core::Error::InvalidEnv {
                name: "KILN_FRAMES",
                value,
            }
            .into()
        }),
        Err(_) => Ok(DEFAULT_FRAMES),
    }
}

fn load_spirv(var: &'static str) -> Result<Vec<u8>> {
    let path = std::env::var(var).with_context(|| format!("{var} must point to SPIR-V"))?;
    std::fs::read(&path).with_context(|| format!("reading {path}"))
}

fn default_materials(vertex: Vec<u8>, pixel: Vec<u8>) -> DefaultMaterials {
    let shader = ShaderSource {
        name: "default".into(),
        vertex,
        pixel,
        vertex_layout: VertexLayout::Pcu,
    };
    DefaultMaterials {
        orthographic: MaterialConfig::unlit_2d("default 2d", shader.clone()),
        perspective: MaterialConfig::opaque_3d("default 3d", shader),
    }
}

fn checkerboard(size: u32) -> Vec<u8> {
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            if (x + y) % 2 == 0 { [255, 255, 255, 255] } else { [40, 40, 40, 255] }
        })
        .collect()
}

fn quad(min: Vec2, max: Vec2) -> ([VertexPcu; 4], [u32; 6]) {
    let white = [255, 255, 255, 255];
    let vertices = [
        VertexPcu::new(min.extend(0.0), white, Vec2::new(0.0, 1.0)),
        VertexPcu::new(Vec3::new(max.x, min.y, 0.0), white, Vec2::new(1.0, 1.0)),
        VertexPcu::new(max.extend(0.0), white, Vec2::new(1.0, 0.0)),
        VertexPcu::new(Vec3::new(min.x, max.y, 0.0), white, Vec2::new(0.0, 0.0)),
    ];
    (vertices, [0, 1, 2, 0, 2, 3])
}

fn run<D: RenderDevice>(device: D, defaults: DefaultMaterials, frames: u64) -> Result<()> {
    let config = RendererConfig::default().with_fence_timeout(Duration::from_secs(2));
    let surface = device.create_surface(&SurfaceDesc {
        width: WIDTH,
        height: HEIGHT,
        buffer_count: config.back_buffer_count,
        format: TextureFormat::Rgba8Unorm,
    })?;
    let mut renderer = Renderer::new(device, surface, config, defaults)?;

    let checker = renderer.create_texture(&TextureCreateInfo::with_data(
        "checker",
        8,
        8,
        TextureFormat::Rgba8Unorm,
        checkerboard(8),
    ))?;
    let scene = renderer.create_texture(&TextureCreateInfo::render_target(
        "scene",
        512,
        512,
        TextureFormat::Rgba8Unorm,
    ))?;
    let scene_depth =
        renderer.create_texture(&TextureCreateInfo::depth_target("scene depth", 512, 512))?;
    let fog = renderer.create_constant_buffer("fog", 16)?;
    renderer.write_constant_buffer(fog, &[0.1f32, 0.1, 0.12, 0.05])?;

    let eye = Vec3::new(0.0, 1.5, 4.0);
    let mut world = Camera::perspective(eye, 60f32.to_radians(), 1.0, 0.1, 100.0)
        .with_color_target(scene)
        .with_depth_target(scene_depth);
    world.look_at(Vec3::ZERO);
    let screen = Camera::orthographic(Vec2::ZERO, Vec2::new(WIDTH as f32, HEIGHT as f32));

    let (card, card_indices) = quad(Vec2::splat(-0.5), Vec2::splat(0.5));
    let (panel, panel_indices) = quad(Vec2::new(40.0, 40.0), Vec2::new(552.0, 552.0));
    let (tile, tile_indices) = quad(Vec2::new(640.0, 40.0), Vec2::new(896.0, 296.0));

    for frame in 0..frames {
        let angle = frame as f32 * 0.02;
        renderer.begin_frame([0.1, 0.1, 0.12, 1.0])?;

        renderer.begin_camera(&world)?;
        renderer.clear_screen([0.0, 0.0, 0.0, 1.0])?;
        renderer.clear_depth(1.0)?;
        renderer.bind_texture(0, Some(checker))?;
        renderer.bind_sampler(0, Some(SamplerMode::PointWrap))?;
        renderer.bind_constant_buffer(2, Some(fog))?;
        renderer.set_model_constants(Mat4::from_rotation_y(angle), Vec4::ONE)?;
        renderer.draw_indexed_vertex_array(&card, &card_indices)?;
        renderer.end_camera(&world)?;

        renderer.begin_camera(&screen)?;
        renderer.set_model_constants(Mat4::IDENTITY, Vec4::ONE)?;
        renderer.bind_texture(0, Some(scene))?;
        renderer.bind_sampler(0, Some(SamplerMode::BilinearClamp))?;
        renderer.draw_indexed_vertex_array(&panel, &panel_indices)?;
        renderer.bind_texture(0, Some(checker))?;
        renderer.set_model_constants(Mat4::IDENTITY, Vec4::new(1.0, 0.8, 0.6, 1.0))?;
        renderer.draw_indexed_vertex_array(&tile, &tile_indices)?;
        renderer.end_camera(&screen)?;

        let stats = renderer.end_frame()?;
        if frame % 60 == 0 {
            info!(
                "frame {}: {} draws, {} copies ({} skipped), {} barriers, fence {}",
                stats.frame,
                stats.draws,
                stats.descriptor_copies,
                stats.skipped_copies,
                stats.barriers,
                stats.fence_value
            );
        }
    }

    info!(
        "Rendered {} frame(s), average CPU time {:?}",
        renderer.frame_index(),
        renderer.average_frame_time()
    );
    renderer.release_constant_buffer(fog)?;
    renderer.release_texture(checker)?;
    info!("{} release(s) pending at shutdown", renderer.pending_releases());
    renderer.shutdown()?;
    Ok(())
}

fn main() -> Result<()> {
    kiln_core::init_logging();
    let frames = env_frames()?;
    let backend = std::env::var("KILN_BACKEND").unwrap_or_else(|_| "headless".to_string());
    info!("Starting kiln on the {} backend for {} frame(s)", backend, frames);

    match backend.as_str() {
        "vulkan" => {
            let defaults = default_materials(load_spirv("KILN_VS")?, load_spirv("KILN_PS")?);
            let device = VulkanDevice::new(cfg!(debug_assertions))?;
            info!("Using {}", device.adapter_name());
            run(device, defaults, frames)
        }
        other => {
            if other != "headless" {
                warn!("Unknown backend '{}', falling back to headless", other);
            }
            let defaults =
                default_materials(HEADLESS_BYTECODE.to_vec(), HEADLESS_BYTECODE.to_vec());
            let device = HeadlessDevice::new();
            run(device.clone(), defaults, frames)?;
            let hazards = device.hazards();
            if !hazards.is_empty() {
                anyhow::bail!("{} synchronization hazard(s): {:?}", hazards.len(), hazards);
            }
            Ok(())
        }
    }
}
