//! Integration tests for the immediate-mode renderer on the headless backend.

use std::time::Duration;

use glam::{Mat4, Vec2, Vec3, Vec4};
use kiln_core::{ConstantBudget, DescriptorBudget, RendererConfig};
use kiln_renderer::{
    Camera, ConstantCategory, DefaultMaterials, DrawGeometry, FrameState, Material,
    MaterialConfig, ProjectionKind, RenderError, Renderer, ShaderSource, TextureCreateInfo,
    VertexPcu, VertexPcutbn,
};
use kiln_rhi::headless::{Completion, Hazard, HeadlessDevice, RenderCall};
use kiln_rhi::{
    BufferUsage, DescriptorHandle, DescriptorTable, RenderDevice, ResourceDevice, ResourceId,
    ResourceState, RhiError, SamplerMode, SurfaceDesc, TextureFormat, VertexLayout, ViewKind,
};

const WHITE: [u8; 4] = [255, 255, 255, 255];
const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

fn shader(layout: VertexLayout) -> ShaderSource {
    ShaderSource {
        name: format!("{layout:?}"),
        vertex: vec![0x03, 0x02, 0x23, 0x07],
        pixel: vec![0x03, 0x02, 0x23, 0x07],
        vertex_layout: layout,
    }
}

fn defaults() -> DefaultMaterials {
    DefaultMaterials {
        orthographic: MaterialConfig::unlit_2d("default 2d", shader(VertexLayout::Pcu)),
        perspective: MaterialConfig::opaque_3d("default 3d", shader(VertexLayout::Pcu)),
    }
}

/// Small budgets keep the headless call log short.
fn config() -> RendererConfig {
    RendererConfig::default()
        .with_descriptors(DescriptorBudget {
            staging_views: 256,
            staging_samplers: 8,
            render_target_views: 8,
            depth_stencil_views: 4,
            constant_table_per_frame: 64,
            shader_resource_table_per_frame: 64,
            sampler_table_per_frame: 16,
        })
        .with_constants(ConstantBudget {
            camera_slots: 4,
            model_slots: 16,
        })
        .with_fence_timeout(Duration::from_millis(50))
}

fn renderer_with(device: &HeadlessDevice, config: RendererConfig) -> Renderer<HeadlessDevice> {
    kiln_core::init_test_logging();
    let surface = device
        .create_surface(&SurfaceDesc {
            width: 320,
            height: 180,
            buffer_count: config.back_buffer_count,
            format: TextureFormat::Rgba8Unorm,
        })
        .unwrap();
    Renderer::new(device.clone(), surface, config, defaults()).unwrap()
}

fn renderer(device: &HeadlessDevice) -> Renderer<HeadlessDevice> {
    renderer_with(device, config())
}

fn triangle() -> [VertexPcu; 3] {
    [
        VertexPcu::new(Vec3::new(0.0, 0.0, 0.0), WHITE, Vec2::new(0.0, 0.0)),
        VertexPcu::new(Vec3::new(1.0, 0.0, 0.0), WHITE, Vec2::new(1.0, 0.0)),
        VertexPcu::new(Vec3::new(0.0, 1.0, 0.0), WHITE, Vec2::new(0.0, 1.0)),
    ]
}

fn quad() -> ([VertexPcu; 4], [u32; 6]) {
    let vertices = [
        VertexPcu::new(Vec3::new(0.0, 0.0, 0.0), WHITE, Vec2::new(0.0, 0.0)),
        VertexPcu::new(Vec3::new(1.0, 0.0, 0.0), WHITE, Vec2::new(1.0, 0.0)),
        VertexPcu::new(Vec3::new(1.0, 1.0, 0.0), WHITE, Vec2::new(1.0, 1.0)),
        VertexPcu::new(Vec3::new(0.0, 1.0, 0.0), WHITE, Vec2::new(0.0, 1.0)),
    ];
    (vertices, [0, 1, 2, 0, 2, 3])
}

fn checker(name: &str) -> TextureCreateInfo {
    TextureCreateInfo::with_data(name, 2, 2, TextureFormat::Rgba8Unorm, vec![200; 16])
}

#[test]
fn test_single_triangle_frame() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);

    renderer.begin_frame(BLACK).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    let stats = renderer.end_frame().unwrap();

    let writes = device.buffer_writes(BufferUsage::VERTEX);
    assert_eq!(writes.len(), 1);
    assert_eq!((writes[0].1, writes[0].2), (0, 72));
    assert_eq!(
        device.count_calls(|c| matches!(
            c,
            RenderCall::Draw {
                vertex_count: 3,
                start_vertex: 0,
                ..
            }
        )),
        1
    );

    assert_eq!(stats.frame, 0);
    assert_eq!(stats.draws, 1);
    assert_eq!(stats.geometry_bytes, 72);
    assert_eq!(stats.camera_writes, 1);
    assert_eq!(stats.model_writes, 1);
    assert_eq!(stats.fence_value, 1);
    // Back buffer in and out, camera and model constants, vertex buffer.
    assert_eq!(stats.barriers, 5);
    assert_eq!(device.count_calls(|c| matches!(c, RenderCall::Present { index: 0 })), 1);
    assert_eq!(renderer.state(), FrameState::Idle);
    assert_eq!(renderer.active_slot(), 1);
    assert!(device.hazards().is_empty());
}

#[test]
fn test_texture_slots_get_disjoint_ranges() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let texture = renderer.create_texture(&checker("checker")).unwrap();

    renderer.begin_frame(BLACK).unwrap();
    renderer.bind_texture(0, Some(texture)).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    renderer.bind_texture(0, None).unwrap();
    renderer.bind_texture(1, Some(texture)).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();

    let contexts: Vec<_> = renderer.draw_contexts().cloned().collect();
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[0].span.shader_resources, 1);
    assert_eq!(contexts[1].span.shader_resources, 2);
    assert!(contexts[1].offsets.views >= contexts[0].offsets.views + 1);
    assert_eq!(
        contexts[1].geometry,
        DrawGeometry::Vertices { start: 3, count: 3 }
    );
    renderer.end_frame().unwrap();

    let bases: Vec<u32> = device
        .calls()
        .iter()
        .filter_map(|c| match c {
            RenderCall::SetDescriptorTable {
                table: DescriptorTable::ShaderResource,
                base,
                ..
            } => Some(base.index),
            _ => None,
        })
        .collect();
    assert_eq!(bases.len(), 2);
    assert!(bases[1] >= bases[0] + 1);
    assert_eq!(
        renderer.texture_state(texture).unwrap(),
        ResourceState::PixelShaderResource
    );
}

#[test]
fn test_camera_without_draws() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let camera = Camera::orthographic(Vec2::ZERO, Vec2::new(320.0, 180.0));

    renderer.begin_frame(BLACK).unwrap();
    renderer.begin_camera(&camera).unwrap();
    renderer.end_camera(&camera).unwrap();
    let stats = renderer.end_frame().unwrap();

    assert_eq!(stats.camera_writes, 1);
    assert_eq!(stats.camera_slots, 1);
    assert_eq!(stats.model_slots, 1);
    assert_eq!(stats.draws, 0);
    assert_eq!(device.count_draws(), 0);
}

#[test]
fn test_model_constants_are_never_overwritten_in_frame() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let camera = Camera::orthographic(Vec2::ZERO, Vec2::new(320.0, 180.0));

    renderer.begin_frame(BLACK).unwrap();
    renderer.begin_camera(&camera).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    // Unchanged constants reuse the slot.
    renderer.draw_vertex_array(&triangle()).unwrap();
    renderer
        .set_model_constants(Mat4::from_translation(Vec3::X), Vec4::ONE)
        .unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();

    let contexts: Vec<_> = renderer.draw_contexts().cloned().collect();
    assert_eq!(contexts[0].constants, contexts[1].constants);
    assert_ne!(contexts[1].constants[1].1, contexts[2].constants[1].1);
    assert_eq!(contexts[0].constants[0].1, contexts[2].constants[0].1);

    renderer.end_camera(&camera).unwrap();
    let stats = renderer.end_frame().unwrap();
    assert_eq!(stats.model_slots, 2);
    assert_eq!(stats.model_writes, 2);
}

#[test]
fn test_model_slot_exhaustion_is_recoverable() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer_with(
        &device,
        config().with_constants(ConstantBudget {
            camera_slots: 2,
            model_slots: 2,
        }),
    );

    renderer.begin_frame(BLACK).unwrap();
    for i in 0..2 {
        renderer
            .set_model_constants(Mat4::from_translation(Vec3::X * i as f32), Vec4::ONE)
            .unwrap();
        renderer.draw_vertex_array(&triangle()).unwrap();
    }
    renderer
        .set_model_constants(Mat4::from_translation(Vec3::Y), Vec4::ONE)
        .unwrap();
    let err = renderer.draw_vertex_array(&triangle()).unwrap_err();
    assert!(matches!(
        err,
        RenderError::CapacityExhausted {
            pool: "model constant slots",
            capacity: 2
        }
    ));
    assert!(!err.is_fatal());

    let stats = renderer.end_frame().unwrap();
    assert_eq!(stats.draws, 2);

    // The next frame on the other slot starts from a fresh cursor.
    renderer.begin_frame(BLACK).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    assert_eq!(renderer.end_frame().unwrap().model_slots, 1);
}

#[test]
fn test_deferred_completion_has_no_hazards() {
    let device = HeadlessDevice::with_completion(Completion::Deferred);
    let mut renderer = renderer_with(&device, config().with_back_buffer_count(3));
    let texture = renderer.create_texture(&checker("checker")).unwrap();
    let (vertices, indices) = quad();

    for frame in 0..12u64 {
        renderer.begin_frame(BLACK).unwrap();
        renderer.bind_texture(0, Some(texture)).unwrap();
        renderer.bind_sampler(0, Some(SamplerMode::PointClamp)).unwrap();
        renderer
            .set_model_constants(Mat4::from_rotation_z(frame as f32), Vec4::ONE)
            .unwrap();
        renderer.draw_indexed_vertex_array(&vertices, &indices).unwrap();
        renderer.draw_vertex_array(&triangle()).unwrap();
        renderer.end_frame().unwrap();
    }

    assert!(device.hazards().is_empty(), "{:?}", device.hazards());
    // From the third frame on, every flush waits for the slot it moves to.
    assert!(device.count_calls(|c| matches!(c, RenderCall::Wait { .. })) >= 9);
    assert_eq!(renderer.frame_index(), 12);
}

#[test]
fn test_skipping_the_fence_is_detected() {
    let device = HeadlessDevice::with_completion(Completion::Deferred);
    let mut renderer = renderer(&device);

    renderer.begin_frame(BLACK).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    renderer.end_frame().unwrap();

    // The frame's constants are still in flight.
    let writes = device.buffer_writes(BufferUsage::CONSTANT);
    let (model, _, _) = writes[writes.len() - 1];
    device.write_buffer(model, 0, &[0; 16]).unwrap();
    assert!(device
        .hazards()
        .iter()
        .any(|h| matches!(h, Hazard::BufferWriteInFlight { .. })));
}

#[test]
fn test_stalled_gpu_is_fatal() {
    let device = HeadlessDevice::with_completion(Completion::Stalled);
    let mut renderer = renderer(&device);

    // Two slots: the third frame has to wait for the first.
    renderer.begin_frame(BLACK).unwrap();
    renderer.end_frame().unwrap();
    renderer.begin_frame(BLACK).unwrap();
    let err = renderer.end_frame().unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(
        err,
        RenderError::Rhi(RhiError::SynchronizationTimeout { value: 1, .. })
    ));
    assert_eq!(renderer.state(), FrameState::Idle);

    let live = device.live_resources();
    assert!(renderer.shutdown().is_err());
    assert_eq!(device.live_resources(), live);
    assert!(device.live_heaps() > 0);
}

#[test]
fn test_frame_state_misuse() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);

    assert!(matches!(
        renderer.end_frame(),
        Err(RenderError::InvalidFrameState {
            operation: "end_frame",
            expected: "batching",
            found: "idle"
        })
    ));
    assert!(renderer.draw_vertex_array(&triangle()).is_err());
    assert!(renderer.bind_texture(0, None).is_err());

    renderer.begin_frame(BLACK).unwrap();
    assert!(matches!(
        renderer.begin_frame(BLACK),
        Err(RenderError::InvalidFrameState {
            found: "batching",
            ..
        })
    ));
    assert_eq!(renderer.state(), FrameState::Batching);
    renderer.end_frame().unwrap();
    assert_eq!(device.count_executes(), 1);
}

#[test]
fn test_shutdown_releases_in_order() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    renderer.create_texture(&checker("checker")).unwrap();
    renderer.begin_frame(BLACK).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    renderer.end_frame().unwrap();

    device.clear_calls();
    renderer.shutdown().unwrap();
    let calls = device.calls();
    assert!(matches!(calls[0], RenderCall::Signal { .. }));

    let position = |predicate: fn(&RenderCall) -> bool| -> Vec<usize> {
        calls
            .iter()
            .enumerate()
            .filter(|(_, c)| predicate(c))
            .map(|(i, _)| i)
            .collect()
    };
    let heaps = position(|c| matches!(c, RenderCall::ReleaseDescriptorHeap { .. }));
    let resources = position(|c| matches!(c, RenderCall::ReleaseResource { .. }));
    let pipelines = position(|c| matches!(c, RenderCall::ReleasePipelineState { .. }));
    assert_eq!(heaps.len(), 6);
    assert_eq!(pipelines.len(), 2);
    assert!(heaps.last().unwrap() < resources.first().unwrap());
    assert!(resources.last().unwrap() < pipelines.first().unwrap());

    assert_eq!(device.live_heaps(), 0);
    assert_eq!(device.live_pipelines(), 0);
    // Back buffers belong to the surface.
    assert_eq!(device.live_resources(), 2);
    assert!(device.hazards().is_empty());

    device.clear_calls();
    renderer.shutdown().unwrap();
    assert!(device.calls().is_empty());
}

#[test]
fn test_camera_mismatch_is_tolerated() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let first = Camera::orthographic(Vec2::ZERO, Vec2::new(320.0, 180.0));
    let second = Camera::orthographic(Vec2::ZERO, Vec2::new(640.0, 360.0));

    renderer.begin_frame(BLACK).unwrap();
    renderer.end_camera(&first).unwrap();
    renderer.begin_camera(&first).unwrap();
    renderer.end_camera(&second).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    let stats = renderer.end_frame().unwrap();
    assert_eq!(stats.draws, 1);
}

#[test]
fn test_texture_upload_drains_queue() {
    let device = HeadlessDevice::with_completion(Completion::Deferred);
    let mut renderer = renderer(&device);
    let before = device.live_resources();

    let texture = renderer.create_texture(&checker("checker")).unwrap();

    let raw = renderer.texture_resource(texture).unwrap();
    let copies = device.count_calls(|c| {
        matches!(c, RenderCall::CopyBufferToTexture { dst, .. } if *dst == raw)
    });
    assert_eq!(copies, 1);
    assert_eq!(device.buffer_writes(BufferUsage::COPY_SRC).len(), 1);
    assert_eq!(device.completed(), device.last_signaled());
    assert_eq!(device.resource_state(raw), Some(ResourceState::PixelShaderResource));
    // The staging buffer is gone, the texture stays.
    assert_eq!(device.live_resources(), before + 1);
    assert!(device.hazards().is_empty());
}

#[test]
fn test_bad_texture_data_is_rejected() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let before = device.live_resources();

    let info = TextureCreateInfo::with_data("short", 2, 2, TextureFormat::Rgba8Unorm, vec![0; 3]);
    assert!(matches!(
        renderer.create_texture(&info),
        Err(RenderError::InvalidBindingState(_))
    ));
    assert_eq!(device.live_resources(), before);
}

#[test]
fn test_geometry_buffers_only_grow() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let small = triangle();
    let big: Vec<VertexPcu> = (0..3000).map(|_| small[0]).collect();
    let empty: &[VertexPcu] = &[];

    // Slot 0 draws small, big, small; slot 1 draws nothing.
    for vertices in [&small[..], empty, &big[..], empty, &small[..]] {
        renderer.begin_frame(BLACK).unwrap();
        renderer.draw_vertex_array(vertices).unwrap();
        renderer.end_frame().unwrap();
    }

    let sizes: Vec<u64> = device
        .calls()
        .iter()
        .filter_map(|c| match c {
            RenderCall::CreateBuffer { size, usage, .. } if *usage == BufferUsage::VERTEX => {
                Some(*size)
            }
            _ => None,
        })
        .collect();
    assert_eq!(sizes, vec![64 * 1024, 128 * 1024]);
    assert_eq!(renderer.last_stats().geometry_bytes, 72);
    assert!(device.hazards().is_empty());
}

#[test]
fn test_indexed_draws_share_buffers() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let (vertices, indices) = quad();

    renderer.begin_frame(BLACK).unwrap();
    renderer.draw_indexed_vertex_array(&vertices, &indices).unwrap();
    renderer.draw_indexed_vertex_array(&vertices, &indices).unwrap();
    renderer.end_frame().unwrap();

    let draws: Vec<(u32, u32, i32)> = device
        .calls()
        .iter()
        .filter_map(|c| match c {
            RenderCall::DrawIndexed {
                index_count,
                start_index,
                base_vertex,
                ..
            } => Some((*index_count, *start_index, *base_vertex)),
            _ => None,
        })
        .collect();
    assert_eq!(draws, vec![(6, 0, 0), (6, 6, 4)]);

    let index_writes = device.buffer_writes(BufferUsage::INDEX);
    assert_eq!(index_writes.len(), 1);
    assert_eq!(index_writes[0].2, 48);
    assert_eq!(device.count_calls(|c| matches!(c, RenderCall::SetIndexBuffer { .. })), 1);
}

#[test]
fn test_out_of_range_index_is_rejected() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let (vertices, _) = quad();

    renderer.begin_frame(BLACK).unwrap();
    assert!(matches!(
        renderer.draw_indexed_vertex_array(&vertices, &[0, 1, 4]),
        Err(RenderError::InvalidBindingState(_))
    ));
    assert_eq!(renderer.end_frame().unwrap().draws, 0);
}

#[test]
fn test_mixed_vertex_formats_are_stride_aligned() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let lit = renderer
        .create_material(MaterialConfig::opaque_3d("lit", shader(VertexLayout::Pcutbn)))
        .unwrap();

    renderer.begin_frame(BLACK).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    renderer.bind_material(Some(lit)).unwrap();
    renderer
        .draw_vertex_array(&[VertexPcutbn::default(); 3])
        .unwrap();
    renderer.end_frame().unwrap();

    // 72 bytes of PCU padded to 120, the first 60-byte vertex boundary.
    assert!(device.calls().iter().any(|c| matches!(
        c,
        RenderCall::Draw {
            vertex_count: 3,
            start_vertex: 2,
            ..
        }
    )));
    assert_eq!(device.count_calls(|c| matches!(c, RenderCall::SetVertexBuffer { .. })), 2);
    assert_eq!(renderer.last_stats().geometry_bytes, 120 + 180);
}

#[test]
fn test_vertex_layout_must_match_material() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);

    renderer.begin_frame(BLACK).unwrap();
    assert!(matches!(
        renderer.draw_vertex_array(&[VertexPcutbn::default(); 3]),
        Err(RenderError::InvalidBindingState(_))
    ));
    renderer.end_frame().unwrap();
}

#[test]
fn test_repeated_frames_skip_descriptor_copies() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let texture = renderer.create_texture(&checker("checker")).unwrap();

    let mut stats = Vec::new();
    for _ in 0..4 {
        renderer.begin_frame(BLACK).unwrap();
        renderer.bind_texture(0, Some(texture)).unwrap();
        renderer.draw_vertex_array(&triangle()).unwrap();
        stats.push(renderer.end_frame().unwrap());
    }

    assert_eq!(stats[0].descriptor_copies, 3);
    assert_eq!(stats[1].descriptor_copies, 3);
    for frame in &stats[2..] {
        assert_eq!(frame.descriptor_copies, 0);
        assert_eq!(frame.skipped_copies, 3);
        // Only the back buffer moves once everything else is in place.
        assert_eq!(frame.barriers, 2);
    }
}

#[test]
fn test_material_without_pipeline_cannot_bind() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let bare = renderer.add_material(Material::new(MaterialConfig::unlit_2d(
        "bare",
        shader(VertexLayout::Pcu),
    )));

    renderer.begin_frame(BLACK).unwrap();
    assert!(matches!(
        renderer.bind_material(Some(bare)),
        Err(RenderError::InvalidBindingState(_))
    ));
    // The previous binding stays and drawing continues.
    renderer.draw_vertex_array(&triangle()).unwrap();
    assert_eq!(renderer.end_frame().unwrap().draws, 1);

    let mut material = Material::new(MaterialConfig::unlit_2d("late", shader(VertexLayout::Pcu)));
    renderer
        .create_pipeline_state_for_material(&mut material)
        .unwrap();
    assert!(material.pipeline().is_some());
    let late = renderer.add_material(material);
    renderer.begin_frame(BLACK).unwrap();
    renderer.bind_material(Some(late)).unwrap();
    renderer.end_frame().unwrap();
}

#[test]
fn test_camera_targets_and_depth() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let color = renderer
        .create_texture(&TextureCreateInfo::render_target(
            "scene",
            64,
            64,
            TextureFormat::Rgba8Unorm,
        ))
        .unwrap();
    let depth = renderer
        .create_texture(&TextureCreateInfo::depth_target("scene depth", 64, 64))
        .unwrap();
    let camera = Camera::perspective(Vec3::Z * 5.0, 1.0, 1.0, 0.1, 100.0)
        .with_color_target(color)
        .with_depth_target(depth);

    renderer.begin_frame(BLACK).unwrap();
    assert!(matches!(
        renderer.clear_depth(1.0),
        Err(RenderError::InvalidBindingState(_))
    ));
    renderer.begin_camera(&camera).unwrap();
    renderer.clear_screen([0.2, 0.2, 0.2, 1.0]).unwrap();
    renderer.clear_depth(1.0).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();

    let context = renderer.draw_contexts().next().cloned().unwrap();
    let perspective = renderer.default_material(ProjectionKind::Perspective);
    assert_eq!(
        Some(context.pipeline),
        renderer.material(perspective).unwrap().pipeline()
    );
    assert_eq!(context.color_target.resource, color.resource());
    assert_eq!(
        context.depth_target.map(|target| target.resource),
        Some(depth.resource())
    );

    renderer.end_camera(&camera).unwrap();
    renderer.end_frame().unwrap();

    let depth_clears = device.count_calls(|c| {
        matches!(c, RenderCall::ClearDepthStencil { depth, .. } if *depth == 1.0)
    });
    assert_eq!(depth_clears, 1);
    assert!(device.calls().iter().any(|c| matches!(
        c,
        RenderCall::SetRenderTargets { depth: Some(_), .. }
    )));
    assert_eq!(renderer.texture_state(color).unwrap(), ResourceState::RenderTarget);
    assert_eq!(renderer.texture_state(depth).unwrap(), ResourceState::DepthWrite);

    // A render target can be sampled in a later frame.
    renderer.begin_frame(BLACK).unwrap();
    renderer.bind_texture(0, Some(color)).unwrap();
    assert!(matches!(
        renderer.bind_texture(1, Some(depth)),
        Err(RenderError::InvalidBindingState(_))
    ));
    renderer.draw_vertex_array(&triangle()).unwrap();
    renderer.end_frame().unwrap();
    assert_eq!(
        renderer.texture_state(color).unwrap(),
        ResourceState::PixelShaderResource
    );
    assert!(device.hazards().is_empty());
}

#[test]
fn test_surface_must_match_back_buffer_count() {
    let device = HeadlessDevice::new();
    let surface = device
        .create_surface(&SurfaceDesc {
            width: 64,
            height: 64,
            buffer_count: 3,
            format: TextureFormat::Rgba8Unorm,
        })
        .unwrap();
    let result = Renderer::new(device.clone(), surface, config(), defaults());
    assert!(matches!(result, Err(RenderError::Config(_))));
}

#[test]
fn test_slot_bounds_are_checked() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);

    renderer.begin_frame(BLACK).unwrap();
    assert!(renderer.bind_texture(8, None).is_err());
    assert!(renderer.bind_sampler(4, Some(SamplerMode::PointWrap)).is_err());
    renderer.bind_sampler(3, Some(SamplerMode::PointWrap)).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    let context = renderer.draw_contexts().next().cloned().unwrap();
    assert_eq!(context.span.samplers, 4);
    renderer.end_frame().unwrap();
}

fn shader_resource_view(device: &HeadlessDevice, raw: ResourceId) -> Option<DescriptorHandle> {
    device.calls().iter().rev().find_map(|c| match c {
        RenderCall::CreateView {
            resource,
            kind: ViewKind::ShaderResource,
            dest,
        } if *resource == raw => Some(*dest),
        _ => None,
    })
}

#[test]
fn test_staging_exhaustion_fails_only_the_bind() {
    let device = HeadlessDevice::new();
    // 40 constant slot views leave room for exactly one texture view.
    let mut renderer = renderer_with(
        &device,
        config().with_descriptors(DescriptorBudget {
            staging_views: 41,
            staging_samplers: 8,
            render_target_views: 8,
            depth_stencil_views: 4,
            constant_table_per_frame: 64,
            shader_resource_table_per_frame: 64,
            sampler_table_per_frame: 16,
        }),
    );
    let first = renderer.create_texture(&checker("first")).unwrap();
    let second = renderer.create_texture(&checker("second")).unwrap();

    renderer.begin_frame(BLACK).unwrap();
    renderer.bind_texture(0, Some(first)).unwrap();
    let err = renderer.bind_texture(1, Some(second)).unwrap_err();
    assert!(matches!(
        err,
        RenderError::CapacityExhausted {
            pool: "staging view heap",
            capacity: 41
        }
    ));
    assert!(!err.is_fatal());
    renderer.draw_vertex_array(&triangle()).unwrap();
    let context = renderer.draw_contexts().next().cloned().unwrap();
    assert_eq!(context.span.shader_resources, 1);

    let stats = renderer.end_frame().unwrap();
    assert_eq!(stats.draws, 1);
    let back_buffer = renderer.back_buffer(0).unwrap();
    assert_eq!(renderer.texture_state(back_buffer).unwrap(), ResourceState::Present);
    assert!(device.hazards().is_empty(), "{:?}", device.hazards());
}

#[test]
fn test_dropped_frame_restores_cached_states() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let texture = renderer.create_texture(&checker("checker")).unwrap();
    let back_buffer = renderer.back_buffer(0).unwrap();
    let raw = renderer.texture_resource(back_buffer).unwrap();

    renderer.begin_frame(BLACK).unwrap();
    renderer.bind_texture(0, Some(texture)).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    device.fail_next_execute();
    let err = renderer.end_frame().unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(renderer.state(), FrameState::Idle);
    assert_eq!(renderer.frame_index(), 0);

    // The cache agrees with what actually ran on the device.
    assert_eq!(renderer.texture_state(back_buffer).unwrap(), ResourceState::Present);
    assert_eq!(device.resource_state(raw), Some(ResourceState::Present));

    renderer.begin_frame(BLACK).unwrap();
    renderer.bind_texture(0, Some(texture)).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    let stats = renderer.end_frame().unwrap();
    assert_eq!(stats.frame, 0);
    assert_eq!(stats.draws, 1);

    let to_render_target = device.count_calls(|c| {
        matches!(
            c,
            RenderCall::Barrier {
                resource,
                before: ResourceState::Present,
                after: ResourceState::RenderTarget,
                ..
            } if *resource == raw
        )
    });
    assert_eq!(to_render_target, 2);
    assert_eq!(device.resource_state(raw), Some(ResourceState::Present));
    assert!(device.hazards().is_empty(), "{:?}", device.hazards());
}

#[test]
fn test_user_constant_buffers_bind_above_reserved_slots() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let lights = renderer.create_constant_buffer("lights", 80).unwrap();
    renderer.write_constant_buffer(lights, &[1.0f32; 4]).unwrap();

    renderer.begin_frame(BLACK).unwrap();
    for reserved in [0, 1] {
        assert!(matches!(
            renderer.bind_constant_buffer(reserved, Some(lights)),
            Err(RenderError::InvalidBindingState(_))
        ));
    }
    assert!(matches!(
        renderer.bind_constant_buffer(4, Some(lights)),
        Err(RenderError::InvalidBindingState(_))
    ));
    renderer.bind_constant_buffer(3, Some(lights)).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();

    let context = renderer.draw_contexts().next().cloned().unwrap();
    assert_eq!(context.span.constants, 4);
    let (slot, constants) = context.constants[2];
    assert_eq!(slot, 3);
    assert_eq!(constants.category, ConstantCategory::User);
    assert_eq!(constants.resource, lights.resource());
    assert_eq!(constants.size, 256);

    // A draw of this frame already reads the buffer.
    assert!(matches!(
        renderer.write_constant_buffer(lights, &[0.0f32; 4]),
        Err(RenderError::InvalidBindingState(_))
    ));
    let stats = renderer.end_frame().unwrap();
    // Camera, model and the application buffer.
    assert_eq!(stats.descriptor_copies, 3);

    renderer.write_constant_buffer(lights, &[0.5f32; 4]).unwrap();
    let writes = device.buffer_writes(BufferUsage::CONSTANT);
    assert_eq!(writes.last().map(|w| w.2), Some(16));
    assert!(device.hazards().is_empty());
}

#[test]
fn test_constant_buffer_write_waits_for_readers() {
    let device = HeadlessDevice::with_completion(Completion::Deferred);
    let mut renderer = renderer(&device);
    let lights = renderer.create_constant_buffer("lights", 16).unwrap();

    renderer.begin_frame(BLACK).unwrap();
    renderer.bind_constant_buffer(2, Some(lights)).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    let stats = renderer.end_frame().unwrap();
    assert!(device.completed() < stats.fence_value);

    device.clear_calls();
    renderer.write_constant_buffer(lights, &[2.0f32; 4]).unwrap();
    assert!(device
        .calls()
        .iter()
        .any(|c| matches!(c, RenderCall::Wait { value } if *value == stats.fence_value)));
    assert!(device.hazards().is_empty(), "{:?}", device.hazards());

    // Bindings do not survive the frame.
    renderer.begin_frame(BLACK).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    let context = renderer.draw_contexts().next().cloned().unwrap();
    assert_eq!(context.constants.len(), 2);
    renderer.end_frame().unwrap();
}

#[test]
fn test_released_texture_outlives_frames_in_flight() {
    let device = HeadlessDevice::with_completion(Completion::Deferred);
    let mut renderer = renderer(&device);
    let old = renderer.create_texture(&checker("old")).unwrap();
    let old_raw = renderer.texture_resource(old).unwrap();

    renderer.begin_frame(BLACK).unwrap();
    renderer.bind_texture(0, Some(old)).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    renderer.release_texture(old).unwrap();
    assert!(matches!(
        renderer.bind_texture(0, Some(old)),
        Err(RenderError::UnknownHandle(_))
    ));
    let view = shader_resource_view(&device, old_raw).unwrap();
    assert_eq!(renderer.end_frame().unwrap().released, 0);

    // Still read by the first frame.
    assert_eq!(renderer.pending_releases(), 1);
    assert!(renderer.texture_resource(old).is_ok());

    renderer.begin_frame(BLACK).unwrap();
    renderer.draw_vertex_array(&triangle()).unwrap();
    let stats = renderer.end_frame().unwrap();
    assert_eq!(stats.released, 1);
    assert_eq!(renderer.pending_releases(), 0);
    assert!(matches!(
        renderer.texture_resource(old),
        Err(RenderError::UnknownHandle(_))
    ));
    assert!(device
        .calls()
        .iter()
        .any(|c| matches!(c, RenderCall::ReleaseResource { id } if *id == old_raw)));

    // The freed staging slot is reused and copied again in the same partition.
    let new = renderer.create_texture(&checker("new")).unwrap();
    renderer.begin_frame(BLACK).unwrap();
    device.clear_calls();
    renderer.bind_texture(0, Some(new)).unwrap();
    let new_raw = renderer.texture_resource(new).unwrap();
    assert_eq!(shader_resource_view(&device, new_raw), Some(view));
    renderer.draw_vertex_array(&triangle()).unwrap();
    renderer.end_frame().unwrap();
    let copies =
        device.count_calls(|c| matches!(c, RenderCall::CopyDescriptor { src, .. } if *src == view));
    assert_eq!(copies, 1);
    assert!(device.hazards().is_empty(), "{:?}", device.hazards());
}

#[test]
fn test_release_reference_counting() {
    let device = HeadlessDevice::new();
    let mut renderer = renderer(&device);
    let texture = renderer.create_texture(&checker("checker")).unwrap();
    let live = device.live_resources();

    let back_buffer = renderer.back_buffer(0).unwrap();
    assert!(matches!(
        renderer.release_texture(back_buffer),
        Err(RenderError::InvalidBindingState(_))
    ));

    renderer.retain_texture(texture).unwrap();
    renderer.release_texture(texture).unwrap();
    assert!(renderer.texture_resource(texture).is_ok());
    assert_eq!(renderer.pending_releases(), 0);

    // Between frames with nothing in flight the texture goes at once.
    renderer.release_texture(texture).unwrap();
    assert_eq!(renderer.pending_releases(), 0);
    assert_eq!(device.live_resources(), live - 1);
    assert!(matches!(
        renderer.release_texture(texture),
        Err(RenderError::UnknownHandle(_))
    ));

    let lights = renderer.create_constant_buffer("lights", 16).unwrap();
    renderer.release_constant_buffer(lights).unwrap();
    assert!(matches!(
        renderer.write_constant_buffer(lights, &[0.0f32; 4]),
        Err(RenderError::UnknownHandle(_))
    ));
    assert_eq!(device.live_resources(), live - 1);
    assert!(device.hazards().is_empty());
}
