//! Immediate-mode renderer.
//!
//! [`Renderer`] is the composition root: it owns the device, the frame ring,
//! the descriptor allocator, the constant ring and the resource table, and
//! turns immediate draw calls into one ordered submission per frame.
//!
//! # Frame Lifecycle
//!
//! ```text
//! Idle --begin_frame--> Recording --> Batching --end_frame--> Flushing --> Idle
//!                                       |  ^
//!                      draw_*, clear_*, |  | begin_camera / end_camera,
//!                      bind_*           +--+ set_model_constants
//! ```
//!
//! Nothing reaches the command list during batching except the initial back
//! buffer clear. Each draw is captured as a [`DrawContext`] snapshot; at
//! [`Renderer::end_frame`] the geometry is uploaded once and the contexts are
//! recorded in call order.
//!
//! Every staging view a frame needs is created while batching, when the
//! binding is made. Recording only copies descriptors and emits barriers, and
//! a frame that is dropped before submission has its cached transitions
//! rolled back.
//!
//! # Releasing Resources
//!
//! Textures and constant buffers released by the application are retired
//! rather than destroyed: they stay alive, with their views, until the fence
//! value of the last frame that could read them completes.

use std::collections::HashMap;
use std::time::Duration;

use bytemuck::Pod;
use glam::{Mat4, Vec4};
use kiln_core::{Error as CoreError, RendererConfig, Timer};
use kiln_rhi::{
    BindFlags, BufferDesc, BufferUsage, CommandRecorder, DescriptorHandle, DescriptorTable,
    GpuQueue, MemoryLocation, PipelineId, PresentSurface, RenderDevice, ResourceDevice,
    ResourceId, ResourceState, SamplerMode, ViewKind, Viewport,
};
use tracing::{debug, error, info, trace, warn};

use crate::camera::{Camera, ProjectionKind};
use crate::constant_buffer::{ConstantBufferHandle, UserConstants};
use crate::constant_ring::{ConstantRing, ConstantSlot};
use crate::descriptor::{DescriptorAllocator, RangeOffsets, TableSpan};
use crate::error::{RenderError, RenderResult};
use crate::fence::FenceSynchronizer;
use crate::frame_ring::{FrameRing, GeometryBuffer};
use crate::material::{DefaultMaterials, Material, MaterialConfig, MaterialHandle};
use crate::resource::{ResourceHandle, ResourceKind, ResourceTable, TransitionCheckpoint};
use crate::texture::{TextureCreateInfo, TextureHandle};
use crate::ubo::{CAMERA_CONSTANT_SLOT, CameraConstants, MODEL_CONSTANT_SLOT, ModelConstants};
use crate::vertex::Vertex;

/// Smallest geometry buffer a frame slot allocates.
const MIN_GEOMETRY_CAPACITY: u64 = 64 * 1024;

/// Where the renderer is in its frame lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Recording,
    Batching,
    Flushing,
}

impl FrameState {
    pub fn name(self) -> &'static str {
        match self {
            FrameState::Idle => "idle",
            FrameState::Recording => "recording",
            FrameState::Batching => "batching",
            FrameState::Flushing => "flushing",
        }
    }
}

/// Counters for one submitted frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub frame: u64,
    pub draws: u32,
    pub descriptor_copies: u64,
    pub skipped_copies: u64,
    pub barriers: u64,
    pub geometry_bytes: u64,
    pub camera_slots: usize,
    pub model_slots: usize,
    pub camera_writes: u64,
    pub model_writes: u64,
    /// Retired resources destroyed once this frame was submitted.
    pub released: usize,
    /// Fence value signaled after the frame's submission.
    pub fence_value: u64,
    pub cpu_time: Duration,
}

/// Range of the frame's geometry a draw consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawGeometry {
    Vertices { start: u32, count: u32 },
    Indexed { start_index: u32, count: u32, base_vertex: i32 },
}

/// A resource and the staging view it is bound through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundView {
    pub resource: ResourceHandle,
    pub view: DescriptorHandle,
}

/// A sampler mode and its staging descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundSampler {
    pub mode: SamplerMode,
    pub view: DescriptorHandle,
}

/// Bindings of one draw, captured when it was issued.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawContext {
    pub pipeline: PipelineId,
    pub color_target: BoundView,
    pub depth_target: Option<BoundView>,
    pub textures: Vec<(u32, BoundView)>,
    pub constants: Vec<(u32, ConstantSlot)>,
    pub samplers: Vec<(u32, BoundSampler)>,
    /// Start of the descriptor range reserved for this draw.
    pub offsets: RangeOffsets,
    pub span: TableSpan,
    pub stride: u32,
    pub geometry: DrawGeometry,
}

#[derive(Clone, Debug, PartialEq)]
enum BatchEntry {
    Draw(DrawContext),
    ClearColor {
        target: BoundView,
        color: [f32; 4],
    },
    ClearDepth {
        target: BoundView,
        depth: f32,
        stencil: u8,
    },
}

#[derive(Clone, Debug)]
struct ActiveCamera {
    camera: Camera,
    color_target: BoundView,
    depth_target: Option<BoundView>,
}

/// A released resource waiting for the GPU to finish with it.
#[derive(Clone, Copy, Debug)]
struct Retired {
    resource: ResourceHandle,
    /// `None` while the current frame may still read it.
    guard: Option<u64>,
}

/// Immediate bindings applied to the next draws.
#[derive(Debug)]
struct Bindings {
    material: Option<MaterialHandle>,
    textures: Vec<Option<BoundView>>,
    samplers: Vec<Option<BoundSampler>>,
    /// Application constant buffers; the camera and model slots stay empty.
    constants: Vec<Option<ConstantSlot>>,
    model: ModelConstants,
    /// The pending model constants differ from what the current slot holds.
    model_changed: bool,
    /// The current model slot was written this frame.
    model_written: bool,
}

impl Bindings {
    fn new(config: &RendererConfig) -> Self {
        Self {
            material: None,
            textures: vec![None; config.max_texture_slots as usize],
            samplers: vec![None; config.max_sampler_slots as usize],
            constants: vec![None; config.max_constant_slots as usize],
            model: ModelConstants::default(),
            model_changed: true,
            model_written: false,
        }
    }

    fn reset(&mut self) {
        self.material = None;
        self.textures.fill(None);
        self.samplers.fill(None);
        self.constants.fill(None);
        self.model = ModelConstants::default();
        self.model_changed = true;
        self.model_written = false;
    }

    /// Clears every slot bound to `resource`.
    fn unbind(&mut self, resource: ResourceHandle) {
        for bound in &mut self.textures {
            if bound.is_some_and(|view| view.resource == resource) {
                *bound = None;
            }
        }
        for bound in &mut self.constants {
            if bound.is_some_and(|slot| slot.resource == resource) {
                *bound = None;
            }
        }
    }
}

/// Immediate-mode renderer over one backend.
///
/// # Resource Destruction Order
///
/// [`Renderer::shutdown`] (also run on drop) drains the queue, then releases
/// descriptor heaps, then resources, then pipeline states. The device itself
/// is dropped last, after every field that refers to it.
pub struct Renderer<D: RenderDevice> {
    config: RendererConfig,
    fence: FenceSynchronizer,
    ring: FrameRing<D::CommandList>,
    descriptors: DescriptorAllocator,
    constants: ConstantRing,
    resources: ResourceTable,
    back_buffers: Vec<BoundView>,
    constant_buffers: HashMap<ResourceHandle, UserConstants>,
    retiring: Vec<Retired>,
    materials: Vec<Material>,
    pipelines: Vec<PipelineId>,
    defaults: [MaterialHandle; 2],
    bindings: Bindings,
    camera: Option<ActiveCamera>,
    entries: Vec<BatchEntry>,
    vertices: Vec<u8>,
    indices: Vec<u32>,
    state: FrameState,
    frame_index: u64,
    /// Bumped by every `begin_frame`, submitted or not.
    frame_serial: u64,
    frame_checkpoint: TransitionCheckpoint,
    frame_executed: bool,
    last_stats: FrameStats,
    timer: Timer,
    shut_down: bool,
    surface: D::Surface,
    queue: D::Queue,
    device: D,
}

impl<D: RenderDevice> Renderer<D> {
    /// Creates a renderer presenting to `surface`.
    ///
    /// Preallocates every heap, constant slot and frame slot described by
    /// `config`, creates the back buffer views and compiles the default
    /// materials.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] if the configuration is invalid or the surface
    /// buffer count differs from `config.back_buffer_count`; backend errors
    /// from any allocation.
    pub fn new(
        device: D,
        surface: D::Surface,
        config: RendererConfig,
        defaults: DefaultMaterials,
    ) -> RenderResult<Self> {
        config.validate()?;
        let count = config.back_buffer_count;
        if surface.buffer_count() != count {
            return Err(CoreError::Config(format!(
                "surface has {} buffers, back_buffer_count is {}",
                surface.buffer_count(),
                count
            ))
            .into());
        }

        let queue = device.create_queue()?;
        let ring = FrameRing::new(&device, count)?;
        let mut resources = ResourceTable::new();
        let mut descriptors = DescriptorAllocator::new(&device, &config.descriptors, count)?;

        let (width, height) = surface.extent();
        let back_buffers = (0..count)
            .map(|index| {
                let resource = resources.adopt_external(
                    surface.back_buffer(index)?,
                    ResourceState::Present,
                    ResourceKind::Texture {
                        width,
                        height,
                        format: surface.format(),
                        bind_flags: BindFlags::RENDER_TARGET,
                    },
                );
                let view =
                    descriptors.view(&device, &resources, resource, ViewKind::RenderTarget)?;
                Ok(BoundView { resource, view })
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let constants = ConstantRing::new(
            &device,
            &mut resources,
            &mut descriptors,
            &config.constants,
            count,
        )?;

        info!(
            "Renderer ready on {} backend: {} frame slot(s) + upload slot, {}x{}",
            device.name(),
            count,
            width,
            height
        );

        let mut renderer = Self {
            fence: FenceSynchronizer::new(config.fence_timeout),
            ring,
            descriptors,
            constants,
            frame_checkpoint: resources.checkpoint(),
            resources,
            back_buffers,
            constant_buffers: HashMap::new(),
            retiring: Vec::new(),
            materials: Vec::new(),
            pipelines: Vec::new(),
            defaults: [MaterialHandle(0), MaterialHandle(1)],
            bindings: Bindings::new(&config),
            camera: None,
            entries: Vec::new(),
            vertices: Vec::new(),
            indices: Vec::new(),
            state: FrameState::Idle,
            frame_index: 0,
            frame_serial: 0,
            frame_executed: false,
            last_stats: FrameStats::default(),
            timer: Timer::new(),
            shut_down: false,
            config,
            surface,
            queue,
            device,
        };
        renderer.defaults = [
            renderer.create_material(defaults.orthographic)?,
            renderer.create_material(defaults.perspective)?,
        ];
        Ok(renderer)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Frames submitted so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Frame slot currently recorded into.
    pub fn active_slot(&self) -> usize {
        self.ring.active_index()
    }

    /// Fence target of frame slot `index`.
    pub fn slot_fence_target(&self, index: usize) -> Option<u64> {
        self.ring.slot(index).map(|slot| slot.fence_target())
    }

    /// Statistics of the last submitted frame.
    pub fn last_stats(&self) -> &FrameStats {
        &self.last_stats
    }

    /// Mean CPU time per frame.
    pub fn average_frame_time(&self) -> Duration {
        self.timer.average()
    }

    /// Contexts recorded so far this frame.
    pub fn draw_contexts(&self) -> impl Iterator<Item = &DrawContext> {
        self.entries.iter().filter_map(|entry| match entry {
            BatchEntry::Draw(context) => Some(context),
            _ => None,
        })
    }

    /// Back buffer `index` as a texture.
    pub fn back_buffer(&self, index: usize) -> Option<TextureHandle> {
        self.back_buffers
            .get(index)
            .map(|bound| TextureHandle(bound.resource))
    }

    /// Backend id behind a texture.
    pub fn texture_resource(&self, texture: TextureHandle) -> RenderResult<ResourceId> {
        self.resources.raw(texture.0)
    }

    /// Cached state of a texture.
    pub fn texture_state(&self, texture: TextureHandle) -> RenderResult<ResourceState> {
        self.resources.state(texture.0)
    }

    /// Released resources still waiting for the GPU.
    pub fn pending_releases(&self) -> usize {
        self.retiring.len()
    }

    /// Default material for `kind`.
    pub fn default_material(&self, kind: ProjectionKind) -> MaterialHandle {
        match kind {
            ProjectionKind::Orthographic => self.defaults[0],
            ProjectionKind::Perspective => self.defaults[1],
        }
    }

    pub fn material(&self, handle: MaterialHandle) -> Option<&Material> {
        self.materials.get(handle.0 as usize)
    }

    fn expect_state(&self, operation: &'static str, expected: FrameState) -> RenderResult<()> {
        if self.state != expected {
            warn!(
                "{} called while {} (expected {})",
                operation,
                self.state.name(),
                expected.name()
            );
            return Err(RenderError::InvalidFrameState {
                operation,
                expected: expected.name(),
                found: self.state.name(),
            });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Materials and textures
    // ---------------------------------------------------------------------

    /// Creates `material`'s pipeline state unless it already has one.
    pub fn create_pipeline_state_for_material(
        &mut self,
        material: &mut Material,
    ) -> RenderResult<()> {
        if material.pipeline.is_some() {
            return Ok(());
        }
        let pipeline = self
            .device
            .create_pipeline_state(&material.config.pipeline_desc())?;
        self.pipelines.push(pipeline);
        material.pipeline = Some(pipeline);
        debug!("Created pipeline state for material '{}'", material.config.name);
        Ok(())
    }

    /// Registers a material and creates its pipeline state.
    pub fn create_material(&mut self, config: MaterialConfig) -> RenderResult<MaterialHandle> {
        let mut material = Material::new(config);
        self.create_pipeline_state_for_material(&mut material)?;
        Ok(self.add_material(material))
    }

    /// Registers a material as is. It cannot be bound without a pipeline state.
    pub fn add_material(&mut self, material: Material) -> MaterialHandle {
        self.materials.push(material);
        MaterialHandle(self.materials.len() as u32 - 1)
    }

    /// Creates a texture, uploading `initial_data` synchronously.
    ///
    /// The upload is recorded into the upload slot and the queue is drained
    /// before this returns, so it stalls any frames in flight.
    pub fn create_texture(&mut self, info: &TextureCreateInfo) -> RenderResult<TextureHandle> {
        info.validate()?;
        let texture = self.resources.create_texture(&self.device, &info.desc())?;

        if let Some(data) = &info.initial_data {
            if let Err(e) = self.upload_texture(texture, info.bind_flags, data) {
                if !e.is_fatal() {
                    self.resources.release(texture, &self.device)?;
                }
                return Err(e);
            }
        }
        debug!(
            "Created texture '{}' ({}x{} {:?})",
            info.name, info.width, info.height, info.format
        );
        Ok(TextureHandle(texture))
    }

    fn upload_texture(
        &mut self,
        texture: ResourceHandle,
        bind_flags: BindFlags,
        data: &[u8],
    ) -> RenderResult<()> {
        let staging = self.resources.create_buffer(
            &self.device,
            &BufferDesc {
                name: "texture upload".into(),
                size: data.len() as u64,
                usage: BufferUsage::COPY_SRC,
                location: MemoryLocation::Upload,
                initial_state: ResourceState::CopySource,
            },
        )?;

        let checkpoint = self.resources.checkpoint();
        if let Err(e) = self.submit_upload(texture, staging, bind_flags, data) {
            self.resources.rollback(checkpoint);
            if !e.is_fatal() {
                self.resources.release(staging, &self.device)?;
            }
            return Err(e);
        }
        self.resources.commit(checkpoint);

        let value = self.fence.drain(&self.queue)?;
        self.ring.upload_mut().set_fence_target(value);
        self.resources.release(staging, &self.device)?;
        trace!("Texture upload of {} bytes completed at fence {}", data.len(), value);
        Ok(())
    }

    fn submit_upload(
        &mut self,
        texture: ResourceHandle,
        staging: ResourceHandle,
        bind_flags: BindFlags,
        data: &[u8],
    ) -> RenderResult<()> {
        self.device
            .write_buffer(self.resources.raw(staging)?, 0, data)?;
        self.ring.begin_upload(&self.fence, &self.queue)?;
        let list = self.ring.upload_mut().command_list_mut();
        self.resources
            .transition_to(texture, ResourceState::CopyDest, list)?;
        list.copy_buffer_to_texture(self.resources.raw(staging)?, self.resources.raw(texture)?)?;
        if bind_flags.contains(BindFlags::SHADER_RESOURCE) {
            self.resources
                .transition_to(texture, ResourceState::PixelShaderResource, list)?;
        }
        list.close()?;
        self.queue.execute(self.ring.upload().command_list())?;
        Ok(())
    }

    /// Adds a reference to `texture`; each one needs its own release.
    pub fn retain_texture(&mut self, texture: TextureHandle) -> RenderResult<()> {
        let resource = self.live(texture.0)?;
        self.resources.retain(resource)
    }

    /// Drops a reference to `texture`.
    ///
    /// The last reference retires the texture: it is unbound, can no longer
    /// be bound, and is destroyed together with its views once every frame
    /// that could read it completed.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidBindingState`] for back buffers, which belong to
    /// the surface. [`RenderError::UnknownHandle`] for a texture that was
    /// already retired.
    pub fn release_texture(&mut self, texture: TextureHandle) -> RenderResult<()> {
        let resource = self.live(texture.0)?;
        if self.resources.is_external(resource)? {
            warn!("release_texture on a back buffer");
            return Err(RenderError::InvalidBindingState(format!(
                "{resource:?} is owned by the surface"
            )));
        }
        if self.resources.ref_count(resource)? > 1 {
            self.resources.release(resource, &self.device)?;
            return Ok(());
        }
        self.retire(resource, 0)
    }

    /// Creates an application constant buffer of at least `size` bytes.
    pub fn create_constant_buffer(
        &mut self,
        name: &str,
        size: u64,
    ) -> RenderResult<ConstantBufferHandle> {
        let constants = UserConstants::create(
            &self.device,
            &mut self.resources,
            &mut self.descriptors,
            name,
            size,
        )?;
        let resource = constants.slot.resource;
        self.constant_buffers.insert(resource, constants);
        debug!("Created constant buffer '{}' ({} bytes)", name, constants.slot.size);
        Ok(ConstantBufferHandle(resource))
    }

    /// Writes `data` at the start of `buffer`.
    ///
    /// Blocks until the GPU finished the last submitted frame that read the
    /// buffer.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidBindingState`] when a draw recorded in the
    /// current frame reads the buffer, or when `data` does not fit.
    pub fn write_constant_buffer<T: Pod>(
        &mut self,
        buffer: ConstantBufferHandle,
        data: &T,
    ) -> RenderResult<()> {
        let mut constants = self.user_constants(buffer)?;
        if let Some(serial) = constants.read_by {
            if self.state == FrameState::Batching && serial == self.frame_serial {
                warn!("Constant buffer {:?} written after a draw read it", buffer.0);
                return Err(RenderError::InvalidBindingState(format!(
                    "{:?} is read by a draw recorded this frame",
                    buffer.0
                )));
            }
            // Read by a frame that was dropped after submission.
            let value = self.fence.drain(&self.queue)?;
            constants.settle(value);
        }
        self.fence.wait_until(&self.queue, constants.guard)?;
        self.constants
            .write(&self.device, &self.resources, &constants.slot, data)?;
        self.constant_buffers.insert(buffer.0, constants);
        Ok(())
    }

    /// Drops `buffer`. It is unbound at once and destroyed once every frame
    /// that could read it completed.
    pub fn release_constant_buffer(&mut self, buffer: ConstantBufferHandle) -> RenderResult<()> {
        let constants = self.user_constants(buffer)?;
        self.constant_buffers.remove(&buffer.0);
        self.retire(buffer.0, constants.guard)
    }

    fn user_constants(&self, buffer: ConstantBufferHandle) -> RenderResult<UserConstants> {
        self.constant_buffers
            .get(&buffer.0)
            .copied()
            .ok_or_else(|| RenderError::UnknownHandle(format!("{:?}", buffer.0)))
    }

    /// Resolves a texture that has not been retired.
    fn live(&self, resource: ResourceHandle) -> RenderResult<ResourceHandle> {
        self.resources.raw(resource)?;
        if self.retiring.iter().any(|retired| retired.resource == resource) {
            return Err(RenderError::UnknownHandle(format!("{resource:?} was released")));
        }
        Ok(resource)
    }

    fn retire(&mut self, resource: ResourceHandle, guard: u64) -> RenderResult<()> {
        self.bindings.unbind(resource);
        let guard = match self.state {
            // Draws batched this frame may read it.
            FrameState::Batching => None,
            _ => Some(guard.max(self.fence.last_signaled())),
        };
        self.retiring.push(Retired { resource, guard });
        trace!("Retired {:?} until fence {:?}", resource, guard);
        if self.state == FrameState::Idle {
            self.reap_retired()?;
        }
        Ok(())
    }

    /// Gives every pending read and retirement of the current frame the fence
    /// value that covers it.
    fn settle_frame(&mut self, value: u64) {
        for constants in self.constant_buffers.values_mut() {
            constants.settle(value);
        }
        for retired in &mut self.retiring {
            retired.guard.get_or_insert(value);
        }
    }

    /// Destroys retired resources whose guard completed. Returns how many.
    fn reap_retired(&mut self) -> RenderResult<usize> {
        let mut reaped = 0;
        let mut index = 0;
        while index < self.retiring.len() {
            let ready = match self.retiring[index].guard {
                Some(guard) => self.fence.is_complete(&self.queue, guard)?,
                None => false,
            };
            if !ready {
                index += 1;
                continue;
            }
            let retired = self.retiring.swap_remove(index);
            let views = self.descriptors.forget_views(retired.resource);
            self.resources.release(retired.resource, &self.device)?;
            trace!("Destroyed {:?} and {} view(s)", retired.resource, views);
            reaped += 1;
        }
        if reaped > 0 {
            debug!("Released {} retired resource(s)", reaped);
        }
        Ok(reaped)
    }

    // ---------------------------------------------------------------------
    // Frame lifecycle
    // ---------------------------------------------------------------------

    /// Starts a frame on the active slot and clears its back buffer.
    ///
    /// Waits for the slot's previous submission, then resets its command
    /// list and rewinds the descriptor and constant cursors.
    pub fn begin_frame(&mut self, clear_color: [f32; 4]) -> RenderResult<()> {
        self.expect_state("begin_frame", FrameState::Idle)?;
        self.state = FrameState::Recording;
        self.timer.begin();
        self.frame_serial += 1;
        self.frame_executed = false;
        self.frame_checkpoint = self.resources.checkpoint();

        match self.start_frame(clear_color) {
            Ok(()) => {
                self.state = FrameState::Batching;
                Ok(())
            }
            Err(e) => {
                self.resources.rollback(self.frame_checkpoint);
                self.state = FrameState::Idle;
                Err(e)
            }
        }
    }

    fn start_frame(&mut self, clear_color: [f32; 4]) -> RenderResult<()> {
        let slot = self.ring.active_index();
        debug_assert_eq!(slot, self.surface.current_index());

        self.ring.begin_recording(&self.fence, &self.queue)?;
        self.reap_retired()?;
        self.descriptors.begin_frame(slot)?;
        self.constants.begin_frame(slot)?;
        self.descriptors.take_stats();
        self.constants.take_writes();
        self.resources.take_barrier_count();

        self.entries.clear();
        self.vertices.clear();
        self.indices.clear();
        self.bindings.reset();
        self.camera = None;

        let back_buffer = self.back_buffers[slot];
        let list = self.ring.active_mut().command_list_mut();
        list.set_descriptor_heaps(&self.descriptors.visible_heaps())?;
        self.resources
            .transition_to(back_buffer.resource, ResourceState::RenderTarget, list)?;
        list.clear_render_target(back_buffer.view, clear_color)?;
        trace!("Frame {} recording on slot {}", self.frame_index, slot);
        Ok(())
    }

    /// Records every batched entry, submits, presents and advances the ring.
    ///
    /// The frame is dropped on error and the renderer returns to idle; only
    /// fatal errors leave it unusable. A dropped frame that never reached the
    /// queue leaves no trace in the cached resource states.
    pub fn end_frame(&mut self) -> RenderResult<FrameStats> {
        self.expect_state("end_frame", FrameState::Batching)?;
        self.state = FrameState::Flushing;

        let result = self.flush_frame();
        self.entries.clear();
        self.camera = None;
        self.state = FrameState::Idle;
        if let Err(e) = &result {
            if e.is_fatal() {
                error!("Frame {} failed: {}", self.frame_index, e);
            } else {
                warn!("Frame {} dropped: {}", self.frame_index, e);
            }
            self.settle_dropped_frame();
        }
        result
    }

    /// Undoes what a dropped frame left behind.
    fn settle_dropped_frame(&mut self) {
        if !self.frame_executed {
            let restored = self.resources.rollback(self.frame_checkpoint);
            trace!("Dropped frame rolled back {} transition(s)", restored);
            let value = self.fence.last_signaled();
            self.settle_frame(value);
            return;
        }
        // The list reached the queue but no fence value covers it yet.
        match self.fence.signal(&self.queue) {
            Ok(value) => self.settle_frame(value),
            Err(e) => error!("Could not fence the dropped frame: {}", e),
        }
    }

    fn flush_frame(&mut self) -> RenderResult<FrameStats> {
        if self.camera.is_some() {
            warn!("end_frame with an active camera; closing it");
            self.flush_model_constants()?;
        }

        let slot = self.ring.active_index();
        let geometry_bytes = self.upload_geometry()?;

        let frame_slot = self.ring.active_mut();
        let vertex_buffer = frame_slot.vertex_buffer;
        let index_buffer = frame_slot.index_buffer;
        let mut recorder = FrameRecorder {
            device: &self.device,
            resources: &mut self.resources,
            descriptors: &mut self.descriptors,
            list: frame_slot.command_list_mut(),
            vertex_buffer,
            index_buffer,
            targets: None,
            pipeline: None,
            vertex_stride: None,
            index_bound: false,
            draws: 0,
        };
        for entry in &self.entries {
            recorder.record(entry)?;
        }
        let draws = recorder.draws;

        let list = self.ring.active_mut().command_list_mut();
        self.resources
            .transition_to(self.back_buffers[slot].resource, ResourceState::Present, list)?;
        list.close()?;
        self.queue.execute(self.ring.active().command_list())?;
        self.frame_executed = true;
        self.resources.commit(self.frame_checkpoint);

        let next = self.surface.present()?;
        let fence_value = self.fence.flush(&self.queue, &mut self.ring, next)?;
        self.settle_frame(fence_value);
        let released = self.reap_retired()?;

        let copies = self.descriptors.take_stats();
        let (camera_slots, model_slots) = self.constants.used();
        let (camera_writes, model_writes) = self.constants.take_writes();
        let stats = FrameStats {
            frame: self.frame_index,
            draws,
            descriptor_copies: copies.copies,
            skipped_copies: copies.skipped,
            barriers: self.resources.take_barrier_count(),
            geometry_bytes,
            camera_slots,
            model_slots,
            camera_writes,
            model_writes,
            released,
            fence_value,
            cpu_time: self.timer.end(),
        };
        trace!("Frame {} submitted: {:?}", self.frame_index, stats);

        self.frame_index += 1;
        self.last_stats = stats;
        Ok(stats)
    }

    /// Uploads the frame's vertices and indices, growing the slot's buffers
    /// when they are too small. Returns the bytes written.
    fn upload_geometry(&mut self) -> RenderResult<u64> {
        let slot = self.ring.active_index();
        let frame_slot = self.ring.active_mut();
        let mut written = 0;

        if !self.vertices.is_empty() {
            let buffer = ensure_geometry_buffer(
                &self.device,
                &mut self.resources,
                &mut frame_slot.vertex_buffer,
                self.vertices.len() as u64,
                BufferUsage::VERTEX,
                slot,
            )?;
            self.device
                .write_buffer(self.resources.raw(buffer.resource)?, 0, &self.vertices)?;
            written += self.vertices.len() as u64;
        }

        if !self.indices.is_empty() {
            let bytes: &[u8] = bytemuck::cast_slice(&self.indices);
            let buffer = ensure_geometry_buffer(
                &self.device,
                &mut self.resources,
                &mut frame_slot.index_buffer,
                bytes.len() as u64,
                BufferUsage::INDEX,
                slot,
            )?;
            self.device
                .write_buffer(self.resources.raw(buffer.resource)?, 0, bytes)?;
            written += bytes.len() as u64;
        }
        Ok(written)
    }

    // ---------------------------------------------------------------------
    // Batching
    // ---------------------------------------------------------------------

    /// Binds a camera for the following draws.
    ///
    /// Writes the camera constants into a fresh camera slot, takes a fresh
    /// model slot, selects the default material for the projection kind and
    /// redirects draws into the camera's targets.
    pub fn begin_camera(&mut self, camera: &Camera) -> RenderResult<()> {
        self.expect_state("begin_camera", FrameState::Batching)?;

        let color_target = match camera.color_target {
            Some(texture) => self.bound_view(texture.0, ViewKind::RenderTarget)?,
            None => self.back_buffers[self.ring.active_index()],
        };
        let depth_target = camera
            .depth_target
            .map(|texture| self.bound_view(texture.0, ViewKind::DepthStencil))
            .transpose()?;

        if self.camera.is_some() {
            warn!("begin_camera while another camera is active; replacing it");
            self.flush_model_constants()?;
        }
        let slot = self.constants.next_camera_slot()?;
        self.constants
            .write(&self.device, &self.resources, &slot, &camera.constants())?;
        self.constants.next_model_slot()?;
        self.bindings.model_written = false;
        self.bindings.model_changed = true;
        self.bindings.material = Some(self.default_material(camera.kind()));

        self.camera = Some(ActiveCamera {
            camera: camera.clone(),
            color_target,
            depth_target,
        });
        Ok(())
    }

    /// Ends the camera begun with [`begin_camera`](Self::begin_camera).
    ///
    /// Pending model constants are written before the camera is cleared. A
    /// mismatched or missing camera is logged and otherwise ignored.
    pub fn end_camera(&mut self, camera: &Camera) -> RenderResult<()> {
        self.expect_state("end_camera", FrameState::Batching)?;
        match &self.camera {
            None => warn!("end_camera without an active camera"),
            Some(active) if active.camera != *camera => {
                warn!("end_camera called with a different camera than begin_camera")
            }
            Some(_) => {}
        }
        self.flush_model_constants()?;
        self.camera = None;
        Ok(())
    }

    fn flush_model_constants(&mut self) -> RenderResult<()> {
        if self.bindings.model_written {
            return Ok(());
        }
        if let Some(slot) = self.constants.current_model_slot() {
            self.constants
                .write(&self.device, &self.resources, &slot, &self.bindings.model)?;
            self.bindings.model_written = true;
            self.bindings.model_changed = false;
        }
        Ok(())
    }

    /// Sets the model matrix and tint of the following draws.
    pub fn set_model_constants(&mut self, model: Mat4, color: Vec4) -> RenderResult<()> {
        self.expect_state("set_model_constants", FrameState::Batching)?;
        let constants = ModelConstants::new(model, color);
        if constants != self.bindings.model {
            self.bindings.model = constants;
            self.bindings.model_changed = true;
        }
        Ok(())
    }

    /// Binds a material for the following draws.
    ///
    /// `None` falls back to the active camera's default. A material without a
    /// pipeline state is rejected and the previous binding kept.
    pub fn bind_material(&mut self, material: Option<MaterialHandle>) -> RenderResult<()> {
        self.expect_state("bind_material", FrameState::Batching)?;
        if let Some(handle) = material {
            let entry = self
                .materials
                .get(handle.0 as usize)
                .ok_or_else(|| RenderError::UnknownHandle(format!("{handle:?}")))?;
            if entry.pipeline.is_none() {
                warn!("Material '{}' bound without a pipeline state", entry.config.name);
                return Err(RenderError::InvalidBindingState(format!(
                    "material '{}' has no pipeline state",
                    entry.config.name
                )));
            }
        }
        let fallback = self
            .camera
            .as_ref()
            .map(|active| self.default_material(active.camera.kind()));
        self.bindings.material = material.or(fallback);
        Ok(())
    }

    /// Binds a texture to shader-resource slot `slot`, or clears the slot.
    ///
    /// The texture's staging view is created here. When that fails the bind
    /// fails and the slot keeps its previous texture.
    pub fn bind_texture(&mut self, slot: u32, texture: Option<TextureHandle>) -> RenderResult<()> {
        self.expect_state("bind_texture", FrameState::Batching)?;
        if slot >= self.config.max_texture_slots {
            return Err(RenderError::InvalidBindingState(format!(
                "texture slot {slot} exceeds max_texture_slots {}",
                self.config.max_texture_slots
            )));
        }
        let bound = texture
            .map(|texture| self.bound_view(texture.0, ViewKind::ShaderResource))
            .transpose()?;
        self.bindings.textures[slot as usize] = bound;
        Ok(())
    }

    /// Binds a sampler to sampler slot `slot`, or clears the slot.
    pub fn bind_sampler(&mut self, slot: u32, mode: Option<SamplerMode>) -> RenderResult<()> {
        self.expect_state("bind_sampler", FrameState::Batching)?;
        if slot >= self.config.max_sampler_slots {
            return Err(RenderError::InvalidBindingState(format!(
                "sampler slot {slot} exceeds max_sampler_slots {}",
                self.config.max_sampler_slots
            )));
        }
        let bound = mode
            .map(|mode| {
                let view = self.descriptors.sampler(&self.device, mode)?;
                Ok::<_, RenderError>(BoundSampler { mode, view })
            })
            .transpose()?;
        self.bindings.samplers[slot as usize] = bound;
        Ok(())
    }

    /// Binds an application constant buffer to constant slot `slot`, or
    /// clears the slot.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidBindingState`] for the camera and model slots
    /// and for slots at or past `max_constant_slots`.
    pub fn bind_constant_buffer(
        &mut self,
        slot: u32,
        buffer: Option<ConstantBufferHandle>,
    ) -> RenderResult<()> {
        self.expect_state("bind_constant_buffer", FrameState::Batching)?;
        if slot == CAMERA_CONSTANT_SLOT || slot == MODEL_CONSTANT_SLOT {
            warn!("bind_constant_buffer on reserved constant slot {}", slot);
            return Err(RenderError::InvalidBindingState(format!(
                "constant slot {slot} is reserved for camera and model constants"
            )));
        }
        if slot >= self.config.max_constant_slots {
            return Err(RenderError::InvalidBindingState(format!(
                "constant slot {slot} exceeds max_constant_slots {}",
                self.config.max_constant_slots
            )));
        }
        let bound = buffer
            .map(|buffer| self.user_constants(buffer).map(|constants| constants.slot))
            .transpose()?;
        self.bindings.constants[slot as usize] = bound;
        Ok(())
    }

    /// Staging view of a live resource, created on first use.
    fn bound_view(&mut self, resource: ResourceHandle, kind: ViewKind) -> RenderResult<BoundView> {
        let resource = self.live(resource)?;
        let view = self
            .descriptors
            .view(&self.device, &self.resources, resource, kind)?;
        Ok(BoundView { resource, view })
    }

    /// Clears the current color target: the camera's, or the back buffer.
    pub fn clear_screen(&mut self, color: [f32; 4]) -> RenderResult<()> {
        self.expect_state("clear_screen", FrameState::Batching)?;
        let target = self.color_target();
        self.entries.push(BatchEntry::ClearColor { target, color });
        Ok(())
    }

    /// Clears the active camera's depth target.
    pub fn clear_depth(&mut self, depth: f32) -> RenderResult<()> {
        self.expect_state("clear_depth", FrameState::Batching)?;
        let Some(target) = self.camera.as_ref().and_then(|active| active.depth_target) else {
            warn!("clear_depth without a depth target");
            return Err(RenderError::InvalidBindingState(
                "no depth target bound".to_string(),
            ));
        };
        self.entries.push(BatchEntry::ClearDepth {
            target,
            depth,
            stencil: 0,
        });
        Ok(())
    }

    fn color_target(&self) -> BoundView {
        match &self.camera {
            Some(active) => active.color_target,
            None => self.back_buffers[self.ring.active_index()],
        }
    }

    /// Draws a non-indexed triangle list.
    pub fn draw_vertex_array<V: Vertex>(&mut self, vertices: &[V]) -> RenderResult<()> {
        self.expect_state("draw_vertex_array", FrameState::Batching)?;
        if vertices.is_empty() {
            warn!("draw_vertex_array with no vertices");
            return Ok(());
        }
        let mut context = self.snapshot(V::LAYOUT.stride())?;
        let start = self.append_vertices(vertices);
        context.geometry = DrawGeometry::Vertices {
            start,
            count: vertices.len() as u32,
        };
        self.entries.push(BatchEntry::Draw(context));
        Ok(())
    }

    /// Draws an indexed triangle list. Indices are relative to `vertices`.
    pub fn draw_indexed_vertex_array<V: Vertex>(
        &mut self,
        vertices: &[V],
        indices: &[u32],
    ) -> RenderResult<()> {
        self.expect_state("draw_indexed_vertex_array", FrameState::Batching)?;
        if vertices.is_empty() || indices.is_empty() {
            warn!("draw_indexed_vertex_array with no geometry");
            return Ok(());
        }
        if let Some(index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(RenderError::InvalidBindingState(format!(
                "index {index} out of range for {} vertices",
                vertices.len()
            )));
        }
        let mut context = self.snapshot(V::LAYOUT.stride())?;
        let base_vertex = self.append_vertices(vertices);
        let start_index = self.indices.len() as u32;
        self.indices.extend_from_slice(indices);
        context.geometry = DrawGeometry::Indexed {
            start_index,
            count: indices.len() as u32,
            base_vertex: base_vertex as i32,
        };
        self.entries.push(BatchEntry::Draw(context));
        Ok(())
    }

    /// Appends vertices at a stride-aligned offset and returns the first
    /// vertex index.
    fn append_vertices<V: Vertex>(&mut self, vertices: &[V]) -> u32 {
        let stride = V::LAYOUT.stride() as usize;
        let padded = self.vertices.len().div_ceil(stride) * stride;
        self.vertices.resize(padded, 0);
        self.vertices.extend_from_slice(bytemuck::cast_slice(vertices));
        (padded / stride) as u32
    }

    /// Captures the current bindings for one draw.
    fn snapshot(&mut self, stride: u32) -> RenderResult<DrawContext> {
        let handle = self.bindings.material.unwrap_or(self.defaults[0]);
        let material = self
            .materials
            .get(handle.0 as usize)
            .ok_or_else(|| RenderError::UnknownHandle(format!("{handle:?}")))?;
        let pipeline = material.pipeline.ok_or_else(|| {
            RenderError::InvalidBindingState(format!(
                "material '{}' has no pipeline state",
                material.config.name
            ))
        })?;
        if material.vertex_layout().stride() != stride {
            return Err(RenderError::InvalidBindingState(format!(
                "material '{}' expects {:?} vertices",
                material.config.name,
                material.vertex_layout()
            )));
        }

        let camera_slot = self.camera_slot()?;
        let model_slot = self.model_slot()?;

        let textures: Vec<(u32, BoundView)> = bound_slots(&self.bindings.textures);
        let samplers: Vec<(u32, BoundSampler)> = bound_slots(&self.bindings.samplers);
        let user: Vec<(u32, ConstantSlot)> = bound_slots(&self.bindings.constants);
        let mut constants = vec![
            (CAMERA_CONSTANT_SLOT, camera_slot),
            (MODEL_CONSTANT_SLOT, model_slot),
        ];
        constants.extend_from_slice(&user);
        let span = TableSpan {
            constants: span_of(&constants),
            shader_resources: span_of(&textures),
            samplers: span_of(&samplers),
        };
        let offsets = self.descriptors.reserve(span)?;

        for (_, slot) in &user {
            if let Some(entry) = self.constant_buffers.get_mut(&slot.resource) {
                entry.read_by = Some(self.frame_serial);
            }
        }
        let (color_target, depth_target) = match &self.camera {
            Some(active) => (active.color_target, active.depth_target),
            None => (self.back_buffers[self.ring.active_index()], None),
        };

        Ok(DrawContext {
            pipeline,
            color_target,
            depth_target,
            textures,
            constants,
            samplers,
            offsets,
            span,
            stride,
            geometry: DrawGeometry::Vertices { start: 0, count: 0 },
        })
    }

    /// Current camera slot, or an identity camera for draws outside any
    /// camera.
    fn camera_slot(&mut self) -> RenderResult<ConstantSlot> {
        if let Some(slot) = self.constants.current_camera_slot() {
            return Ok(slot);
        }
        let slot = self.constants.next_camera_slot()?;
        self.constants
            .write(&self.device, &self.resources, &slot, &CameraConstants::default())?;
        Ok(slot)
    }

    /// Model slot holding the pending model constants.
    ///
    /// Reuses the current slot while the constants are unchanged; a slot
    /// already written this frame is never overwritten.
    fn model_slot(&mut self) -> RenderResult<ConstantSlot> {
        let mut slot = match self.constants.current_model_slot() {
            Some(slot) => slot,
            None => {
                self.bindings.model_written = false;
                self.constants.next_model_slot()?
            }
        };
        if self.bindings.model_written && !self.bindings.model_changed {
            return Ok(slot);
        }
        if self.bindings.model_written {
            slot = self.constants.next_model_slot()?;
        }
        self.constants
            .write(&self.device, &self.resources, &slot, &self.bindings.model)?;
        self.bindings.model_written = true;
        self.bindings.model_changed = false;
        Ok(slot)
    }

    // ---------------------------------------------------------------------
    // Shutdown
    // ---------------------------------------------------------------------

    /// Drains the queue and releases everything the renderer created.
    ///
    /// Heaps go first, then resources, then pipeline states. When the drain
    /// fails nothing is released: the device is considered lost and cleans
    /// up when dropped. Calling this twice is a no-op.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        info!("Shutting down renderer after {} frame(s)", self.frame_index);

        if let Err(e) = self.fence.drain(&self.queue) {
            error!("Queue drain failed during shutdown: {}", e);
            return Err(e);
        }

        self.descriptors.release_all(&self.device);
        self.retiring.clear();
        self.constant_buffers.clear();
        self.resources.release_all(&self.device);
        for pipeline in self.pipelines.drain(..) {
            self.device.release_pipeline_state(pipeline);
        }
        for material in &mut self.materials {
            material.pipeline = None;
        }
        debug!("Renderer resources released");
        Ok(())
    }
}

impl<D: RenderDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Renderer shutdown failed during drop: {}", e);
        }
    }
}

/// Grows `current` to hold `needed` bytes. Buffers never shrink.
fn ensure_geometry_buffer<D>(
    device: &D,
    resources: &mut ResourceTable,
    current: &mut Option<GeometryBuffer>,
    needed: u64,
    usage: BufferUsage,
    slot: usize,
) -> RenderResult<GeometryBuffer>
where
    D: ResourceDevice + ?Sized,
{
    if let Some(buffer) = *current {
        if buffer.capacity >= needed {
            return Ok(buffer);
        }
        resources.release(buffer.resource, device)?;
        *current = None;
    }

    let capacity = needed.next_power_of_two().max(MIN_GEOMETRY_CAPACITY);
    let label = if usage.contains(BufferUsage::INDEX) { "index" } else { "vertex" };
    let resource = resources.create_buffer(
        device,
        &BufferDesc {
            name: format!("slot {slot} {label} buffer"),
            size: capacity,
            usage,
            location: MemoryLocation::Upload,
            initial_state: ResourceState::Common,
        },
    )?;
    debug!("Slot {} {} buffer grown to {} bytes", slot, label, capacity);
    let buffer = GeometryBuffer { resource, capacity };
    *current = Some(buffer);
    Ok(buffer)
}

fn bound_slots<T: Copy>(slots: &[Option<T>]) -> Vec<(u32, T)> {
    slots
        .iter()
        .enumerate()
        .filter_map(|(slot, bound)| bound.map(|value| (slot as u32, value)))
        .collect()
}

fn span_of<T>(bound: &[(u32, T)]) -> u32 {
    bound.iter().map(|(slot, _)| slot + 1).max().unwrap_or(0)
}

/// Records batched entries into the active slot's list.
///
/// Targets, pipeline and geometry bindings are only re-issued when they
/// change between consecutive draws. Every view was created while batching,
/// so recording allocates no descriptors.
struct FrameRecorder<'a, D: RenderDevice> {
    device: &'a D,
    resources: &'a mut ResourceTable,
    descriptors: &'a mut DescriptorAllocator,
    list: &'a mut D::CommandList,
    vertex_buffer: Option<GeometryBuffer>,
    index_buffer: Option<GeometryBuffer>,
    targets: Option<(BoundView, Option<BoundView>)>,
    pipeline: Option<PipelineId>,
    vertex_stride: Option<u32>,
    index_bound: bool,
    draws: u32,
}

impl<D: RenderDevice> FrameRecorder<'_, D> {
    fn record(&mut self, entry: &BatchEntry) -> RenderResult<()> {
        match entry {
            BatchEntry::ClearColor { target, color } => {
                self.resources.transition_to(
                    target.resource,
                    ResourceState::RenderTarget,
                    &mut *self.list,
                )?;
                self.list.clear_render_target(target.view, *color)?;
                Ok(())
            }
            BatchEntry::ClearDepth {
                target,
                depth,
                stencil,
            } => {
                self.resources.transition_to(
                    target.resource,
                    ResourceState::DepthWrite,
                    &mut *self.list,
                )?;
                self.list.clear_depth_stencil(target.view, *depth, *stencil)?;
                Ok(())
            }
            BatchEntry::Draw(context) => self.draw(context),
        }
    }

    fn draw(&mut self, context: &DrawContext) -> RenderResult<()> {
        self.bind_targets(context.color_target, context.depth_target)?;
        if self.pipeline != Some(context.pipeline) {
            self.list.set_pipeline_state(context.pipeline)?;
            self.pipeline = Some(context.pipeline);
        }

        let views = context.offsets.views;
        for &(slot, texture) in &context.textures {
            self.resources.transition_to(
                texture.resource,
                ResourceState::PixelShaderResource,
                &mut *self.list,
            )?;
            self.descriptors.bind(
                self.device,
                DescriptorTable::ShaderResource,
                views,
                slot,
                texture.view,
            )?;
        }
        for &(slot, constants) in &context.constants {
            self.resources.transition_to(
                constants.resource,
                ResourceState::VertexAndConstantBuffer,
                &mut *self.list,
            )?;
            self.descriptors
                .bind(self.device, DescriptorTable::Constant, views, slot, constants.view)?;
        }
        for &(slot, sampler) in &context.samplers {
            self.descriptors.bind(
                self.device,
                DescriptorTable::Sampler,
                context.offsets.samplers,
                slot,
                sampler.view,
            )?;
        }
        for table in DescriptorTable::ALL {
            let count = context.span.get(table);
            if count > 0 {
                let base = self.descriptors.table_base(table, context.offsets.get(table));
                self.list.set_descriptor_table(table, base, count)?;
            }
        }

        let vertices = self.vertex_buffer.ok_or_else(|| {
            RenderError::InvalidBindingState("draw recorded without vertex data".to_string())
        })?;
        self.resources.transition_to(
            vertices.resource,
            ResourceState::VertexAndConstantBuffer,
            &mut *self.list,
        )?;
        if self.vertex_stride != Some(context.stride) {
            self.list.set_vertex_buffer(
                self.resources.raw(vertices.resource)?,
                context.stride,
                vertices.capacity,
            )?;
            self.vertex_stride = Some(context.stride);
        }

        match context.geometry {
            DrawGeometry::Vertices { start, count } => self.list.draw(count, start)?,
            DrawGeometry::Indexed {
                start_index,
                count,
                base_vertex,
            } => {
                let indices = self.index_buffer.ok_or_else(|| {
                    RenderError::InvalidBindingState("indexed draw without index data".to_string())
                })?;
                self.resources.transition_to(
                    indices.resource,
                    ResourceState::IndexBuffer,
                    &mut *self.list,
                )?;
                if !self.index_bound {
                    self.list
                        .set_index_buffer(self.resources.raw(indices.resource)?, indices.capacity)?;
                    self.index_bound = true;
                }
                self.list.draw_indexed(count, start_index, base_vertex)?;
            }
        }
        self.draws += 1;
        Ok(())
    }

    fn bind_targets(&mut self, color: BoundView, depth: Option<BoundView>) -> RenderResult<()> {
        self.resources
            .transition_to(color.resource, ResourceState::RenderTarget, &mut *self.list)?;
        if let Some(depth) = depth {
            self.resources
                .transition_to(depth.resource, ResourceState::DepthWrite, &mut *self.list)?;
        }
        if self.targets == Some((color, depth)) {
            return Ok(());
        }

        self.list
            .set_render_targets(Some(color.view), depth.map(|depth| depth.view))?;
        let ResourceKind::Texture { width, height, .. } = self.resources.kind(color.resource)?
        else {
            return Err(RenderError::InvalidBindingState(format!(
                "{:?} is not a texture",
                color.resource
            )));
        };
        self.list.set_viewport(Viewport::from_extent(width, height))?;
        self.targets = Some((color, depth));
        Ok(())
    }
}
