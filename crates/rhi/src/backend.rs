//! Capability traits implemented by every backend.
//!
//! The renderer never talks to a native API directly. Each collaborator gets
//! the narrowest trait that covers what it does:
//!
//! - [`ResourceDevice`] creates, writes and releases buffers and textures
//! - [`DescriptorDevice`] owns descriptor heaps, views and copies between them
//! - [`PipelineDevice`] compiles pipeline states
//! - [`CommandRecorder`] records into one command list
//! - [`GpuQueue`] executes lists and exposes the fence timeline
//! - [`PresentSurface`] hands out back buffers and advances on present
//!
//! [`RenderDevice`] ties them together with the associated list, queue and
//! surface types of one backend.

use std::time::Duration;

use crate::error::RhiResult;
use crate::types::{
    BufferDesc, DescriptorHandle, DescriptorTable, HeapDesc, HeapId, PipelineId,
    PipelineStateDesc, ResourceId, ResourceState, SamplerMode, SurfaceDesc, TextureDesc,
    TextureFormat, ViewKind, Viewport,
};

/// Creation and CPU access of GPU resources.
pub trait ResourceDevice {
    /// Creates a buffer in the requested memory.
    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<ResourceId>;

    /// Creates a 2D texture.
    fn create_texture(&self, desc: &TextureDesc) -> RhiResult<ResourceId>;

    /// Copies `data` into an upload-memory buffer at `offset`.
    ///
    /// The caller guarantees the GPU no longer reads the written range.
    fn write_buffer(&self, buffer: ResourceId, offset: u64, data: &[u8]) -> RhiResult<()>;

    /// Destroys a resource. Unknown ids are ignored.
    fn release_resource(&self, resource: ResourceId);
}

/// Descriptor heaps and the views stored in them.
pub trait DescriptorDevice {
    /// Creates a fixed-capacity heap.
    fn create_descriptor_heap(&self, desc: &HeapDesc) -> RhiResult<HeapId>;

    /// Writes a view of `resource` into `dest`.
    fn create_view(&self, resource: ResourceId, kind: ViewKind, dest: DescriptorHandle)
    -> RhiResult<()>;

    /// Writes a sampler into `dest`, which must live in a sampler heap.
    fn create_sampler(&self, mode: SamplerMode, dest: DescriptorHandle) -> RhiResult<()>;

    /// Copies one descriptor from a staging heap into another heap of the
    /// same type.
    fn copy_descriptor(&self, src: DescriptorHandle, dst: DescriptorHandle) -> RhiResult<()>;

    /// Destroys a heap and every view it holds.
    fn release_descriptor_heap(&self, heap: HeapId);
}

/// Pipeline state compilation.
pub trait PipelineDevice {
    fn create_pipeline_state(&self, desc: &PipelineStateDesc) -> RhiResult<PipelineId>;

    fn release_pipeline_state(&self, pipeline: PipelineId);
}

/// Records commands into one list.
///
/// A list is reset before recording and closed before execution. Recording
/// methods validate handles eagerly and report bad ones as
/// [`RhiError::InvalidHandle`](crate::RhiError::InvalidHandle).
pub trait CommandRecorder: Send {
    /// Resets the list and its allocator and opens it for recording.
    fn reset(&mut self) -> RhiResult<()>;

    /// Closes the list; it may be executed afterwards.
    fn close(&mut self) -> RhiResult<()>;

    fn resource_barrier(
        &mut self,
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    ) -> RhiResult<()>;

    fn clear_render_target(&mut self, target: DescriptorHandle, color: [f32; 4]) -> RhiResult<()>;

    fn clear_depth_stencil(&mut self, target: DescriptorHandle, depth: f32, stencil: u8)
    -> RhiResult<()>;

    fn set_render_targets(
        &mut self,
        color: Option<DescriptorHandle>,
        depth: Option<DescriptorHandle>,
    ) -> RhiResult<()>;

    fn set_viewport(&mut self, viewport: Viewport) -> RhiResult<()>;

    fn set_pipeline_state(&mut self, pipeline: PipelineId) -> RhiResult<()>;

    /// Binds the shader-visible heaps tables are addressed in.
    fn set_descriptor_heaps(&mut self, heaps: &[HeapId]) -> RhiResult<()>;

    /// Points `table` at `count` descriptors starting at `base`.
    fn set_descriptor_table(
        &mut self,
        table: DescriptorTable,
        base: DescriptorHandle,
        count: u32,
    ) -> RhiResult<()>;

    fn set_vertex_buffer(&mut self, buffer: ResourceId, stride: u32, size: u64) -> RhiResult<()>;

    /// Binds a buffer of 32-bit indices.
    fn set_index_buffer(&mut self, buffer: ResourceId, size: u64) -> RhiResult<()>;

    fn draw(&mut self, vertex_count: u32, start_vertex: u32) -> RhiResult<()>;

    fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32)
    -> RhiResult<()>;

    fn copy_buffer(&mut self, src: ResourceId, dst: ResourceId, size: u64) -> RhiResult<()>;

    /// Copies tightly packed rows from `src` into mip 0 of `dst`.
    fn copy_buffer_to_texture(&mut self, src: ResourceId, dst: ResourceId) -> RhiResult<()>;
}

/// Submission queue and its fence timeline.
pub trait GpuQueue: Send {
    type CommandList: CommandRecorder;

    /// Submits a closed list.
    fn execute(&self, list: &Self::CommandList) -> RhiResult<()>;

    /// Signals `value` on the queue's fence once prior work completes.
    fn signal(&self, value: u64) -> RhiResult<()>;

    /// Highest value the GPU reported complete.
    fn completed_value(&self) -> RhiResult<u64>;

    /// Blocks until `completed_value() >= value`.
    ///
    /// # Errors
    ///
    /// [`RhiError::SynchronizationTimeout`](crate::RhiError::SynchronizationTimeout)
    /// when `timeout` elapses first.
    fn wait_for_value(&self, value: u64, timeout: Duration) -> RhiResult<()>;
}

/// Ring of presentable back buffers.
pub trait PresentSurface: Send {
    fn buffer_count(&self) -> usize;

    /// Resource backing buffer `index`. The surface owns it.
    fn back_buffer(&self, index: usize) -> RhiResult<ResourceId>;

    /// Buffer currently being rendered to.
    fn current_index(&self) -> usize;

    fn extent(&self) -> (u32, u32);

    fn format(&self) -> TextureFormat;

    /// Presents the current buffer and returns the index of the next one.
    fn present(&mut self) -> RhiResult<usize>;
}

/// A complete backend.
pub trait RenderDevice: ResourceDevice + DescriptorDevice + PipelineDevice + Send {
    type CommandList: CommandRecorder;
    type Queue: GpuQueue<CommandList = Self::CommandList>;
    type Surface: PresentSurface;

    fn create_command_list(&self) -> RhiResult<Self::CommandList>;

    fn create_queue(&self) -> RhiResult<Self::Queue>;

    fn create_surface(&self, desc: &SurfaceDesc) -> RhiResult<Self::Surface>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
