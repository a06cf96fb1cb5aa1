//! Headless backend that records calls instead of talking to a GPU.
//!
//! [`HeadlessDevice`] implements every capability trait by validating its
//! arguments and appending a [`RenderCall`] to a shared log. It also simulates
//! the GPU timeline so synchronization can be tested without hardware:
//!
//! - every executed list is guarded by the next fence value signaled after it
//! - resources and shader-visible descriptors referenced by that list inherit
//!   the guard
//! - resetting the list, writing the buffer or overwriting the descriptor
//!   before the guard completes is recorded as a [`Hazard`]
//! - barriers are checked against the state the resource will be in when the
//!   list runs, and only change the tracked state once the list is executed
//!
//! When the GPU "completes" work is controlled with [`Completion`].
//!
//! # Example
//!
//! ```
//! use kiln_rhi::headless::{Completion, HeadlessDevice};
//! use kiln_rhi::{GpuQueue, RenderDevice};
//!
//! let device = HeadlessDevice::with_completion(Completion::Deferred);
//! let queue = device.create_queue().unwrap();
//!
//! queue.signal(1).unwrap();
//! assert_eq!(queue.completed_value().unwrap(), 0);
//! device.complete_up_to(1);
//! assert_eq!(queue.completed_value().unwrap(), 1);
//! assert!(device.hazards().is_empty());
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::{
    CommandRecorder, DescriptorDevice, GpuQueue, PipelineDevice, PresentSurface, RenderDevice,
    ResourceDevice,
};
use crate::error::{RhiError, RhiResult};
use crate::types::{
    BindFlags, BufferDesc, BufferUsage, DescriptorHandle, DescriptorTable, HeapDesc, HeapId,
    HeapType, HeapVisibility, MemoryLocation, PipelineId, PipelineStateDesc, ResourceId,
    ResourceState, SamplerMode, SurfaceDesc, TextureDesc, TextureFormat, ViewKind, Viewport,
};

/// One recorded operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    CreateBuffer {
        id: ResourceId,
        size: u64,
        usage: BufferUsage,
        location: MemoryLocation,
    },
    CreateTexture {
        id: ResourceId,
        width: u32,
        height: u32,
        format: TextureFormat,
    },
    WriteBuffer {
        id: ResourceId,
        offset: u64,
        size: u64,
    },
    ReleaseResource {
        id: ResourceId,
    },
    CreateDescriptorHeap {
        id: HeapId,
        desc: HeapDesc,
    },
    CreateView {
        resource: ResourceId,
        kind: ViewKind,
        dest: DescriptorHandle,
    },
    CreateSampler {
        mode: SamplerMode,
        dest: DescriptorHandle,
    },
    CopyDescriptor {
        src: DescriptorHandle,
        dst: DescriptorHandle,
    },
    ReleaseDescriptorHeap {
        id: HeapId,
    },
    CreatePipelineState {
        id: PipelineId,
        name: String,
    },
    ReleasePipelineState {
        id: PipelineId,
    },
    ResetList {
        list: u32,
    },
    CloseList {
        list: u32,
    },
    Barrier {
        list: u32,
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    },
    ClearRenderTarget {
        list: u32,
        target: DescriptorHandle,
        color: [f32; 4],
    },
    ClearDepthStencil {
        list: u32,
        target: DescriptorHandle,
        depth: f32,
    },
    SetRenderTargets {
        list: u32,
        color: Option<DescriptorHandle>,
        depth: Option<DescriptorHandle>,
    },
    SetViewport {
        list: u32,
        viewport: Viewport,
    },
    SetPipelineState {
        list: u32,
        pipeline: PipelineId,
    },
    SetDescriptorHeaps {
        list: u32,
        heaps: Vec<HeapId>,
    },
    SetDescriptorTable {
        list: u32,
        table: DescriptorTable,
        base: DescriptorHandle,
        count: u32,
    },
    SetVertexBuffer {
        list: u32,
        buffer: ResourceId,
        stride: u32,
        size: u64,
    },
    SetIndexBuffer {
        list: u32,
        buffer: ResourceId,
        size: u64,
    },
    Draw {
        list: u32,
        vertex_count: u32,
        start_vertex: u32,
    },
    DrawIndexed {
        list: u32,
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
    },
    CopyBuffer {
        list: u32,
        src: ResourceId,
        dst: ResourceId,
        size: u64,
    },
    CopyBufferToTexture {
        list: u32,
        src: ResourceId,
        dst: ResourceId,
    },
    Execute {
        list: u32,
    },
    Signal {
        value: u64,
    },
    Wait {
        value: u64,
    },
    Present {
        index: usize,
    },
}

/// CPU/GPU ordering violation detected by the timeline simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hazard {
    /// A list was reset while the GPU could still be executing it.
    ListResetInFlight { list: u32, guard: u64, completed: u64 },
    /// An upload buffer was written while the GPU could still read it.
    BufferWriteInFlight {
        resource: ResourceId,
        guard: u64,
        completed: u64,
    },
    /// A shader-visible descriptor was overwritten while still referenced.
    DescriptorOverwriteInFlight {
        dst: DescriptorHandle,
        guard: u64,
        completed: u64,
    },
    /// A resource was destroyed while the GPU could still use it.
    ReleaseInFlight {
        resource: ResourceId,
        guard: u64,
        completed: u64,
    },
    /// A barrier's `before` state disagreed with the tracked state.
    StateMismatch {
        resource: ResourceId,
        expected: ResourceState,
        tracked: ResourceState,
    },
    /// A barrier whose before and after states are equal.
    RedundantBarrier {
        resource: ResourceId,
        state: ResourceState,
    },
}

/// When signaled fence values complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Completion {
    /// A value completes as soon as it is signaled.
    #[default]
    Immediate,
    /// Values complete only when waited on or via
    /// [`HeadlessDevice::complete_up_to`].
    Deferred,
    /// Nothing completes; every blocking wait times out.
    Stalled,
}

#[derive(Debug, Clone, Copy)]
enum ResourceKind {
    Buffer {
        size: u64,
        usage: BufferUsage,
        location: MemoryLocation,
    },
    Texture {
        bind_flags: BindFlags,
    },
}

#[derive(Debug)]
struct TrackedResource {
    kind: ResourceKind,
    state: ResourceState,
    guard: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SlotContent {
    View { resource: ResourceId, kind: ViewKind },
    Sampler(SamplerMode),
}

#[derive(Debug)]
struct TrackedHeap {
    desc: HeapDesc,
    slots: Vec<Option<SlotContent>>,
    guards: Vec<u64>,
}

#[derive(Debug, Default)]
struct TrackedList {
    open: bool,
    guard: u64,
    resources: HashSet<ResourceId>,
    descriptors: Vec<DescriptorHandle>,
    /// Target state of every barrier, applied when the list executes.
    transitions: Vec<(ResourceId, ResourceState)>,
}

impl TrackedList {
    /// State `resource` will be in at this point of the list.
    fn projected_state(&self, resource: ResourceId) -> Option<ResourceState> {
        self.transitions
            .iter()
            .rev()
            .find(|(id, _)| *id == resource)
            .map(|(_, state)| *state)
    }
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<RenderCall>,
    hazards: Vec<Hazard>,
    next_id: u64,
    resources: HashMap<ResourceId, TrackedResource>,
    heaps: HashMap<HeapId, TrackedHeap>,
    pipelines: HashSet<PipelineId>,
    lists: HashMap<u32, TrackedList>,
    pending_lists: Vec<u32>,
    completion: Completion,
    signaled: u64,
    completed: u64,
    fail_next_execute: bool,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn in_flight(&self, guard: u64) -> bool {
        guard > self.completed
    }

    fn resource(&self, id: ResourceId) -> RhiResult<&TrackedResource> {
        self.resources
            .get(&id)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown resource {id:?}")))
    }

    fn heap(&self, id: HeapId) -> RhiResult<&TrackedHeap> {
        self.heaps
            .get(&id)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown heap {id:?}")))
    }

    fn check_slot(&self, handle: DescriptorHandle) -> RhiResult<&TrackedHeap> {
        let heap = self.heap(handle.heap)?;
        if handle.index >= heap.desc.capacity {
            return Err(RhiError::InvalidHandle(format!(
                "descriptor index {} out of range for heap {:?} (capacity {})",
                handle.index, handle.heap, heap.desc.capacity
            )));
        }
        Ok(heap)
    }

    fn open_list(&mut self, list: u32) -> RhiResult<&mut TrackedList> {
        match self.lists.get_mut(&list) {
            Some(tracked) if tracked.open => Ok(tracked),
            Some(_) => Err(RhiError::InvalidHandle(format!(
                "command list {list} is not open for recording"
            ))),
            None => Err(RhiError::InvalidHandle(format!("unknown command list {list}"))),
        }
    }

    fn reference(&mut self, list: u32, resource: ResourceId) -> RhiResult<()> {
        self.resource(resource)?;
        self.open_list(list)?.resources.insert(resource);
        Ok(())
    }

    fn signal(&mut self, value: u64) -> RhiResult<()> {
        if value <= self.signaled {
            return Err(RhiError::InvalidHandle(format!(
                "fence value {value} does not advance past {}",
                self.signaled
            )));
        }
        self.signaled = value;

        for list_id in std::mem::take(&mut self.pending_lists) {
            let Some(list) = self.lists.get_mut(&list_id) else {
                continue;
            };
            list.guard = value;
            let resources: Vec<ResourceId> = list.resources.iter().copied().collect();
            let descriptors = list.descriptors.clone();

            for id in resources {
                if let Some(resource) = self.resources.get_mut(&id) {
                    resource.guard = resource.guard.max(value);
                }
            }
            for handle in descriptors {
                if let Some(heap) = self.heaps.get_mut(&handle.heap)
                    && let Some(guard) = heap.guards.get_mut(handle.index as usize)
                {
                    *guard = (*guard).max(value);
                }
            }
        }

        if self.completion == Completion::Immediate {
            self.completed = value;
        }
        self.calls.push(RenderCall::Signal { value });
        Ok(())
    }
}

/// Shared handle to the recorded state.
///
/// Cloning is cheap; every clone observes the same log.
#[derive(Clone, Default)]
pub struct HeadlessDevice {
    state: Arc<Mutex<State>>,
}

impl HeadlessDevice {
    /// Creates a device whose signals complete immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a device with the given completion behavior.
    pub fn with_completion(completion: Completion) -> Self {
        let device = Self::default();
        device.state.lock().completion = completion;
        device
    }

    /// Changes the completion behavior.
    pub fn set_completion(&self, completion: Completion) {
        let mut state = self.state.lock();
        state.completion = completion;
        if completion == Completion::Immediate {
            state.completed = state.signaled;
        }
    }

    /// Completes every signaled value up to `value`.
    pub fn complete_up_to(&self, value: u64) {
        let mut state = self.state.lock();
        state.completed = state.completed.max(value.min(state.signaled));
    }

    /// Get a copy of all recorded calls (for test assertions).
    pub fn calls(&self) -> Vec<RenderCall> {
        self.state.lock().calls.clone()
    }

    /// Clear recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Hazards detected so far.
    pub fn hazards(&self) -> Vec<Hazard> {
        self.state.lock().hazards.clone()
    }

    /// Counts calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&RenderCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Count draw and indexed draw calls.
    pub fn count_draws(&self) -> usize {
        self.count_calls(|c| matches!(c, RenderCall::Draw { .. } | RenderCall::DrawIndexed { .. }))
    }

    /// Count resource barriers.
    pub fn count_barriers(&self) -> usize {
        self.count_calls(|c| matches!(c, RenderCall::Barrier { .. }))
    }

    /// Count descriptor copies.
    pub fn count_descriptor_copies(&self) -> usize {
        self.count_calls(|c| matches!(c, RenderCall::CopyDescriptor { .. }))
    }

    /// Count list submissions.
    pub fn count_executes(&self) -> usize {
        self.count_calls(|c| matches!(c, RenderCall::Execute { .. }))
    }

    /// Writes into buffers created with any of `usage`, as `(id, offset, size)`.
    pub fn buffer_writes(&self, usage: BufferUsage) -> Vec<(ResourceId, u64, u64)> {
        let state = self.state.lock();
        let mut usages: HashMap<ResourceId, BufferUsage> = HashMap::new();
        let mut writes = Vec::new();
        for call in &state.calls {
            match call {
                RenderCall::CreateBuffer { id, usage, .. } => {
                    usages.insert(*id, *usage);
                }
                RenderCall::WriteBuffer { id, offset, size } => {
                    if usages.get(id).is_some_and(|u| u.intersects(usage)) {
                        writes.push((*id, *offset, *size));
                    }
                }
                _ => {}
            }
        }
        writes
    }

    /// State of `resource` after the barriers of every executed list.
    pub fn resource_state(&self, resource: ResourceId) -> Option<ResourceState> {
        self.state.lock().resources.get(&resource).map(|r| r.state)
    }

    /// Number of resources not yet released.
    pub fn live_resources(&self) -> usize {
        self.state.lock().resources.len()
    }

    /// Number of descriptor heaps not yet released.
    pub fn live_heaps(&self) -> usize {
        self.state.lock().heaps.len()
    }

    /// Number of pipeline states not yet released.
    pub fn live_pipelines(&self) -> usize {
        self.state.lock().pipelines.len()
    }

    /// Highest value signaled on any queue.
    pub fn last_signaled(&self) -> u64 {
        self.state.lock().signaled
    }

    /// Highest value completed.
    pub fn completed(&self) -> u64 {
        self.state.lock().completed
    }

    /// Makes the next [`GpuQueue::execute`] reject its list without running it.
    pub fn fail_next_execute(&self) {
        self.state.lock().fail_next_execute = true;
    }
}

impl ResourceDevice for HeadlessDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<ResourceId> {
        if desc.size == 0 {
            return Err(RhiError::ResourceCreation(format!(
                "buffer '{}' has zero size",
                desc.name
            )));
        }
        let mut state = self.state.lock();
        let id = ResourceId(state.next_id());
        state.resources.insert(
            id,
            TrackedResource {
                kind: ResourceKind::Buffer {
                    size: desc.size,
                    usage: desc.usage,
                    location: desc.location,
                },
                state: desc.initial_state,
                guard: 0,
            },
        );
        state.calls.push(RenderCall::CreateBuffer {
            id,
            size: desc.size,
            usage: desc.usage,
            location: desc.location,
        });
        Ok(id)
    }

    fn create_texture(&self, desc: &TextureDesc) -> RhiResult<ResourceId> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RhiError::ResourceCreation(format!(
                "texture '{}' has zero extent",
                desc.name
            )));
        }
        let mut state = self.state.lock();
        let id = ResourceId(state.next_id());
        state.resources.insert(
            id,
            TrackedResource {
                kind: ResourceKind::Texture {
                    bind_flags: desc.bind_flags,
                },
                state: desc.initial_state,
                guard: 0,
            },
        );
        state.calls.push(RenderCall::CreateTexture {
            id,
            width: desc.width,
            height: desc.height,
            format: desc.format,
        });
        Ok(id)
    }

    fn write_buffer(&self, buffer: ResourceId, offset: u64, data: &[u8]) -> RhiResult<()> {
        let mut state = self.state.lock();
        let resource = state.resource(buffer)?;
        let guard = resource.guard;
        match resource.kind {
            ResourceKind::Buffer {
                size,
                location: MemoryLocation::Upload,
                ..
            } => {
                if offset + data.len() as u64 > size {
                    return Err(RhiError::InvalidHandle(format!(
                        "write of {} bytes at {offset} overflows buffer {buffer:?} ({size} bytes)",
                        data.len()
                    )));
                }
            }
            _ => {
                return Err(RhiError::Unsupported(format!(
                    "{buffer:?} is not an upload buffer"
                )));
            }
        }
        if state.in_flight(guard) {
            let completed = state.completed;
            state.hazards.push(Hazard::BufferWriteInFlight {
                resource: buffer,
                guard,
                completed,
            });
        }
        state.calls.push(RenderCall::WriteBuffer {
            id: buffer,
            offset,
            size: data.len() as u64,
        });
        Ok(())
    }

    fn release_resource(&self, resource: ResourceId) {
        let mut state = self.state.lock();
        let Some(tracked) = state.resources.remove(&resource) else {
            return;
        };
        if state.in_flight(tracked.guard) {
            let completed = state.completed;
            state.hazards.push(Hazard::ReleaseInFlight {
                resource,
                guard: tracked.guard,
                completed,
            });
        }
        state.calls.push(RenderCall::ReleaseResource { id: resource });
    }
}

impl DescriptorDevice for HeadlessDevice {
    fn create_descriptor_heap(&self, desc: &HeapDesc) -> RhiResult<HeapId> {
        if desc.capacity == 0 {
            return Err(RhiError::ResourceCreation("descriptor heap with zero capacity".into()));
        }
        if desc.visibility == HeapVisibility::ShaderVisible
            && matches!(desc.heap_type, HeapType::RenderTarget | HeapType::DepthStencil)
        {
            return Err(RhiError::Unsupported(
                "render-target and depth-stencil heaps cannot be shader visible".into(),
            ));
        }
        let mut state = self.state.lock();
        let id = HeapId(state.next_id() as u32);
        state.heaps.insert(
            id,
            TrackedHeap {
                desc: *desc,
                slots: vec![None; desc.capacity as usize],
                guards: vec![0; desc.capacity as usize],
            },
        );
        state.calls.push(RenderCall::CreateDescriptorHeap { id, desc: *desc });
        Ok(id)
    }

    fn create_view(
        &self,
        resource: ResourceId,
        kind: ViewKind,
        dest: DescriptorHandle,
    ) -> RhiResult<()> {
        let mut state = self.state.lock();
        let heap = state.check_slot(dest)?;
        if heap.desc.heap_type != kind.heap_type()
            || heap.desc.visibility != HeapVisibility::Staging
        {
            return Err(RhiError::InvalidHandle(format!(
                "{} view cannot be written into heap {:?}",
                kind.name(),
                dest.heap
            )));
        }
        let supported = match (state.resource(resource)?.kind, kind) {
            (ResourceKind::Buffer { usage, .. }, ViewKind::Constant) => {
                usage.contains(BufferUsage::CONSTANT)
            }
            (ResourceKind::Texture { bind_flags }, kind) => bind_flags.allows(kind),
            _ => false,
        };
        if !supported {
            return Err(RhiError::Unsupported(format!(
                "{resource:?} does not support {} views",
                kind.name()
            )));
        }
        if let Some(heap) = state.heaps.get_mut(&dest.heap) {
            heap.slots[dest.index as usize] = Some(SlotContent::View { resource, kind });
        }
        state.calls.push(RenderCall::CreateView {
            resource,
            kind,
            dest,
        });
        Ok(())
    }

    fn create_sampler(&self, mode: SamplerMode, dest: DescriptorHandle) -> RhiResult<()> {
        let mut state = self.state.lock();
        let heap = state.check_slot(dest)?;
        if heap.desc.heap_type != HeapType::Sampler {
            return Err(RhiError::InvalidHandle(format!(
                "sampler cannot be written into heap {:?}",
                dest.heap
            )));
        }
        if let Some(heap) = state.heaps.get_mut(&dest.heap) {
            heap.slots[dest.index as usize] = Some(SlotContent::Sampler(mode));
        }
        state.calls.push(RenderCall::CreateSampler { mode, dest });
        Ok(())
    }

    fn copy_descriptor(&self, src: DescriptorHandle, dst: DescriptorHandle) -> RhiResult<()> {
        let mut state = self.state.lock();
        let src_heap = state.check_slot(src)?;
        let src_type = src_heap.desc.heap_type;
        if src_heap.desc.visibility != HeapVisibility::Staging {
            return Err(RhiError::InvalidHandle(format!(
                "copy source heap {:?} is not a staging heap",
                src.heap
            )));
        }
        let content = src_heap.slots[src.index as usize].ok_or_else(|| {
            RhiError::InvalidHandle(format!("copy from empty descriptor {src:?}"))
        })?;

        let dst_heap = state.check_slot(dst)?;
        if dst_heap.desc.heap_type != src_type {
            return Err(RhiError::InvalidHandle(format!(
                "copy between heaps of different types ({:?} -> {:?})",
                src.heap, dst.heap
            )));
        }
        let guard = dst_heap.guards[dst.index as usize];
        if state.in_flight(guard) {
            let completed = state.completed;
            state.hazards.push(Hazard::DescriptorOverwriteInFlight {
                dst,
                guard,
                completed,
            });
        }
        if let Some(heap) = state.heaps.get_mut(&dst.heap) {
            heap.slots[dst.index as usize] = Some(content);
        }
        state.calls.push(RenderCall::CopyDescriptor { src, dst });
        Ok(())
    }

    fn release_descriptor_heap(&self, heap: HeapId) {
        let mut state = self.state.lock();
        if state.heaps.remove(&heap).is_some() {
            state.calls.push(RenderCall::ReleaseDescriptorHeap { id: heap });
        }
    }
}

impl PipelineDevice for HeadlessDevice {
    fn create_pipeline_state(&self, desc: &PipelineStateDesc) -> RhiResult<PipelineId> {
        if desc.vertex_shader.is_empty() || desc.pixel_shader.is_empty() {
            return Err(RhiError::ResourceCreation(format!(
                "pipeline '{}' is missing shader bytecode",
                desc.name
            )));
        }
        let mut state = self.state.lock();
        let id = PipelineId(state.next_id());
        state.pipelines.insert(id);
        state.calls.push(RenderCall::CreatePipelineState {
            id,
            name: desc.name.clone(),
        });
        Ok(id)
    }

    fn release_pipeline_state(&self, pipeline: PipelineId) {
        let mut state = self.state.lock();
        if state.pipelines.remove(&pipeline) {
            state.calls.push(RenderCall::ReleasePipelineState { id: pipeline });
        }
    }
}

impl RenderDevice for HeadlessDevice {
    type CommandList = HeadlessCommandList;
    type Queue = HeadlessQueue;
    type Surface = HeadlessSurface;

    fn create_command_list(&self) -> RhiResult<HeadlessCommandList> {
        let mut state = self.state.lock();
        let id = state.next_id() as u32;
        state.lists.insert(id, TrackedList::default());
        debug!("Created headless command list {}", id);
        Ok(HeadlessCommandList {
            id,
            state: self.state.clone(),
        })
    }

    fn create_queue(&self) -> RhiResult<HeadlessQueue> {
        Ok(HeadlessQueue {
            state: self.state.clone(),
        })
    }

    fn create_surface(&self, desc: &SurfaceDesc) -> RhiResult<HeadlessSurface> {
        if desc.buffer_count == 0 {
            return Err(RhiError::ResourceCreation("surface needs at least one buffer".into()));
        }
        let buffers = (0..desc.buffer_count)
            .map(|i| {
                self.create_texture(&TextureDesc {
                    name: format!("back buffer {i}"),
                    width: desc.width,
                    height: desc.height,
                    format: desc.format,
                    bind_flags: BindFlags::RENDER_TARGET,
                    initial_state: ResourceState::Present,
                })
            })
            .collect::<RhiResult<Vec<_>>>()?;
        Ok(HeadlessSurface {
            state: self.state.clone(),
            buffers,
            current: 0,
            extent: (desc.width, desc.height),
            format: desc.format,
        })
    }

    fn name(&self) -> &'static str {
        "headless"
    }
}

/// Command list of the headless backend.
pub struct HeadlessCommandList {
    id: u32,
    state: Arc<Mutex<State>>,
}

impl HeadlessCommandList {
    /// Id used in [`RenderCall`]s recorded by this list.
    pub fn id(&self) -> u32 {
        self.id
    }

    fn record(&self, call: RenderCall) -> RhiResult<()> {
        let mut state = self.state.lock();
        state.open_list(self.id)?;
        state.calls.push(call);
        Ok(())
    }
}

impl CommandRecorder for HeadlessCommandList {
    fn reset(&mut self) -> RhiResult<()> {
        let mut state = self.state.lock();
        let completed = state.completed;
        let list = state
            .lists
            .get_mut(&self.id)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown command list {}", self.id)))?;
        let guard = list.guard;
        list.open = true;
        list.resources.clear();
        list.descriptors.clear();
        list.transitions.clear();
        if guard > completed {
            warn!("Command list {} reset while in flight", self.id);
            state.hazards.push(Hazard::ListResetInFlight {
                list: self.id,
                guard,
                completed,
            });
        }
        state.calls.push(RenderCall::ResetList { list: self.id });
        Ok(())
    }

    fn close(&mut self) -> RhiResult<()> {
        let mut state = self.state.lock();
        state.open_list(self.id)?.open = false;
        state.calls.push(RenderCall::CloseList { list: self.id });
        Ok(())
    }

    fn resource_barrier(
        &mut self,
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    ) -> RhiResult<()> {
        let mut state = self.state.lock();
        state.reference(self.id, resource)?;
        if before == after {
            state.hazards.push(Hazard::RedundantBarrier {
                resource,
                state: before,
            });
        }
        let projected = state
            .lists
            .get(&self.id)
            .and_then(|list| list.projected_state(resource));
        let tracked = projected.or_else(|| state.resources.get(&resource).map(|r| r.state));
        if let Some(tracked) = tracked
            && tracked != before
        {
            state.hazards.push(Hazard::StateMismatch {
                resource,
                expected: before,
                tracked,
            });
        }
        state.open_list(self.id)?.transitions.push((resource, after));
        state.calls.push(RenderCall::Barrier {
            list: self.id,
            resource,
            before,
            after,
        });
        Ok(())
    }

    fn clear_render_target(&mut self, target: DescriptorHandle, color: [f32; 4]) -> RhiResult<()> {
        {
            let state = self.state.lock();
            state.check_slot(target)?;
        }
        self.record(RenderCall::ClearRenderTarget {
            list: self.id,
            target,
            color,
        })
    }

    fn clear_depth_stencil(
        &mut self,
        target: DescriptorHandle,
        depth: f32,
        _stencil: u8,
    ) -> RhiResult<()> {
        {
            let state = self.state.lock();
            state.check_slot(target)?;
        }
        self.record(RenderCall::ClearDepthStencil {
            list: self.id,
            target,
            depth,
        })
    }

    fn set_render_targets(
        &mut self,
        color: Option<DescriptorHandle>,
        depth: Option<DescriptorHandle>,
    ) -> RhiResult<()> {
        {
            let state = self.state.lock();
            for handle in color.iter().chain(depth.iter()) {
                state.check_slot(*handle)?;
            }
        }
        self.record(RenderCall::SetRenderTargets {
            list: self.id,
            color,
            depth,
        })
    }

    fn set_viewport(&mut self, viewport: Viewport) -> RhiResult<()> {
        self.record(RenderCall::SetViewport {
            list: self.id,
            viewport,
        })
    }

    fn set_pipeline_state(&mut self, pipeline: PipelineId) -> RhiResult<()> {
        if !self.state.lock().pipelines.contains(&pipeline) {
            return Err(RhiError::InvalidHandle(format!("unknown pipeline {pipeline:?}")));
        }
        self.record(RenderCall::SetPipelineState {
            list: self.id,
            pipeline,
        })
    }

    fn set_descriptor_heaps(&mut self, heaps: &[HeapId]) -> RhiResult<()> {
        {
            let state = self.state.lock();
            for heap in heaps {
                if state.heap(*heap)?.desc.visibility != HeapVisibility::ShaderVisible {
                    return Err(RhiError::InvalidHandle(format!(
                        "heap {heap:?} is not shader visible"
                    )));
                }
            }
        }
        self.record(RenderCall::SetDescriptorHeaps {
            list: self.id,
            heaps: heaps.to_vec(),
        })
    }

    fn set_descriptor_table(
        &mut self,
        table: DescriptorTable,
        base: DescriptorHandle,
        count: u32,
    ) -> RhiResult<()> {
        let mut state = self.state.lock();
        let heap = state.heap(base.heap)?;
        if heap.desc.heap_type != table.heap_type()
            || heap.desc.visibility != HeapVisibility::ShaderVisible
        {
            return Err(RhiError::InvalidHandle(format!(
                "table {table:?} cannot point into heap {:?}",
                base.heap
            )));
        }
        if base.index + count > heap.desc.capacity {
            return Err(RhiError::InvalidHandle(format!(
                "table {table:?} range {}..{} exceeds heap capacity {}",
                base.index,
                base.index + count,
                heap.desc.capacity
            )));
        }
        let referenced: Vec<ResourceId> = (base.index..base.index + count)
            .filter_map(|i| match heap.slots[i as usize] {
                Some(SlotContent::View { resource, .. }) => Some(resource),
                _ => None,
            })
            .collect();

        let list = state.open_list(self.id)?;
        list.descriptors
            .extend((0..count).map(|i| base.offset(i)));
        list.resources.extend(referenced);
        state.calls.push(RenderCall::SetDescriptorTable {
            list: self.id,
            table,
            base,
            count,
        });
        Ok(())
    }

    fn set_vertex_buffer(&mut self, buffer: ResourceId, stride: u32, size: u64) -> RhiResult<()> {
        self.state.lock().reference(self.id, buffer)?;
        self.record(RenderCall::SetVertexBuffer {
            list: self.id,
            buffer,
            stride,
            size,
        })
    }

    fn set_index_buffer(&mut self, buffer: ResourceId, size: u64) -> RhiResult<()> {
        self.state.lock().reference(self.id, buffer)?;
        self.record(RenderCall::SetIndexBuffer {
            list: self.id,
            buffer,
            size,
        })
    }

    fn draw(&mut self, vertex_count: u32, start_vertex: u32) -> RhiResult<()> {
        self.record(RenderCall::Draw {
            list: self.id,
            vertex_count,
            start_vertex,
        })
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
    ) -> RhiResult<()> {
        self.record(RenderCall::DrawIndexed {
            list: self.id,
            index_count,
            start_index,
            base_vertex,
        })
    }

    fn copy_buffer(&mut self, src: ResourceId, dst: ResourceId, size: u64) -> RhiResult<()> {
        {
            let mut state = self.state.lock();
            state.reference(self.id, src)?;
            state.reference(self.id, dst)?;
        }
        self.record(RenderCall::CopyBuffer {
            list: self.id,
            src,
            dst,
            size,
        })
    }

    fn copy_buffer_to_texture(&mut self, src: ResourceId, dst: ResourceId) -> RhiResult<()> {
        {
            let mut state = self.state.lock();
            state.reference(self.id, src)?;
            state.reference(self.id, dst)?;
        }
        self.record(RenderCall::CopyBufferToTexture {
            list: self.id,
            src,
            dst,
        })
    }
}

/// Queue of the headless backend.
pub struct HeadlessQueue {
    state: Arc<Mutex<State>>,
}

impl GpuQueue for HeadlessQueue {
    type CommandList = HeadlessCommandList;

    fn execute(&self, list: &HeadlessCommandList) -> RhiResult<()> {
        let mut state = self.state.lock();
        match state.lists.get(&list.id) {
            Some(tracked) if !tracked.open => {}
            Some(_) => {
                return Err(RhiError::InvalidHandle(format!(
                    "command list {} executed while still open",
                    list.id
                )));
            }
            None => {
                return Err(RhiError::InvalidHandle(format!("unknown command list {}", list.id)));
            }
        }
        if std::mem::take(&mut state.fail_next_execute) {
            return Err(RhiError::InvalidHandle(format!(
                "command list {} rejected by the queue",
                list.id
            )));
        }

        let transitions = state
            .lists
            .get(&list.id)
            .map(|tracked| tracked.transitions.clone())
            .unwrap_or_default();
        for (resource, after) in transitions {
            if let Some(tracked) = state.resources.get_mut(&resource) {
                tracked.state = after;
            }
        }
        state.pending_lists.push(list.id);
        state.calls.push(RenderCall::Execute { list: list.id });
        Ok(())
    }

    fn signal(&self, value: u64) -> RhiResult<()> {
        self.state.lock().signal(value)
    }

    fn completed_value(&self) -> RhiResult<u64> {
        Ok(self.state.lock().completed)
    }

    fn wait_for_value(&self, value: u64, _timeout: Duration) -> RhiResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RenderCall::Wait { value });
        if state.completed >= value {
            return Ok(());
        }
        // A value that was never signaled would block forever.
        if state.completion == Completion::Stalled || value > state.signaled {
            return Err(RhiError::SynchronizationTimeout {
                value,
                completed: state.completed,
            });
        }
        state.completed = value;
        Ok(())
    }
}

/// Offscreen surface of the headless backend.
pub struct HeadlessSurface {
    state: Arc<Mutex<State>>,
    buffers: Vec<ResourceId>,
    current: usize,
    extent: (u32, u32),
    format: TextureFormat,
}

impl PresentSurface for HeadlessSurface {
    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn back_buffer(&self, index: usize) -> RhiResult<ResourceId> {
        self.buffers
            .get(index)
            .copied()
            .ok_or_else(|| RhiError::InvalidHandle(format!("no back buffer {index}")))
    }

    fn current_index(&self) -> usize {
        self.current
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn format(&self) -> TextureFormat {
        self.format
    }

    fn present(&mut self) -> RhiResult<usize> {
        self.state.lock().calls.push(RenderCall::Present {
            index: self.current,
        });
        self.current = (self.current + 1) % self.buffers.len();
        Ok(self.current)
    }
}
