//! Descriptor allocation.
//!
//! Views live in two tiers:
//!
//! - **Staging heaps** hold one view per `(resource, view kind)` and one per
//!   sampler mode. They are created on first request and stay put until the
//!   resource is released, when their slots return to the heap's free list.
//! - **Shader-visible heaps** hold what draws actually read. They are split
//!   into one partition per frame slot, and each partition into a constant,
//!   a shader-resource and a sampler table range:
//!
//! ```text
//! visible view heap   | frame 0: constants | textures | frame 1: constants | textures | ...
//! visible sampler heap| frame 0: samplers  | frame 1: samplers  | ...
//! ```
//!
//! A draw reserves a range at a shared per-frame offset; binding copies the
//! staging view into `table start + offset + slot`, unless the destination
//! already holds that exact view.

use std::collections::HashMap;

use kiln_core::DescriptorBudget;
use kiln_rhi::{
    DescriptorDevice, DescriptorHandle, DescriptorTable, HeapDesc, HeapId, HeapType,
    HeapVisibility, SamplerMode, ViewKind,
};
use tracing::{debug, warn};

use crate::error::{RenderError, RenderResult};
use crate::resource::{ResourceHandle, ResourceTable};

/// Bump allocator over one fixed-capacity heap, with a free list for
/// recycled slots.
#[derive(Debug)]
pub struct DescriptorHeap {
    id: HeapId,
    desc: HeapDesc,
    cursor: u32,
    free: Vec<u32>,
    pool: &'static str,
}

impl DescriptorHeap {
    /// Creates the heap on `device`. `pool` names it in errors.
    pub fn create<D>(device: &D, desc: HeapDesc, pool: &'static str) -> RenderResult<Self>
    where
        D: DescriptorDevice + ?Sized,
    {
        let id = device.create_descriptor_heap(&desc)?;
        debug!("Created {} ({} descriptors)", pool, desc.capacity);
        Ok(Self {
            id,
            desc,
            cursor: 0,
            free: Vec::new(),
            pool,
        })
    }

    /// Hands out a recycled slot, or the next unused one.
    pub fn allocate(&mut self) -> RenderResult<DescriptorHandle> {
        if let Some(index) = self.free.pop() {
            return Ok(DescriptorHandle::new(self.id, index));
        }
        if self.cursor >= self.desc.capacity {
            return Err(RenderError::CapacityExhausted {
                pool: self.pool,
                capacity: self.desc.capacity,
            });
        }
        let handle = DescriptorHandle::new(self.id, self.cursor);
        self.cursor += 1;
        Ok(handle)
    }

    #[inline]
    pub fn id(&self) -> HeapId {
        self.id
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.desc.capacity
    }

    /// Returns `handle` to the free list.
    ///
    /// The caller guarantees that no pending GPU work reads the slot.
    pub fn recycle(&mut self, handle: DescriptorHandle) {
        debug_assert_eq!(handle.heap, self.id);
        debug_assert!(handle.index < self.cursor);
        self.free.push(handle.index);
    }

    #[inline]
    pub fn used(&self) -> u32 {
        self.cursor - self.free.len() as u32
    }
}

/// Highest bound slot + 1 per table for one draw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableSpan {
    pub constants: u32,
    pub shader_resources: u32,
    pub samplers: u32,
}

impl TableSpan {
    pub fn get(&self, table: DescriptorTable) -> u32 {
        match table {
            DescriptorTable::Constant => self.constants,
            DescriptorTable::ShaderResource => self.shader_resources,
            DescriptorTable::Sampler => self.samplers,
        }
    }

    /// Distance the shared view cursor moves past a range of this span.
    pub fn view_width(&self) -> u32 {
        self.constants.max(self.shader_resources)
    }
}

/// Start of a reserved range in each table.
///
/// Constant and shader-resource tables share one offset; samplers live in a
/// heap of their own and keep a separate cursor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RangeOffsets {
    pub views: u32,
    pub samplers: u32,
}

impl RangeOffsets {
    pub fn get(&self, table: DescriptorTable) -> u32 {
        match table {
            DescriptorTable::Constant | DescriptorTable::ShaderResource => self.views,
            DescriptorTable::Sampler => self.samplers,
        }
    }
}

/// Copies performed and skipped since the last [`DescriptorAllocator::take_stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub copies: u64,
    pub skipped: u64,
}

/// Shader-visible heap with a record of what each slot holds.
#[derive(Debug)]
struct VisibleHeap {
    heap: DescriptorHeap,
    shadow: Vec<Option<DescriptorHandle>>,
}

impl VisibleHeap {
    /// Forgets every slot that holds a copy of `src`.
    fn invalidate(&mut self, src: DescriptorHandle) -> usize {
        let mut cleared = 0;
        for recorded in &mut self.shadow {
            if *recorded == Some(src) {
                *recorded = None;
                cleared += 1;
            }
        }
        cleared
    }

    fn create<D>(
        device: &D,
        heap_type: HeapType,
        capacity: u32,
        pool: &'static str,
    ) -> RenderResult<Self>
    where
        D: DescriptorDevice + ?Sized,
    {
        let heap = DescriptorHeap::create(
            device,
            HeapDesc {
                heap_type,
                visibility: HeapVisibility::ShaderVisible,
                capacity,
            },
            pool,
        )?;
        Ok(Self {
            heap,
            shadow: vec![None; capacity as usize],
        })
    }
}

/// Staging views, samplers and the per-frame shader-visible tables.
#[derive(Debug)]
pub struct DescriptorAllocator {
    staging_views: DescriptorHeap,
    staging_samplers: DescriptorHeap,
    render_targets: DescriptorHeap,
    depth_stencils: DescriptorHeap,
    visible_views: VisibleHeap,
    visible_samplers: VisibleHeap,
    budget: DescriptorBudget,
    partitions: u32,
    partition: u32,
    cursor: RangeOffsets,
    views: HashMap<(ResourceHandle, ViewKind), DescriptorHandle>,
    samplers: HashMap<SamplerMode, DescriptorHandle>,
    stats: CopyStats,
}

impl DescriptorAllocator {
    /// Creates every heap, with `partitions` frame partitions in the visible ones.
    pub fn new<D>(device: &D, budget: &DescriptorBudget, partitions: usize) -> RenderResult<Self>
    where
        D: DescriptorDevice + ?Sized,
    {
        let staging = |heap_type, capacity, pool| {
            DescriptorHeap::create(
                device,
                HeapDesc {
                    heap_type,
                    visibility: HeapVisibility::Staging,
                    capacity,
                },
                pool,
            )
        };
        let staging_views = staging(
            HeapType::ConstantShaderResource,
            budget.staging_views,
            "staging view heap",
        )?;
        let staging_samplers =
            staging(HeapType::Sampler, budget.staging_samplers, "staging sampler heap")?;
        let render_targets = staging(
            HeapType::RenderTarget,
            budget.render_target_views,
            "render-target view heap",
        )?;
        let depth_stencils = staging(
            HeapType::DepthStencil,
            budget.depth_stencil_views,
            "depth-stencil view heap",
        )?;

        let partitions = partitions as u32;
        let per_frame_views =
            budget.constant_table_per_frame + budget.shader_resource_table_per_frame;
        let visible_views = VisibleHeap::create(
            device,
            HeapType::ConstantShaderResource,
            per_frame_views * partitions,
            "shader-visible view heap",
        )?;
        let visible_samplers = VisibleHeap::create(
            device,
            HeapType::Sampler,
            budget.sampler_table_per_frame * partitions,
            "shader-visible sampler heap",
        )?;

        Ok(Self {
            staging_views,
            staging_samplers,
            render_targets,
            depth_stencils,
            visible_views,
            visible_samplers,
            budget: *budget,
            partitions,
            partition: 0,
            cursor: RangeOffsets::default(),
            views: HashMap::new(),
            samplers: HashMap::new(),
            stats: CopyStats::default(),
        })
    }

    /// Selects the partition of frame slot `slot` and rewinds the range cursor.
    pub fn begin_frame(&mut self, slot: usize) -> RenderResult<()> {
        let slot = slot as u32;
        if slot >= self.partitions {
            return Err(RenderError::UnknownHandle(format!(
                "descriptor partition {slot} of {}",
                self.partitions
            )));
        }
        self.partition = slot;
        self.cursor = RangeOffsets::default();
        Ok(())
    }

    /// Shader-visible heaps, in the order they are bound.
    pub fn visible_heaps(&self) -> [HeapId; 2] {
        [self.visible_views.heap.id(), self.visible_samplers.heap.id()]
    }

    /// Offsets the next reservation would start at.
    pub fn cursor(&self) -> RangeOffsets {
        self.cursor
    }

    fn table_capacity(&self, table: DescriptorTable) -> u32 {
        match table {
            DescriptorTable::Constant => self.budget.constant_table_per_frame,
            DescriptorTable::ShaderResource => self.budget.shader_resource_table_per_frame,
            DescriptorTable::Sampler => self.budget.sampler_table_per_frame,
        }
    }

    fn table_start(&self, table: DescriptorTable) -> u32 {
        let per_frame_views =
            self.budget.constant_table_per_frame + self.budget.shader_resource_table_per_frame;
        match table {
            DescriptorTable::Constant => self.partition * per_frame_views,
            DescriptorTable::ShaderResource => {
                self.partition * per_frame_views + self.budget.constant_table_per_frame
            }
            DescriptorTable::Sampler => self.partition * self.budget.sampler_table_per_frame,
        }
    }

    /// First descriptor of `table` at `offset` in the current partition.
    pub fn table_base(&self, table: DescriptorTable, offset: u32) -> DescriptorHandle {
        let heap = match table {
            DescriptorTable::Sampler => self.visible_samplers.heap.id(),
            _ => self.visible_views.heap.id(),
        };
        DescriptorHandle::new(heap, self.table_start(table) + offset)
    }

    /// Reserves a range for one draw and returns its offsets.
    ///
    /// # Errors
    ///
    /// [`RenderError::CapacityExhausted`] when a table the draw uses cannot
    /// hold its span in the current partition. The cursor is left untouched
    /// in that case.
    pub fn reserve(&mut self, span: TableSpan) -> RenderResult<RangeOffsets> {
        let offsets = self.cursor;
        for table in DescriptorTable::ALL {
            let count = span.get(table);
            let capacity = self.table_capacity(table);
            if count > 0 && offsets.get(table) + count > capacity {
                return Err(RenderError::CapacityExhausted {
                    pool: table_pool(table),
                    capacity,
                });
            }
        }
        self.cursor.views += span.view_width();
        self.cursor.samplers += span.samplers;
        Ok(offsets)
    }

    /// Permanent staging view of `resource`, created on first request.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidBindingState`] if the resource was not created
    /// to support `kind`.
    pub fn view<D>(
        &mut self,
        device: &D,
        resources: &ResourceTable,
        resource: ResourceHandle,
        kind: ViewKind,
    ) -> RenderResult<DescriptorHandle>
    where
        D: DescriptorDevice + ?Sized,
    {
        if let Some(handle) = self.views.get(&(resource, kind)) {
            return Ok(*handle);
        }
        if !resources.supports(resource, kind)? {
            warn!("{resource:?} cannot be viewed as {}", kind.name());
            return Err(RenderError::InvalidBindingState(format!(
                "{resource:?} was not created with {} view support",
                kind.name()
            )));
        }

        let heap = match kind {
            ViewKind::Constant | ViewKind::ShaderResource => &mut self.staging_views,
            ViewKind::RenderTarget => &mut self.render_targets,
            ViewKind::DepthStencil => &mut self.depth_stencils,
        };
        let dest = heap.allocate()?;
        device.create_view(resources.raw(resource)?, kind, dest)?;
        self.views.insert((resource, kind), dest);
        Ok(dest)
    }

    /// Drops every view of `resource` and recycles their slots.
    ///
    /// Shader-visible copies of those views are forgotten, so a later bind of
    /// whatever reuses the slot copies again. Only call once the GPU is done
    /// with the resource. Returns how many views were dropped.
    pub fn forget_views(&mut self, resource: ResourceHandle) -> usize {
        let mut dropped = 0;
        for kind in [
            ViewKind::Constant,
            ViewKind::ShaderResource,
            ViewKind::RenderTarget,
            ViewKind::DepthStencil,
        ] {
            let Some(handle) = self.views.remove(&(resource, kind)) else {
                continue;
            };
            match kind {
                ViewKind::Constant | ViewKind::ShaderResource => {
                    self.staging_views.recycle(handle);
                    self.visible_views.invalidate(handle);
                }
                ViewKind::RenderTarget => self.render_targets.recycle(handle),
                ViewKind::DepthStencil => self.depth_stencils.recycle(handle),
            }
            dropped += 1;
        }
        dropped
    }

    /// Views currently held in the staging view heap.
    pub fn staging_views_used(&self) -> u32 {
        self.staging_views.used()
    }

    /// Permanent staging sampler for `mode`.
    pub fn sampler<D>(&mut self, device: &D, mode: SamplerMode) -> RenderResult<DescriptorHandle>
    where
        D: DescriptorDevice + ?Sized,
    {
        if let Some(handle) = self.samplers.get(&mode) {
            return Ok(*handle);
        }
        let dest = self.staging_samplers.allocate()?;
        device.create_sampler(mode, dest)?;
        self.samplers.insert(mode, dest);
        Ok(dest)
    }

    /// Copies `src` into `slot` of the range reserved at `offset`.
    ///
    /// Returns false when the destination already held `src` and the copy was
    /// skipped.
    pub fn bind<D>(
        &mut self,
        device: &D,
        table: DescriptorTable,
        offset: u32,
        slot: u32,
        src: DescriptorHandle,
    ) -> RenderResult<bool>
    where
        D: DescriptorDevice + ?Sized,
    {
        let capacity = self.table_capacity(table);
        if offset + slot >= capacity {
            return Err(RenderError::CapacityExhausted {
                pool: table_pool(table),
                capacity,
            });
        }
        let dst = self.table_base(table, offset + slot);
        let visible = match table {
            DescriptorTable::Sampler => &mut self.visible_samplers,
            _ => &mut self.visible_views,
        };

        let recorded = &mut visible.shadow[dst.index as usize];
        if *recorded == Some(src) {
            self.stats.skipped += 1;
            return Ok(false);
        }
        device.copy_descriptor(src, dst)?;
        *recorded = Some(src);
        self.stats.copies += 1;
        Ok(true)
    }

    /// Copy counters since the last call.
    pub fn take_stats(&mut self) -> CopyStats {
        std::mem::take(&mut self.stats)
    }

    /// Destroys every heap. Handles issued earlier become invalid.
    pub fn release_all<D>(&mut self, device: &D)
    where
        D: DescriptorDevice + ?Sized,
    {
        for heap in [
            &self.staging_views,
            &self.staging_samplers,
            &self.render_targets,
            &self.depth_stencils,
            &self.visible_views.heap,
            &self.visible_samplers.heap,
        ] {
            device.release_descriptor_heap(heap.id());
        }
        self.views.clear();
        self.samplers.clear();
        for visible in [&mut self.visible_views, &mut self.visible_samplers] {
            visible.shadow.fill(None);
        }
        debug!("Released descriptor heaps");
    }
}

fn table_pool(table: DescriptorTable) -> &'static str {
    match table {
        DescriptorTable::Constant => "constant descriptor table",
        DescriptorTable::ShaderResource => "shader-resource descriptor table",
        DescriptorTable::Sampler => "sampler descriptor table",
    }
}

#[cfg(test)]
mod tests {
    use kiln_rhi::headless::{HeadlessDevice, RenderCall};
    use kiln_rhi::{
        BindFlags, BufferDesc, BufferUsage, MemoryLocation, ResourceState, TextureDesc,
        TextureFormat,
    };

    use super::*;

    fn small_budget() -> DescriptorBudget {
        DescriptorBudget {
            staging_views: 16,
            staging_samplers: 4,
            render_target_views: 4,
            depth_stencil_views: 2,
            constant_table_per_frame: 4,
            shader_resource_table_per_frame: 8,
            sampler_table_per_frame: 2,
        }
    }

    fn texture(
        device: &HeadlessDevice,
        table: &mut ResourceTable,
        flags: BindFlags,
    ) -> ResourceHandle {
        table
            .create_texture(
                device,
                &TextureDesc {
                    name: "albedo".into(),
                    width: 2,
                    height: 2,
                    format: TextureFormat::Rgba8Unorm,
                    bind_flags: flags,
                    initial_state: ResourceState::Common,
                },
            )
            .unwrap()
    }

    #[test]
    fn test_heap_exhaustion_is_recoverable() {
        let device = HeadlessDevice::new();
        let mut heap = DescriptorHeap::create(
            &device,
            HeapDesc {
                heap_type: HeapType::RenderTarget,
                visibility: HeapVisibility::Staging,
                capacity: 2,
            },
            "render-target view heap",
        )
        .unwrap();

        assert_eq!(heap.allocate().unwrap().index, 0);
        assert_eq!(heap.allocate().unwrap().index, 1);
        let err = heap.allocate().unwrap_err();
        assert!(matches!(
            err,
            RenderError::CapacityExhausted {
                pool: "render-target view heap",
                capacity: 2
            }
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_views_are_created_once() {
        let device = HeadlessDevice::new();
        let mut resources = ResourceTable::new();
        let mut descriptors = DescriptorAllocator::new(&device, &small_budget(), 2).unwrap();
        let albedo = texture(&device, &mut resources, BindFlags::SHADER_RESOURCE);

        let first = descriptors
            .view(&device, &resources, albedo, ViewKind::ShaderResource)
            .unwrap();
        let second = descriptors
            .view(&device, &resources, albedo, ViewKind::ShaderResource)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(device.count_calls(|c| matches!(c, RenderCall::CreateView { .. })), 1);
    }

    #[test]
    fn test_recycled_slot_is_reused() {
        let device = HeadlessDevice::new();
        let mut heap = DescriptorHeap::create(
            &device,
            HeapDesc {
                heap_type: HeapType::ConstantShaderResource,
                visibility: HeapVisibility::Staging,
                capacity: 2,
            },
            "staging view heap",
        )
        .unwrap();

        let first = heap.allocate().unwrap();
        heap.allocate().unwrap();
        assert!(heap.allocate().is_err());

        heap.recycle(first);
        assert_eq!(heap.used(), 1);
        assert_eq!(heap.allocate().unwrap(), first);
        assert_eq!(heap.used(), 2);
    }

    #[test]
    fn test_forgotten_view_is_copied_again() {
        let device = HeadlessDevice::new();
        let mut resources = ResourceTable::new();
        let mut descriptors = DescriptorAllocator::new(&device, &small_budget(), 2).unwrap();
        let old = texture(&device, &mut resources, BindFlags::SHADER_RESOURCE);
        let view = descriptors
            .view(&device, &resources, old, ViewKind::ShaderResource)
            .unwrap();
        descriptors.begin_frame(0).unwrap();
        descriptors
            .bind(&device, DescriptorTable::ShaderResource, 0, 0, view)
            .unwrap();

        assert_eq!(descriptors.forget_views(old), 1);
        assert_eq!(descriptors.forget_views(old), 0);
        assert_eq!(descriptors.staging_views_used(), 0);

        // The next view lands in the same slot but still has to be copied.
        let new = texture(&device, &mut resources, BindFlags::SHADER_RESOURCE);
        let reused = descriptors
            .view(&device, &resources, new, ViewKind::ShaderResource)
            .unwrap();
        assert_eq!(reused, view);
        assert!(descriptors
            .bind(&device, DescriptorTable::ShaderResource, 0, 0, reused)
            .unwrap());
        assert_eq!(device.count_descriptor_copies(), 2);
    }

    #[test]
    fn test_unsupported_view_is_invalid_binding() {
        let device = HeadlessDevice::new();
        let mut resources = ResourceTable::new();
        let mut descriptors = DescriptorAllocator::new(&device, &small_budget(), 2).unwrap();
        let albedo = texture(&device, &mut resources, BindFlags::SHADER_RESOURCE);

        let err = descriptors
            .view(&device, &resources, albedo, ViewKind::RenderTarget)
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidBindingState(_)));

        let constants = resources
            .create_buffer(
                &device,
                &BufferDesc {
                    name: "vertices".into(),
                    size: 64,
                    usage: BufferUsage::VERTEX,
                    location: MemoryLocation::Upload,
                    initial_state: ResourceState::Common,
                },
            )
            .unwrap();
        assert!(matches!(
            descriptors.view(&device, &resources, constants, ViewKind::Constant),
            Err(RenderError::InvalidBindingState(_))
        ));
        assert_eq!(device.count_calls(|c| matches!(c, RenderCall::CreateView { .. })), 0);
    }

    #[test]
    fn test_repeated_bind_copies_once() {
        let device = HeadlessDevice::new();
        let mut resources = ResourceTable::new();
        let mut descriptors = DescriptorAllocator::new(&device, &small_budget(), 2).unwrap();
        let albedo = texture(&device, &mut resources, BindFlags::SHADER_RESOURCE);
        let view = descriptors
            .view(&device, &resources, albedo, ViewKind::ShaderResource)
            .unwrap();

        descriptors.begin_frame(0).unwrap();
        assert!(descriptors
            .bind(&device, DescriptorTable::ShaderResource, 0, 0, view)
            .unwrap());
        assert!(!descriptors
            .bind(&device, DescriptorTable::ShaderResource, 0, 0, view)
            .unwrap());

        assert_eq!(device.count_descriptor_copies(), 1);
        assert_eq!(descriptors.take_stats(), CopyStats { copies: 1, skipped: 1 });
    }

    #[test]
    fn test_reserved_ranges_do_not_overlap() {
        let device = HeadlessDevice::new();
        let mut descriptors = DescriptorAllocator::new(&device, &small_budget(), 2).unwrap();
        descriptors.begin_frame(1).unwrap();

        let first = descriptors
            .reserve(TableSpan {
                shader_resources: 1,
                ..TableSpan::default()
            })
            .unwrap();
        let second = descriptors
            .reserve(TableSpan {
                constants: 2,
                shader_resources: 2,
                samplers: 1,
            })
            .unwrap();
        assert_eq!(first, RangeOffsets::default());
        assert!(second.views >= first.views + 1);
        assert_eq!(second.samplers, 0);
        assert_eq!(
            descriptors.cursor(),
            RangeOffsets {
                views: 3,
                samplers: 1
            }
        );

        // Partition 1 starts after partition 0's constant and texture ranges.
        let base = descriptors.table_base(DescriptorTable::ShaderResource, second.views);
        assert_eq!(base.index, 12 + 4 + second.views);
        assert_eq!(descriptors.table_base(DescriptorTable::Sampler, 0).index, 2);
    }

    #[test]
    fn test_reserve_overflow_leaves_cursor() {
        let device = HeadlessDevice::new();
        let mut descriptors = DescriptorAllocator::new(&device, &small_budget(), 2).unwrap();
        descriptors.begin_frame(0).unwrap();

        let span = TableSpan {
            constants: 2,
            ..TableSpan::default()
        };
        descriptors.reserve(span).unwrap();
        descriptors.reserve(span).unwrap();
        let err = descriptors.reserve(span).unwrap_err();
        assert!(matches!(
            err,
            RenderError::CapacityExhausted {
                pool: "constant descriptor table",
                capacity: 4
            }
        ));
        assert_eq!(descriptors.cursor().views, 4);

        // Rewinds at the next frame.
        descriptors.begin_frame(1).unwrap();
        assert_eq!(descriptors.reserve(span).unwrap().views, 0);
    }

    #[test]
    fn test_samplers_are_cached() {
        let device = HeadlessDevice::new();
        let mut descriptors = DescriptorAllocator::new(&device, &small_budget(), 2).unwrap();
        let a = descriptors.sampler(&device, SamplerMode::PointClamp).unwrap();
        let b = descriptors.sampler(&device, SamplerMode::PointClamp).unwrap();
        let c = descriptors.sampler(&device, SamplerMode::BilinearWrap).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        descriptors.begin_frame(0).unwrap();
        descriptors
            .bind(&device, DescriptorTable::Sampler, 0, 1, c)
            .unwrap();
        assert!(descriptors
            .bind(&device, DescriptorTable::Sampler, 0, 2, c)
            .is_err());
    }

    #[test]
    fn test_unknown_partition() {
        let device = HeadlessDevice::new();
        let mut descriptors = DescriptorAllocator::new(&device, &small_budget(), 2).unwrap();
        assert!(matches!(
            descriptors.begin_frame(2),
            Err(RenderError::UnknownHandle(_))
        ));
    }

    #[test]
    fn test_release_all_destroys_heaps() {
        let device = HeadlessDevice::new();
        let mut descriptors = DescriptorAllocator::new(&device, &small_budget(), 2).unwrap();
        assert_eq!(device.live_heaps(), 6);
        descriptors.release_all(&device);
        assert_eq!(device.live_heaps(), 0);
    }
}
