//! Constant data ring.
//!
//! Camera and model constants are written into preallocated upload buffers,
//! one set per frame slot. Within a frame each category hands out its slots in
//! order through a cursor that rewinds at frame begin; a slot is never written
//! twice in the same frame, so a draw recorded early keeps the data it saw even
//! when later draws change the constants.
//!
//! Every slot owns a permanent constant view, created together with the
//! buffer.

use bytemuck::Pod;
use kiln_core::ConstantBudget;
use kiln_rhi::{
    BufferDesc, BufferUsage, DescriptorDevice, DescriptorHandle, MemoryLocation, ResourceDevice,
    ResourceState, ViewKind,
};
use tracing::debug;

use crate::descriptor::DescriptorAllocator;
use crate::error::{RenderError, RenderResult};
use crate::resource::{ResourceHandle, ResourceTable};
use crate::ubo::{CameraConstants, ModelConstants};

/// Constant buffer sizes are multiples of this.
pub const CONSTANT_ALIGNMENT: u64 = 256;

/// Rounds `size` up to [`CONSTANT_ALIGNMENT`].
pub const fn aligned_constant_size(size: u64) -> u64 {
    size.div_ceil(CONSTANT_ALIGNMENT) * CONSTANT_ALIGNMENT
}

/// What a constant slot holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstantCategory {
    Camera,
    Model,
    /// A buffer owned by the application rather than the ring.
    User,
}

/// One constant buffer and its staging view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstantSlot {
    pub category: ConstantCategory,
    pub resource: ResourceHandle,
    pub view: DescriptorHandle,
    pub size: u64,
}

/// Slots of one category, per partition.
#[derive(Debug)]
struct Category {
    pool: &'static str,
    partitions: Vec<Vec<ConstantSlot>>,
    cursor: Option<usize>,
    writes: u64,
}

impl Category {
    fn capacity(&self) -> usize {
        self.partitions.first().map_or(0, Vec::len)
    }

    fn next(&mut self, partition: usize) -> RenderResult<ConstantSlot> {
        let next = self.cursor.map_or(0, |cursor| cursor + 1);
        let slots = &self.partitions[partition];
        let Some(slot) = slots.get(next) else {
            return Err(RenderError::CapacityExhausted {
                pool: self.pool,
                capacity: slots.len() as u32,
            });
        };
        self.cursor = Some(next);
        Ok(*slot)
    }

    fn current(&self, partition: usize) -> Option<ConstantSlot> {
        self.cursor.map(|cursor| self.partitions[partition][cursor])
    }

    fn used(&self) -> usize {
        self.cursor.map_or(0, |cursor| cursor + 1)
    }
}

/// Camera and model constant slots for every frame slot.
#[derive(Debug)]
pub struct ConstantRing {
    camera: Category,
    model: Category,
    partition: usize,
}

impl ConstantRing {
    /// Allocates every slot of every partition up front.
    pub fn new<D>(
        device: &D,
        resources: &mut ResourceTable,
        descriptors: &mut DescriptorAllocator,
        budget: &ConstantBudget,
        partitions: usize,
    ) -> RenderResult<Self>
    where
        D: ResourceDevice + DescriptorDevice + ?Sized,
    {
        let mut category = |category: ConstantCategory,
                            pool: &'static str,
                            count: u32,
                            payload: usize| {
            let size = aligned_constant_size(payload as u64);
            let label = match category {
                ConstantCategory::Camera => "camera",
                ConstantCategory::Model | ConstantCategory::User => "model",
            };
            let slots = (0..partitions)
                .map(|partition| {
                    (0..count)
                        .map(|index| {
                            let resource = resources.create_buffer(
                                device,
                                &BufferDesc {
                                    name: format!("{label} constants {partition}.{index}"),
                                    size,
                                    usage: BufferUsage::CONSTANT,
                                    location: MemoryLocation::Upload,
                                    initial_state: ResourceState::Common,
                                },
                            )?;
                            let view =
                                descriptors.view(device, resources, resource, ViewKind::Constant)?;
                            Ok(ConstantSlot {
                                category,
                                resource,
                                view,
                                size,
                            })
                        })
                        .collect::<RenderResult<Vec<_>>>()
                })
                .collect::<RenderResult<Vec<_>>>()?;
            Ok::<_, RenderError>(Category {
                pool,
                partitions: slots,
                cursor: None,
                writes: 0,
            })
        };

        let camera = category(
            ConstantCategory::Camera,
            "camera constant slots",
            budget.camera_slots,
            CameraConstants::SIZE,
        )?;
        let model = category(
            ConstantCategory::Model,
            "model constant slots",
            budget.model_slots,
            ModelConstants::SIZE,
        )?;
        debug!(
            "Constant ring ready: {} camera + {} model slot(s) x {} partition(s)",
            budget.camera_slots, budget.model_slots, partitions
        );

        Ok(Self {
            camera,
            model,
            partition: 0,
        })
    }

    /// Switches to the partition of frame slot `slot` and rewinds both cursors.
    pub fn begin_frame(&mut self, slot: usize) -> RenderResult<()> {
        if slot >= self.camera.partitions.len() {
            return Err(RenderError::UnknownHandle(format!(
                "constant partition {slot} of {}",
                self.camera.partitions.len()
            )));
        }
        self.partition = slot;
        self.camera.cursor = None;
        self.model.cursor = None;
        Ok(())
    }

    /// Advances the camera cursor and returns the slot it lands on.
    ///
    /// The first call of a frame returns slot 0. A call while the cursor
    /// already sits on the last slot fails with
    /// [`RenderError::CapacityExhausted`] and leaves the cursor in place.
    pub fn next_camera_slot(&mut self) -> RenderResult<ConstantSlot> {
        self.camera.next(self.partition)
    }

    /// Same as [`next_camera_slot`](Self::next_camera_slot) for model slots.
    pub fn next_model_slot(&mut self) -> RenderResult<ConstantSlot> {
        self.model.next(self.partition)
    }

    /// Camera slot at the cursor, `None` before the first `next` of a frame.
    pub fn current_camera_slot(&self) -> Option<ConstantSlot> {
        self.camera.current(self.partition)
    }

    pub fn current_model_slot(&self) -> Option<ConstantSlot> {
        self.model.current(self.partition)
    }

    /// Stages `data` into `slot`'s upload buffer.
    pub fn write<D, T>(
        &mut self,
        device: &D,
        resources: &ResourceTable,
        slot: &ConstantSlot,
        data: &T,
    ) -> RenderResult<()>
    where
        D: ResourceDevice + ?Sized,
        T: Pod,
    {
        let bytes = bytemuck::bytes_of(data);
        if bytes.len() as u64 > slot.size {
            return Err(RenderError::InvalidBindingState(format!(
                "{} bytes do not fit a {} byte constant slot",
                bytes.len(),
                slot.size
            )));
        }
        device.write_buffer(resources.raw(slot.resource)?, 0, bytes)?;
        match slot.category {
            ConstantCategory::Camera => self.camera.writes += 1,
            ConstantCategory::Model => self.model.writes += 1,
            ConstantCategory::User => {}
        }
        Ok(())
    }

    /// Slots per category and partition, as `(camera, model)`.
    pub fn capacity(&self) -> (usize, usize) {
        (self.camera.capacity(), self.model.capacity())
    }

    /// Slots handed out this frame, as `(camera, model)`.
    pub fn used(&self) -> (usize, usize) {
        (self.camera.used(), self.model.used())
    }

    /// Writes since the last call, as `(camera, model)`.
    pub fn take_writes(&mut self) -> (u64, u64) {
        (
            std::mem::take(&mut self.camera.writes),
            std::mem::take(&mut self.model.writes),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kiln_core::DescriptorBudget;
    use kiln_rhi::headless::{Completion, HeadlessDevice};
    use kiln_rhi::{CommandRecorder, GpuQueue, RenderDevice};

    use super::*;
    use crate::fence::FenceSynchronizer;

    fn ring(
        device: &HeadlessDevice,
        camera_slots: u32,
        model_slots: u32,
    ) -> (ResourceTable, ConstantRing) {
        let mut resources = ResourceTable::new();
        let mut descriptors =
            DescriptorAllocator::new(device, &DescriptorBudget::default(), 2).unwrap();
        let ring = ConstantRing::new(
            device,
            &mut resources,
            &mut descriptors,
            &ConstantBudget {
                camera_slots,
                model_slots,
            },
            2,
        )
        .unwrap();
        (resources, ring)
    }

    #[test]
    fn test_aligned_size() {
        assert_eq!(aligned_constant_size(1), 256);
        assert_eq!(aligned_constant_size(256), 256);
        assert_eq!(aligned_constant_size(257), 512);
        assert_eq!(aligned_constant_size(CameraConstants::SIZE as u64), 256);
    }

    #[test]
    fn test_first_next_returns_slot_zero() {
        let device = HeadlessDevice::new();
        let (_, mut ring) = ring(&device, 2, 4);

        assert!(ring.current_model_slot().is_none());
        let first = ring.next_model_slot().unwrap();
        assert_eq!(ring.current_model_slot(), Some(first));
        let second = ring.next_model_slot().unwrap();
        assert_ne!(first.resource, second.resource);
        assert_eq!(first.category, ConstantCategory::Model);
        assert_eq!(ring.used(), (0, 2));
    }

    #[test]
    fn test_one_past_capacity_is_exhausted() {
        let device = HeadlessDevice::new();
        let (_, mut ring) = ring(&device, 3, 4);

        for _ in 0..3 {
            ring.next_camera_slot().unwrap();
        }
        let last = ring.current_camera_slot();
        let err = ring.next_camera_slot().unwrap_err();
        assert!(matches!(
            err,
            RenderError::CapacityExhausted {
                pool: "camera constant slots",
                capacity: 3
            }
        ));
        assert!(!err.is_fatal());
        assert_eq!(ring.current_camera_slot(), last);
    }

    #[test]
    fn test_partitions_do_not_share_slots() {
        let device = HeadlessDevice::new();
        let (_, mut ring) = ring(&device, 1, 1);

        ring.begin_frame(0).unwrap();
        let a = ring.next_model_slot().unwrap();
        ring.begin_frame(1).unwrap();
        let b = ring.next_model_slot().unwrap();
        ring.begin_frame(0).unwrap();
        let c = ring.next_model_slot().unwrap();

        assert_ne!(a, b);
        assert_eq!(a, c);
        assert!(ring.begin_frame(2).is_err());
    }

    #[test]
    fn test_writes_are_counted_per_category() {
        let device = HeadlessDevice::new();
        let (resources, mut ring) = ring(&device, 2, 2);

        let camera = ring.next_camera_slot().unwrap();
        ring.write(&device, &resources, &camera, &CameraConstants::default())
            .unwrap();
        let model = ring.next_model_slot().unwrap();
        ring.write(&device, &resources, &model, &ModelConstants::default())
            .unwrap();
        ring.write(&device, &resources, &model, &ModelConstants::default())
            .unwrap();

        assert_eq!(ring.take_writes(), (1, 2));
        assert_eq!(ring.take_writes(), (0, 0));

        let writes = device.buffer_writes(BufferUsage::CONSTANT);
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].2, CameraConstants::SIZE as u64);
    }

    #[test]
    fn test_oversized_write_is_rejected() {
        let device = HeadlessDevice::new();
        let (resources, mut ring) = ring(&device, 1, 1);
        let slot = ring.next_model_slot().unwrap();

        let big = [0u8; 512];
        assert!(matches!(
            ring.write(&device, &resources, &slot, &big),
            Err(RenderError::InvalidBindingState(_))
        ));
    }

    #[test]
    fn test_reuse_after_fence_is_hazard_free() {
        let device = HeadlessDevice::with_completion(Completion::Deferred);
        let queue = device.create_queue().unwrap();
        let mut list = device.create_command_list().unwrap();
        let mut fence = FenceSynchronizer::new(Duration::from_millis(10));
        let (mut resources, mut ring) = ring(&device, 1, 1);

        ring.begin_frame(0).unwrap();
        let slot = ring.next_model_slot().unwrap();
        ring.write(&device, &resources, &slot, &ModelConstants::default())
            .unwrap();

        list.reset().unwrap();
        resources
            .transition_to(slot.resource, ResourceState::VertexAndConstantBuffer, &mut list)
            .unwrap();
        list.close().unwrap();
        queue.execute(&list).unwrap();
        let target = fence.signal(&queue).unwrap();

        fence.wait_until(&queue, target).unwrap();
        ring.begin_frame(0).unwrap();
        let again = ring.next_model_slot().unwrap();
        ring.write(&device, &resources, &again, &ModelConstants::default())
            .unwrap();
        assert!(device.hazards().is_empty());
    }
}
