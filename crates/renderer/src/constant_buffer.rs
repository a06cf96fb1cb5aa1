//! Constant buffers owned by the application.
//!
//! Slots [`CAMERA_CONSTANT_SLOT`](crate::ubo::CAMERA_CONSTANT_SLOT) and
//! [`MODEL_CONSTANT_SLOT`](crate::ubo::MODEL_CONSTANT_SLOT) of the constant
//! table are fed by the constant ring. The remaining slots, up to
//! `max_constant_slots`, take buffers created with
//! [`Renderer::create_constant_buffer`](crate::Renderer::create_constant_buffer).
//!
//! Unlike ring slots these buffers are not versioned per frame: the renderer
//! refuses a write while a draw of the current frame reads the buffer, and
//! otherwise waits for the last frame that read it before writing.

use kiln_rhi::{
    BufferDesc, BufferUsage, DescriptorDevice, MemoryLocation, ResourceDevice, ResourceState,
    ViewKind,
};

use crate::constant_ring::{ConstantCategory, ConstantSlot, aligned_constant_size};
use crate::descriptor::DescriptorAllocator;
use crate::error::{RenderError, RenderResult};
use crate::resource::{ResourceHandle, ResourceTable};

/// Opaque handle to an application constant buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConstantBufferHandle(pub(crate) ResourceHandle);

impl ConstantBufferHandle {
    /// Entry in the renderer's resource table.
    pub fn resource(&self) -> ResourceHandle {
        self.0
    }
}

/// Bookkeeping for one application constant buffer.
#[derive(Clone, Copy, Debug)]
pub(crate) struct UserConstants {
    pub slot: ConstantSlot,
    /// Fence value after which no submitted frame reads the buffer.
    pub guard: u64,
    /// Serial of a frame that read the buffer but has no fence value yet.
    pub read_by: Option<u64>,
}

impl UserConstants {
    /// Creates an upload buffer of at least `size` bytes and its constant view.
    pub fn create<D>(
        device: &D,
        resources: &mut ResourceTable,
        descriptors: &mut DescriptorAllocator,
        name: &str,
        size: u64,
    ) -> RenderResult<Self>
    where
        D: ResourceDevice + DescriptorDevice + ?Sized,
    {
        if size == 0 {
            return Err(RenderError::InvalidBindingState(format!(
                "constant buffer '{name}' has zero size"
            )));
        }
        let size = aligned_constant_size(size);
        let resource = resources.create_buffer(
            device,
            &BufferDesc {
                name: name.to_string(),
                size,
                usage: BufferUsage::CONSTANT,
                location: MemoryLocation::Upload,
                initial_state: ResourceState::Common,
            },
        )?;
        let view = match descriptors.view(device, resources, resource, ViewKind::Constant) {
            Ok(view) => view,
            Err(e) => {
                resources.release(resource, device)?;
                return Err(e);
            }
        };
        Ok(Self {
            slot: ConstantSlot {
                category: ConstantCategory::User,
                resource,
                view,
                size,
            },
            guard: 0,
            read_by: None,
        })
    }

    /// Settles a pending read once its frame's fence value is known.
    pub fn settle(&mut self, value: u64) {
        if self.read_by.take().is_some() {
            self.guard = self.guard.max(value);
        }
    }
}
