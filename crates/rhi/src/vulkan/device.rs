//! Vulkan logical device and the objects it owns.
//!
//! [`VulkanDevice`] is a cheap, clonable handle to a shared device. Every
//! object created through the capability traits is tracked in a registry
//! keyed by the backend-neutral ids, so the renderer never holds a raw Vulkan
//! handle. Objects still registered when the last handle drops are destroyed
//! after the device idles.

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::command::VulkanCommandList;
use super::convert;
use super::descriptor::{BindlessLayout, HeapEntry};
use super::instance::Instance;
use super::physical_device::{PhysicalDeviceInfo, select_physical_device};
use super::queue::VulkanQueue;
use super::surface::VulkanSurface;
use crate::backend::{RenderDevice, ResourceDevice};
use crate::error::{RhiError, RhiResult};
use crate::types::{
    BufferDesc, HeapId, MemoryLocation, PipelineId, ResourceId, SurfaceDesc, TextureDesc,
    TextureFormat,
};

pub(crate) struct BufferEntry {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
    pub location: MemoryLocation,
}

pub(crate) struct ImageEntry {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub extent: vk::Extent2D,
    pub format: TextureFormat,
    /// False until the first barrier; the contents start out undefined.
    pub initialized: bool,
}

pub(crate) struct PipelineEntry {
    pub pipeline: vk::Pipeline,
}

/// Every live object, keyed by the ids handed to the renderer.
#[derive(Default)]
pub(crate) struct Registry {
    next_resource: u64,
    next_heap: u32,
    next_pipeline: u64,
    pub buffers: HashMap<ResourceId, BufferEntry>,
    pub images: HashMap<ResourceId, ImageEntry>,
    pub heaps: HashMap<HeapId, HeapEntry>,
    pub pipelines: HashMap<PipelineId, PipelineEntry>,
}

impl Registry {
    fn resource_id(&mut self) -> ResourceId {
        self.next_resource += 1;
        ResourceId(self.next_resource)
    }

    pub fn heap_id(&mut self) -> HeapId {
        self.next_heap += 1;
        HeapId(self.next_heap)
    }

    pub fn pipeline_id(&mut self) -> PipelineId {
        self.next_pipeline += 1;
        PipelineId(self.next_pipeline)
    }

    pub fn heap(&self, id: HeapId) -> RhiResult<&HeapEntry> {
        self.heaps
            .get(&id)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown heap {}", id.0)))
    }

    pub fn image(&self, id: ResourceId) -> RhiResult<&ImageEntry> {
        self.images
            .get(&id)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown texture {}", id.0)))
    }

    pub fn buffer(&self, id: ResourceId) -> RhiResult<&BufferEntry> {
        self.buffers
            .get(&id)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown buffer {}", id.0)))
    }
}

/// State shared by every clone of a [`VulkanDevice`] and the objects created
/// from it.
pub(crate) struct DeviceShared {
    pub device: ash::Device,
    pub physical: PhysicalDeviceInfo,
    pub queue: Mutex<vk::Queue>,
    pub registry: Mutex<Registry>,
    pub bindless: BindlessLayout,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    // Dropped last.
    instance: Instance,
}

impl DeviceShared {
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: gpu_allocator::MemoryLocation,
        linear: bool,
    ) -> RhiResult<Allocation> {
        let allocation = self.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        Ok(allocation)
    }

    pub fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            error!("Failed to free allocation: {e}");
        }
    }

    /// Destroys a buffer or image that was removed from the registry.
    fn destroy_buffer(&self, entry: BufferEntry) {
        unsafe { self.device.destroy_buffer(entry.buffer, None) };
        if let Some(allocation) = entry.allocation {
            self.free(allocation);
        }
    }

    fn destroy_image(&self, entry: ImageEntry) {
        unsafe { self.device.destroy_image(entry.image, None) };
        if let Some(allocation) = entry.allocation {
            self.free(allocation);
        }
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
        }

        let registry = std::mem::take(self.registry.get_mut());
        let leaked = registry.buffers.len()
            + registry.images.len()
            + registry.heaps.len()
            + registry.pipelines.len();
        if leaked > 0 {
            warn!("Destroying {leaked} object(s) still registered at device teardown");
        }
        for (_, entry) in registry.pipelines {
            unsafe { self.device.destroy_pipeline(entry.pipeline, None) };
        }
        for (_, heap) in registry.heaps {
            heap.destroy(&self.device);
        }
        for (_, entry) in registry.buffers {
            self.destroy_buffer(entry);
        }
        for (_, entry) in registry.images {
            self.destroy_image(entry);
        }

        self.bindless.destroy(&self.device);

        unsafe {
            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

/// Vulkan implementation of [`RenderDevice`].
///
/// Requires Vulkan 1.3 with descriptor indexing. Presentation is offscreen:
/// surfaces are rings of device-local images.
#[derive(Clone)]
pub struct VulkanDevice {
    pub(crate) shared: Arc<DeviceShared>,
}

impl VulkanDevice {
    /// Creates an instance, picks a GPU and opens a logical device on it.
    ///
    /// # Errors
    ///
    /// Fails if the loader is missing, no 1.3 device with a graphics queue is
    /// present, or device or allocator creation fails.
    pub fn new(enable_validation: bool) -> RhiResult<Self> {
        let instance = Instance::new(enable_validation)?;
        let physical = select_physical_device(instance.handle())?;

        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(physical.graphics_family)
            .queue_priorities(&queue_priorities)];

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_update_unused_while_pending(true)
            .descriptor_binding_storage_buffer_update_after_bind(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .shader_storage_buffer_array_non_uniform_indexing(true)
            .shader_sampled_image_array_non_uniform_indexing(true);

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let features = vk::PhysicalDeviceFeatures::default().fill_mode_non_solid(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_features(&features)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical.device, &create_info, None)?
        };
        info!("Logical device created on {}", physical.device_name());

        let queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        let bindless = match BindlessLayout::new(&device) {
            Ok(layout) => layout,
            Err(e) => {
                drop(allocator);
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };
        debug!("gpu-allocator and bindless layouts initialized");

        Ok(Self {
            shared: Arc::new(DeviceShared {
                device,
                physical,
                queue: Mutex::new(queue),
                registry: Mutex::new(Registry::default()),
                bindless,
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
                instance,
            }),
        })
    }

    /// Name of the selected GPU.
    pub fn adapter_name(&self) -> &str {
        self.shared.physical.device_name()
    }

    pub fn has_validation(&self) -> bool {
        self.shared.instance().has_validation()
    }
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("adapter", &self.adapter_name())
            .finish()
    }
}

impl ResourceDevice for VulkanDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<ResourceId> {
        if desc.size == 0 {
            return Err(RhiError::ResourceCreation(format!(
                "buffer '{}' has zero size",
                desc.name
            )));
        }
        let shared = &self.shared;

        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(convert::buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { shared.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { shared.device.get_buffer_memory_requirements(buffer) };

        let allocation = shared
            .allocate(
                &desc.name,
                requirements,
                convert::memory_location(desc.location),
                true,
            )
            .and_then(|allocation| {
                unsafe {
                    shared
                        .device
                        .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?
                };
                Ok(allocation)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { shared.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let mut registry = shared.registry.lock();
        let id = registry.resource_id();
        registry.buffers.insert(
            id,
            BufferEntry {
                buffer,
                allocation: Some(allocation),
                size: desc.size,
                location: desc.location,
            },
        );
        debug!("Created buffer '{}' ({} bytes) as {:?}", desc.name, desc.size, id);
        Ok(id)
    }

    fn create_texture(&self, desc: &TextureDesc) -> RhiResult<ResourceId> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RhiError::ResourceCreation(format!(
                "texture '{}' has zero extent",
                desc.name
            )));
        }
        let shared = &self.shared;
        let extent = vk::Extent2D {
            width: desc.width,
            height: desc.height,
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert::format(desc.format))
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert::image_usage(desc.bind_flags))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { shared.device.create_image(&image_info, None)? };
        let requirements = unsafe { shared.device.get_image_memory_requirements(image) };

        let allocation = shared
            .allocate(
                &desc.name,
                requirements,
                gpu_allocator::MemoryLocation::GpuOnly,
                false,
            )
            .and_then(|allocation| {
                unsafe {
                    shared
                        .device
                        .bind_image_memory(image, allocation.memory(), allocation.offset())?
                };
                Ok(allocation)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { shared.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut registry = shared.registry.lock();
        let id = registry.resource_id();
        registry.images.insert(
            id,
            ImageEntry {
                image,
                allocation: Some(allocation),
                extent,
                format: desc.format,
                initialized: false,
            },
        );
        debug!(
            "Created texture '{}' {}x{} {:?} as {:?}",
            desc.name, desc.width, desc.height, desc.format, id
        );
        Ok(id)
    }

    fn write_buffer(&self, buffer: ResourceId, offset: u64, data: &[u8]) -> RhiResult<()> {
        let mut registry = self.shared.registry.lock();
        let entry = registry
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown buffer {}", buffer.0)))?;

        if entry.location != MemoryLocation::Upload {
            return Err(RhiError::Unsupported(format!(
                "buffer {} is not CPU writable",
                buffer.0
            )));
        }
        let end = offset + data.len() as u64;
        if end > entry.size {
            return Err(RhiError::InvalidHandle(format!(
                "write of {} bytes at {} exceeds buffer {} of {} bytes",
                data.len(),
                offset,
                buffer.0,
                entry.size
            )));
        }

        let mapped = entry
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| RhiError::InvalidHandle(format!("buffer {} is not mapped", buffer.0)))?;
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn release_resource(&self, resource: ResourceId) {
        let (buffer, image) = {
            let mut registry = self.shared.registry.lock();
            (
                registry.buffers.remove(&resource),
                registry.images.remove(&resource),
            )
        };
        if let Some(entry) = buffer {
            self.shared.destroy_buffer(entry);
        }
        if let Some(entry) = image {
            self.shared.destroy_image(entry);
        }
    }
}

impl RenderDevice for VulkanDevice {
    type CommandList = VulkanCommandList;
    type Queue = VulkanQueue;
    type Surface = VulkanSurface;

    fn create_command_list(&self) -> RhiResult<VulkanCommandList> {
        VulkanCommandList::new(Arc::clone(&self.shared))
    }

    fn create_queue(&self) -> RhiResult<VulkanQueue> {
        VulkanQueue::new(Arc::clone(&self.shared))
    }

    fn create_surface(&self, desc: &SurfaceDesc) -> RhiResult<VulkanSurface> {
        VulkanSurface::new(self.clone(), desc)
    }

    fn name(&self) -> &'static str {
        "vulkan"
    }
}
