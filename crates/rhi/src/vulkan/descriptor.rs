//! Descriptor heaps on top of descriptor sets.
//!
//! Constant/shader-resource and sampler heaps are descriptor sets with one
//! array binding per descriptor type; heap index `i` is array element `i` of
//! whichever binding the stored view belongs to. Copies between heaps are
//! `VkCopyDescriptorSet`s. Shader-visible heaps share one update-after-bind
//! layout so they can be rewritten for frame N+1 while frame N executes.
//!
//! Render-target and depth-stencil heaps only exist on the CPU: they hold the
//! image views dynamic rendering attaches.

use ash::vk;
use tracing::debug;

use super::convert;
use super::device::VulkanDevice;
use crate::backend::DescriptorDevice;
use crate::error::{RhiError, RhiResult};
use crate::types::{
    DescriptorHandle, HeapDesc, HeapId, HeapType, HeapVisibility, ResourceId, SamplerMode,
    TextureFormat, ViewKind,
};

/// Array size of each binding in a shader-visible resource heap.
pub(crate) const VISIBLE_RESOURCE_CAPACITY: u32 = 16384;
/// Array size of a shader-visible sampler heap.
pub(crate) const VISIBLE_SAMPLER_CAPACITY: u32 = 4096;

const BINDING_CONSTANT: u32 = 0;
const BINDING_TEXTURE: u32 = 1;
const BINDING_SAMPLER: u32 = 0;

/// Push constant block every pipeline receives: table base indices.
pub(crate) const PUSH_CONSTANT_SIZE: u32 = 16;

/// Set layouts and the pipeline layout shared by every pipeline.
pub(crate) struct BindlessLayout {
    pub resource_layout: vk::DescriptorSetLayout,
    pub sampler_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
}

impl BindlessLayout {
    pub fn new(device: &ash::Device) -> RhiResult<Self> {
        let resource_layout = create_set_layout(
            device,
            &resource_bindings(VISIBLE_RESOURCE_CAPACITY),
            HeapVisibility::ShaderVisible,
        )?;
        let sampler_layout = match create_set_layout(
            device,
            &sampler_bindings(VISIBLE_SAMPLER_CAPACITY),
            HeapVisibility::ShaderVisible,
        ) {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(resource_layout, None) };
                return Err(e);
            }
        };

        let set_layouts = [resource_layout, sampler_layout];
        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::ALL_GRAPHICS)
            .offset(0)
            .size(PUSH_CONSTANT_SIZE)];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        let pipeline_layout = match unsafe { device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe {
                    device.destroy_descriptor_set_layout(sampler_layout, None);
                    device.destroy_descriptor_set_layout(resource_layout, None);
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            resource_layout,
            sampler_layout,
            pipeline_layout,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.sampler_layout, None);
            device.destroy_descriptor_set_layout(self.resource_layout, None);
        }
    }
}

fn resource_bindings(capacity: u32) -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        vk::DescriptorSetLayoutBinding::default()
            .binding(BINDING_CONSTANT)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(capacity)
            .stage_flags(vk::ShaderStageFlags::ALL_GRAPHICS),
        vk::DescriptorSetLayoutBinding::default()
            .binding(BINDING_TEXTURE)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .descriptor_count(capacity)
            .stage_flags(vk::ShaderStageFlags::ALL_GRAPHICS),
    ]
}

fn sampler_bindings(capacity: u32) -> [vk::DescriptorSetLayoutBinding<'static>; 1] {
    [vk::DescriptorSetLayoutBinding::default()
        .binding(BINDING_SAMPLER)
        .descriptor_type(vk::DescriptorType::SAMPLER)
        .descriptor_count(capacity)
        .stage_flags(vk::ShaderStageFlags::ALL_GRAPHICS)]
}

fn create_set_layout(
    device: &ash::Device,
    bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    visibility: HeapVisibility,
) -> RhiResult<vk::DescriptorSetLayout> {
    let layout = match visibility {
        HeapVisibility::Staging => {
            let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
            unsafe { device.create_descriptor_set_layout(&info, None)? }
        }
        HeapVisibility::ShaderVisible => {
            let flags = vec![
                vk::DescriptorBindingFlags::PARTIALLY_BOUND
                    | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
                    | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING;
                bindings.len()
            ];
            let mut binding_flags =
                vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&flags);
            let info = vk::DescriptorSetLayoutCreateInfo::default()
                .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                .bindings(bindings)
                .push_next(&mut binding_flags);
            unsafe { device.create_descriptor_set_layout(&info, None)? }
        }
    };
    Ok(layout)
}

/// Native object a heap slot owns, destroyed with the slot.
enum Owned {
    None,
    View(vk::ImageView),
    Sampler(vk::Sampler),
}

struct Slot {
    binding: u32,
    owned: Owned,
}

/// A constant/shader-resource or sampler heap.
pub(crate) struct SetHeap {
    pub desc: HeapDesc,
    pub set: vk::DescriptorSet,
    pool: vk::DescriptorPool,
    /// Staging heaps own their layout; visible heaps use the shared one.
    own_layout: Option<vk::DescriptorSetLayout>,
    slots: Vec<Option<Slot>>,
}

/// A view attachable through dynamic rendering.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AttachmentView {
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
}

pub(crate) struct AttachmentHeap {
    pub desc: HeapDesc,
    views: Vec<Option<AttachmentView>>,
}

impl AttachmentHeap {
    pub fn view(&self, index: u32) -> RhiResult<AttachmentView> {
        self.views
            .get(index as usize)
            .copied()
            .flatten()
            .ok_or_else(|| RhiError::InvalidHandle(format!("empty attachment slot {index}")))
    }
}

pub(crate) enum HeapEntry {
    Set(SetHeap),
    Attachment(AttachmentHeap),
}

impl HeapEntry {
    pub fn desc(&self) -> HeapDesc {
        match self {
            HeapEntry::Set(heap) => heap.desc,
            HeapEntry::Attachment(heap) => heap.desc,
        }
    }

    pub fn set_heap(&self) -> RhiResult<&SetHeap> {
        match self {
            HeapEntry::Set(heap) => Ok(heap),
            HeapEntry::Attachment(heap) => Err(RhiError::InvalidHandle(format!(
                "{:?} heap holds no descriptor set",
                heap.desc.heap_type
            ))),
        }
    }

    pub fn attachment_heap(&self) -> RhiResult<&AttachmentHeap> {
        match self {
            HeapEntry::Attachment(heap) => Ok(heap),
            HeapEntry::Set(heap) => Err(RhiError::InvalidHandle(format!(
                "{:?} heap holds no attachments",
                heap.desc.heap_type
            ))),
        }
    }

    pub fn destroy(self, device: &ash::Device) {
        match self {
            HeapEntry::Set(heap) => unsafe {
                for slot in heap.slots.into_iter().flatten() {
                    destroy_owned(device, slot.owned);
                }
                device.destroy_descriptor_pool(heap.pool, None);
                if let Some(layout) = heap.own_layout {
                    device.destroy_descriptor_set_layout(layout, None);
                }
            },
            HeapEntry::Attachment(heap) => unsafe {
                for view in heap.views.into_iter().flatten() {
                    device.destroy_image_view(view.view, None);
                }
            },
        }
    }
}

fn destroy_owned(device: &ash::Device, owned: Owned) {
    unsafe {
        match owned {
            Owned::None => {}
            Owned::View(view) => device.destroy_image_view(view, None),
            Owned::Sampler(sampler) => device.destroy_sampler(sampler, None),
        }
    }
}

fn check_index(desc: &HeapDesc, index: u32) -> RhiResult<()> {
    if index >= desc.capacity {
        return Err(RhiError::InvalidHandle(format!(
            "descriptor index {index} out of range for {:?} heap of {}",
            desc.heap_type, desc.capacity
        )));
    }
    Ok(())
}

impl SetHeap {
    fn new(
        device: &ash::Device,
        shared_layouts: (vk::DescriptorSetLayout, vk::DescriptorSetLayout),
        desc: HeapDesc,
    ) -> RhiResult<Self> {
        let visible_capacity = match desc.heap_type {
            HeapType::Sampler => VISIBLE_SAMPLER_CAPACITY,
            _ => VISIBLE_RESOURCE_CAPACITY,
        };
        // Visible layouts have a fixed array size; staging layouts match the heap.
        let array_size = match desc.visibility {
            HeapVisibility::ShaderVisible => {
                if desc.capacity > visible_capacity {
                    return Err(RhiError::Unsupported(format!(
                        "shader-visible {:?} heap of {} exceeds {}",
                        desc.heap_type, desc.capacity, visible_capacity
                    )));
                }
                visible_capacity
            }
            HeapVisibility::Staging => desc.capacity,
        };

        let (own_layout, layout) = match (desc.visibility, desc.heap_type) {
            (HeapVisibility::ShaderVisible, HeapType::Sampler) => (None, shared_layouts.1),
            (HeapVisibility::ShaderVisible, _) => (None, shared_layouts.0),
            (HeapVisibility::Staging, HeapType::Sampler) => {
                let layout = create_set_layout(
                    device,
                    &sampler_bindings(array_size),
                    HeapVisibility::Staging,
                )?;
                (Some(layout), layout)
            }
            (HeapVisibility::Staging, _) => {
                let layout = create_set_layout(
                    device,
                    &resource_bindings(array_size),
                    HeapVisibility::Staging,
                )?;
                (Some(layout), layout)
            }
        };

        let pool_sizes: Vec<vk::DescriptorPoolSize> = match desc.heap_type {
            HeapType::Sampler => vec![vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: array_size,
            }],
            _ => vec![
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::STORAGE_BUFFER,
                    descriptor_count: array_size,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::SAMPLED_IMAGE,
                    descriptor_count: array_size,
                },
            ],
        };
        let pool_flags = match desc.visibility {
            HeapVisibility::ShaderVisible => vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND,
            HeapVisibility::Staging => vk::DescriptorPoolCreateFlags::empty(),
        };
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(pool_flags)
            .max_sets(1)
            .pool_sizes(&pool_sizes);

        let destroy_layout = |device: &ash::Device| {
            if let Some(layout) = own_layout {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
            }
        };

        let pool = match unsafe { device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                destroy_layout(device);
                return Err(e.into());
            }
        };

        let set_layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);
        let set = match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe { device.destroy_descriptor_pool(pool, None) };
                destroy_layout(device);
                return Err(e.into());
            }
        };

        let mut slots = Vec::with_capacity(desc.capacity as usize);
        slots.resize_with(desc.capacity as usize, || None);

        Ok(Self {
            desc,
            set,
            pool,
            own_layout,
            slots,
        })
    }

    fn store(&mut self, device: &ash::Device, index: u32, slot: Slot) {
        if let Some(old) = self.slots[index as usize].replace(slot) {
            destroy_owned(device, old.owned);
        }
    }
}

fn image_view(
    device: &ash::Device,
    image: vk::Image,
    format: TextureFormat,
    aspect_mask: vk::ImageAspectFlags,
) -> RhiResult<vk::ImageView> {
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(convert::format(format))
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    Ok(unsafe { device.create_image_view(&info, None)? })
}

impl DescriptorDevice for VulkanDevice {
    fn create_descriptor_heap(&self, desc: &HeapDesc) -> RhiResult<HeapId> {
        if desc.capacity == 0 {
            return Err(RhiError::ResourceCreation(format!(
                "{:?} heap with zero capacity",
                desc.heap_type
            )));
        }
        let shared = &self.shared;

        let entry = match desc.heap_type {
            HeapType::RenderTarget | HeapType::DepthStencil => {
                if desc.visibility == HeapVisibility::ShaderVisible {
                    return Err(RhiError::Unsupported(format!(
                        "{:?} heaps cannot be shader visible",
                        desc.heap_type
                    )));
                }
                HeapEntry::Attachment(AttachmentHeap {
                    desc: *desc,
                    views: vec![None; desc.capacity as usize],
                })
            }
            HeapType::ConstantShaderResource | HeapType::Sampler => HeapEntry::Set(SetHeap::new(
                &shared.device,
                (shared.bindless.resource_layout, shared.bindless.sampler_layout),
                *desc,
            )?),
        };

        let mut registry = shared.registry.lock();
        let id = registry.heap_id();
        registry.heaps.insert(id, entry);
        debug!(
            "Created {:?} {:?} heap of {} as {:?}",
            desc.visibility, desc.heap_type, desc.capacity, id
        );
        Ok(id)
    }

    fn create_view(
        &self,
        resource: ResourceId,
        kind: ViewKind,
        dest: DescriptorHandle,
    ) -> RhiResult<()> {
        let device = &self.shared.device;
        let mut guard = self.shared.registry.lock();
        let registry = &mut *guard;

        let heap = registry
            .heaps
            .get_mut(&dest.heap)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown heap {}", dest.heap.0)))?;
        let desc = heap.desc();
        if desc.heap_type != kind.heap_type() {
            return Err(RhiError::InvalidHandle(format!(
                "{} view cannot live in a {:?} heap",
                kind.name(),
                desc.heap_type
            )));
        }
        check_index(&desc, dest.index)?;

        match (kind, heap) {
            (ViewKind::Constant, HeapEntry::Set(heap)) => {
                let buffer = registry
                    .buffers
                    .get(&resource)
                    .ok_or_else(|| {
                        RhiError::InvalidHandle(format!("unknown buffer {}", resource.0))
                    })?;
                let info = vk::DescriptorBufferInfo::default()
                    .buffer(buffer.buffer)
                    .offset(0)
                    .range(vk::WHOLE_SIZE);
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(heap.set)
                    .dst_binding(BINDING_CONSTANT)
                    .dst_array_element(dest.index)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(&info));
                unsafe { device.update_descriptor_sets(&[write], &[]) };
                heap.store(
                    device,
                    dest.index,
                    Slot {
                        binding: BINDING_CONSTANT,
                        owned: Owned::None,
                    },
                );
            }
            (ViewKind::ShaderResource, HeapEntry::Set(heap)) => {
                let image = registry
                    .images
                    .get(&resource)
                    .ok_or_else(|| {
                        RhiError::InvalidHandle(format!("unknown texture {}", resource.0))
                    })?;
                let view = image_view(
                    device,
                    image.image,
                    image.format,
                    convert::aspect(image.format),
                )?;
                let info = vk::DescriptorImageInfo::default()
                    .image_view(view)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(heap.set)
                    .dst_binding(BINDING_TEXTURE)
                    .dst_array_element(dest.index)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(std::slice::from_ref(&info));
                unsafe { device.update_descriptor_sets(&[write], &[]) };
                heap.store(
                    device,
                    dest.index,
                    Slot {
                        binding: BINDING_TEXTURE,
                        owned: Owned::View(view),
                    },
                );
            }
            (ViewKind::RenderTarget | ViewKind::DepthStencil, HeapEntry::Attachment(heap)) => {
                let image = registry
                    .images
                    .get(&resource)
                    .ok_or_else(|| {
                        RhiError::InvalidHandle(format!("unknown texture {}", resource.0))
                    })?;
                if (kind == ViewKind::DepthStencil) != image.format.is_depth() {
                    return Err(RhiError::Unsupported(format!(
                        "{} view of a {:?} texture",
                        kind.name(),
                        image.format
                    )));
                }
                // Attachments cover stencil too; sampled views read depth only.
                let aspect = if kind == ViewKind::DepthStencil {
                    vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
                } else {
                    vk::ImageAspectFlags::COLOR
                };
                let view = image_view(device, image.image, image.format, aspect)?;
                let old = heap.views[dest.index as usize].replace(AttachmentView {
                    view,
                    extent: image.extent,
                });
                if let Some(old) = old {
                    unsafe { device.destroy_image_view(old.view, None) };
                }
            }
            _ => {
                return Err(RhiError::InvalidHandle(format!(
                    "{} view does not match heap {}",
                    kind.name(),
                    dest.heap.0
                )));
            }
        }
        Ok(())
    }

    fn create_sampler(&self, mode: SamplerMode, dest: DescriptorHandle) -> RhiResult<()> {
        let device = &self.shared.device;
        let mut registry = self.shared.registry.lock();
        let heap = match registry.heaps.get_mut(&dest.heap) {
            Some(HeapEntry::Set(heap)) if heap.desc.heap_type == HeapType::Sampler => heap,
            _ => {
                return Err(RhiError::InvalidHandle(format!(
                    "heap {} is not a sampler heap",
                    dest.heap.0
                )));
            }
        };
        check_index(&heap.desc, dest.index)?;

        let sampler = unsafe { device.create_sampler(&convert::sampler_info(mode), None)? };
        let info = vk::DescriptorImageInfo::default().sampler(sampler);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(heap.set)
            .dst_binding(BINDING_SAMPLER)
            .dst_array_element(dest.index)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .image_info(std::slice::from_ref(&info));
        unsafe { device.update_descriptor_sets(&[write], &[]) };
        heap.store(
            device,
            dest.index,
            Slot {
                binding: BINDING_SAMPLER,
                owned: Owned::Sampler(sampler),
            },
        );
        Ok(())
    }

    fn copy_descriptor(&self, src: DescriptorHandle, dst: DescriptorHandle) -> RhiResult<()> {
        let device = &self.shared.device;
        let mut registry = self.shared.registry.lock();

        let (src_set, binding) = {
            let heap = registry.heap(src.heap)?.set_heap()?;
            if heap.desc.visibility != HeapVisibility::Staging {
                return Err(RhiError::InvalidHandle(format!(
                    "copy source heap {} is not a staging heap",
                    src.heap.0
                )));
            }
            check_index(&heap.desc, src.index)?;
            let slot = heap.slots[src.index as usize].as_ref().ok_or_else(|| {
                RhiError::InvalidHandle(format!("copy from empty slot {}", src.index))
            })?;
            (heap, slot.binding)
        };
        let src_type = src_set.desc.heap_type;
        let src_set = src_set.set;

        let dst_heap = match registry.heaps.get_mut(&dst.heap) {
            Some(HeapEntry::Set(heap)) => heap,
            _ => {
                return Err(RhiError::InvalidHandle(format!(
                    "copy destination heap {} holds no descriptor set",
                    dst.heap.0
                )));
            }
        };
        if dst_heap.desc.heap_type != src_type {
            return Err(RhiError::InvalidHandle(format!(
                "copy between {:?} and {:?} heaps",
                src_type, dst_heap.desc.heap_type
            )));
        }
        check_index(&dst_heap.desc, dst.index)?;

        let copy = vk::CopyDescriptorSet::default()
            .src_set(src_set)
            .src_binding(binding)
            .src_array_element(src.index)
            .dst_set(dst_heap.set)
            .dst_binding(binding)
            .dst_array_element(dst.index)
            .descriptor_count(1);
        unsafe { device.update_descriptor_sets(&[], &[copy]) };
        dst_heap.store(
            device,
            dst.index,
            Slot {
                binding,
                owned: Owned::None,
            },
        );
        Ok(())
    }

    fn release_descriptor_heap(&self, heap: HeapId) {
        let entry = self.shared.registry.lock().heaps.remove(&heap);
        if let Some(entry) = entry {
            entry.destroy(&self.shared.device);
            debug!("Released heap {:?}", heap);
        }
    }
}
