//! Command list recording.
//!
//! Each list owns its own command pool, so resetting a list resets its
//! allocator as well. Rendering is begun lazily on the first draw after the
//! render targets change and ended before anything that cannot run inside a
//! dynamic rendering scope (barriers, copies, clears).

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use super::convert;
use super::descriptor::{AttachmentView, PUSH_CONSTANT_SIZE};
use super::device::DeviceShared;
use crate::backend::CommandRecorder;
use crate::error::{RhiError, RhiResult};
use crate::types::{
    DescriptorHandle, DescriptorTable, HeapId, HeapType, HeapVisibility, PipelineId, ResourceId,
    ResourceState, Viewport,
};

/// A Vulkan command buffer with its pool.
pub struct VulkanCommandList {
    shared: Arc<DeviceShared>,
    pool: vk::CommandPool,
    pub(crate) buffer: vk::CommandBuffer,
    recording: bool,
    rendering: bool,
    color: Option<DescriptorHandle>,
    depth: Option<DescriptorHandle>,
    bound_heaps: Vec<HeapId>,
    /// Table base indices pushed before every draw.
    table_bases: [u32; 4],
}

impl VulkanCommandList {
    pub(crate) fn new(shared: Arc<DeviceShared>) -> RhiResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(shared.physical.graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { shared.device.create_command_pool(&pool_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = match unsafe { shared.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { shared.device.destroy_command_pool(pool, None) };
                return Err(e.into());
            }
        };
        debug!("Command list created");

        Ok(Self {
            shared,
            pool,
            buffer,
            recording: false,
            rendering: false,
            color: None,
            depth: None,
            bound_heaps: Vec::new(),
            table_bases: [0; 4],
        })
    }

    fn device(&self) -> &ash::Device {
        &self.shared.device
    }

    fn ensure_recording(&self) -> RhiResult<()> {
        if !self.recording {
            return Err(RhiError::InvalidHandle(
                "command list is not open for recording".to_string(),
            ));
        }
        Ok(())
    }

    fn end_rendering(&mut self) {
        if self.rendering {
            unsafe { self.shared.device.cmd_end_rendering(self.buffer) };
            self.rendering = false;
        }
    }

    fn attachment(
        &self,
        handle: DescriptorHandle,
        heap_type: HeapType,
    ) -> RhiResult<AttachmentView> {
        let registry = self.shared.registry.lock();
        let heap = registry.heap(handle.heap)?;
        if heap.desc().heap_type != heap_type {
            return Err(RhiError::InvalidHandle(format!(
                "heap {} is not a {:?} heap",
                handle.heap.0, heap_type
            )));
        }
        heap.attachment_heap()?.view(handle.index)
    }

    /// Opens a dynamic rendering scope over the given attachments.
    fn begin_rendering(
        &mut self,
        color: Option<(AttachmentView, vk::AttachmentLoadOp, vk::ClearValue)>,
        depth: Option<(AttachmentView, vk::AttachmentLoadOp, vk::ClearValue)>,
    ) -> RhiResult<()> {
        let extent = match (&color, &depth) {
            (Some((view, ..)), _) | (None, Some((view, ..))) => view.extent,
            (None, None) => {
                return Err(RhiError::InvalidHandle(
                    "no render target or depth target bound".to_string(),
                ));
            }
        };

        let color_attachments: Vec<vk::RenderingAttachmentInfo> = color
            .iter()
            .map(|(view, load_op, clear)| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(view.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(*load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(*clear)
            })
            .collect();
        let depth_attachment = depth.map(|(view, load_op, clear)| {
            vk::RenderingAttachmentInfo::default()
                .image_view(view.view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(clear)
        });

        let mut info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth) = depth_attachment.as_ref() {
            info = info.depth_attachment(depth).stencil_attachment(depth);
        }

        unsafe { self.device().cmd_begin_rendering(self.buffer, &info) };
        self.rendering = true;
        Ok(())
    }

    fn ensure_rendering(&mut self) -> RhiResult<()> {
        if self.rendering {
            return Ok(());
        }
        let load = vk::AttachmentLoadOp::LOAD;
        let color = match self.color {
            Some(handle) => Some((
                self.attachment(handle, HeapType::RenderTarget)?,
                load,
                vk::ClearValue::default(),
            )),
            None => None,
        };
        let depth = match self.depth {
            Some(handle) => Some((
                self.attachment(handle, HeapType::DepthStencil)?,
                load,
                vk::ClearValue::default(),
            )),
            None => None,
        };
        self.begin_rendering(color, depth)
    }

    fn push_table_bases(&self) {
        let mut bytes = [0u8; PUSH_CONSTANT_SIZE as usize];
        for (chunk, base) in bytes.chunks_exact_mut(4).zip(self.table_bases) {
            chunk.copy_from_slice(&base.to_ne_bytes());
        }
        unsafe {
            self.device().cmd_push_constants(
                self.buffer,
                self.shared.bindless.pipeline_layout,
                vk::ShaderStageFlags::ALL_GRAPHICS,
                0,
                &bytes,
            );
        }
    }
}

impl CommandRecorder for VulkanCommandList {
    fn reset(&mut self) -> RhiResult<()> {
        if self.recording {
            return Err(RhiError::InvalidHandle(
                "command list reset while still recording".to_string(),
            ));
        }
        unsafe {
            self.device()
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device().begin_command_buffer(self.buffer, &begin_info)?;
        }
        self.recording = true;
        self.rendering = false;
        self.color = None;
        self.depth = None;
        self.bound_heaps.clear();
        self.table_bases = [0; 4];
        Ok(())
    }

    fn close(&mut self) -> RhiResult<()> {
        self.ensure_recording()?;
        self.end_rendering();
        unsafe { self.device().end_command_buffer(self.buffer)? };
        self.recording = false;
        Ok(())
    }

    fn resource_barrier(
        &mut self,
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    ) -> RhiResult<()> {
        self.ensure_recording()?;
        self.end_rendering();

        let src = convert::state_access(before);
        let dst = convert::state_access(after);

        let mut registry = self.shared.registry.lock();
        if let Some(image) = registry.images.get_mut(&resource) {
            let old_layout = if image.initialized {
                src.layout
            } else {
                vk::ImageLayout::UNDEFINED
            };
            image.initialized = true;

            let barrier = vk::ImageMemoryBarrier2::default()
                .src_stage_mask(src.stage)
                .src_access_mask(src.access)
                .dst_stage_mask(dst.stage)
                .dst_access_mask(dst.access)
                .old_layout(old_layout)
                .new_layout(dst.layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: convert::aspect(image.format)
                        | if image.format.is_depth() {
                            vk::ImageAspectFlags::STENCIL
                        } else {
                            vk::ImageAspectFlags::empty()
                        },
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let dependency =
                vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
            unsafe { self.device().cmd_pipeline_barrier2(self.buffer, &dependency) };
            return Ok(());
        }

        let buffer = registry.buffer(resource)?;
        let barrier = vk::BufferMemoryBarrier2::default()
            .src_stage_mask(src.stage)
            .src_access_mask(src.access)
            .dst_stage_mask(dst.stage)
            .dst_access_mask(dst.access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer.buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        let dependency =
            vk::DependencyInfo::default().buffer_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device().cmd_pipeline_barrier2(self.buffer, &dependency) };
        Ok(())
    }

    fn clear_render_target(&mut self, target: DescriptorHandle, color: [f32; 4]) -> RhiResult<()> {
        self.ensure_recording()?;
        self.end_rendering();
        let view = self.attachment(target, HeapType::RenderTarget)?;
        let clear = vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        };
        self.begin_rendering(Some((view, vk::AttachmentLoadOp::CLEAR, clear)), None)?;
        self.end_rendering();
        Ok(())
    }

    fn clear_depth_stencil(
        &mut self,
        target: DescriptorHandle,
        depth: f32,
        stencil: u8,
    ) -> RhiResult<()> {
        self.ensure_recording()?;
        self.end_rendering();
        let view = self.attachment(target, HeapType::DepthStencil)?;
        let clear = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth,
                stencil: stencil as u32,
            },
        };
        self.begin_rendering(None, Some((view, vk::AttachmentLoadOp::CLEAR, clear)))?;
        self.end_rendering();
        Ok(())
    }

    fn set_render_targets(
        &mut self,
        color: Option<DescriptorHandle>,
        depth: Option<DescriptorHandle>,
    ) -> RhiResult<()> {
        self.ensure_recording()?;
        if let Some(handle) = color {
            self.attachment(handle, HeapType::RenderTarget)?;
        }
        if let Some(handle) = depth {
            self.attachment(handle, HeapType::DepthStencil)?;
        }
        if self.color != color || self.depth != depth {
            self.end_rendering();
            self.color = color;
            self.depth = depth;
        }
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> RhiResult<()> {
        self.ensure_recording()?;
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: viewport.x as i32,
                y: viewport.y as i32,
            },
            extent: vk::Extent2D {
                width: viewport.width as u32,
                height: viewport.height as u32,
            },
        };
        unsafe {
            self.device().cmd_set_viewport(self.buffer, 0, &[vk_viewport]);
            self.device().cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
        Ok(())
    }

    fn set_pipeline_state(&mut self, pipeline: PipelineId) -> RhiResult<()> {
        self.ensure_recording()?;
        let handle = self
            .shared
            .registry
            .lock()
            .pipelines
            .get(&pipeline)
            .map(|entry| entry.pipeline)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown pipeline {}", pipeline.0)))?;
        unsafe {
            self.device()
                .cmd_bind_pipeline(self.buffer, vk::PipelineBindPoint::GRAPHICS, handle)
        };
        Ok(())
    }

    fn set_descriptor_heaps(&mut self, heaps: &[HeapId]) -> RhiResult<()> {
        self.ensure_recording()?;
        let mut sets = Vec::with_capacity(heaps.len());
        {
            let registry = self.shared.registry.lock();
            for &id in heaps {
                let heap = registry.heap(id)?.set_heap()?;
                if heap.desc.visibility != HeapVisibility::ShaderVisible {
                    return Err(RhiError::InvalidHandle(format!(
                        "heap {} is not shader visible",
                        id.0
                    )));
                }
                let first_set = match heap.desc.heap_type {
                    HeapType::Sampler => 1,
                    _ => 0,
                };
                sets.push((first_set, heap.set));
            }
        }

        for (first_set, set) in sets {
            unsafe {
                self.device().cmd_bind_descriptor_sets(
                    self.buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.shared.bindless.pipeline_layout,
                    first_set,
                    &[set],
                    &[],
                );
            }
        }
        self.bound_heaps = heaps.to_vec();
        Ok(())
    }

    fn set_descriptor_table(
        &mut self,
        table: DescriptorTable,
        base: DescriptorHandle,
        count: u32,
    ) -> RhiResult<()> {
        self.ensure_recording()?;
        if !self.bound_heaps.contains(&base.heap) {
            return Err(RhiError::InvalidHandle(format!(
                "table base in heap {} which is not bound",
                base.heap.0
            )));
        }
        let desc = self.shared.registry.lock().heap(base.heap)?.desc();
        if desc.heap_type != table.heap_type() {
            return Err(RhiError::InvalidHandle(format!(
                "{:?} table cannot point into a {:?} heap",
                table, desc.heap_type
            )));
        }
        if base.index as u64 + count as u64 > desc.capacity as u64 {
            return Err(RhiError::InvalidHandle(format!(
                "table {}..{} exceeds heap of {}",
                base.index,
                base.index as u64 + count as u64,
                desc.capacity
            )));
        }
        self.table_bases[table as usize] = base.index;
        Ok(())
    }

    fn set_vertex_buffer(&mut self, buffer: ResourceId, _stride: u32, size: u64) -> RhiResult<()> {
        self.ensure_recording()?;
        let handle = {
            let registry = self.shared.registry.lock();
            let entry = registry.buffer(buffer)?;
            if size > entry.size {
                return Err(RhiError::InvalidHandle(format!(
                    "vertex view of {size} bytes exceeds buffer {}",
                    buffer.0
                )));
            }
            entry.buffer
        };
        unsafe {
            self.device()
                .cmd_bind_vertex_buffers(self.buffer, 0, &[handle], &[0])
        };
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: ResourceId, size: u64) -> RhiResult<()> {
        self.ensure_recording()?;
        let handle = {
            let registry = self.shared.registry.lock();
            let entry = registry.buffer(buffer)?;
            if size > entry.size {
                return Err(RhiError::InvalidHandle(format!(
                    "index view of {size} bytes exceeds buffer {}",
                    buffer.0
                )));
            }
            entry.buffer
        };
        unsafe {
            self.device()
                .cmd_bind_index_buffer(self.buffer, handle, 0, vk::IndexType::UINT32)
        };
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, start_vertex: u32) -> RhiResult<()> {
        self.ensure_recording()?;
        self.ensure_rendering()?;
        self.push_table_bases();
        unsafe {
            self.device()
                .cmd_draw(self.buffer, vertex_count, 1, start_vertex, 0)
        };
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
    ) -> RhiResult<()> {
        self.ensure_recording()?;
        self.ensure_rendering()?;
        self.push_table_bases();
        unsafe {
            self.device()
                .cmd_draw_indexed(self.buffer, index_count, 1, start_index, base_vertex, 0)
        };
        Ok(())
    }

    fn copy_buffer(&mut self, src: ResourceId, dst: ResourceId, size: u64) -> RhiResult<()> {
        self.ensure_recording()?;
        self.end_rendering();
        let (src_buffer, dst_buffer) = {
            let registry = self.shared.registry.lock();
            let src_entry = registry.buffer(src)?;
            let dst_entry = registry.buffer(dst)?;
            if size > src_entry.size || size > dst_entry.size {
                return Err(RhiError::InvalidHandle(format!(
                    "copy of {size} bytes exceeds buffer {} or {}",
                    src.0, dst.0
                )));
            }
            (src_entry.buffer, dst_entry.buffer)
        };
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device()
                .cmd_copy_buffer(self.buffer, src_buffer, dst_buffer, &[region])
        };
        Ok(())
    }

    fn copy_buffer_to_texture(&mut self, src: ResourceId, dst: ResourceId) -> RhiResult<()> {
        self.ensure_recording()?;
        self.end_rendering();
        let (buffer, image, extent, aspect) = {
            let registry = self.shared.registry.lock();
            let buffer = registry.buffer(src)?;
            let image = registry.image(dst)?;
            let needed = image.extent.width as u64
                * image.extent.height as u64
                * image.format.bytes_per_pixel() as u64;
            if buffer.size < needed {
                return Err(RhiError::InvalidHandle(format!(
                    "buffer {} holds {} of {needed} bytes for texture {}",
                    src.0, buffer.size, dst.0
                )));
            }
            (
                buffer.buffer,
                image.image,
                image.extent,
                convert::aspect(image.format),
            )
        };

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        unsafe {
            self.device().cmd_copy_buffer_to_image(
                self.buffer,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        Ok(())
    }
}

impl Drop for VulkanCommandList {
    fn drop(&mut self) {
        // Owners drain the queue before dropping their lists.
        unsafe { self.shared.device.destroy_command_pool(self.pool, None) };
    }
}
