//! Offscreen presentation surface.

use tracing::debug;

use super::device::VulkanDevice;
use crate::backend::{PresentSurface, ResourceDevice};
use crate::error::{RhiError, RhiResult};
use crate::types::{BindFlags, ResourceId, ResourceState, SurfaceDesc, TextureDesc, TextureFormat};

/// A ring of device-local color images standing in for a swapchain.
///
/// Presenting advances the ring; the images can be copied out by tooling.
pub struct VulkanSurface {
    device: VulkanDevice,
    images: Vec<ResourceId>,
    current: usize,
    width: u32,
    height: u32,
    format: TextureFormat,
}

impl VulkanSurface {
    pub(crate) fn new(device: VulkanDevice, desc: &SurfaceDesc) -> RhiResult<Self> {
        if desc.buffer_count == 0 {
            return Err(RhiError::ResourceCreation(
                "surface needs at least one buffer".to_string(),
            ));
        }

        let mut images = Vec::with_capacity(desc.buffer_count);
        for i in 0..desc.buffer_count {
            let created = device.create_texture(&TextureDesc {
                name: format!("back buffer {i}"),
                width: desc.width,
                height: desc.height,
                format: desc.format,
                bind_flags: BindFlags::RENDER_TARGET,
                initial_state: ResourceState::Present,
            });
            match created {
                Ok(id) => images.push(id),
                Err(e) => {
                    for id in images {
                        device.release_resource(id);
                    }
                    return Err(e);
                }
            }
        }
        debug!(
            "Offscreen surface {}x{} with {} buffer(s)",
            desc.width, desc.height, desc.buffer_count
        );

        Ok(Self {
            device,
            images,
            current: 0,
            width: desc.width,
            height: desc.height,
            format: desc.format,
        })
    }
}

impl PresentSurface for VulkanSurface {
    fn buffer_count(&self) -> usize {
        self.images.len()
    }

    fn back_buffer(&self, index: usize) -> RhiResult<ResourceId> {
        self.images
            .get(index)
            .copied()
            .ok_or_else(|| RhiError::InvalidHandle(format!("back buffer {index}")))
    }

    fn current_index(&self) -> usize {
        self.current
    }

    fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn format(&self) -> TextureFormat {
        self.format
    }

    fn present(&mut self) -> RhiResult<usize> {
        self.current = (self.current + 1) % self.images.len();
        Ok(self.current)
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        for id in self.images.drain(..) {
            self.device.release_resource(id);
        }
    }
}
