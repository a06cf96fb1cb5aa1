//! Graphics queue with a timeline semaphore as its fence.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, error};

use super::command::VulkanCommandList;
use super::device::DeviceShared;
use crate::backend::GpuQueue;
use crate::error::{RhiError, RhiResult};

/// The device's graphics queue.
///
/// Signals are timeline semaphore values submitted in queue order, so a
/// signaled value completes only after every list executed before it.
pub struct VulkanQueue {
    shared: Arc<DeviceShared>,
    timeline: vk::Semaphore,
}

impl VulkanQueue {
    pub(crate) fn new(shared: Arc<DeviceShared>) -> RhiResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let timeline = unsafe { shared.device.create_semaphore(&info, None)? };
        debug!("Timeline semaphore created");
        Ok(Self { shared, timeline })
    }

    fn submit(&self, submit: vk::SubmitInfo2<'_>) -> RhiResult<()> {
        let queue = self.shared.queue.lock();
        unsafe {
            self.shared
                .device
                .queue_submit2(*queue, &[submit], vk::Fence::null())
                .map_err(map_device_error)
        }
    }
}

fn map_device_error(result: vk::Result) -> RhiError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
        other => RhiError::Vulkan(other),
    }
}

impl GpuQueue for VulkanQueue {
    type CommandList = VulkanCommandList;

    fn execute(&self, list: &VulkanCommandList) -> RhiResult<()> {
        let buffers = [vk::CommandBufferSubmitInfo::default().command_buffer(list.buffer)];
        self.submit(vk::SubmitInfo2::default().command_buffer_infos(&buffers))
    }

    fn signal(&self, value: u64) -> RhiResult<()> {
        let signals = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.timeline)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        self.submit(vk::SubmitInfo2::default().signal_semaphore_infos(&signals))
    }

    fn completed_value(&self) -> RhiResult<u64> {
        unsafe {
            self.shared
                .device
                .get_semaphore_counter_value(self.timeline)
                .map_err(map_device_error)
        }
    }

    fn wait_for_value(&self, value: u64, timeout: Duration) -> RhiResult<()> {
        let semaphores = [self.timeline];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);

        match unsafe { self.shared.device.wait_semaphores(&wait_info, nanos) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::SynchronizationTimeout {
                value,
                completed: self.completed_value()?,
            }),
            Err(e) => Err(map_device_error(e)),
        }
    }
}

impl Drop for VulkanQueue {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.shared.device.device_wait_idle() {
                error!("Failed to wait for device idle during queue drop: {:?}", e);
            }
            self.shared.device.destroy_semaphore(self.timeline, None);
        }
    }
}
