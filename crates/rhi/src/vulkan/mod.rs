//! Vulkan 1.3 backend.
//!
//! Built on `ash` with `gpu-allocator` for memory. Descriptor heaps map to
//! update-after-bind descriptor sets, fences to a timeline semaphore and
//! render passes to dynamic rendering. Presentation is offscreen.

mod command;
mod convert;
mod descriptor;
mod device;
mod instance;
mod physical_device;
mod pipeline;
mod queue;
mod surface;

pub use command::VulkanCommandList;
pub use device::VulkanDevice;
pub use physical_device::PhysicalDeviceInfo;
pub use queue::VulkanQueue;
pub use surface::VulkanSurface;
