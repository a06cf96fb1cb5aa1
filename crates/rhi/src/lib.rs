//! Render hardware interface.
//!
//! This crate defines the narrow capability traits the renderer is written
//! against and ships two implementations of them:
//! - [`headless`] records every call and simulates the GPU timeline, for tests
//!   and tooling
//! - [`vulkan`] drives a real device through `ash` and `gpu-allocator`
//!
//! Shared handle and description types live in [`types`].

mod backend;
mod error;

pub mod headless;
pub mod types;
pub mod vulkan;

pub use backend::{
    CommandRecorder, DescriptorDevice, GpuQueue, PipelineDevice, PresentSurface, RenderDevice,
    ResourceDevice,
};
pub use error::{RhiError, RhiResult};
pub use types::*;
