//! Resource and synchronization core of the kiln renderer.
//!
//! This crate turns immediate draw calls into ordered GPU submissions:
//! - Fence synchronization and the ring of frame slots in flight
//! - Descriptor allocation with staging views and per-frame visible tables
//! - Resource state tracking with barrier elision
//! - Per-frame camera and model constant slots, plus application constant
//!   buffers
//! - Deferred release of textures and constant buffers the GPU may still read
//! - Immediate-mode draw batching behind [`Renderer`]
//!
//! Everything is written against the capability traits of [`kiln_rhi`], so the
//! same code drives the Vulkan backend and the headless one used in tests.

pub mod camera;
pub mod constant_buffer;
pub mod constant_ring;
pub mod descriptor;
pub mod error;
pub mod fence;
pub mod frame_ring;
pub mod material;
pub mod renderer;
pub mod resource;
pub mod texture;
pub mod ubo;
pub mod vertex;

pub use camera::{Camera, Projection, ProjectionKind};
pub use constant_buffer::ConstantBufferHandle;
pub use constant_ring::{ConstantCategory, ConstantRing, ConstantSlot};
pub use descriptor::{DescriptorAllocator, RangeOffsets, TableSpan};
pub use error::{RenderError, RenderResult};
pub use fence::FenceSynchronizer;
pub use frame_ring::{FrameRing, FrameSlot};
pub use material::{DefaultMaterials, Material, MaterialConfig, MaterialHandle, ShaderSource};
pub use renderer::{
    BoundSampler, BoundView, DrawContext, DrawGeometry, FrameState, FrameStats, Renderer,
};
pub use resource::{ResourceHandle, ResourceKind, ResourceTable, TransitionCheckpoint};
pub use texture::{TextureCreateInfo, TextureHandle};
pub use ubo::{CameraConstants, ModelConstants};
pub use vertex::{Vertex, VertexPcu, VertexPcutbn};
