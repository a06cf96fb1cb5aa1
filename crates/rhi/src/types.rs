//! Backend-neutral handles and descriptions.
//!
//! Everything the renderer hands to a backend is expressed with the types in
//! this module. Backends translate them to native objects; ids are opaque and
//! only meaningful to the backend that issued them.

use bitflags::bitflags;

/// Opaque id of a device-owned buffer or texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// Opaque id of a descriptor heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(pub u32);

/// Opaque id of a compiled pipeline state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub u64);

/// One addressable slot inside a descriptor heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorHandle {
    pub heap: HeapId,
    pub index: u32,
}

impl DescriptorHandle {
    #[inline]
    pub fn new(heap: HeapId, index: u32) -> Self {
        Self { heap, index }
    }

    /// Handle `count` slots further into the same heap.
    #[inline]
    pub fn offset(self, count: u32) -> Self {
        Self {
            heap: self.heap,
            index: self.index + count,
        }
    }
}

/// Usage state of a GPU resource.
///
/// Transitions between states are explicit; see `resource_barrier` on
/// [`CommandRecorder`](crate::CommandRecorder).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    DepthWrite,
    DepthRead,
    PixelShaderResource,
    VertexAndConstantBuffer,
    IndexBuffer,
    CopyDest,
    CopySource,
    GenericRead,
}

impl ResourceState {
    /// Returns true for states in which the resource may be written by the GPU.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            ResourceState::RenderTarget | ResourceState::DepthWrite | ResourceState::CopyDest
        )
    }
}

/// Kind of view a resource can be bound through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewKind {
    /// Uniform (constant buffer) view.
    Constant,
    /// Shader-readable texture view.
    ShaderResource,
    /// Color attachment view.
    RenderTarget,
    /// Depth-stencil attachment view.
    DepthStencil,
}

impl ViewKind {
    /// Heap type a view of this kind is stored in.
    pub fn heap_type(self) -> HeapType {
        match self {
            ViewKind::Constant | ViewKind::ShaderResource => HeapType::ConstantShaderResource,
            ViewKind::RenderTarget => HeapType::RenderTarget,
            ViewKind::DepthStencil => HeapType::DepthStencil,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ViewKind::Constant => "constant",
            ViewKind::ShaderResource => "shader-resource",
            ViewKind::RenderTarget => "render-target",
            ViewKind::DepthStencil => "depth-stencil",
        }
    }
}

/// Descriptor heap category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// Constant and shader-resource views share one heap type.
    ConstantShaderResource,
    Sampler,
    RenderTarget,
    DepthStencil,
}

/// Whether a heap is a CPU staging heap or bound to the GPU at draw time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapVisibility {
    Staging,
    ShaderVisible,
}

/// Creation parameters of a descriptor heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapDesc {
    pub heap_type: HeapType,
    pub visibility: HeapVisibility,
    pub capacity: u32,
}

/// Descriptor table bound at draw time.
///
/// Tables are addressed by base handle; a shader indexes slot `n` of a table
/// at `base + n`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorTable {
    Constant = 0,
    ShaderResource = 1,
    Sampler = 2,
}

impl DescriptorTable {
    pub const ALL: [DescriptorTable; 3] = [
        DescriptorTable::Constant,
        DescriptorTable::ShaderResource,
        DescriptorTable::Sampler,
    ];

    /// Heap type the table's descriptors live in.
    pub fn heap_type(self) -> HeapType {
        match self {
            DescriptorTable::Constant | DescriptorTable::ShaderResource => {
                HeapType::ConstantShaderResource
            }
            DescriptorTable::Sampler => HeapType::Sampler,
        }
    }
}

bitflags! {
    /// Ways a texture may be viewed.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BindFlags: u32 {
        const SHADER_RESOURCE = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const DEPTH_STENCIL = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
    }
}

impl BindFlags {
    /// Returns true if a view of `kind` may be created under these flags.
    pub fn allows(self, kind: ViewKind) -> bool {
        match kind {
            ViewKind::ShaderResource => self.contains(BindFlags::SHADER_RESOURCE),
            ViewKind::RenderTarget => self.contains(BindFlags::RENDER_TARGET),
            ViewKind::DepthStencil => self.contains(BindFlags::DEPTH_STENCIL),
            ViewKind::Constant => false,
        }
    }
}

bitflags! {
    /// Ways a buffer may be used.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const CONSTANT = 1 << 2;
        const COPY_SRC = 1 << 3;
        const COPY_DST = 1 << 4;
    }
}

/// Memory a buffer lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// CPU-writable, GPU-readable.
    Upload,
    /// GPU-local; written only through copies.
    Device,
}

/// Buffer creation parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferDesc {
    pub name: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub location: MemoryLocation,
    pub initial_state: ResourceState,
}

/// Pixel formats understood by every backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba32Float,
    Rg32Float,
    D24UnormS8Uint,
    R24G8Typeless,
    R32Float,
}

impl TextureFormat {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::Rgba32Float => 16,
            TextureFormat::Rg32Float => 8,
            TextureFormat::D24UnormS8Uint | TextureFormat::R24G8Typeless => 4,
            TextureFormat::R32Float => 4,
        }
    }

    /// Returns true for formats that carry depth.
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            TextureFormat::D24UnormS8Uint | TextureFormat::R24G8Typeless
        )
    }
}

/// Texture creation parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub bind_flags: BindFlags,
    pub initial_state: ResourceState,
}

/// Sampler presets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SamplerMode {
    PointClamp,
    PointWrap,
    BilinearClamp,
    BilinearWrap,
    /// Comparison sampler for shadow map lookups.
    ShadowMap,
}

impl SamplerMode {
    pub const ALL: [SamplerMode; 5] = [
        SamplerMode::PointClamp,
        SamplerMode::PointWrap,
        SamplerMode::BilinearClamp,
        SamplerMode::BilinearWrap,
        SamplerMode::ShadowMap,
    ];
}

/// Viewport rectangle in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-surface viewport with a 0..1 depth range.
    pub fn from_extent(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Vertex input layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexLayout {
    /// Position, color, uv.
    Pcu,
    /// Position, color, uv, tangent, bitangent, normal.
    Pcutbn,
}

impl VertexLayout {
    /// Size of one vertex in bytes.
    pub fn stride(self) -> u32 {
        match self {
            // vec3 + rgba8 + vec2
            VertexLayout::Pcu => 24,
            // vec3 + rgba8 + vec2 + 3 * vec3
            VertexLayout::Pcutbn => 60,
        }
    }
}

/// Color blending presets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Alpha,
    Additive,
    Opaque,
}

/// Depth comparison functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DepthFunc {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Polygon fill mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

/// Face culling mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Front-face winding order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum WindingOrder {
    Clockwise,
    #[default]
    CounterClockwise,
}

/// Primitive topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Everything a backend needs to compile a pipeline state.
///
/// Shader bytecode is owned; the format is whatever the backend consumes
/// (SPIR-V for Vulkan).
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineStateDesc {
    pub name: String,
    pub vertex_shader: Vec<u8>,
    pub pixel_shader: Vec<u8>,
    pub vertex_layout: VertexLayout,
    pub blend: BlendMode,
    pub depth_func: DepthFunc,
    pub depth_enable: bool,
    pub stencil_enable: bool,
    pub fill: FillMode,
    pub cull: CullMode,
    pub winding: WindingOrder,
    pub topology: Topology,
    pub color_format: TextureFormat,
    pub depth_format: Option<TextureFormat>,
}

/// Offscreen presentation surface parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub buffer_count: usize,
    pub format: TextureFormat,
}
