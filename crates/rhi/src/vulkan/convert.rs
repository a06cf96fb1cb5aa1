//! Translation of backend-neutral types to Vulkan.

use ash::vk;
use gpu_allocator::MemoryLocation as VkMemoryLocation;

use crate::types::{
    BindFlags, BlendMode, BufferUsage, CullMode, DepthFunc, FillMode, MemoryLocation,
    ResourceState, SamplerMode, TextureFormat, Topology, VertexLayout, WindingOrder,
};

/// Synchronization scope and image layout a resource state maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct StateAccess {
    pub layout: vk::ImageLayout,
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

pub(crate) fn state_access(state: ResourceState) -> StateAccess {
    use vk::AccessFlags2 as A;
    use vk::PipelineStageFlags2 as S;

    let (layout, stage, access) = match state {
        ResourceState::Common => (
            vk::ImageLayout::GENERAL,
            S::ALL_COMMANDS,
            A::MEMORY_READ | A::MEMORY_WRITE,
        ),
        // Offscreen presentation: the image is handed to whoever reads it back.
        ResourceState::Present => (vk::ImageLayout::GENERAL, S::ALL_COMMANDS, A::MEMORY_READ),
        ResourceState::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
        ),
        ResourceState::DepthWrite => (
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        ResourceState::DepthRead => (
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS | S::FRAGMENT_SHADER,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::SHADER_SAMPLED_READ,
        ),
        ResourceState::PixelShaderResource => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            S::FRAGMENT_SHADER,
            A::SHADER_SAMPLED_READ,
        ),
        ResourceState::VertexAndConstantBuffer => (
            vk::ImageLayout::GENERAL,
            S::VERTEX_ATTRIBUTE_INPUT | S::VERTEX_SHADER | S::FRAGMENT_SHADER,
            A::VERTEX_ATTRIBUTE_READ | A::UNIFORM_READ,
        ),
        ResourceState::IndexBuffer => (vk::ImageLayout::GENERAL, S::INDEX_INPUT, A::INDEX_READ),
        ResourceState::CopyDest => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            S::COPY,
            A::TRANSFER_WRITE,
        ),
        ResourceState::CopySource => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            S::COPY,
            A::TRANSFER_READ,
        ),
        ResourceState::GenericRead => (vk::ImageLayout::GENERAL, S::ALL_COMMANDS, A::MEMORY_READ),
    };

    StateAccess {
        layout,
        stage,
        access,
    }
}

pub(crate) fn format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Rg32Float => vk::Format::R32G32_SFLOAT,
        // Vulkan has no typeless formats; both alias the packed depth-stencil format.
        TextureFormat::D24UnormS8Uint | TextureFormat::R24G8Typeless => {
            vk::Format::D24_UNORM_S8_UINT
        }
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
    }
}

pub(crate) fn aspect(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub(crate) fn image_usage(flags: BindFlags) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC;
    if flags.contains(BindFlags::SHADER_RESOURCE) {
        usage |= vk::ImageUsageFlags::SAMPLED;
    }
    if flags.contains(BindFlags::RENDER_TARGET) {
        usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if flags.contains(BindFlags::DEPTH_STENCIL) {
        usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if flags.contains(BindFlags::UNORDERED_ACCESS) {
        usage |= vk::ImageUsageFlags::STORAGE;
    }
    usage
}

pub(crate) fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    // Constants are read through the bindless storage-buffer array.
    if usage.contains(BufferUsage::CONSTANT) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

pub(crate) fn memory_location(location: MemoryLocation) -> VkMemoryLocation {
    match location {
        MemoryLocation::Upload => VkMemoryLocation::CpuToGpu,
        MemoryLocation::Device => VkMemoryLocation::GpuOnly,
    }
}

pub(crate) fn compare_op(func: DepthFunc) -> vk::CompareOp {
    match func {
        DepthFunc::Never => vk::CompareOp::NEVER,
        DepthFunc::Less => vk::CompareOp::LESS,
        DepthFunc::Equal => vk::CompareOp::EQUAL,
        DepthFunc::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        DepthFunc::Greater => vk::CompareOp::GREATER,
        DepthFunc::NotEqual => vk::CompareOp::NOT_EQUAL,
        DepthFunc::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        DepthFunc::Always => vk::CompareOp::ALWAYS,
    }
}

pub(crate) fn polygon_mode(fill: FillMode) -> vk::PolygonMode {
    match fill {
        FillMode::Solid => vk::PolygonMode::FILL,
        FillMode::Wireframe => vk::PolygonMode::LINE,
    }
}

pub(crate) fn cull_mode(cull: CullMode) -> vk::CullModeFlags {
    match cull {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub(crate) fn front_face(winding: WindingOrder) -> vk::FrontFace {
    match winding {
        WindingOrder::Clockwise => vk::FrontFace::CLOCKWISE,
        WindingOrder::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
    }
}

pub(crate) fn topology(topology: Topology) -> vk::PrimitiveTopology {
    match topology {
        Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
        Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
        Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub(crate) fn blend_attachment(blend: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    let state = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA);
    match blend {
        BlendMode::Opaque => state.blend_enable(false),
        BlendMode::Alpha => state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD),
        BlendMode::Additive => state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD),
    }
}

/// Vertex attributes of a layout, binding 0.
pub(crate) fn vertex_attributes(layout: VertexLayout) -> Vec<vk::VertexInputAttributeDescription> {
    let attribute = |location: u32, format: vk::Format, offset: u32| {
        vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset,
        }
    };

    let mut attributes = vec![
        attribute(0, vk::Format::R32G32B32_SFLOAT, 0),
        attribute(1, vk::Format::R8G8B8A8_UNORM, 12),
        attribute(2, vk::Format::R32G32_SFLOAT, 16),
    ];
    if layout == VertexLayout::Pcutbn {
        attributes.push(attribute(3, vk::Format::R32G32B32_SFLOAT, 24));
        attributes.push(attribute(4, vk::Format::R32G32B32_SFLOAT, 36));
        attributes.push(attribute(5, vk::Format::R32G32B32_SFLOAT, 48));
    }
    attributes
}

pub(crate) fn sampler_info(mode: SamplerMode) -> vk::SamplerCreateInfo<'static> {
    let (filter, address) = match mode {
        SamplerMode::PointClamp => (vk::Filter::NEAREST, vk::SamplerAddressMode::CLAMP_TO_EDGE),
        SamplerMode::PointWrap => (vk::Filter::NEAREST, vk::SamplerAddressMode::REPEAT),
        SamplerMode::BilinearClamp => (vk::Filter::LINEAR, vk::SamplerAddressMode::CLAMP_TO_EDGE),
        SamplerMode::BilinearWrap => (vk::Filter::LINEAR, vk::SamplerAddressMode::REPEAT),
        SamplerMode::ShadowMap => (vk::Filter::LINEAR, vk::SamplerAddressMode::CLAMP_TO_BORDER),
    };

    let info = vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(address)
        .address_mode_v(address)
        .address_mode_w(address)
        .max_lod(vk::LOD_CLAMP_NONE);

    if mode == SamplerMode::ShadowMap {
        info.compare_enable(true)
            .compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
    } else {
        info
    }
}
