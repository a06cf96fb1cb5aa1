//! Materials: shader bytecode plus fixed-function state.
//!
//! A [`Material`] is only bindable once its pipeline state was created with
//! `Renderer::create_pipeline_state_for_material`.

use kiln_rhi::{
    BlendMode, CullMode, DepthFunc, FillMode, PipelineId, PipelineStateDesc, TextureFormat,
    Topology, VertexLayout, WindingOrder,
};

/// Compiled shader bytecode for one material.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderSource {
    pub name: String,
    pub vertex: Vec<u8>,
    pub pixel: Vec<u8>,
    pub vertex_layout: VertexLayout,
}

/// Everything a pipeline state is built from.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialConfig {
    pub name: String,
    pub shader: ShaderSource,
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

impl MaterialConfig {
    /// Alpha-blended, depth-less, unculled: the 2D default.
    pub fn unlit_2d(name: impl Into<String>, shader: ShaderSource) -> Self {
        Self {
            name: name.into(),
            shader,
            blend: BlendMode::Alpha,
            depth_func: DepthFunc::Always,
            depth_enable: false,
            stencil_enable: false,
            fill: FillMode::Solid,
            cull: CullMode::None,
            winding: WindingOrder::CounterClockwise,
            topology: Topology::TriangleList,
            color_format: TextureFormat::Rgba8Unorm,
            depth_format: None,
        }
    }

    /// Opaque, depth-tested, back-face culled: the 3D default.
    pub fn opaque_3d(name: impl Into<String>, shader: ShaderSource) -> Self {
        Self {
            name: name.into(),
            shader,
            blend: BlendMode::Opaque,
            depth_func: DepthFunc::LessEqual,
            depth_enable: true,
            stencil_enable: false,
            fill: FillMode::Solid,
            cull: CullMode::Back,
            winding: WindingOrder::CounterClockwise,
            topology: Topology::TriangleList,
            color_format: TextureFormat::Rgba8Unorm,
            depth_format: Some(TextureFormat::D24UnormS8Uint),
        }
    }

    pub(crate) fn pipeline_desc(&self) -> PipelineStateDesc {
        PipelineStateDesc {
            name: self.name.clone(),
            vertex_shader: self.shader.vertex.clone(),
            pixel_shader: self.shader.pixel.clone(),
            vertex_layout: self.shader.vertex_layout,
            blend: self.blend,
            depth_func: self.depth_func,
            depth_enable: self.depth_enable,
            stencil_enable: self.stencil_enable,
            fill: self.fill,
            cull: self.cull,
            winding: self.winding,
            topology: self.topology,
            color_format: self.color_format,
            depth_format: self.depth_format,
        }
    }
}

/// A material and, once created, its pipeline state.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub config: MaterialConfig,
    pub(crate) pipeline: Option<PipelineId>,
}

impl Material {
    pub fn new(config: MaterialConfig) -> Self {
        Self {
            config,
            pipeline: None,
        }
    }

    /// Pipeline state, `None` until created.
    pub fn pipeline(&self) -> Option<PipelineId> {
        self.pipeline
    }

    pub fn vertex_layout(&self) -> VertexLayout {
        self.config.shader.vertex_layout
    }
}

/// Index of a material registered with the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub(crate) u32);

/// Materials selected by camera projection kind.
#[derive(Clone, Debug, PartialEq)]
pub struct DefaultMaterials {
    pub orthographic: MaterialConfig,
    pub perspective: MaterialConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader() -> ShaderSource {
        ShaderSource {
            name: "default".into(),
            vertex: vec![1, 2, 3, 4],
            pixel: vec![5, 6, 7, 8],
            vertex_layout: VertexLayout::Pcu,
        }
    }

    #[test]
    fn test_presets() {
        let flat = MaterialConfig::unlit_2d("flat", shader());
        assert!(!flat.depth_enable);
        assert_eq!(flat.depth_format, None);

        let lit = MaterialConfig::opaque_3d("lit", shader());
        assert!(lit.depth_enable);
        assert_eq!(lit.cull, CullMode::Back);
    }

    #[test]
    fn test_pipeline_desc_copies_state() {
        let config = MaterialConfig::opaque_3d("lit", shader());
        let desc = config.pipeline_desc();
        assert_eq!(desc.name, "lit");
        assert_eq!(desc.vertex_shader, vec![1, 2, 3, 4]);
        assert_eq!(desc.vertex_layout, VertexLayout::Pcu);
        assert_eq!(desc.depth_format, Some(TextureFormat::D24UnormS8Uint));
    }

    #[test]
    fn test_new_material_has_no_pipeline() {
        let material = Material::new(MaterialConfig::unlit_2d("flat", shader()));
        assert_eq!(material.pipeline(), None);
    }
}
