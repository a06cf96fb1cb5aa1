//! Graphics pipeline creation.
//!
//! Every pipeline uses the shared bindless layout and dynamic rendering, so a
//! pipeline state only needs shaders, fixed-function state and attachment
//! formats. Viewport and scissor are dynamic.

use std::io::Cursor;

use ash::vk;
use tracing::info;

use super::convert;
use super::device::{PipelineEntry, VulkanDevice};
use crate::backend::PipelineDevice;
use crate::error::{RhiError, RhiResult};
use crate::types::{PipelineId, PipelineStateDesc};

const ENTRY_POINT: &std::ffi::CStr = c"main";

fn shader_module(device: &ash::Device, name: &str, bytecode: &[u8]) -> RhiResult<vk::ShaderModule> {
    let code = ash::util::read_spv(&mut Cursor::new(bytecode))
        .map_err(|e| RhiError::ResourceCreation(format!("invalid SPIR-V for '{name}': {e}")))?;
    let info = vk::ShaderModuleCreateInfo::default().code(&code);
    Ok(unsafe { device.create_shader_module(&info, None)? })
}

impl PipelineDevice for VulkanDevice {
    fn create_pipeline_state(&self, desc: &PipelineStateDesc) -> RhiResult<PipelineId> {
        let device = &self.shared.device;

        let vertex = shader_module(device, &desc.name, &desc.vertex_shader)?;
        let fragment = match shader_module(device, &desc.name, &desc.pixel_shader) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vertex, None) };
                return Err(e);
            }
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex)
                .name(ENTRY_POINT),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment)
                .name(ENTRY_POINT),
        ];

        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: desc.vertex_layout.stride(),
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attributes = convert::vertex_attributes(desc.vertex_layout);
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(convert::topology(desc.topology));

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(convert::polygon_mode(desc.fill))
            .cull_mode(convert::cull_mode(desc.cull))
            .front_face(convert::front_face(desc.winding))
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let stencil_op = vk::StencilOpState::default()
            .fail_op(vk::StencilOp::KEEP)
            .pass_op(vk::StencilOp::KEEP)
            .depth_fail_op(vk::StencilOp::KEEP)
            .compare_op(vk::CompareOp::ALWAYS)
            .compare_mask(0xff)
            .write_mask(0xff);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_enable)
            .depth_write_enable(desc.depth_enable)
            .depth_compare_op(convert::compare_op(desc.depth_func))
            .stencil_test_enable(desc.stencil_enable)
            .front(stencil_op)
            .back(stencil_op);

        let blend_attachments = [convert::blend_attachment(desc.blend)];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [convert::format(desc.color_format)];
        let mut rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats);
        if let Some(depth) = desc.depth_format {
            let depth = convert::format(depth);
            rendering = rendering
                .depth_attachment_format(depth)
                .stencil_attachment_format(depth);
        }

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(self.shared.bindless.pipeline_layout)
            .push_next(&mut rendering);

        let result = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        };
        unsafe {
            device.destroy_shader_module(vertex, None);
            device.destroy_shader_module(fragment, None);
        }
        let pipeline = result.map_err(|(_, e)| e)?[0];

        let mut registry = self.shared.registry.lock();
        let id = registry.pipeline_id();
        registry.pipelines.insert(id, PipelineEntry { pipeline });
        info!("Graphics pipeline '{}' created as {:?}", desc.name, id);
        Ok(id)
    }

    fn release_pipeline_state(&self, pipeline: PipelineId) {
        let entry = self.shared.registry.lock().pipelines.remove(&pipeline);
        if let Some(entry) = entry {
            unsafe { self.shared.device.destroy_pipeline(entry.pipeline, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_point_name() {
        assert_eq!(ENTRY_POINT.to_str().unwrap(), "main");
    }
}
