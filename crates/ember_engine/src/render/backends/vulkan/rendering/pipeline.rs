//! Graphics pipelines for the forward and shadow passes
//!
//! Each pipeline is built from a [`PipelineDefinition`] and owns the
//! push-descriptor layout of set 0, its pipeline layout and the pipeline
//! itself. Per-draw model matrices travel as a 64-byte vertex push constant.

use ash::{vk, Device};
use std::path::Path;

use crate::foundation::math::Mat4;
use crate::render::backends::vulkan::resources::descriptor_set::PushDescriptorLayout;
use crate::render::backends::vulkan::rendering::render_pass::RenderPass;
use crate::render::backends::vulkan::rendering::shader::ShaderModule;
use crate::render::backends::vulkan::rendering::vertex_layout::VulkanVertexLayout;
use crate::render::backends::vulkan::{LogicalDevice, VulkanError, VulkanResult};
use crate::render::pipeline::{PipelineDefinition, PipelineKind, RenderConfig};

/// Bytes of the model-matrix push constant
pub const MODEL_PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<[f32; 16]>() as u32;

/// Fixed-function choices that differ between the two passes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedState {
    /// Rasterization samples
    pub samples: vk::SampleCountFlags,
    /// Number of colour attachments written
    pub color_attachments: u32,
    /// Whether depth bias is enabled and set dynamically
    pub depth_bias: bool,
    /// States set while recording
    pub dynamic_states: Vec<vk::DynamicState>,
}

impl FixedState {
    /// State for a pipeline of `kind` in a pass with `samples`
    pub fn for_kind(kind: PipelineKind, samples: vk::SampleCountFlags) -> Self {
        match kind {
            PipelineKind::Forward => Self {
                samples,
                color_attachments: 1,
                depth_bias: false,
                dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            },
            PipelineKind::Shadow => Self {
                samples: vk::SampleCountFlags::TYPE_1,
                color_attachments: 0,
                depth_bias: true,
                dynamic_states: vec![
                    vk::DynamicState::VIEWPORT,
                    vk::DynamicState::SCISSOR,
                    vk::DynamicState::DEPTH_BIAS,
                ],
            },
        }
    }
}

/// Pipeline, pipeline layout and set-0 push-descriptor layout
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    descriptors: PushDescriptorLayout,
    kind: PipelineKind,
}

impl GraphicsPipeline {
    /// Build pipeline `name` of `kind` from `config` for `render_pass`
    pub fn from_config(
        device: &LogicalDevice,
        config: &RenderConfig,
        name: &str,
        kind: PipelineKind,
        shader_dir: &Path,
        render_pass: &RenderPass,
    ) -> VulkanResult<Self> {
        let definition = config.pipeline_of_kind(name, kind)?;
        let layout_definition = config.layout_for(definition)?;
        let descriptors = PushDescriptorLayout::new(device, layout_definition)?;

        let set_layouts = [descriptors.handle()];
        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: MODEL_PUSH_CONSTANT_SIZE,
        }];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe {
            device.device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::driver("vkCreatePipelineLayout"))?
        };

        let fixed = FixedState::for_kind(kind, render_pass.samples());
        let pipeline = match create_pipeline(&device.device, definition, shader_dir, render_pass, layout, &fixed) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(err);
            }
        };

        log::debug!("Created {:?} pipeline `{}` ({:?})", kind, name, fixed.samples);
        Ok(Self {
            device: device.device.clone(),
            pipeline,
            layout,
            descriptors,
            kind,
        })
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Pipeline layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Which pass the pipeline targets
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// Push-descriptor layout of set 0
    pub fn descriptors(&self) -> &PushDescriptorLayout {
        &self.descriptors
    }

    /// Push-descriptor layout of set 0, for recording writes
    pub fn descriptors_mut(&mut self) -> &mut PushDescriptorLayout {
        &mut self.descriptors
    }

    /// Bind the pipeline
    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        }
    }

    /// Flush pending descriptor writes with one push
    pub fn push_descriptors(&self, command_buffer: vk::CommandBuffer) {
        self.descriptors
            .push(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.layout);
    }

    /// Set the model matrix push constant
    pub fn push_model(&self, command_buffer: vk::CommandBuffer, model: &Mat4) {
        unsafe {
            self.device.cmd_push_constants(
                command_buffer,
                self.layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::cast_slice(model.as_slice()),
            );
        }
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Depth-only pipeline rendering shadow maps
pub struct ShadowPipeline {
    inner: GraphicsPipeline,
}

impl ShadowPipeline {
    /// Build shadow pipeline `name` for the shadow `render_pass`
    pub fn from_config(
        device: &LogicalDevice,
        config: &RenderConfig,
        name: &str,
        shader_dir: &Path,
        render_pass: &RenderPass,
    ) -> VulkanResult<Self> {
        let inner = GraphicsPipeline::from_config(device, config, name, PipelineKind::Shadow, shader_dir, render_pass)?;
        Ok(Self { inner })
    }

    /// Underlying pipeline
    pub fn pipeline(&self) -> &GraphicsPipeline {
        &self.inner
    }

    /// Underlying pipeline, for recording descriptor writes
    pub fn pipeline_mut(&mut self) -> &mut GraphicsPipeline {
        &mut self.inner
    }

    /// Set the per-light depth bias
    pub fn set_depth_bias(&self, command_buffer: vk::CommandBuffer, constant: f32, slope: f32) {
        unsafe {
            self.inner
                .device
                .cmd_set_depth_bias(command_buffer, constant, 0.0, slope);
        }
    }
}

fn create_pipeline(
    device: &Device,
    definition: &PipelineDefinition,
    shader_dir: &Path,
    render_pass: &RenderPass,
    layout: vk::PipelineLayout,
    fixed: &FixedState,
) -> VulkanResult<vk::Pipeline> {
    let vertex_shader = ShaderModule::load(device, shader_dir, &definition.vertex_shader)?;
    let fragment_shader = definition
        .fragment_shader
        .as_deref()
        .map(|name| ShaderModule::load(device, shader_dir, name))
        .transpose()?;

    let mut stages = vec![vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX)];
    if let Some(fragment) = &fragment_shader {
        stages.push(fragment.stage_info(vk::ShaderStageFlags::FRAGMENT));
    }

    let vertex_layout = VulkanVertexLayout::from_definition(definition);
    let vertex_input = vertex_layout.input_state();

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&fixed.dynamic_states);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(fixed.depth_bias);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(fixed.samples);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let blend_attachments: Vec<_> = (0..fixed.color_attachments)
        .map(|_| {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
                .build()
        })
        .collect();
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass.handle())
        .subpass(0);

    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
            .map_err(|(_, result)| VulkanError::Driver {
                operation: "vkCreateGraphicsPipelines",
                result,
            })?
    };

    pipelines.into_iter().next().ok_or_else(|| {
        VulkanError::InitializationFailed(format!("No pipeline returned for `{}`", definition.name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_state_uses_pass_samples() {
        let state = FixedState::for_kind(PipelineKind::Forward, vk::SampleCountFlags::TYPE_4);
        assert_eq!(state.samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(state.color_attachments, 1);
        assert!(!state.depth_bias);
        assert!(!state.dynamic_states.contains(&vk::DynamicState::DEPTH_BIAS));
    }

    #[test]
    fn test_shadow_state_is_depth_only() {
        let state = FixedState::for_kind(PipelineKind::Shadow, vk::SampleCountFlags::TYPE_8);
        assert_eq!(state.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(state.color_attachments, 0);
        assert!(state.depth_bias);
        assert!(state.dynamic_states.contains(&vk::DynamicState::DEPTH_BIAS));
    }

    #[test]
    fn test_model_push_constant_is_mat4() {
        assert_eq!(MODEL_PUSH_CONSTANT_SIZE, 64);
        assert_eq!(MODEL_PUSH_CONSTANT_SIZE as usize, std::mem::size_of::<Mat4>());
    }
}
