//! Vertex input state from pipeline definitions

use ash::vk;

use crate::render::pipeline::{PipelineDefinition, VertexFormat, VertexInputRate};

/// Vulkan format of a configured attribute format
pub fn vk_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::R32Sfloat => vk::Format::R32_SFLOAT,
        VertexFormat::R32g32Sfloat => vk::Format::R32G32_SFLOAT,
        VertexFormat::R32g32b32Sfloat => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::R32g32b32a32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
    }
}

/// Vulkan input rate of a configured binding
pub fn vk_input_rate(rate: VertexInputRate) -> vk::VertexInputRate {
    match rate {
        VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
        VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
    }
}

/// Owned binding and attribute descriptions for one pipeline
#[derive(Debug, Clone, Default)]
pub struct VulkanVertexLayout {
    /// Buffer bindings
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    /// Attributes sourced from those bindings
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VulkanVertexLayout {
    /// Translate a validated definition
    pub fn from_definition(definition: &PipelineDefinition) -> Self {
        let bindings = definition
            .vertex_bindings
            .iter()
            .map(|b| vk::VertexInputBindingDescription {
                binding: b.binding,
                stride: b.stride,
                input_rate: vk_input_rate(b.input_rate),
            })
            .collect();

        let attributes = definition
            .vertex_attributes
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: a.binding,
                format: vk_format(a.format),
                offset: a.offset,
            })
            .collect();

        Self { bindings, attributes }
    }

    /// Input state pointing into `self`; keep `self` alive until the pipeline is created
    pub fn input_state(&self) -> vk::PipelineVertexInputStateCreateInfo {
        vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&self.bindings)
            .vertex_attribute_descriptions(&self.attributes)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::pipeline::{
        PipelineKind, VertexAttributeDefinition, VertexBindingDefinition,
    };
    use std::path::PathBuf;

    #[test]
    fn test_translation() {
        let definition = PipelineDefinition {
            name: "forward".to_string(),
            kind: PipelineKind::Forward,
            vertex_shader: "forward.vert.spv".to_string(),
            fragment_shader: Some("forward.frag.spv".to_string()),
            descriptor_layout: "forward".to_string(),
            vertex_bindings: vec![VertexBindingDefinition {
                binding: 0,
                stride: 32,
                input_rate: VertexInputRate::Vertex,
            }],
            vertex_attributes: vec![
                VertexAttributeDefinition {
                    location: 0,
                    binding: 0,
                    format: VertexFormat::R32g32b32Sfloat,
                    offset: 0,
                },
                VertexAttributeDefinition {
                    location: 2,
                    binding: 0,
                    format: VertexFormat::R32g32Sfloat,
                    offset: 24,
                },
            ],
            source: PathBuf::new(),
        };

        let layout = VulkanVertexLayout::from_definition(&definition);
        assert_eq!(layout.bindings.len(), 1);
        assert_eq!(layout.bindings[0].stride, 32);
        assert_eq!(layout.attributes[1].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(layout.attributes[1].location, 2);

        let state = layout.input_state();
        assert_eq!(state.vertex_attribute_description_count, 2);
    }
}
