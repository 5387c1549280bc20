//! Pipeline and descriptor layout definitions
//!
//! Plain data read from configuration files. Nothing in this module touches
//! Vulkan; conversion to `vk` structures happens in the backend so these
//! types can be validated and tested without a device.

use serde::{Serialize, Deserialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::ConfigError;

/// Descriptor type of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    /// Uniform buffer range
    UniformBuffer,
    /// Image view + sampler pair
    CombinedImageSampler,
}

/// Shader stage a binding is visible to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderStage {
    /// Vertex shader
    Vertex,
    /// Fragment shader
    Fragment,
}

fn one() -> u32 {
    1
}

/// One binding slot of a descriptor set layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorBindingDefinition {
    /// Human readable name, used in logs
    pub name: String,
    /// Binding index
    pub binding: u32,
    /// Descriptor type
    #[serde(rename = "type")]
    pub kind: DescriptorKind,
    /// Array element count
    #[serde(default = "one")]
    pub count: u32,
    /// Stages that read the binding
    pub stages: Vec<ShaderStage>,
}

/// Descriptor set layout definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorLayoutDefinition {
    /// Name pipelines use to reference this layout
    pub name: String,
    /// Bindings, in any order in the file; sorted by index after validation
    pub bindings: Vec<DescriptorBindingDefinition>,
    /// File the definition was read from
    #[serde(skip)]
    pub source: PathBuf,
}

impl DescriptorLayoutDefinition {
    /// Check binding invariants and sort bindings by index
    ///
    /// Indices must be unique and contiguous from zero, every binding needs
    /// at least one stage and a non-zero count.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let path = self.source.clone();
        let invalid = |field: String, reason: String| ConfigError::InvalidField {
            path: path.clone(),
            field,
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("name".to_string(), "cannot be empty".to_string()));
        }
        if self.bindings.is_empty() {
            return Err(invalid("bindings".to_string(), "layout has no bindings".to_string()));
        }

        let mut seen = HashSet::new();
        for (i, binding) in self.bindings.iter().enumerate() {
            if !seen.insert(binding.binding) {
                return Err(invalid(
                    format!("bindings[{i}].binding"),
                    format!("binding {} is declared twice", binding.binding),
                ));
            }
            if binding.stages.is_empty() {
                return Err(invalid(
                    format!("bindings[{i}].stages"),
                    format!("binding `{}` has no shader stages", binding.name),
                ));
            }
            if binding.count == 0 {
                return Err(invalid(
                    format!("bindings[{i}].count"),
                    format!("binding `{}` has a zero descriptor count", binding.name),
                ));
            }
        }

        self.bindings.sort_by_key(|b| b.binding);
        for (expected, binding) in self.bindings.iter().enumerate() {
            if binding.binding as usize != expected {
                return Err(invalid(
                    "bindings".to_string(),
                    format!("binding indices must be contiguous from 0, found gap before {}", binding.binding),
                ));
            }
        }

        Ok(())
    }

    /// Look up a binding by index
    pub fn binding(&self, index: u32) -> Option<&DescriptorBindingDefinition> {
        self.bindings.get(index as usize).filter(|b| b.binding == index)
    }
}

/// Which render pass a pipeline targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// Lit colour pass into the swapchain
    Forward,
    /// Depth-only pass into a shadow map
    Shadow,
}

/// Per-vertex or per-instance stepping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexInputRate {
    /// Advance per vertex
    #[default]
    Vertex,
    /// Advance per instance
    Instance,
}

/// Vertex attribute formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexFormat {
    /// `float`
    R32Sfloat,
    /// `vec2`
    R32g32Sfloat,
    /// `vec3`
    R32g32b32Sfloat,
    /// `vec4`
    R32g32b32a32Sfloat,
}

impl VertexFormat {
    /// Size of one attribute value in bytes
    pub const fn size_bytes(self) -> u32 {
        match self {
            Self::R32Sfloat => 4,
            Self::R32g32Sfloat => 8,
            Self::R32g32b32Sfloat => 12,
            Self::R32g32b32a32Sfloat => 16,
        }
    }
}

/// Vertex buffer binding description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexBindingDefinition {
    /// Binding index
    pub binding: u32,
    /// Byte stride between elements
    pub stride: u32,
    /// Step rate
    #[serde(default)]
    pub input_rate: VertexInputRate,
}

/// Vertex attribute description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexAttributeDefinition {
    /// Shader input location
    pub location: u32,
    /// Vertex binding the attribute reads from
    pub binding: u32,
    /// Attribute format
    pub format: VertexFormat,
    /// Byte offset inside the element
    pub offset: u32,
}

/// Graphics pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: String,
    /// Target pass
    pub kind: PipelineKind,
    /// SPIR-V file name of the vertex shader, relative to the shader directory
    pub vertex_shader: String,
    /// SPIR-V file name of the fragment shader; optional for shadow pipelines
    #[serde(default)]
    pub fragment_shader: Option<String>,
    /// Name of the descriptor layout the pipeline binds at set 0
    pub descriptor_layout: String,
    /// Vertex buffer bindings
    pub vertex_bindings: Vec<VertexBindingDefinition>,
    /// Vertex attributes
    pub vertex_attributes: Vec<VertexAttributeDefinition>,
    /// File the definition was read from
    #[serde(skip)]
    pub source: PathBuf,
}

impl PipelineDefinition {
    /// Check vertex input invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: String, reason: String| ConfigError::InvalidField {
            path: self.source.clone(),
            field,
            reason,
        };

        if self.vertex_shader.is_empty() {
            return Err(invalid("vertex_shader".to_string(), "cannot be empty".to_string()));
        }
        if self.kind == PipelineKind::Forward && self.fragment_shader.is_none() {
            return Err(invalid(
                "fragment_shader".to_string(),
                "forward pipelines need a fragment shader".to_string(),
            ));
        }

        let mut bindings = HashSet::new();
        for (i, binding) in self.vertex_bindings.iter().enumerate() {
            if !bindings.insert(binding.binding) {
                return Err(invalid(
                    format!("vertex_bindings[{i}].binding"),
                    format!("vertex binding {} is declared twice", binding.binding),
                ));
            }
            if binding.stride == 0 {
                return Err(invalid(format!("vertex_bindings[{i}].stride"), "must be non-zero".to_string()));
            }
        }

        let mut locations = HashSet::new();
        for (i, attribute) in self.vertex_attributes.iter().enumerate() {
            if !locations.insert(attribute.location) {
                return Err(invalid(
                    format!("vertex_attributes[{i}].location"),
                    format!("location {} is declared twice", attribute.location),
                ));
            }
            let Some(binding) = self.vertex_bindings.iter().find(|b| b.binding == attribute.binding) else {
                return Err(invalid(
                    format!("vertex_attributes[{i}].binding"),
                    format!("no vertex binding {}", attribute.binding),
                ));
            };
            if attribute.offset + attribute.format.size_bytes() > binding.stride {
                return Err(invalid(
                    format!("vertex_attributes[{i}].offset"),
                    format!(
                        "attribute ends at byte {} past stride {}",
                        attribute.offset + attribute.format.size_bytes(),
                        binding.stride
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Shader file names this pipeline needs, vertex first
    pub fn shader_files(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.vertex_shader.as_str()).chain(self.fragment_shader.as_deref())
    }

    /// Attach the file a definition came from
    pub fn with_source(mut self, source: &Path) -> Self {
        self.source = source.to_path_buf();
        self
    }
}
