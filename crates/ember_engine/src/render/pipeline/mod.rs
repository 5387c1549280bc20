//! Declarative pipeline configuration
//!
//! Pipelines and their descriptor layouts are described in data files and
//! loaded into a [`RenderConfig`] once at startup.

pub mod definition;
pub mod loader;

pub use definition::{
    DescriptorBindingDefinition, DescriptorKind, DescriptorLayoutDefinition, PipelineDefinition,
    PipelineKind, ShaderStage, VertexAttributeDefinition, VertexBindingDefinition, VertexFormat,
    VertexInputRate,
};
pub use loader::RenderConfig;
