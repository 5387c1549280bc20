//! # Rendering System
//!
//! - [`pipeline`]: declarative pipeline and descriptor-layout definitions,
//!   loaded once into a [`RenderConfig`]
//! - [`backends::vulkan`]: device, resources, frame loop and the
//!   [`VulkanRenderer`] that records shadow and forward passes

pub mod pipeline;

/// Graphics backend implementations
pub mod backends;

pub use backends::vulkan::{FrameStatus, VulkanError, VulkanRenderer, VulkanResult, Window, WindowSignal};
pub use pipeline::RenderConfig;
