//! Core engine settings

pub mod config;

pub use config::{EngineConfig, VulkanRendererConfig, WindowConfig, MAX_FRAMES_IN_FLIGHT};
