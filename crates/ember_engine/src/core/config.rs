//! # Engine Configuration
//!
//! Top-level settings for the window, the Vulkan renderer and logging. These
//! are loaded once at startup (TOML or RON through [`Config`]) and handed to
//! the renderer by value; nothing here is global.
//!
//! Pipeline and descriptor-layout definitions live in their own directory and
//! are loaded by [`crate::render::pipeline::RenderConfig`].

use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};

pub use crate::config::{Config, ConfigError};

/// Upper bound on frames in flight
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Window creation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Ember".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// # Vulkan Renderer Configuration
///
/// Backend settings: application metadata, frame pacing, multisampling,
/// shadow resolution, geometry capacities and where shaders and pipeline
/// definitions are found.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VulkanRendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Frames the CPU may record ahead of the GPU
    pub max_frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers (None = debug builds only)
    pub enable_validation: Option<bool>,
    /// Highest MSAA sample count to use; clamped to what the device supports
    pub max_msaa_samples: u32,
    /// Shadow map resolution (square)
    pub shadow_map_size: u32,
    /// Capacity of the shared vertex buffer in bytes
    pub vertex_capacity_bytes: u64,
    /// Capacity of the shared index buffer in bytes
    pub index_capacity_bytes: u64,
    /// Number of material slots in the material uniform array
    pub max_materials: u32,
    /// Directory holding compiled SPIR-V shaders
    pub shader_dir: PathBuf,
    /// Directory holding `pipelines/` and `descriptor_layouts/`
    pub config_dir: PathBuf,
}

impl VulkanRendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set maximum frames in flight
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::InvalidField {
            path: PathBuf::from("<renderer>"),
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.application_name.is_empty() {
            return Err(invalid("application_name", "cannot be empty"));
        }
        if self.max_frames_in_flight == 0 || self.max_frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(invalid("max_frames_in_flight", "must be between 1 and 8"));
        }
        if !self.max_msaa_samples.is_power_of_two() || self.max_msaa_samples > 64 {
            return Err(invalid("max_msaa_samples", "must be a power of two up to 64"));
        }
        if self.shadow_map_size == 0 {
            return Err(invalid("shadow_map_size", "must be non-zero"));
        }
        if self.vertex_capacity_bytes == 0 || self.index_capacity_bytes == 0 {
            return Err(invalid("vertex_capacity_bytes", "geometry capacities must be non-zero"));
        }
        if self.max_materials == 0 {
            return Err(invalid("max_materials", "must be at least 1"));
        }
        Ok(())
    }
}

impl Default for VulkanRendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Ember Application".to_string(),
            max_frames_in_flight: 2,
            enable_validation: None,
            max_msaa_samples: 4,
            shadow_map_size: 2048,
            vertex_capacity_bytes: 16 * 1024 * 1024,
            index_capacity_bytes: 4 * 1024 * 1024,
            max_materials: 64,
            shader_dir: PathBuf::from("target/shaders"),
            config_dir: PathBuf::from("config"),
        }
    }
}

/// # Complete Engine Configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fallback log filter when `RUST_LOG` is unset
    pub log_filter: Option<String>,
    /// Window settings
    pub window: WindowConfig,
    /// Renderer settings
    pub renderer: VulkanRendererConfig,
}

impl EngineConfig {
    /// Load and validate, attributing validation failures to `path`
    pub fn load_validated(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = Self::load_or_default(path)?;
        config.renderer.validate().map_err(|err| match err {
            ConfigError::InvalidField { field, reason, .. } => ConfigError::InvalidField {
                path: path.to_path_buf(),
                field: format!("renderer.{field}"),
                reason,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Log filter to hand to the logger
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or("info")
    }
}

impl Config for EngineConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(VulkanRendererConfig::default().validate().is_ok());
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        let zero = VulkanRendererConfig::default().with_max_frames_in_flight(0);
        assert!(zero.validate().is_err());
        let nine = VulkanRendererConfig::default().with_max_frames_in_flight(9);
        assert!(nine.validate().is_err());
        let three = VulkanRendererConfig::default().with_max_frames_in_flight(3);
        assert!(three.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[renderer]\nmax_frames_in_flight = 3\n").unwrap();

        let config = EngineConfig::load_validated(&path).unwrap();
        assert_eq!(config.renderer.max_frames_in_flight, 3);
        assert_eq!(config.renderer.shadow_map_size, 2048);
        assert_eq!(config.window.width, 1280);
    }

    #[test]
    fn test_invalid_value_names_file_and_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[renderer]\nmax_msaa_samples = 3\n").unwrap();

        match EngineConfig::load_validated(&path).unwrap_err() {
            ConfigError::InvalidField { path: err_path, field, .. } => {
                assert_eq!(err_path, path);
                assert_eq!(field, "renderer.max_msaa_samples");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
