//! # Ember Engine
//!
//! A Vulkan frame and resource core: device and queue setup with a `vk-mem`
//! allocator, host/GPU/uniform-array buffers, push-descriptor binding, a
//! frames-in-flight loop that survives swapchain recreation, shadow and
//! forward pipelines built from data files, and a small scene graph.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ember_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::load_validated("config/engine.toml")?;
//!     let render_config = RenderConfig::load_dir(&config.renderer.config_dir)?;
//!     let mut window = Window::new(&config.window)?;
//!     let mut renderer = VulkanRenderer::new(&mut window, &config.renderer, render_config)?;
//!
//!     let mut scene = DemoScene::from_name("cubes").ok_or("unknown scene")?;
//!     scene.load(&mut renderer)?;
//!
//!     let timer = Timer::new();
//!     let mut input = FrameInput::default();
//!     while !window.should_close() {
//!         window.poll_events();
//!         scene.update(renderer.frame_index(), renderer.aspect_ratio(), timer.total_time());
//!         scene.render(&mut input);
//!         renderer.draw_frame(&mut window, &input)?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;
pub mod scene;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        core::{EngineConfig, VulkanRendererConfig, WindowConfig},
        foundation::{
            math::{Mat4, Quat, Transform, Vec3},
            time::Timer,
        },
        render::{FrameStatus, RenderConfig, VulkanError, VulkanRenderer, VulkanResult, Window, WindowSignal},
        scene::{Camera, DemoScene, FrameInput, Light, SceneAssets, SceneGraph},
    };
}
