//! Ember demo application
//!
//! Opens a window, loads one of the built-in scenes and renders it until the
//! window is closed.
//!
//! ```text
//! ember_demo [engine config] [scene]
//! ember_demo ember_demo/config/engine.toml lights
//! ```

use ember_engine::foundation::logging;
use ember_engine::prelude::*;
use ember_engine::render::backends::vulkan::WindowError;

const DEFAULT_CONFIG: &str = "ember_demo/config/engine.toml";
const DEFAULT_SCENE: &str = "cubes";

#[derive(thiserror::Error, Debug)]
enum DemoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Vulkan(#[from] VulkanError),

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("Unknown scene `{0}` (expected one of: {1})")]
    UnknownScene(String, String),
}

fn run(config_path: &str, scene_name: &str) -> Result<(), DemoError> {
    let config = EngineConfig::load_validated(config_path)?;
    logging::init_with_filter(config.log_filter());
    log::info!("Starting Ember demo with scene `{scene_name}`");

    let mut scene = DemoScene::from_name(scene_name)
        .ok_or_else(|| DemoError::UnknownScene(scene_name.to_string(), DemoScene::NAMES.join(", ")))?;

    let render_config = RenderConfig::load_dir(&config.renderer.config_dir)?;
    let mut window = Window::new(&config.window)?;
    let mut renderer = VulkanRenderer::new(&mut window, &config.renderer, render_config)?;
    scene.load(&mut renderer)?;

    let mut timer = Timer::new();
    let mut input = FrameInput::default();
    while !window.should_close() {
        window.poll_events();
        for signal in window.drain_signals() {
            match signal {
                WindowSignal::Resized { width, height } => {
                    log::debug!("Framebuffer resized to {width}x{height}");
                    renderer.request_resize();
                }
                WindowSignal::CloseRequested => window.set_should_close(true),
            }
        }
        if window.should_close() {
            break;
        }

        timer.update();
        scene.update(renderer.frame_index(), renderer.aspect_ratio(), timer.total_time());
        scene.render(&mut input);

        match renderer.draw_frame(&mut window, &input)? {
            FrameStatus::WindowClosed => break,
            FrameStatus::SwapchainRecreated => log::debug!("Swapchain recreated; frame skipped"),
            FrameStatus::Presented | FrameStatus::RecreateScheduled => {}
        }

        if timer.frame_count() % 600 == 0 {
            log::info!("{:.1} fps average", timer.average_fps());
        }
    }

    log::info!("Shutting down after {} frames", timer.frame_count());
    Ok(())
}

fn main() {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let scene_name = args.next().unwrap_or_else(|| DEFAULT_SCENE.to_string());

    if let Err(e) = run(&config_path, &scene_name) {
        // Logging may not be set up yet if the config failed to load
        logging::init_with_filter("error");
        log::error!("Fatal: {e}");
        std::process::exit(1);
    }
}
