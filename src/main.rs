// =============================================================================
// HELLO TRIANGLE - Vulkan 1.3 dynamic rendering
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  WindowHost (winit, polled)                                     │
// │    └── FrameDriver (acquire -> record -> submit -> present)     │
// │          └── Renderer (owns every Vulkan object)                │
// │                ├── Instance, Surface, Device + queues           │
// │                ├── Swapchain (rebuilt on out-of-date/resize)    │
// │                ├── Pipeline (dynamic viewport/scissor)          │
// │                └── Command buffers + sync, one per frame slot   │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

mod backend;
mod config;
mod error;
mod frame;
mod renderer;
mod window;

use anyhow::{Context, Result};
use config::Config;
use frame::FrameDriver;
use renderer::Renderer;
use std::fs::File;
use window::WindowHost;

fn main() -> Result<()> {
    // Load configuration from config.toml
    let (config, config_source) = Config::load();

    init_logging(&config)?;
    config_source.log();
    log::info!("Starting {}", config.window.title);
    log::info!(
        "Window: {}x{}, {} frames in flight, validation {}",
        config.window.width,
        config.window.height,
        config.frames_in_flight(),
        if config.validation_enabled() { "on" } else { "off" }
    );

    let mut host = WindowHost::new(&config.window)?;
    let window = host.window().context("Window was not created")?;

    let renderer = Renderer::new(&config, window).context("Failed to initialize Vulkan")?;
    let deferred = !renderer.has_swapchain();
    let mut driver = FrameDriver::new(renderer);
    if deferred {
        driver.request_rebuild();
    }

    while !host.should_close() {
        host.poll_events();
        if host.should_close() {
            break;
        }

        if host.take_resized() {
            driver.request_rebuild();
        }

        // Nothing to present into while minimized
        if host.is_minimized() {
            continue;
        }

        driver.draw_frame().context("Frame rendering failed")?;
    }

    // Device is idle once finish returns; dropping tears everything down
    let renderer = driver.finish()?;
    drop(renderer);

    log::info!("Cleanup complete");
    Ok(())
}

/// Initialize logging, optionally writing to the configured log file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        let file = File::create(&config.debug.log_file)
            .with_context(|| format!("Failed to create log file {:?}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}
