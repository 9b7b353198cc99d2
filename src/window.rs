// =============================================================================
// WINDOW HOST - winit window driven by polling
// =============================================================================
//
// The frame loop owns control flow, so instead of `run_app` the event loop is
// pumped once per iteration. The renderer only sees the window through
// `SurfaceProvider`; close and resize are reported back through the host.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

use crate::config::WindowConfig;

/// How long to block for events while there is nothing to draw
const MINIMIZED_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Event handler state
struct WindowState {
    attributes: WindowAttributes,
    window: Option<Arc<Window>>,
    close_requested: bool,
    resized: bool,
    minimized: bool,
    error: Option<anyhow::Error>,
}

impl ApplicationHandler for WindowState {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                let size = window.inner_size();
                log::info!("Window created: {}x{}", size.width, size.height);
                self.window = Some(Arc::new(window));
            }
            Err(e) => {
                self.error = Some(anyhow::Error::new(e).context("Failed to create window"));
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.close_requested = true;
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.minimized = size.width == 0 || size.height == 0;
                self.resized = true;
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.close_requested = true;
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }
}

/// Window plus the event loop that feeds it
pub struct WindowHost {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl WindowHost {
    /// Create the event loop and pump it until the window exists.
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new().context("Failed to create event loop")?;

        let attributes = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);

        let mut host = Self {
            event_loop,
            state: WindowState {
                attributes,
                window: None,
                close_requested: false,
                resized: false,
                minimized: false,
                error: None,
            },
        };

        // `resumed` arrives on the first pump on desktop platforms
        while host.state.window.is_none() {
            host.poll_events();
            if let Some(e) = host.state.error.take() {
                return Err(e);
            }
            if host.state.close_requested {
                anyhow::bail!("Window closed before it was created");
            }
        }
        // The initial size event is not a resize worth rebuilding for
        host.state.resized = false;

        Ok(host)
    }

    pub fn window(&self) -> Option<Arc<Window>> {
        self.state.window.clone()
    }

    pub fn should_close(&self) -> bool {
        self.state.close_requested
    }

    pub fn is_minimized(&self) -> bool {
        self.state.minimized
    }

    /// Was the window resized since the last call?
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    /// Dispatch pending events without blocking (briefly blocks when minimized)
    pub fn poll_events(&mut self) {
        let timeout = if self.state.minimized {
            MINIMIZED_POLL_INTERVAL
        } else {
            Duration::ZERO
        };

        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(Some(timeout), &mut self.state) {
            log::debug!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
    }
}
