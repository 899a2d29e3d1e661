use std::sync::Arc;

use anyhow::{Context, Result};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::core::{App, AppControl};
use crate::device::gpu::GpuBackend;
use crate::device::Extent;
use crate::frame::FrameOrchestrator;

/// When the runtime asks for redraws.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RedrawMode {
    /// Every loop iteration.
    Continuous,
    /// Only when the orchestrator has a pending update request.
    OnDemand,
}

/// Window/runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub title: String,
    pub initial_size: LogicalSize<f64>,
    pub redraw: RedrawMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            title: "tandem".to_string(),
            initial_size: LogicalSize::new(1280.0, 720.0),
            redraw: RedrawMode::Continuous,
        }
    }
}

/// Entry point for the runtime.
pub struct Runtime;

impl Runtime {
    pub fn run<A>(config: RuntimeConfig, app: A) -> Result<()>
    where
        A: App + 'static,
    {
        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let mut state = RuntimeState {
            config,
            app,
            orchestrator: None,
            window: None,
            exit_requested: false,
        };

        event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error")?;

        Ok(())
    }
}

struct RuntimeState<A: App> {
    config: RuntimeConfig,
    app: A,
    // Declared before the window: the surface must go first.
    orchestrator: Option<FrameOrchestrator<GpuBackend>>,
    window: Option<Arc<Window>>,
    exit_requested: bool,
}

impl<A: App> RuntimeState<A> {
    fn open_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(self.config.initial_size);
        let window = Arc::new(event_loop.create_window(attrs).context("failed to create window")?);

        let orchestrator = self
            .app
            .create_orchestrator(Arc::clone(&window))
            .context("failed to set up frame orchestrator")?;

        let size = window.inner_size();
        self.orchestrator = Some(orchestrator);
        self.resize(Extent::new(size.width, size.height));

        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn resize(&mut self, size: Extent) {
        if let Some(orchestrator) = self.orchestrator.as_mut() {
            orchestrator.resize(size);
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(orchestrator) = self.orchestrator.as_mut() else {
            return;
        };

        let control = match orchestrator.render() {
            Ok(outcome) => self.app.on_frame(orchestrator, outcome),
            Err(e) => {
                log::error!("rendering failed: {e:#}");
                AppControl::Exit
            }
        };

        if control == AppControl::Exit {
            self.request_exit(event_loop);
        }
    }

    fn request_exit(&mut self, event_loop: &ActiveEventLoop) {
        self.exit_requested = true;
        self.shutdown();
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        if let Some(mut orchestrator) = self.orchestrator.take() {
            orchestrator.shutdown();
        }
    }
}

impl<A: App> ApplicationHandler for RuntimeState<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        if let Err(e) = self.open_window(event_loop) {
            log::error!("failed to start: {e:#}");
            self.request_exit(event_loop);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }

        event_loop.set_control_flow(ControlFlow::Wait);

        let redraw = match self.config.redraw {
            RedrawMode::Continuous => true,
            RedrawMode::OnDemand => self
                .orchestrator
                .as_ref()
                .is_some_and(|o| o.needs_update()),
        };
        if redraw {
            if let Some(window) = &self.window {
                window.request_redraw();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }

        if self.app.on_window_event(&event) == AppControl::Exit {
            self.request_exit(event_loop);
            return;
        }

        match event {
            WindowEvent::CloseRequested => self.request_exit(event_loop),

            WindowEvent::Resized(size) => {
                self.resize(Extent::new(size.width, size.height));
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }

            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(window) = self.window.clone() {
                    let size = window.inner_size();
                    self.resize(Extent::new(size.width, size.height));
                    window.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}
