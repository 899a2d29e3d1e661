use std::sync::Arc;

use anyhow::Result;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::device::gpu::GpuBackend;
use crate::frame::{FrameOrchestrator, FrameOutcome};

/// Control directive returned by app callbacks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AppControl {
    Continue,
    Exit,
}

/// Application contract driven by [`Runtime`](crate::window::Runtime).
pub trait App {
    /// Called once the window exists. Registers the app's agents and returns
    /// the orchestrator rendering into the window.
    fn create_orchestrator(&mut self, window: Arc<Window>) -> Result<FrameOrchestrator<GpuBackend>>;

    /// Called for every window event before the runtime handles it.
    fn on_window_event(&mut self, event: &WindowEvent) -> AppControl {
        let _ = event;
        AppControl::Continue
    }

    /// Called after every frame the runtime rendered.
    fn on_frame(&mut self, orchestrator: &mut FrameOrchestrator<GpuBackend>, outcome: FrameOutcome) -> AppControl {
        let _ = (orchestrator, outcome);
        AppControl::Continue
    }
}
