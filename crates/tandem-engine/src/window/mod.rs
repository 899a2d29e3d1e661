//! Window + runtime loop.
//!
//! Owns the `winit` event loop and window and forwards resize, redraw and
//! close to the frame orchestrator.

mod runtime;

pub use runtime::{RedrawMode, Runtime, RuntimeConfig};
