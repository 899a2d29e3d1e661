//! Tandem engine crate.
//!
//! A frame-pipelined command-recording driver: agents record GPU work in
//! parallel, the [`frame::FrameOrchestrator`] submits it in a fixed order
//! while keeping N frames in flight, and a bitmap [`descriptor::HandleAllocator`]
//! hands out descriptor runs.

pub mod agent;
pub mod core;
pub mod descriptor;
pub mod device;
pub mod frame;
pub mod logging;
pub mod sync;
pub mod time;
pub mod window;
