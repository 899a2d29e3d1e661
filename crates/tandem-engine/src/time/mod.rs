//! Frame timing reported to frame sources and hooks.

mod frame_clock;

pub use frame_clock::{FrameClock, FrameTime};
