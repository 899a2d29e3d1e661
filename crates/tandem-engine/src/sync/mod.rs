//! CPU-side synchronization primitives.
//!
//! - [`Signal`]: auto-resetting completion event used by the dispatch barrier
//!   and fence waits
//! - [`FrameFence`]: per-frame-slot fence values guarding slot reuse

mod fence;
mod signal;

pub use fence::FrameFence;
pub use signal::Signal;
