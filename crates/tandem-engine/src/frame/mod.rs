//! Frame orchestration: slot rotation, fencing, dispatch and submission.

mod config;
mod context;
mod orchestrator;
mod source;

pub use config::FrameConfig;
pub use context::{FrameContext, FrameInfo, FrameSlot};
pub use orchestrator::{FrameHook, FrameOrchestrator, FrameOutcome};
pub use source::{FrameSource, StaticTable};
