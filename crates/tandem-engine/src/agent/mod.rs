//! Agents: units of per-frame work driven by the orchestrator.
//!
//! Every agent understands three events (Build, ReleaseResources, Finish) and
//! runs them either inline on the posting thread or on its own worker. The
//! [`Dispatcher`] posts one event to many agents and waits for all of them,
//! which is the only synchronization point between the orchestrator and agent
//! threads.

mod agent;
mod dispatch;
mod event;
mod handler;
mod recording;
mod resource;
mod table;

pub use agent::{Agent, AgentId};
pub use dispatch::{Dispatcher, MAX_WAIT_BATCH};
pub use event::{AgentConfig, AgentEvent, Lifecycle, RecordingKind, ThreadingMode};
pub use handler::{build_fn, AgentHandler, BuildCtx, BuildFn};
pub use resource::{ResourceAgent, ResourceBuilder};
pub use table::{AgentGroup, AgentTable};
