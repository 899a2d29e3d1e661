/// Messages understood by every agent.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AgentEvent {
    /// Record this frame's commands.
    Build,
    /// Drop lazily created GPU resources; the next Build recreates them.
    ReleaseResources,
    /// Terminal. Stops a dedicated worker loop without signalling.
    Finish,
}

/// Where an agent's events execute.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ThreadingMode {
    /// Synchronously on the posting thread, before `post_event` returns.
    Inline,
    /// On a worker thread owned by the agent.
    Dedicated,
}

/// Whether an agent records a command buffer on Build.
///
/// Independent of [`ThreadingMode`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RecordingKind {
    /// Produces persistent resources only; never contributes a buffer.
    None,
    /// Owns per-slot recording storage and submits one buffer per frame.
    Commands,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AgentConfig {
    pub threading: ThreadingMode,
    pub recording: RecordingKind,
}

impl AgentConfig {
    pub const fn new(threading: ThreadingMode, recording: RecordingKind) -> Self {
        Self { threading, recording }
    }

    /// Configuration for an agent that only builds persistent resources.
    pub const fn resource_builder(threading: ThreadingMode) -> Self {
        Self::new(threading, RecordingKind::None)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(ThreadingMode::Dedicated, RecordingKind::Commands)
    }
}

/// Lifecycle of an agent.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Lifecycle {
    Idle,
    Started,
    /// Processing events (worker loop entered, or first inline event handled).
    Running,
    /// Finish was requested; the worker is draining its mailbox.
    Finishing,
    Finished,
}

impl Lifecycle {
    #[inline]
    pub fn accepts_events(self) -> bool {
        matches!(self, Self::Started | Self::Running)
    }
}
