use std::sync::Arc;

use anyhow::Result;

use crate::descriptor::HandleAllocator;
use crate::device::Device;
use crate::frame::{FrameContext, FrameSlot};

/// Everything a handler may touch while building a frame.
pub struct BuildCtx<'a, D: Device> {
    pub frame: &'a FrameContext<D>,
    pub device: &'a Arc<D>,
    pub slot: FrameSlot,
    /// Swap-ring image of this frame, when one was acquired.
    pub target: Option<&'a D::Target>,
    recorder: Option<&'a mut D::Recorder>,
}

impl<'a, D: Device> BuildCtx<'a, D> {
    pub(crate) fn new(
        frame: &'a FrameContext<D>,
        device: &'a Arc<D>,
        slot: FrameSlot,
        target: Option<&'a D::Target>,
        recorder: Option<&'a mut D::Recorder>,
    ) -> Self {
        Self {
            frame,
            device,
            slot,
            target,
            recorder,
        }
    }

    /// Open recording for this slot. `None` for resource-only agents.
    pub fn recorder(&mut self) -> Option<&mut D::Recorder> {
        self.recorder.as_deref_mut()
    }

    pub fn allocator(&self) -> Option<Arc<HandleAllocator<D>>> {
        self.frame.allocator()
    }
}

/// Agent-specific behavior.
///
/// Handlers run on whatever thread the agent executes events on, one event at
/// a time.
pub trait AgentHandler<D: Device>: Send + 'static {
    /// Records this frame's work. An error discards the recording; the next
    /// Build tries again.
    fn on_build(&mut self, ctx: &mut BuildCtx<'_, D>) -> Result<()>;

    /// Drops GPU objects created by previous builds.
    fn on_release_resources(&mut self, frame: &FrameContext<D>) {
        let _ = frame;
    }
}

/// Handler that only builds, backed by a closure.
pub struct BuildFn<F>(F);

/// Wraps `f` as a handler with no resources to release.
pub fn build_fn<D, F>(f: F) -> BuildFn<F>
where
    D: Device,
    F: FnMut(&mut BuildCtx<'_, D>) -> Result<()> + Send + 'static,
{
    BuildFn(f)
}

impl<D, F> AgentHandler<D> for BuildFn<F>
where
    D: Device,
    F: FnMut(&mut BuildCtx<'_, D>) -> Result<()> + Send + 'static,
{
    fn on_build(&mut self, ctx: &mut BuildCtx<'_, D>) -> Result<()> {
        (self.0)(ctx)
    }
}
