use anyhow::Result;

use crate::device::Device;
use crate::frame::FrameContext;

use super::handler::{AgentHandler, BuildCtx};

/// Creates persistent GPU resources once per device.
pub trait ResourceBuilder<D: Device>: Send + 'static {
    fn build_resources(&mut self, ctx: &mut BuildCtx<'_, D>) -> Result<()>;

    fn release_resources(&mut self, frame: &FrameContext<D>);
}

/// Runs a [`ResourceBuilder`] on the first Build and skips every Build after
/// that until ReleaseResources.
pub struct ResourceAgent<R> {
    builder: R,
    built: bool,
}

impl<R> ResourceAgent<R> {
    pub fn new(builder: R) -> Self {
        Self {
            builder,
            built: false,
        }
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn builder(&self) -> &R {
        &self.builder
    }
}

impl<D, R> AgentHandler<D> for ResourceAgent<R>
where
    D: Device,
    R: ResourceBuilder<D>,
{
    fn on_build(&mut self, ctx: &mut BuildCtx<'_, D>) -> Result<()> {
        if self.built {
            return Ok(());
        }
        self.builder.build_resources(ctx)?;
        self.built = true;
        Ok(())
    }

    fn on_release_resources(&mut self, frame: &FrameContext<D>) {
        if self.built {
            self.builder.release_resources(frame);
            self.built = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentConfig, AgentEvent, ThreadingMode};
    use crate::descriptor::{DescriptorFlags, DescriptorKind, DescriptorRange, HandleAllocator};
    use crate::device::headless::{HeadlessConfig, HeadlessDevice};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Textures {
        range: Option<DescriptorRange<HeadlessDevice>>,
        builds: Arc<AtomicUsize>,
    }

    impl ResourceBuilder<HeadlessDevice> for Textures {
        fn build_resources(&mut self, ctx: &mut BuildCtx<'_, HeadlessDevice>) -> Result<()> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            let allocator = ctx.allocator().ok_or_else(|| anyhow::anyhow!("no allocator"))?;
            self.range = allocator.allocate_scoped(DescriptorKind::Resource, 4, DescriptorFlags::SHADER_VISIBLE);
            anyhow::ensure!(self.range.is_some(), "descriptor allocation failed");
            Ok(())
        }

        fn release_resources(&mut self, _frame: &FrameContext<HeadlessDevice>) {
            self.range = None;
        }
    }

    #[test]
    fn builds_once_until_released() {
        let device = Arc::new(HeadlessDevice::new(HeadlessConfig::default()));
        let allocator = Arc::new(HandleAllocator::new(Arc::clone(&device)));
        let frame = Arc::new(FrameContext::new(2));
        frame.attach(Arc::clone(&device), Arc::clone(&allocator));

        let textures = Textures::default();
        let builds = Arc::clone(&textures.builds);
        let agent = Agent::new(
            "textures",
            AgentConfig::resource_builder(ThreadingMode::Inline),
            frame,
            ResourceAgent::new(textures),
        );
        agent.start();

        agent.post_event(AgentEvent::Build, None);
        agent.post_event(AgentEvent::Build, None);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(allocator.free_slots(DescriptorKind::Resource, DescriptorFlags::SHADER_VISIBLE), 252);

        agent.post_event(AgentEvent::ReleaseResources, None);
        assert_eq!(allocator.free_slots(DescriptorKind::Resource, DescriptorFlags::SHADER_VISIBLE), 256);

        agent.post_event(AgentEvent::Build, None);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_build_is_retried() {
        let device = Arc::new(HeadlessDevice::new(HeadlessConfig::default()));
        let allocator = Arc::new(HandleAllocator::new(Arc::clone(&device)));
        let frame = Arc::new(FrameContext::new(2));
        frame.attach(Arc::clone(&device), allocator);

        let textures = Textures::default();
        let builds = Arc::clone(&textures.builds);
        let agent = Agent::new(
            "textures",
            AgentConfig::resource_builder(ThreadingMode::Inline),
            frame,
            ResourceAgent::new(textures),
        );
        agent.start();

        device.fail_descriptor_blocks(true);
        agent.post_event(AgentEvent::Build, None);
        device.fail_descriptor_blocks(false);
        agent.post_event(AgentEvent::Build, None);
        agent.post_event(AgentEvent::Build, None);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }
}
