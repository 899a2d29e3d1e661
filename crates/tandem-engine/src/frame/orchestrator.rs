use std::sync::Arc;

use anyhow::{Context, Result};

use crate::agent::{Agent, AgentConfig, AgentEvent, AgentHandler, Dispatcher};
use crate::descriptor::{DescriptorFlags, DescriptorKind, DescriptorRange, HandleAllocator};
use crate::device::{Backend, Device, DeviceError, Extent, SwapRing, SwapViews, TargetState};
use crate::sync::FrameFence;
use crate::time::FrameClock;

use super::{FrameConfig, FrameContext, FrameInfo, FrameSlot, FrameSource};

type Dev<B> = <B as Backend>::Device;

/// Callback run before or after every frame.
pub type FrameHook = Box<dyn FnMut(&FrameInfo) + Send>;
type ReleaseHook = Box<dyn FnMut() + Send>;

const BEGIN_LABEL: &str = "frame-begin";
const END_LABEL: &str = "frame-end";

/// Result of [`FrameOrchestrator::render`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameOutcome {
    Presented,
    /// Nothing was presented: zero-area surface, transient surface error or a
    /// failed present.
    Skipped,
    /// The device was lost and torn down; the next update rebuilds it.
    DeviceLost,
}

struct ViewRanges<D: Device> {
    _render_targets: DescriptorRange<D>,
    _depth_stencil: DescriptorRange<D>,
}

/// Everything that lives exactly as long as one device connection.
///
/// Field order is drop order.
struct Live<B: Backend> {
    views: Option<ViewRanges<Dev<B>>>,
    swap: B::Swap,
    storages: Vec<<Dev<B> as Device>::Storage>,
    fence: FrameFence<Dev<B>>,
    allocator: Arc<HandleAllocator<Dev<B>>>,
    device: Arc<Dev<B>>,
}

/// Drives the per-frame pipeline.
///
/// Every frame: wait until the GPU released the current slot, reset its
/// storage, record the begin transition, Build every agent of the frame's
/// table behind a barrier, record the end transition, submit
/// `[begin, agents in table order, end]`, present, signal the slot's fence
/// value and advance to the ring's next writable image.
///
/// The device is connected lazily on the first frame and again after a
/// device loss. Must be driven from a single thread.
pub struct FrameOrchestrator<B: Backend> {
    backend: B,
    config: FrameConfig,
    frame: Arc<FrameContext<Dev<B>>>,
    live: Option<Live<B>>,

    slot: FrameSlot,
    frame_index: u64,
    size: Extent,
    zero_size: bool,
    needs_render: bool,

    agents: Vec<Arc<Agent<Dev<B>>>>,
    source: Option<Box<dyn FrameSource<Dev<B>>>>,
    dispatcher: Dispatcher<Dev<B>>,
    batch: Vec<<Dev<B> as Device>::CommandBuffer>,

    pre_frame: Vec<FrameHook>,
    post_frame: Vec<FrameHook>,
    release_hooks: Vec<ReleaseHook>,

    clock: FrameClock,
}

impl<B: Backend> FrameOrchestrator<B> {
    pub fn new(backend: B, config: FrameConfig) -> Self {
        let config = FrameConfig {
            frames_in_flight: config.frames_in_flight.max(1),
            ..config
        };

        Self {
            backend,
            frame: Arc::new(FrameContext::new(config.frames_in_flight)),
            live: None,
            slot: 0,
            frame_index: 0,
            size: config.initial_size,
            zero_size: config.initial_size.is_empty(),
            needs_render: true,
            agents: Vec::new(),
            source: None,
            dispatcher: Dispatcher::new(config.max_wait_batch),
            batch: Vec::with_capacity(2),
            pre_frame: Vec::new(),
            post_frame: Vec::new(),
            release_hooks: Vec::new(),
            clock: FrameClock::new(),
            config,
        }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Shared state to hand to agents created outside the orchestrator.
    pub fn frame_context(&self) -> &Arc<FrameContext<Dev<B>>> {
        &self.frame
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn slot(&self) -> FrameSlot {
        self.slot
    }

    /// Frames presented so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn size(&self) -> Extent {
        self.size
    }

    pub fn is_initialized(&self) -> bool {
        self.live.is_some()
    }

    pub fn device(&self) -> Option<&Arc<Dev<B>>> {
        self.live.as_ref().map(|live| &live.device)
    }

    pub fn allocator(&self) -> Option<&Arc<HandleAllocator<Dev<B>>>> {
        self.live.as_ref().map(|live| &live.allocator)
    }

    pub fn agents(&self) -> &[Arc<Agent<Dev<B>>>] {
        &self.agents
    }

    pub fn set_frame_source(&mut self, source: impl FrameSource<Dev<B>> + 'static) {
        self.source = Some(Box::new(source));
    }

    pub fn add_pre_frame_hook(&mut self, hook: impl FnMut(&FrameInfo) + Send + 'static) {
        self.pre_frame.push(Box::new(hook));
    }

    pub fn add_post_frame_hook(&mut self, hook: impl FnMut(&FrameInfo) + Send + 'static) {
        self.post_frame.push(Box::new(hook));
    }

    /// Runs before agents release their resources on teardown.
    pub fn add_release_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.release_hooks.push(Box::new(hook));
    }

    /// Creates an agent bound to this orchestrator and registers it.
    pub fn spawn_agent(
        &mut self,
        name: impl Into<String>,
        config: AgentConfig,
        handler: impl AgentHandler<Dev<B>>,
    ) -> Arc<Agent<Dev<B>>> {
        let agent = Agent::new(name, config, Arc::clone(&self.frame), handler);
        self.add_agent(agent)
    }

    /// Registers and starts `agent`.
    ///
    /// Registered agents receive ReleaseResources on every teardown and are
    /// finished on shutdown.
    pub fn add_agent(&mut self, agent: Agent<Dev<B>>) -> Arc<Agent<Dev<B>>> {
        if !Arc::ptr_eq(agent.frame(), &self.frame) {
            log::warn!("agent '{}' was created for another frame context", agent.name());
        }

        let agent = Arc::new(agent);
        agent.start();
        self.agents.push(Arc::clone(&agent));
        agent
    }

    pub fn add_agents(&mut self, agents: impl IntoIterator<Item = Agent<Dev<B>>>) -> Vec<Arc<Agent<Dev<B>>>> {
        agents.into_iter().map(|agent| self.add_agent(agent)).collect()
    }

    /// Releases the agent's resources, finishes it and unregisters it.
    ///
    /// Returns `false` when the agent is not registered here.
    pub fn remove_agent(&mut self, agent: &Arc<Agent<Dev<B>>>) -> bool {
        let Some(pos) = self.agents.iter().position(|a| Arc::ptr_eq(a, agent)) else {
            return false;
        };
        let agent = self.agents.remove(pos);

        if self.live.is_some() {
            self.wait_gpu();
            self.dispatcher
                .dispatch_and_wait(AgentEvent::ReleaseResources, std::iter::once(Arc::clone(&agent)));
        }
        agent.finish();
        log::debug!("removed agent '{}'", agent.name());
        true
    }

    pub fn request_update(&mut self) {
        self.needs_render = true;
    }

    pub fn needs_update(&self) -> bool {
        self.needs_render
    }

    /// Renders if an update was requested since the last frame.
    pub fn maybe_update(&mut self) -> Result<Option<FrameOutcome>> {
        if !self.needs_render {
            return Ok(None);
        }
        self.render().map(Some)
    }

    /// Connects the back-end and creates the per-device state.
    ///
    /// Does nothing when already initialized. On failure nothing is kept.
    pub fn initialize(&mut self) -> Result<()> {
        if self.live.is_some() {
            return Ok(());
        }

        let frames = self.config.frames_in_flight;
        let surface_size = if self.zero_size { Extent::new(1, 1) } else { self.size };
        log::info!(
            "connecting graphics back-end ({}x{}, {frames} frames in flight)",
            surface_size.width,
            surface_size.height
        );

        let (device, mut swap) = self
            .backend
            .connect(surface_size, frames)
            .context("failed to connect graphics back-end")?;
        anyhow::ensure!(
            swap.image_count() == frames,
            "swap ring has {} images, expected {frames}",
            swap.image_count()
        );

        let fence = FrameFence::new(&*device, frames).context("failed to create frame fence")?;
        let storages = (0..frames)
            .map(|_| device.create_storage())
            .collect::<Result<Vec<_>, _>>()
            .context("failed to create frame recording storage")?;

        let allocator = Arc::new(HandleAllocator::new(Arc::clone(&device)));
        let views = create_swap_views(&allocator, &mut swap, frames).context("failed to create swap views")?;

        self.slot = swap.current_index();
        self.frame.set_slot(self.slot);
        self.frame.attach(Arc::clone(&device), Arc::clone(&allocator));
        self.clock.reset();

        self.live = Some(Live {
            views: Some(views),
            swap,
            storages,
            fence,
            allocator,
            device,
        });
        Ok(())
    }

    /// Runs one frame.
    ///
    /// Errors are fatal initialization failures only. Device loss is reported
    /// as [`FrameOutcome::DeviceLost`].
    pub fn render(&mut self) -> Result<FrameOutcome> {
        self.needs_render = false;

        if self.zero_size {
            log::trace!("zero-area surface, skipping frame");
            return Ok(FrameOutcome::Skipped);
        }

        self.initialize()?;

        let info = FrameInfo {
            slot: self.slot,
            frame_index: self.frame_index,
            size: self.size,
            time: self.clock.tick(),
        };

        let outcome = match self.run_frame(&info) {
            Ok(outcome) => outcome,
            Err(e) if e.is_device_lost() => {
                log::warn!("{e}; tearing down");
                self.handle_device_lost();
                FrameOutcome::DeviceLost
            }
            Err(e) => {
                log::error!("frame {} failed: {e}", info.frame_index);
                FrameOutcome::Skipped
            }
        };

        self.frame.set_target(None);
        self.batch.clear();
        Ok(outcome)
    }

    fn run_frame(&mut self, info: &FrameInfo) -> Result<FrameOutcome, DeviceError> {
        let Some(live) = self.live.as_mut() else {
            return Ok(FrameOutcome::Skipped);
        };
        let slot = info.slot;
        let device = Arc::clone(&live.device);

        live.fence.wait(slot);
        device.reset_storage(&mut live.storages[slot]);

        for hook in &mut self.pre_frame {
            hook(info);
        }

        let target = match live.swap.target() {
            Ok(target) => target,
            Err(e) if e.is_transient() => {
                log::debug!("frame {} skipped: {e}", info.frame_index);
                self.needs_render = true;
                return Ok(FrameOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };
        self.frame.set_target(Some(target.clone()));

        self.batch.clear();
        let begin = record_transition(
            &*device,
            &mut live.storages[slot],
            BEGIN_LABEL,
            &target,
            TargetState::Present,
            TargetState::RenderTarget,
        )?;

        let table = self
            .source
            .as_deref_mut()
            .and_then(|source| source.agent_table(info));
        if let Some(table) = table {
            self.dispatcher.dispatch_table(AgentEvent::Build, table);
        }

        let end = record_transition(
            &*device,
            &mut live.storages[slot],
            END_LABEL,
            &target,
            TargetState::RenderTarget,
            TargetState::Present,
        )?;

        self.batch.push(begin);
        if let Some(table) = table {
            self.batch
                .extend(table.agents().filter_map(|agent| agent.take_command_buffer()));
        }
        self.batch.push(end);
        device.submit(&mut self.batch)?;

        let presented = match live.swap.present() {
            Ok(()) => true,
            Err(e) if e.is_device_lost() => return Err(e),
            Err(e) => {
                log::warn!("present failed: {e}");
                false
            }
        };

        live.fence.bump(&*device, slot);
        self.slot = live.swap.current_index();
        self.frame.set_slot(self.slot);

        if !presented {
            return Ok(FrameOutcome::Skipped);
        }

        self.frame_index += 1;
        self.frame.set_frame_index(self.frame_index);
        for hook in &mut self.post_frame {
            hook(info);
        }
        Ok(FrameOutcome::Presented)
    }

    /// Resizes the swap ring.
    ///
    /// A zero-area size only pauses rendering; the ring is resized once a
    /// real size arrives.
    pub fn resize(&mut self, size: Extent) {
        if size == self.size {
            return;
        }
        self.size = size;
        self.zero_size = size.is_empty();
        if self.zero_size {
            log::debug!("surface has zero area, pausing rendering");
            return;
        }

        log::info!("resize to {}x{}", size.width, size.height);
        self.request_update();

        let frames = self.config.frames_in_flight;
        let Some(live) = self.live.as_mut() else {
            return;
        };

        live.fence.wait_idle(&*live.device, self.slot);
        live.swap.release_views();
        live.views = None;

        let rebuilt = live
            .swap
            .resize(size)
            .and_then(|()| create_swap_views(&live.allocator, &mut live.swap, frames));
        match rebuilt {
            Ok(views) => {
                live.views = Some(views);
                live.device.log_memory_usage();
            }
            Err(e) if e.is_device_lost() => {
                log::warn!("{e} during resize; tearing down");
                self.handle_device_lost();
                return;
            }
            Err(e) => log::error!("failed to rebuild swap ring: {e}"),
        }

        self.slot = live.swap.current_index();
        self.frame.set_slot(self.slot);
    }

    /// Blocks until the GPU finished every submitted frame.
    pub fn wait_gpu(&mut self) {
        if let Some(live) = self.live.as_mut() {
            live.fence.wait_idle(&*live.device, self.slot);
        }
    }

    /// Quiesces the GPU and drops every device object, including the agents'
    /// resources. The next frame reconnects.
    pub fn release_resources(&mut self) {
        self.teardown(true);
    }

    fn handle_device_lost(&mut self) {
        // The GPU will never reach the pending fence values.
        self.teardown(false);
        self.request_update();
    }

    fn teardown(&mut self, wait_for_gpu: bool) {
        let Some(mut live) = self.live.take() else {
            return;
        };

        if wait_for_gpu {
            live.fence.wait_idle(&*live.device, self.slot);
            live.device.log_memory_usage();
        }

        for hook in &mut self.release_hooks {
            hook();
        }
        self.dispatcher
            .dispatch_and_wait(AgentEvent::ReleaseResources, self.agents.iter().cloned());

        self.batch.clear();
        live.swap.release_views();
        live.views = None;
        live.allocator.teardown();
        drop(live);

        self.frame.detach();
        self.slot = 0;
        self.frame.set_slot(0);
        self.clock.reset();
        log::info!("released device resources");
    }

    /// Releases everything and finishes all registered agents.
    pub fn shutdown(&mut self) {
        self.release_resources();
        for agent in self.agents.drain(..) {
            agent.finish();
        }
    }
}

impl<B: Backend> Drop for FrameOrchestrator<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn record_transition<D: Device>(
    device: &D,
    storage: &mut D::Storage,
    label: &str,
    target: &D::Target,
    before: TargetState,
    after: TargetState,
) -> Result<D::CommandBuffer, DeviceError> {
    let mut recorder = device.begin_recording(storage, label)?;
    device.record_transition(&mut recorder, target, before, after);
    Ok(device.finish_recording(recorder))
}

/// Allocates one render-target descriptor per ring image plus a depth-stencil
/// descriptor and binds them to the ring.
fn create_swap_views<D, S>(
    allocator: &Arc<HandleAllocator<D>>,
    swap: &mut S,
    images: usize,
) -> Result<ViewRanges<D>, DeviceError>
where
    D: Device,
    S: SwapRing,
{
    let render_targets = allocator
        .allocate_scoped(DescriptorKind::RenderTarget, images as u32, DescriptorFlags::NONE)
        .ok_or_else(|| DeviceError::creation("render-target descriptors", "descriptor allocation failed"))?;
    let depth_stencil = allocator
        .allocate_scoped(DescriptorKind::DepthStencil, 1, DescriptorFlags::NONE)
        .ok_or_else(|| DeviceError::creation("depth-stencil descriptor", "descriptor allocation failed"))?;

    swap.create_views(&SwapViews {
        render_targets: render_targets.handle(),
        render_target_stride: allocator.stride(DescriptorKind::RenderTarget),
        depth_stencil: depth_stencil.handle(),
    })?;

    Ok(ViewRanges {
        _render_targets: render_targets,
        _depth_stencil: depth_stencil,
    })
}
