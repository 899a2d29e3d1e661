use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::device::Device;
use crate::frame::FrameContext;
use crate::sync::Signal;

use super::event::{AgentConfig, AgentEvent, Lifecycle, RecordingKind, ThreadingMode};
use super::handler::{AgentHandler, BuildCtx};
use super::recording::RecordingState;

static NEXT_AGENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique agent identifier.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct AgentId(u64);

impl AgentId {
    fn next() -> Self {
        Self(NEXT_AGENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

type Message = (AgentEvent, Option<Arc<Signal>>);

struct Core<D: Device> {
    handler: Box<dyn AgentHandler<D>>,
    recording: RecordingState<D::Storage>,
}

struct Shared<D: Device> {
    id: AgentId,
    name: String,
    config: AgentConfig,
    frame: Arc<FrameContext<D>>,
    lifecycle: Mutex<Lifecycle>,
    mailbox: Mutex<Vec<Message>>,
    wake: Condvar,
    core: Mutex<Core<D>>,
    output: Mutex<Option<D::CommandBuffer>>,
    builds: AtomicU64,
}

/// A unit of per-frame work.
///
/// Receives [`AgentEvent`]s from the orchestrator and runs them either inline
/// or on its own worker thread. Command-recording agents keep one recording
/// storage per frame slot and leave at most one closed buffer per Build in
/// their output slot.
pub struct Agent<D: Device> {
    shared: Arc<Shared<D>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<D: Device> Agent<D> {
    pub fn new(
        name: impl Into<String>,
        config: AgentConfig,
        frame: Arc<FrameContext<D>>,
        handler: impl AgentHandler<D>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: AgentId::next(),
                name: name.into(),
                config,
                frame,
                lifecycle: Mutex::new(Lifecycle::Idle),
                mailbox: Mutex::new(Vec::new()),
                wake: Condvar::new(),
                core: Mutex::new(Core {
                    handler: Box::new(handler),
                    recording: RecordingState::new(),
                }),
                output: Mutex::new(None),
                builds: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> AgentId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> AgentConfig {
        self.shared.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.shared.lifecycle.lock()
    }

    pub fn frame(&self) -> &Arc<FrameContext<D>> {
        &self.shared.frame
    }

    /// Number of Build events that reached the handler.
    pub fn build_count(&self) -> u64 {
        self.shared.builds.load(Ordering::Acquire)
    }

    /// Whether per-slot recording storage currently exists.
    pub fn has_recording_storage(&self) -> bool {
        self.shared.core.lock().recording.is_created()
    }

    /// Whether recording storage creation failed and the agent skips
    /// recording until its resources are released.
    pub fn recording_failed(&self) -> bool {
        self.shared.core.lock().recording.has_failed()
    }

    /// Makes the agent accept events. Spawns the worker for dedicated agents.
    ///
    /// Starting a running agent does nothing; a finished agent may be started
    /// again.
    pub fn start(&self) {
        let mut lifecycle = self.shared.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Idle | Lifecycle::Finished) {
            return;
        }

        if self.shared.config.threading == ThreadingMode::Dedicated {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("agent-{}", self.shared.name))
                .spawn(move || shared.run());

            match spawned {
                Ok(handle) => *self.worker.lock() = Some(handle),
                Err(e) => {
                    log::error!("agent '{}': failed to spawn worker: {e}", self.shared.name);
                    return;
                }
            }
        }

        *lifecycle = Lifecycle::Started;
        log::debug!(
            "agent '{}' started ({:?}, {:?})",
            self.shared.name,
            self.shared.config.threading,
            self.shared.config.recording
        );
    }

    /// Delivers `event`. `signal` is set once the event was handled.
    ///
    /// Inline agents handle the event before returning. Posting Finish is the
    /// same as calling [`Agent::finish`]. An agent that is not started drops
    /// the event and sets the signal immediately, so a barrier waiting on it
    /// cannot hang.
    pub fn post_event(&self, event: AgentEvent, signal: Option<Arc<Signal>>) {
        let mut lifecycle = self.shared.lifecycle.lock();
        if !lifecycle.accepts_events() {
            drop(lifecycle);
            log::warn!(
                "agent '{}' is not accepting events; dropping {event:?}",
                self.shared.name
            );
            if let Some(signal) = signal {
                signal.set();
            }
            return;
        }

        if event == AgentEvent::Finish {
            drop(lifecycle);
            self.finish();
            if let Some(signal) = signal {
                signal.set();
            }
            return;
        }

        match self.shared.config.threading {
            ThreadingMode::Dedicated => {
                // Queued under the lifecycle lock so it always lands ahead of Finish.
                self.shared.mailbox.lock().push((event, signal));
                self.shared.wake.notify_one();
                drop(lifecycle);
            }
            ThreadingMode::Inline => {
                *lifecycle = Lifecycle::Running;
                drop(lifecycle);
                self.shared.process(event);
                if let Some(signal) = signal {
                    signal.set();
                }
            }
        }
    }

    /// Stops the agent. Joins the worker of a dedicated agent.
    pub fn finish(&self) {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if !lifecycle.accepts_events() {
                return;
            }
            *lifecycle = Lifecycle::Finishing;
            if self.shared.config.threading == ThreadingMode::Dedicated {
                self.shared.mailbox.lock().push((AgentEvent::Finish, None));
                self.shared.wake.notify_one();
            }
        }

        if self.shared.config.threading == ThreadingMode::Dedicated {
            let handle = self.worker.lock().take();
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    log::error!("agent '{}': worker panicked", self.shared.name);
                }
            }
        }

        *self.shared.lifecycle.lock() = Lifecycle::Finished;
        log::debug!("agent '{}' finished", self.shared.name);
    }

    /// Takes the buffer produced by the last Build, if any.
    pub fn take_command_buffer(&self) -> Option<D::CommandBuffer> {
        self.shared.output.lock().take()
    }

    pub fn has_command_buffer(&self) -> bool {
        self.shared.output.lock().is_some()
    }
}

impl<D: Device> Drop for Agent<D> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl<D: Device> Shared<D> {
    fn run(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Started {
                *lifecycle = Lifecycle::Running;
            }
        }
        log::trace!("agent '{}' worker running", self.name);

        let mut batch = Vec::new();
        loop {
            {
                let mut mailbox = self.mailbox.lock();
                while mailbox.is_empty() {
                    self.wake.wait(&mut mailbox);
                }
                std::mem::swap(&mut *mailbox, &mut batch);
            }

            let mut finished = false;
            for (event, signal) in batch.drain(..) {
                // Events queued behind Finish are not handled, but their
                // waiters are still released.
                if !finished {
                    if event == AgentEvent::Finish {
                        finished = true;
                        continue;
                    }
                    self.process(event);
                }
                if let Some(signal) = signal {
                    signal.set();
                }
            }

            if finished {
                break;
            }
        }

        log::trace!("agent '{}' worker exiting", self.name);
    }

    fn process(&self, event: AgentEvent) {
        match event {
            AgentEvent::Build => self.build(),
            AgentEvent::ReleaseResources => self.release(),
            AgentEvent::Finish => {}
        }
    }

    fn build(&self) {
        *self.output.lock() = None;

        let Some(device) = self.frame.device() else {
            log::debug!("agent '{}': no device, skipping build", self.name);
            return;
        };
        let slot = self.frame.slot();
        let target = self.frame.target();

        let mut core = self.core.lock();
        let Core { handler, recording } = &mut *core;

        let result = match self.config.recording {
            RecordingKind::None => {
                let mut ctx = BuildCtx::new(&self.frame, &device, slot, target.as_ref(), None);
                handler.on_build(&mut ctx)
            }
            RecordingKind::Commands => {
                let slots = self.frame.frames_in_flight();
                let Some(storage) = recording.storage_for(&*device, slots, slot, &self.name) else {
                    return;
                };
                device.reset_storage(storage);

                let mut recorder = match device.begin_recording(storage, &self.name) {
                    Ok(recorder) => recorder,
                    Err(e) => {
                        log::warn!("agent '{}': failed to begin recording: {e}", self.name);
                        return;
                    }
                };

                let result = {
                    let mut ctx = BuildCtx::new(&self.frame, &device, slot, target.as_ref(), Some(&mut recorder));
                    handler.on_build(&mut ctx)
                };

                let buffer = device.finish_recording(recorder);
                if result.is_ok() {
                    *self.output.lock() = Some(buffer);
                }
                result
            }
        };

        self.builds.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = result {
            log::warn!("agent '{}': build failed: {e:#}", self.name);
        }
    }

    fn release(&self) {
        let mut core = self.core.lock();
        core.handler.on_release_resources(&self.frame);
        core.recording.release();
        *self.output.lock() = None;
        log::debug!("agent '{}' released resources", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::handler::build_fn;
    use crate::descriptor::HandleAllocator;
    use crate::device::headless::{HeadlessConfig, HeadlessDevice};
    use anyhow::bail;
    use std::sync::atomic::AtomicUsize;

    fn attached_frame() -> (Arc<FrameContext<HeadlessDevice>>, Arc<HeadlessDevice>) {
        let device = Arc::new(HeadlessDevice::new(HeadlessConfig::default()));
        let frame = Arc::new(FrameContext::new(2));
        let allocator = Arc::new(HandleAllocator::new(Arc::clone(&device)));
        frame.attach(Arc::clone(&device), allocator);
        (frame, device)
    }

    fn post_and_wait(agent: &Agent<HeadlessDevice>, event: AgentEvent) {
        let signal = Arc::new(Signal::new());
        agent.post_event(event, Some(Arc::clone(&signal)));
        signal.wait();
    }

    struct Counting {
        builds: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl AgentHandler<HeadlessDevice> for Counting {
        fn on_build(&mut self, ctx: &mut BuildCtx<'_, HeadlessDevice>) -> anyhow::Result<()> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if let Some(recorder) = ctx.recorder() {
                recorder.record("draw");
            }
            Ok(())
        }

        fn on_release_resources(&mut self, _frame: &FrameContext<HeadlessDevice>) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Counting, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let releases = Arc::new(AtomicUsize::new(0));
        let handler = Counting {
            builds: Arc::clone(&builds),
            releases: Arc::clone(&releases),
        };
        (handler, builds, releases)
    }

    #[test]
    fn dedicated_build_produces_one_buffer() {
        let (frame, device) = attached_frame();
        let (handler, builds, _) = counting();
        let agent = Agent::new("draw", AgentConfig::default(), frame, handler);
        agent.start();

        post_and_wait(&agent, AgentEvent::Build);
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let buffer = agent.take_command_buffer().unwrap();
        assert_eq!(buffer.label, "draw");
        assert_eq!(buffer.commands, vec!["draw".to_string()]);
        assert!(agent.take_command_buffer().is_none());

        agent.finish();
        assert_eq!(agent.lifecycle(), Lifecycle::Finished);
        assert_eq!(device.storages_created(), 2);
    }

    #[test]
    fn repeated_builds_reuse_recording_storage() {
        let (frame, device) = attached_frame();
        let (handler, builds, _) = counting();
        let agent = Agent::new("draw", AgentConfig::default(), frame, handler);
        agent.start();

        for _ in 0..5 {
            post_and_wait(&agent, AgentEvent::Build);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 5);
        assert_eq!(agent.build_count(), 5);
        assert_eq!(device.storages_created(), 2);
        assert!(agent.has_recording_storage());
    }

    #[test]
    fn release_drops_storage_and_next_build_recreates_it() {
        let (frame, device) = attached_frame();
        let (handler, _, releases) = counting();
        let agent = Agent::new("draw", AgentConfig::default(), frame, handler);
        agent.start();

        post_and_wait(&agent, AgentEvent::Build);
        post_and_wait(&agent, AgentEvent::ReleaseResources);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(!agent.has_recording_storage());
        assert!(!agent.has_command_buffer());

        post_and_wait(&agent, AgentEvent::Build);
        assert_eq!(device.storages_created(), 4);
    }

    #[test]
    fn inline_events_complete_before_post_returns() {
        let (frame, _device) = attached_frame();
        let (handler, builds, _) = counting();
        let config = AgentConfig::new(ThreadingMode::Inline, RecordingKind::Commands);
        let agent = Agent::new("inline", config, frame, handler);
        agent.start();

        agent.post_event(AgentEvent::Build, None);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(agent.has_command_buffer());
        assert_eq!(agent.lifecycle(), Lifecycle::Running);
    }

    #[test]
    fn resource_only_agents_never_produce_buffers() {
        let (frame, device) = attached_frame();
        let (handler, builds, _) = counting();
        let agent = Agent::new("resources", AgentConfig::resource_builder(ThreadingMode::Dedicated), frame, handler);
        agent.start();

        post_and_wait(&agent, AgentEvent::Build);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(agent.take_command_buffer().is_none());
        assert_eq!(device.storages_created(), 0);
    }

    #[test]
    fn storage_failure_latches_until_release() {
        let (frame, device) = attached_frame();
        let (handler, builds, _) = counting();
        let agent = Agent::new("draw", AgentConfig::default(), frame, handler);
        agent.start();

        device.fail_storage_creation(true);
        post_and_wait(&agent, AgentEvent::Build);
        assert!(agent.take_command_buffer().is_none());
        assert!(agent.recording_failed());

        device.fail_storage_creation(false);
        post_and_wait(&agent, AgentEvent::Build);
        assert!(agent.take_command_buffer().is_none());
        assert!(agent.recording_failed());
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        post_and_wait(&agent, AgentEvent::ReleaseResources);
        assert!(!agent.recording_failed());
        post_and_wait(&agent, AgentEvent::Build);
        assert!(agent.take_command_buffer().is_some());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_build_discards_the_recording() {
        let (frame, _device) = attached_frame();
        let mut calls = 0;
        let handler = build_fn(move |_ctx: &mut BuildCtx<'_, HeadlessDevice>| {
            calls += 1;
            if calls == 1 {
                bail!("first build fails");
            }
            Ok(())
        });
        let agent = Agent::new("flaky", AgentConfig::default(), frame, handler);
        agent.start();

        post_and_wait(&agent, AgentEvent::Build);
        assert!(agent.take_command_buffer().is_none());
        post_and_wait(&agent, AgentEvent::Build);
        assert!(agent.take_command_buffer().is_some());
    }

    #[test]
    fn build_without_device_is_skipped() {
        let frame = Arc::new(FrameContext::<HeadlessDevice>::new(2));
        let (handler, builds, _) = counting();
        let agent = Agent::new("draw", AgentConfig::default(), frame, handler);
        agent.start();

        post_and_wait(&agent, AgentEvent::Build);
        assert_eq!(builds.load(Ordering::SeqCst), 0);
        assert!(agent.take_command_buffer().is_none());
    }

    #[test]
    fn events_to_a_stopped_agent_release_their_waiter() {
        let (frame, _device) = attached_frame();
        let (handler, builds, _) = counting();
        let agent = Agent::new("idle", AgentConfig::default(), frame, handler);

        let signal = Arc::new(Signal::new());
        agent.post_event(AgentEvent::Build, Some(Arc::clone(&signal)));
        assert!(signal.is_set());
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        agent.start();
        agent.finish();
        signal.reset();
        agent.post_event(AgentEvent::Build, Some(Arc::clone(&signal)));
        assert!(signal.is_set());
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    struct Gated {
        entered: Arc<Signal>,
        gate: Arc<Signal>,
        builds: Arc<AtomicUsize>,
    }

    impl AgentHandler<HeadlessDevice> for Gated {
        fn on_build(&mut self, _ctx: &mut BuildCtx<'_, HeadlessDevice>) -> anyhow::Result<()> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            self.entered.set();
            self.gate.wait();
            Ok(())
        }
    }

    #[test]
    fn events_posted_while_finishing_are_released() {
        let (frame, _device) = attached_frame();
        let entered = Arc::new(Signal::new());
        let gate = Arc::new(Signal::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let handler = Gated {
            entered: Arc::clone(&entered),
            gate: Arc::clone(&gate),
            builds: Arc::clone(&builds),
        };
        let agent = Arc::new(Agent::new("gated", AgentConfig::default(), frame, handler));
        agent.start();

        // Keep the worker busy inside a Build while Finish is requested.
        let first = Arc::new(Signal::new());
        agent.post_event(AgentEvent::Build, Some(Arc::clone(&first)));
        entered.wait();

        let finisher = {
            let agent = Arc::clone(&agent);
            std::thread::spawn(move || agent.finish())
        };
        while agent.lifecycle() != Lifecycle::Finishing {
            std::thread::yield_now();
        }

        let late = Arc::new(Signal::new());
        agent.post_event(AgentEvent::Build, Some(Arc::clone(&late)));
        assert!(late.is_set());

        gate.set();
        finisher.join().unwrap();
        first.wait();
        assert_eq!(agent.lifecycle(), Lifecycle::Finished);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finished_agent_can_be_restarted() {
        let (frame, _device) = attached_frame();
        let (handler, builds, _) = counting();
        let agent = Agent::new("draw", AgentConfig::default(), frame, handler);

        agent.start();
        agent.finish();
        agent.start();
        post_and_wait(&agent, AgentEvent::Build);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn build_sees_the_frame_slot() {
        let (frame, _device) = attached_frame();
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let handler = {
            let seen = Arc::clone(&seen);
            build_fn(move |ctx: &mut BuildCtx<'_, HeadlessDevice>| {
                seen.store(ctx.slot, Ordering::SeqCst);
                Ok(())
            })
        };
        let agent = Agent::new("slot", AgentConfig::default(), Arc::clone(&frame), handler);
        agent.start();

        frame.set_slot(1);
        post_and_wait(&agent, AgentEvent::Build);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ids_are_unique() {
        let (frame, _device) = attached_frame();
        let a = Agent::new("a", AgentConfig::default(), Arc::clone(&frame), build_fn(|_: &mut BuildCtx<'_, HeadlessDevice>| Ok(())));
        let b = Agent::new("b", AgentConfig::default(), frame, build_fn(|_: &mut BuildCtx<'_, HeadlessDevice>| Ok(())));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), "a");
    }
}
