//! CPU-only device.
//!
//! Recordings are lists of text commands and every device-visible action is
//! appended to a journal, so schedules can be asserted without a GPU. Fences
//! either complete as soon as they are signalled or only when driven
//! explicitly via [`HeadlessFence::complete`]. Device loss and creation
//! failures can be injected.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::descriptor::{DescriptorFlags, DescriptorKind};
use crate::sync::Signal;

use super::{
    Backend, DescriptorBlock, Device, DeviceError, Extent, Fence, SwapRing, SwapViews, TargetState,
};

/// Behaviour switches for [`HeadlessDevice`].
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Complete fences as soon as the queue is asked to signal them.
    ///
    /// When `false`, fences only advance through [`HeadlessFence::complete`].
    pub auto_complete_fences: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            auto_complete_fences: true,
        }
    }
}

/// First address handed to a descriptor block.
const BLOCK_BASE: u64 = 0x1_0000;

pub struct HeadlessStorage {
    id: usize,
    resets: u64,
}

impl HeadlessStorage {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }
}

pub struct HeadlessRecorder {
    label: String,
    commands: Vec<String>,
}

impl HeadlessRecorder {
    pub fn record(&mut self, command: impl Into<String>) {
        self.commands.push(command.into());
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HeadlessCommandBuffer {
    pub label: String,
    pub commands: Vec<String>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HeadlessTarget {
    pub index: usize,
}

struct FenceState {
    completed: u64,
    waiters: Vec<(u64, Arc<Signal>)>,
}

pub struct HeadlessFence {
    state: Mutex<FenceState>,
    requested: AtomicU64,
}

impl HeadlessFence {
    fn new() -> Self {
        Self {
            state: Mutex::new(FenceState {
                completed: 0,
                waiters: Vec::new(),
            }),
            requested: AtomicU64::new(0),
        }
    }

    /// Highest value the queue has been asked to signal.
    pub fn requested_value(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    /// Advances the completed value to `value` and wakes waiters it satisfies.
    pub fn complete(&self, value: u64) {
        let mut state = self.state.lock();
        state.completed = state.completed.max(value);
        let completed = state.completed;
        state.waiters.retain(|(target, signal)| {
            if *target <= completed {
                signal.set();
                false
            } else {
                true
            }
        });
    }

    /// Completes everything signalled so far.
    pub fn complete_requested(&self) {
        self.complete(self.requested_value());
    }

    /// Number of threads currently registered for a notification.
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl Fence for HeadlessFence {
    fn completed_value(&self) -> u64 {
        self.state.lock().completed
    }

    fn notify_on_reached(&self, value: u64, signal: Arc<Signal>) {
        let mut state = self.state.lock();
        if state.completed >= value {
            signal.set();
        } else {
            state.waiters.push((value, signal));
        }
    }
}

/// CPU-only implementation of [`Device`].
pub struct HeadlessDevice {
    auto_complete: AtomicBool,
    journal: Mutex<Vec<String>>,
    submissions: Mutex<Vec<Vec<HeadlessCommandBuffer>>>,
    fence: Mutex<Option<Arc<HeadlessFence>>>,
    next_block: AtomicU64,
    storages_created: AtomicUsize,
    connections: AtomicUsize,
    memory_reports: AtomicUsize,
    fail_storage: AtomicBool,
    fail_blocks: AtomicBool,
    fail_connect: AtomicBool,
    lose_on_submit: AtomicBool,
    lose_on_present: AtomicBool,
    lose_on_resize: AtomicBool,
}

impl HeadlessDevice {
    pub fn new(config: HeadlessConfig) -> Self {
        Self {
            auto_complete: AtomicBool::new(config.auto_complete_fences),
            journal: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            fence: Mutex::new(None),
            next_block: AtomicU64::new(BLOCK_BASE),
            storages_created: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
            memory_reports: AtomicUsize::new(0),
            fail_storage: AtomicBool::new(false),
            fail_blocks: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            lose_on_submit: AtomicBool::new(false),
            lose_on_present: AtomicBool::new(false),
            lose_on_resize: AtomicBool::new(false),
        }
    }

    /// Appends a free-form entry to the journal.
    pub fn note(&self, entry: impl Into<String>) {
        self.journal.lock().push(entry.into());
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    /// Every submission so far, each as the ordered list of its buffers.
    pub fn submissions(&self) -> Vec<Vec<HeadlessCommandBuffer>> {
        self.submissions.lock().clone()
    }

    /// Labels of the buffers in the most recent submission.
    pub fn last_submission_labels(&self) -> Vec<String> {
        self.submissions
            .lock()
            .last()
            .map(|batch| batch.iter().map(|b| b.label.clone()).collect())
            .unwrap_or_default()
    }

    /// Most recently created fence.
    pub fn fence(&self) -> Option<Arc<HeadlessFence>> {
        self.fence.lock().clone()
    }

    pub fn storages_created(&self) -> usize {
        self.storages_created.load(Ordering::Relaxed)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Number of memory usage reports requested so far.
    pub fn memory_reports(&self) -> usize {
        self.memory_reports.load(Ordering::Relaxed)
    }

    /// Switches automatic fence completion for later signals.
    pub fn set_auto_complete_fences(&self, on: bool) {
        self.auto_complete.store(on, Ordering::Relaxed);
    }

    pub fn fail_storage_creation(&self, fail: bool) {
        self.fail_storage.store(fail, Ordering::Relaxed);
    }

    pub fn fail_descriptor_blocks(&self, fail: bool) {
        self.fail_blocks.store(fail, Ordering::Relaxed);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::Relaxed);
    }

    /// Makes the next submission report device loss.
    pub fn lose_on_next_submit(&self) {
        self.lose_on_submit.store(true, Ordering::Relaxed);
    }

    /// Makes the next present report device loss.
    pub fn lose_on_next_present(&self) {
        self.lose_on_present.store(true, Ordering::Relaxed);
    }

    /// Makes the next ring resize report device loss.
    pub fn lose_on_next_resize(&self) {
        self.lose_on_resize.store(true, Ordering::Relaxed);
    }

    fn take(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::Relaxed)
    }
}

impl Device for HeadlessDevice {
    type Storage = HeadlessStorage;
    type Recorder = HeadlessRecorder;
    type CommandBuffer = HeadlessCommandBuffer;
    type Target = HeadlessTarget;
    type Fence = HeadlessFence;
    type Block = ();

    fn create_storage(&self) -> Result<HeadlessStorage, DeviceError> {
        if self.fail_storage.load(Ordering::Relaxed) {
            return Err(DeviceError::creation("recording storage", "injected failure"));
        }
        let id = self.storages_created.fetch_add(1, Ordering::Relaxed);
        Ok(HeadlessStorage { id, resets: 0 })
    }

    fn reset_storage(&self, storage: &mut HeadlessStorage) {
        storage.resets += 1;
    }

    fn begin_recording(&self, _storage: &mut HeadlessStorage, label: &str) -> Result<HeadlessRecorder, DeviceError> {
        Ok(HeadlessRecorder {
            label: label.to_string(),
            commands: Vec::new(),
        })
    }

    fn finish_recording(&self, recorder: HeadlessRecorder) -> HeadlessCommandBuffer {
        self.note(format!("close:{}", recorder.label));
        HeadlessCommandBuffer {
            label: recorder.label,
            commands: recorder.commands,
        }
    }

    fn record_transition(
        &self,
        recorder: &mut HeadlessRecorder,
        target: &HeadlessTarget,
        before: TargetState,
        after: TargetState,
    ) {
        recorder.record(format!("transition {} {before:?}->{after:?}", target.index));
    }

    fn submit(&self, buffers: &mut Vec<HeadlessCommandBuffer>) -> Result<(), DeviceError> {
        if Self::take(&self.lose_on_submit) {
            buffers.clear();
            return Err(DeviceError::Lost("injected on submit".into()));
        }
        let batch: Vec<_> = buffers.drain(..).collect();
        let labels: Vec<_> = batch.iter().map(|b| b.label.as_str()).collect();
        self.note(format!("submit:{}", labels.join(",")));
        self.submissions.lock().push(batch);
        Ok(())
    }

    fn create_fence(&self) -> Result<Arc<HeadlessFence>, DeviceError> {
        let fence = Arc::new(HeadlessFence::new());
        *self.fence.lock() = Some(Arc::clone(&fence));
        Ok(fence)
    }

    fn signal_fence(&self, fence: &Arc<HeadlessFence>, value: u64) {
        fence.requested.fetch_max(value, Ordering::AcqRel);
        if self.auto_complete.load(Ordering::Relaxed) {
            fence.complete(value);
        }
    }

    fn descriptor_stride(&self, kind: DescriptorKind) -> u64 {
        match kind {
            DescriptorKind::Resource => 32,
            DescriptorKind::Sampler => 16,
            DescriptorKind::RenderTarget | DescriptorKind::DepthStencil => 8,
        }
    }

    fn create_descriptor_block(
        &self,
        kind: DescriptorKind,
        _flags: DescriptorFlags,
        capacity: u32,
    ) -> Result<DescriptorBlock<()>, DeviceError> {
        if self.fail_blocks.load(Ordering::Relaxed) {
            return Err(DeviceError::creation("descriptor block", "injected failure"));
        }
        let size = capacity as u64 * self.descriptor_stride(kind);
        // Leave a gap so neighbouring blocks never touch.
        let start = self.next_block.fetch_add(size + 0x100, Ordering::Relaxed);
        Ok(DescriptorBlock { start, raw: () })
    }

    fn log_memory_usage(&self) {
        self.memory_reports.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "headless memory: {} recording storages created",
            self.storages_created.load(Ordering::Relaxed)
        );
    }
}

/// Ring of `images` indices; presents are journaled.
pub struct HeadlessSwap {
    device: Arc<HeadlessDevice>,
    images: usize,
    index: usize,
    size: Extent,
    views: Option<SwapViews>,
}

impl HeadlessSwap {
    pub fn size(&self) -> Extent {
        self.size
    }

    pub fn views(&self) -> Option<SwapViews> {
        self.views
    }
}

impl SwapRing for HeadlessSwap {
    type Target = HeadlessTarget;

    fn image_count(&self) -> usize {
        self.images
    }

    fn current_index(&self) -> usize {
        self.index
    }

    fn target(&mut self) -> Result<HeadlessTarget, DeviceError> {
        Ok(HeadlessTarget { index: self.index })
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        if HeadlessDevice::take(&self.device.lose_on_present) {
            return Err(DeviceError::Lost("injected on present".into()));
        }
        self.device.note(format!("present:{}", self.index));
        self.index = (self.index + 1) % self.images;
        Ok(())
    }

    fn resize(&mut self, size: Extent) -> Result<(), DeviceError> {
        if HeadlessDevice::take(&self.device.lose_on_resize) {
            return Err(DeviceError::Lost("injected on resize".into()));
        }
        self.device.note(format!("resize:{}x{}", size.width, size.height));
        self.size = size;
        self.index = 0;
        Ok(())
    }

    fn create_views(&mut self, views: &SwapViews) -> Result<(), DeviceError> {
        self.device.note("views:create");
        self.views = Some(*views);
        Ok(())
    }

    fn release_views(&mut self) {
        if self.views.take().is_some() {
            self.device.note("views:release");
        }
    }
}

/// Connects to a shared [`HeadlessDevice`], so tests keep observing the same
/// journal across device-loss rebuilds.
pub struct HeadlessBackend {
    device: Arc<HeadlessDevice>,
}

impl HeadlessBackend {
    pub fn new(device: Arc<HeadlessDevice>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<HeadlessDevice> {
        &self.device
    }
}

impl Backend for HeadlessBackend {
    type Device = HeadlessDevice;
    type Swap = HeadlessSwap;

    fn connect(&mut self, size: Extent, image_count: usize) -> Result<(Arc<HeadlessDevice>, HeadlessSwap), DeviceError> {
        if self.device.fail_connect.load(Ordering::Relaxed) {
            return Err(DeviceError::NoAdapter("injected failure".into()));
        }
        self.device.connections.fetch_add(1, Ordering::Relaxed);
        self.device.note("connect");

        let swap = HeadlessSwap {
            device: Arc::clone(&self.device),
            images: image_count,
            index: 0,
            size,
            views: None,
        };
        Ok((Arc::clone(&self.device), swap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_fence_wakes_waiters_in_value_order() {
        let fence = HeadlessFence::new();
        let a = Arc::new(Signal::new());
        let b = Arc::new(Signal::new());
        fence.notify_on_reached(1, Arc::clone(&a));
        fence.notify_on_reached(2, Arc::clone(&b));
        assert_eq!(fence.waiter_count(), 2);

        fence.complete(1);
        assert!(a.is_set());
        assert!(!b.is_set());

        fence.complete(2);
        assert!(b.is_set());
        assert_eq!(fence.waiter_count(), 0);
    }

    #[test]
    fn reached_value_sets_signal_immediately() {
        let fence = HeadlessFence::new();
        fence.complete(5);
        let s = Arc::new(Signal::new());
        fence.notify_on_reached(3, Arc::clone(&s));
        assert!(s.is_set());
    }

    #[test]
    fn manual_device_only_records_requested_value() {
        let device = HeadlessDevice::new(HeadlessConfig {
            auto_complete_fences: false,
        });
        let fence = device.create_fence().unwrap();
        device.signal_fence(&fence, 3);
        assert_eq!(fence.requested_value(), 3);
        assert_eq!(fence.completed_value(), 0);
        fence.complete_requested();
        assert_eq!(fence.completed_value(), 3);
    }

    #[test]
    fn descriptor_blocks_do_not_overlap() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let a = device
            .create_descriptor_block(DescriptorKind::Resource, DescriptorFlags::NONE, 256)
            .unwrap();
        let b = device
            .create_descriptor_block(DescriptorKind::Resource, DescriptorFlags::NONE, 256)
            .unwrap();
        assert!(b.start >= a.start + 256 * 32);
    }
}
