use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::descriptor::HandleAllocator;
use crate::device::{Device, Extent};
use crate::time::FrameTime;

/// Index of one of the N in-flight per-frame resource sets.
pub type FrameSlot = usize;

/// Per-frame snapshot handed to frame sources and hooks.
#[derive(Debug, Copy, Clone)]
pub struct FrameInfo {
    pub slot: FrameSlot,
    /// Count of frames presented before this one.
    pub frame_index: u64,
    pub size: Extent,
    pub time: FrameTime,
}

/// State the orchestrator shares with its agents.
///
/// Agents receive this at construction instead of reaching for a global. The
/// orchestrator is the only writer; it changes the slot and target strictly
/// between dispatches, so every agent sees one consistent slot for a Build.
pub struct FrameContext<D: Device> {
    frames_in_flight: usize,
    slot: AtomicUsize,
    frame_index: AtomicU64,
    device: RwLock<Option<Arc<D>>>,
    target: RwLock<Option<D::Target>>,
    allocator: RwLock<Option<Arc<HandleAllocator<D>>>>,
}

impl<D: Device> FrameContext<D> {
    pub fn new(frames_in_flight: usize) -> Self {
        debug_assert!(frames_in_flight > 0);
        Self {
            frames_in_flight,
            slot: AtomicUsize::new(0),
            frame_index: AtomicU64::new(0),
            device: RwLock::new(None),
            target: RwLock::new(None),
            allocator: RwLock::new(None),
        }
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Slot being recorded this frame.
    #[inline]
    pub fn slot(&self) -> FrameSlot {
        self.slot.load(Ordering::Acquire)
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index.load(Ordering::Acquire)
    }

    /// Current device; `None` until the first frame and after a device loss.
    pub fn device(&self) -> Option<Arc<D>> {
        self.device.read().clone()
    }

    /// Swap-ring image of the frame being built; `None` outside of a Build.
    pub fn target(&self) -> Option<D::Target> {
        self.target.read().clone()
    }

    pub fn allocator(&self) -> Option<Arc<HandleAllocator<D>>> {
        self.allocator.read().clone()
    }

    pub(crate) fn set_slot(&self, slot: FrameSlot) {
        debug_assert!(slot < self.frames_in_flight);
        self.slot.store(slot, Ordering::Release);
    }

    pub(crate) fn set_frame_index(&self, index: u64) {
        self.frame_index.store(index, Ordering::Release);
    }

    pub(crate) fn set_target(&self, target: Option<D::Target>) {
        *self.target.write() = target;
    }

    pub(crate) fn attach(&self, device: Arc<D>, allocator: Arc<HandleAllocator<D>>) {
        *self.device.write() = Some(device);
        *self.allocator.write() = Some(allocator);
    }

    pub(crate) fn detach(&self) {
        *self.target.write() = None;
        *self.allocator.write() = None;
        *self.device.write() = None;
    }
}
