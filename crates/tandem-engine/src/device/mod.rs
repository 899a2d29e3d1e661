//! Collaborator contracts consumed by the frame scheduler.
//!
//! The scheduler never talks to a graphics API directly. It drives:
//! - a [`Device`] that creates recording storage, records, submits and signals
//! - a [`Fence`] exposing a monotonically increasing completion value
//! - a [`SwapRing`] of presentable images with a "currently writable" index
//! - a [`Backend`] that connects (and reconnects after loss) device + ring
//!
//! Two implementations ship with the crate: [`headless`] (CPU-only, used by
//! tests) and [`gpu`] (wgpu + winit).

mod error;
pub mod gpu;
pub mod headless;

use std::sync::Arc;

use crate::descriptor::{DescriptorFlags, DescriptorHandle, DescriptorKind};
use crate::sync::Signal;

pub use error::DeviceError;

/// Size of the presentation surface in physical pixels.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Zero-area surfaces (e.g. a minimized window) cannot be rendered to.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Usage state of a swap-ring image as seen by recorded transitions.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TargetState {
    Present,
    RenderTarget,
}

/// Device memory backing one descriptor pool.
pub struct DescriptorBlock<B> {
    /// Address of the first descriptor. Never zero.
    pub start: u64,
    pub raw: B,
}

/// Handles bound to the swap ring's images by the orchestrator.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SwapViews {
    /// First of `image_count` render-target descriptors.
    pub render_targets: DescriptorHandle,
    pub render_target_stride: u64,
    pub depth_stencil: DescriptorHandle,
}

impl SwapViews {
    #[inline]
    pub fn render_target(&self, index: usize) -> DescriptorHandle {
        self.render_targets.offset(index as u32, self.render_target_stride)
    }
}

/// GPU completion counter.
pub trait Fence: Send + Sync + 'static {
    /// Highest value the GPU has reached.
    fn completed_value(&self) -> u64;

    /// Sets `signal` once `completed_value() >= value`.
    ///
    /// May set it immediately (or synchronously) if the value is already
    /// reached.
    fn notify_on_reached(&self, value: u64, signal: Arc<Signal>);
}

/// Logical device and its single command queue.
pub trait Device: Send + Sync + 'static {
    /// Per-frame-slot recording memory ("command allocator").
    type Storage: Send + 'static;
    /// An open command recording.
    type Recorder: Send + 'static;
    /// A closed recording, ready for submission.
    type CommandBuffer: Send + 'static;
    /// The swap-ring image currently being rendered to.
    type Target: Clone + Send + Sync + 'static;
    type Fence: Fence;
    /// Device memory behind one descriptor pool.
    type Block: Send + 'static;

    fn create_storage(&self) -> Result<Self::Storage, DeviceError>;

    /// Recycles `storage`. Only valid once the GPU finished every recording
    /// made from it.
    fn reset_storage(&self, storage: &mut Self::Storage);

    fn begin_recording(&self, storage: &mut Self::Storage, label: &str) -> Result<Self::Recorder, DeviceError>;

    fn finish_recording(&self, recorder: Self::Recorder) -> Self::CommandBuffer;

    fn record_transition(
        &self,
        recorder: &mut Self::Recorder,
        target: &Self::Target,
        before: TargetState,
        after: TargetState,
    );

    /// Submits `buffers` in order and leaves the vector empty.
    fn submit(&self, buffers: &mut Vec<Self::CommandBuffer>) -> Result<(), DeviceError>;

    fn create_fence(&self) -> Result<Arc<Self::Fence>, DeviceError>;

    /// Asks the queue to advance `fence` to `value` once all work submitted so
    /// far completed. Does not block.
    fn signal_fence(&self, fence: &Arc<Self::Fence>, value: u64);

    fn descriptor_stride(&self, kind: DescriptorKind) -> u64;

    fn create_descriptor_block(
        &self,
        kind: DescriptorKind,
        flags: DescriptorFlags,
        capacity: u32,
    ) -> Result<DescriptorBlock<Self::Block>, DeviceError>;

    /// Logs how much device memory is allocated. Called after the swap ring
    /// is rebuilt and before device objects are released.
    fn log_memory_usage(&self) {}
}

/// Fixed ring of presentable images.
pub trait SwapRing: Send + 'static {
    type Target: Clone + Send + Sync + 'static;

    fn image_count(&self) -> usize;

    /// Index of the image that is writable now. Advances on present.
    fn current_index(&self) -> usize;

    /// Returns the writable image, acquiring it if needed.
    fn target(&mut self) -> Result<Self::Target, DeviceError>;

    fn present(&mut self) -> Result<(), DeviceError>;

    fn resize(&mut self, size: Extent) -> Result<(), DeviceError>;

    fn create_views(&mut self, views: &SwapViews) -> Result<(), DeviceError>;

    fn release_views(&mut self);
}

/// Creates the device and its presentation ring.
///
/// Called lazily on the first frame and again after every device loss.
pub trait Backend: Send + 'static {
    type Device: Device;
    type Swap: SwapRing<Target = <Self::Device as Device>::Target>;

    fn connect(&mut self, size: Extent, image_count: usize) -> Result<(Arc<Self::Device>, Self::Swap), DeviceError>;
}
