use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::descriptor::{DescriptorFlags, DescriptorKind};
use crate::device::{DescriptorBlock, Device, DeviceError, Extent, Fence, TargetState};
use crate::sync::Signal;

/// Address of the first descriptor block.
const BLOCK_BASE: u64 = 0x1_0000;
const BLOCK_GAP: u64 = 0x1000;

/// Slot size for descriptor kinds that have no device memory behind them.
const VIEW_STRIDE: u64 = 64;

/// wgpu pools encoder memory internally; a storage only counts what was
/// recorded from it since its last reset.
#[derive(Debug, Default)]
pub struct GpuStorage {
    recordings: u64,
}

impl GpuStorage {
    pub fn recordings(&self) -> u64 {
        self.recordings
    }
}

pub struct GpuRecorder {
    encoder: wgpu::CommandEncoder,
}

impl GpuRecorder {
    pub fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        &mut self.encoder
    }
}

/// Swap-ring image being rendered this frame.
#[derive(Clone)]
pub struct GpuTarget {
    pub view: Arc<wgpu::TextureView>,
    pub depth: Option<Arc<wgpu::TextureView>>,
    pub format: wgpu::TextureFormat,
    pub size: Extent,
    pub index: usize,
}

/// Loss latch shared by a device, its fences and its swap ring.
///
/// Set by wgpu's device-lost callback or by a failed poll; once set, every
/// queue and surface operation reports [`DeviceError::Lost`].
#[derive(Clone, Default)]
pub(crate) struct DeviceHealth {
    lost: Arc<AtomicBool>,
}

impl DeviceHealth {
    pub(crate) fn mark_lost(&self, reason: &str) {
        if !self.lost.swap(true, Ordering::AcqRel) {
            log::error!("wgpu device lost: {reason}");
        }
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub(crate) fn check(&self) -> Result<(), DeviceError> {
        if self.is_lost() {
            return Err(DeviceError::Lost("wgpu device lost".into()));
        }
        Ok(())
    }
}

/// Timeline emulated with queue completion callbacks.
pub struct GpuFence {
    device: wgpu::Device,
    health: DeviceHealth,
    completed: AtomicU64,
}

impl GpuFence {
    fn advance(&self, value: u64) {
        self.completed.fetch_max(value, Ordering::AcqRel);
    }

    fn reached(&self, value: u64) -> bool {
        self.completed.load(Ordering::Acquire) >= value
    }
}

impl Fence for GpuFence {
    fn completed_value(&self) -> u64 {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            self.health.mark_lost(&format!("poll failed: {e}"));
        }
        self.completed.load(Ordering::Acquire)
    }

    /// Completion callbacks only run while the device is polled, so this
    /// blocks in `poll` until `value` is reached and then sets `signal`.
    ///
    /// A failed poll marks the device lost before the waiter is released;
    /// the next submit or present reports the loss.
    fn notify_on_reached(&self, value: u64, signal: Arc<Signal>) {
        while !self.reached(value) && !self.health.is_lost() {
            match self.device.poll(wgpu::PollType::wait_indefinitely()) {
                // Nothing left in flight: every submitted frame has completed.
                Ok(status) if status.is_queue_empty() => break,
                Ok(_) => {}
                Err(e) => self.health.mark_lost(&format!("poll failed: {e}")),
            }
        }
        signal.set();
    }
}

/// Device memory behind a descriptor pool. Only resource pools own a
/// buffer: one uniform slot per descriptor.
pub struct GpuBlock {
    buffer: Option<wgpu::Buffer>,
}

impl GpuBlock {
    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffer.as_ref()
    }
}

pub struct GpuDevice {
    info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_format: wgpu::TextureFormat,
    health: DeviceHealth,
    next_block: AtomicU64,
}

impl GpuDevice {
    pub(crate) fn new(
        info: wgpu::AdapterInfo,
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface_format: wgpu::TextureFormat,
        health: DeviceHealth,
    ) -> Self {
        Self {
            info,
            device,
            queue,
            surface_format,
            health,
            next_block: AtomicU64::new(BLOCK_BASE),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.surface_format
    }

    pub fn is_lost(&self) -> bool {
        self.health.is_lost()
    }
}

impl Device for GpuDevice {
    type Storage = GpuStorage;
    type Recorder = GpuRecorder;
    type CommandBuffer = wgpu::CommandBuffer;
    type Target = GpuTarget;
    type Fence = GpuFence;
    type Block = GpuBlock;

    fn create_storage(&self) -> Result<GpuStorage, DeviceError> {
        Ok(GpuStorage::default())
    }

    fn reset_storage(&self, storage: &mut GpuStorage) {
        storage.recordings = 0;
    }

    fn begin_recording(&self, storage: &mut GpuStorage, label: &str) -> Result<GpuRecorder, DeviceError> {
        storage.recordings += 1;
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        Ok(GpuRecorder { encoder })
    }

    fn finish_recording(&self, recorder: GpuRecorder) -> wgpu::CommandBuffer {
        recorder.encoder.finish()
    }

    fn record_transition(
        &self,
        recorder: &mut GpuRecorder,
        _target: &GpuTarget,
        _before: TargetState,
        after: TargetState,
    ) {
        // wgpu tracks texture usage itself; keep the boundary visible in captures.
        let marker = match after {
            TargetState::RenderTarget => "swap image: render target",
            TargetState::Present => "swap image: present",
        };
        recorder.encoder.insert_debug_marker(marker);
    }

    fn submit(&self, buffers: &mut Vec<wgpu::CommandBuffer>) -> Result<(), DeviceError> {
        if let Err(e) = self.health.check() {
            buffers.clear();
            return Err(e);
        }
        self.queue.submit(buffers.drain(..));
        Ok(())
    }

    fn create_fence(&self) -> Result<Arc<GpuFence>, DeviceError> {
        Ok(Arc::new(GpuFence {
            device: self.device.clone(),
            health: self.health.clone(),
            completed: AtomicU64::new(0),
        }))
    }

    fn signal_fence(&self, fence: &Arc<GpuFence>, value: u64) {
        let fence = Arc::clone(fence);
        self.queue.on_submitted_work_done(move || fence.advance(value));
    }

    fn descriptor_stride(&self, kind: DescriptorKind) -> u64 {
        match kind {
            DescriptorKind::Resource => u64::from(self.device.limits().min_uniform_buffer_offset_alignment).max(256),
            DescriptorKind::Sampler | DescriptorKind::RenderTarget | DescriptorKind::DepthStencil => VIEW_STRIDE,
        }
    }

    fn log_memory_usage(&self) {
        match self.device.generate_allocator_report() {
            Some(report) => log::info!(
                "gpu memory: {} KiB allocated, {} KiB reserved in {} blocks",
                report.total_allocated_bytes / 1024,
                report.total_reserved_bytes / 1024,
                report.blocks.len()
            ),
            None => log::debug!("{:?} backend has no allocator report", self.info.backend),
        }
    }

    fn create_descriptor_block(
        &self,
        kind: DescriptorKind,
        flags: DescriptorFlags,
        capacity: u32,
    ) -> Result<DescriptorBlock<GpuBlock>, DeviceError> {
        let size = u64::from(capacity) * self.descriptor_stride(kind);
        let start = self.next_block.fetch_add(size + BLOCK_GAP, Ordering::Relaxed);

        let buffer = (kind == DescriptorKind::Resource).then(|| {
            let mut usage = wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST;
            if !flags.contains(DescriptorFlags::SHADER_VISIBLE) {
                usage = wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
            }
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("tandem descriptor block"),
                size,
                usage,
                mapped_at_creation: false,
            })
        });

        log::debug!("created {kind:?} descriptor block at {start:#x} ({capacity} slots)");
        Ok(DescriptorBlock {
            start,
            raw: GpuBlock { buffer },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_reports_loss_to_every_clone() {
        let health = DeviceHealth::default();
        let swap_side = health.clone();
        assert!(health.check().is_ok());

        health.mark_lost("poll failed");
        assert!(swap_side.is_lost());
        assert!(swap_side.check().is_err_and(|e| e.is_device_lost()));

        // Further reports keep the latch set.
        swap_side.mark_lost("device removed");
        assert!(health.check().is_err_and(|e| e.is_device_lost()));
    }
}
