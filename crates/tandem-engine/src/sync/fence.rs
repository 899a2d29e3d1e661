use std::sync::Arc;

use crate::device::{Device, DeviceError, Fence};

use super::Signal;

/// Per-slot fence bookkeeping for frames in flight.
///
/// `slot_values[s]` is the fence value the GPU must reach before slot `s` may be
/// reset or recorded into again. Values are strictly increasing across bumps.
pub struct FrameFence<D: Device> {
    fence: Arc<D::Fence>,
    last_value: u64,
    slot_values: Vec<u64>,
    signal: Arc<Signal>,
}

impl<D: Device> FrameFence<D> {
    pub fn new(device: &D, slots: usize) -> Result<Self, DeviceError> {
        debug_assert!(slots > 0);
        Ok(Self {
            fence: device.create_fence()?,
            last_value: 0,
            slot_values: vec![0; slots],
            signal: Arc::new(Signal::new()),
        })
    }

    pub fn fence(&self) -> &Arc<D::Fence> {
        &self.fence
    }

    /// Most recently signalled value.
    pub fn last_value(&self) -> u64 {
        self.last_value
    }

    pub fn slot_value(&self, slot: usize) -> u64 {
        self.slot_values[slot]
    }

    /// Whether the GPU finished the last frame recorded into `slot`.
    pub fn is_reached(&self, slot: usize) -> bool {
        self.fence.completed_value() >= self.slot_values[slot]
    }

    /// Blocks until the GPU finished the last frame recorded into `slot`.
    ///
    /// Returns immediately when the value is already reached.
    pub fn wait(&self, slot: usize) {
        let target = self.slot_values[slot];
        if self.fence.completed_value() >= target {
            return;
        }

        log::trace!("waiting for fence value {target} (slot {slot})");
        self.signal.reset();
        self.fence.notify_on_reached(target, Arc::clone(&self.signal));
        self.signal.wait();
    }

    /// Advances the counter, records it against `slot` and asks the queue to
    /// signal it. Does not block.
    pub fn bump(&mut self, device: &D, slot: usize) {
        self.last_value += 1;
        self.slot_values[slot] = self.last_value;
        device.signal_fence(&self.fence, self.last_value);
    }

    /// Bumps `slot` and waits for it: every submitted frame has completed when
    /// this returns.
    pub fn wait_idle(&mut self, device: &D, slot: usize) {
        self.bump(device, slot);
        self.wait(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::{HeadlessConfig, HeadlessDevice};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn manual_device() -> HeadlessDevice {
        HeadlessDevice::new(HeadlessConfig {
            auto_complete_fences: false,
        })
    }

    #[test]
    fn fresh_slots_do_not_block() {
        let device = manual_device();
        let fence = FrameFence::new(&device, 2).unwrap();
        assert!(fence.is_reached(0));
        assert!(fence.is_reached(1));
        fence.wait(0);
        fence.wait(1);
    }

    #[test]
    fn bump_records_increasing_values_per_slot() {
        let device = manual_device();
        let mut fence = FrameFence::new(&device, 2).unwrap();
        fence.bump(&device, 0);
        fence.bump(&device, 1);
        fence.bump(&device, 0);
        assert_eq!(fence.slot_value(0), 3);
        assert_eq!(fence.slot_value(1), 2);
        assert_eq!(fence.last_value(), 3);
        assert_eq!(fence.fence().requested_value(), 3);
    }

    #[test]
    fn wait_blocks_until_the_slot_value_completes() {
        let device = manual_device();
        let mut fence = FrameFence::new(&device, 2).unwrap();
        fence.bump(&device, 0);
        fence.bump(&device, 1);
        assert!(!fence.is_reached(0));

        let raw = Arc::clone(fence.fence());
        let done = Arc::new(AtomicBool::new(false));
        let waiter = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                fence.wait(0);
                done.store(true, Ordering::SeqCst);
                fence
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));

        // Completing slot 0's value releases the waiter; slot 1 stays pending.
        raw.complete(1);
        let fence = waiter.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert!(!fence.is_reached(1));
    }
}
