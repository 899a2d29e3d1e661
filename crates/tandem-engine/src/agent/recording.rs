use crate::device::{Device, DeviceError};
use crate::frame::FrameSlot;

/// Per-slot recording storage owned by a command-recording agent.
///
/// Created lazily on the first Build after construction or after a release.
/// A creation failure latches: later Builds skip recording until
/// ReleaseResources clears the latch.
pub(crate) struct RecordingState<S> {
    storages: Option<Vec<S>>,
    failed: bool,
}

impl<S> RecordingState<S> {
    pub(crate) fn new() -> Self {
        Self {
            storages: None,
            failed: false,
        }
    }

    pub(crate) fn is_created(&self) -> bool {
        self.storages.is_some()
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.failed
    }

    /// Storage for `slot`, creating the whole set first if needed.
    pub(crate) fn storage_for<D>(&mut self, device: &D, slots: usize, slot: FrameSlot, name: &str) -> Option<&mut S>
    where
        D: Device<Storage = S>,
    {
        if self.failed {
            return None;
        }

        if self.storages.is_none() {
            match create_all(device, slots) {
                Ok(storages) => {
                    log::debug!("agent '{name}': created {slots} recording storages");
                    self.storages = Some(storages);
                }
                Err(e) => {
                    log::error!("agent '{name}': failed to create recording storage: {e}");
                    self.failed = true;
                    return None;
                }
            }
        }

        self.storages.as_mut().and_then(|s| s.get_mut(slot))
    }

    pub(crate) fn release(&mut self) {
        self.storages = None;
        self.failed = false;
    }
}

fn create_all<D: Device>(device: &D, slots: usize) -> Result<Vec<D::Storage>, DeviceError> {
    (0..slots).map(|_| device.create_storage()).collect()
}
