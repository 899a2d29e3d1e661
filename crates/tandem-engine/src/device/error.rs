use thiserror::Error;

/// Failure reported by a device, queue or presentation ring.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device was removed or reset. Everything created from it is invalid
    /// and must be rebuilt.
    #[error("device lost: {0}")]
    Lost(String),

    /// The presentation surface cannot provide an image right now; skip the
    /// frame and try again later.
    #[error("surface unavailable: {0}")]
    SurfaceUnavailable(String),

    /// A GPU object could not be created.
    #[error("failed to create {what}: {reason}")]
    Creation { what: &'static str, reason: String },

    /// No adapter or device is usable at all.
    #[error("no suitable GPU adapter: {0}")]
    NoAdapter(String),
}

impl DeviceError {
    pub fn creation(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Creation {
            what,
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::Lost(_))
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SurfaceUnavailable(_))
    }
}
