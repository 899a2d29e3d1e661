use crate::agent::MAX_WAIT_BATCH;
use crate::device::Extent;

/// Orchestrator configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Number of frame slots (and swap-ring images). At least 1.
    pub frames_in_flight: usize,

    /// Maximum number of agents awaited by one barrier chunk.
    pub max_wait_batch: usize,

    /// Surface size used until the first resize.
    pub initial_size: Extent,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            max_wait_batch: MAX_WAIT_BATCH,
            initial_size: Extent::new(1280, 720),
        }
    }
}
