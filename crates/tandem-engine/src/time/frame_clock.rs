use std::time::{Duration, Instant};

/// Timing of one rendered frame.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Seconds since the previous frame; zero for the first frame after a
    /// (re)build of the device.
    pub dt: f32,

    pub now: Instant,

    /// Time since the clock was created.
    pub elapsed: Duration,
}

/// Produces [`FrameTime`] snapshots for the orchestrator.
///
/// Delta time is capped so a stall (debugger, minimized window, device
/// rebuild) does not show up as one giant step.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Instant,
    last: Option<Instant>,
    dt_max: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_max_dt(Duration::from_millis(250))
    }

    pub fn with_max_dt(dt_max: Duration) -> Self {
        Self {
            start: Instant::now(),
            last: None,
            dt_max,
        }
    }

    /// Forgets the previous frame; the next tick reports `dt == 0`.
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn tick(&mut self) -> FrameTime {
        let now = Instant::now();
        let dt = self
            .last
            .map(|last| now.saturating_duration_since(last).min(self.dt_max))
            .unwrap_or(Duration::ZERO);
        self.last = Some(now);

        FrameTime {
            dt: dt.as_secs_f32(),
            now,
            elapsed: now.saturating_duration_since(self.start),
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_tick_has_zero_dt() {
        let mut clock = FrameClock::new();
        assert_eq!(clock.tick().dt, 0.0);
    }

    #[test]
    fn dt_is_capped() {
        let mut clock = FrameClock::with_max_dt(Duration::from_millis(1));
        clock.tick();
        thread::sleep(Duration::from_millis(20));
        let t = clock.tick();
        assert!(t.dt <= 0.001 + f32::EPSILON);
        assert!(t.elapsed >= Duration::from_millis(20));
    }

    #[test]
    fn reset_restarts_delta() {
        let mut clock = FrameClock::new();
        clock.tick();
        thread::sleep(Duration::from_millis(5));
        clock.reset();
        assert_eq!(clock.tick().dt, 0.0);
    }
}
