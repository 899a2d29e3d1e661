use parking_lot::{Condvar, Mutex};

/// Auto-resetting completion signal.
///
/// A signal is either set or clear. [`Signal::wait`] blocks until the signal is
/// set and then clears it again, so one `set` releases exactly one `wait`.
/// Signals are cheap to reset and are meant to be pooled and reused frame to
/// frame rather than created per wait.
#[derive(Debug, Default)]
pub struct Signal {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal and wakes any waiter.
    pub fn set(&self) {
        let mut set = self.set.lock();
        *set = true;
        self.cond.notify_all();
    }

    /// Clears the signal without waking anyone.
    pub fn reset(&self) {
        *self.set.lock() = false;
    }

    /// Returns whether the signal is currently set.
    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Blocks until the signal is set, then clears it.
    pub fn wait(&self) {
        let mut set = self.set.lock();
        while !*set {
            self.cond.wait(&mut set);
        }
        *set = false;
    }

    /// Waits for every signal in `signals`.
    ///
    /// Returns once all of them have been set; each one is consumed.
    pub fn wait_all<S: AsRef<Signal>>(signals: &[S]) {
        for signal in signals {
            signal.as_ref().wait();
        }
    }
}

impl AsRef<Signal> for Signal {
    fn as_ref(&self) -> &Signal {
        self
    }
}
