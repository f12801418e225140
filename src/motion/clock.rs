// Injected time source for the blocking poll loops

use std::time::{Duration, Instant};

/// Monotonic time source.
///
/// The motion primitives never read the wall clock directly; they go through
/// this trait so the poll loops are deterministic under test.
pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary epoch
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation used on the robot
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
