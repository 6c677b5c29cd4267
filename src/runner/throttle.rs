use std::sync::{Mutex, PoisonError};
use tokio::time::{Duration, Instant};

/// Process-wide admission control for test submissions.
///
/// A single cursor holds the earliest instant the next submission may start.
/// Every reservation pushes it `min_spacing` past the reserved slot, so
/// submissions from all suites are at least `min_spacing` apart.
pub struct Throttle {
    min_spacing: Duration,
    next_allowed: Mutex<Instant>,
}

impl Throttle {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            next_allowed: Mutex::new(Instant::now()),
        }
    }

    /// Reserve the next submission slot and return how long to wait for it.
    pub fn reserve_slot(&self) -> Duration {
        let mut next_allowed = self
            .next_allowed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let delay = next_allowed.saturating_duration_since(now);
        *next_allowed = now + delay + self.min_spacing;
        delay
    }
}
