//! Wall-clock source used for sample, probe and event timestamps.

use crate::core::types::Timestamp;
use std::sync::Arc;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> Timestamp;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock anchored on tokio's monotonic clock.
///
/// The UTC time is captured once at construction and advanced by the elapsed
/// `tokio::time::Instant`, so timestamps never go backwards within one
/// invocation and follow tokio's paused clock in tests.
#[derive(Clone, Debug)]
pub struct SystemClock {
    anchor_utc: Timestamp,
    anchor_instant: tokio::time::Instant,
}

impl SystemClock {
    /// Create a clock anchored at the current time.
    pub fn new() -> Self {
        Self {
            anchor_utc: chrono::Utc::now(),
            anchor_instant: tokio::time::Instant::now(),
        }
    }

    /// Shared handle to a new clock.
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.anchor_instant.elapsed();
        match chrono::Duration::from_std(elapsed) {
            Ok(delta) => self.anchor_utc + delta,
            Err(_) => self.anchor_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_paused_time() {
        let clock = SystemClock::new();
        let t0 = clock.now();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let t1 = clock.now();
        let elapsed = (t1 - t0).num_milliseconds();
        assert!((1500..1505).contains(&elapsed));
    }

    #[tokio::test]
    async fn test_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
