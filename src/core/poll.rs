//! Deadline-bounded polling and retry primitives.
//!
//! Every wait in the crate goes through these helpers so that no loop runs
//! past its attempt ceiling or the invocation deadline.

use crate::core::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Overall deadline carried by one invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// The deadline instant.
    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Check if the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// The earlier of `now + timeout` and the deadline.
    pub fn bound(&self, timeout: Duration) -> Instant {
        std::cmp::min(Instant::now() + timeout, self.at)
    }
}

/// Run `fut` bounded by both `timeout` and the deadline.
///
/// Yields `Error::DeadlineExceeded` when the deadline cut it short and
/// `Error::Timeout` when the per-call timeout did.
pub async fn within<T, F>(deadline: &Deadline, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout_at(deadline.bound(timeout), fut).await {
        Ok(result) => result,
        Err(_) if deadline.is_expired() => Err(Error::DeadlineExceeded),
        Err(_) => Err(Error::Timeout(timeout.as_millis() as u64)),
    }
}

/// Fixed-interval polling policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between attempts
    pub interval: Duration,
    /// Maximum number of attempts
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Create a new policy.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Longest time a poll can wait between its first and last attempt.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), 10)
    }
}

/// Result of a bounded poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The condition was observed
    Ready { value: T, attempts: u32 },
    /// Every attempt ran without observing the condition
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
    },
    /// The invocation deadline cut the poll short
    DeadlineExceeded { attempts: u32 },
}

/// Poll `op` until it yields `Some`, the attempts run out, or the deadline passes.
///
/// Errors from an attempt count as a miss; the last one is kept for reporting.
pub async fn poll_until<T, F, Fut>(policy: PollPolicy, deadline: &Deadline, mut op: F) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        if deadline.is_expired() {
            return PollOutcome::DeadlineExceeded {
                attempts: attempt - 1,
            };
        }

        match tokio::time::timeout_at(deadline.instant(), op(attempt)).await {
            Err(_) => return PollOutcome::DeadlineExceeded { attempts: attempt },
            Ok(Ok(Some(value))) => return PollOutcome::Ready { value, attempts: attempt },
            Ok(Ok(None)) => {}
            Ok(Err(err)) => {
                tracing::debug!(attempt, error = %err, "poll attempt failed");
                last_error = Some(err.to_string());
            }
        }

        if attempt < policy.max_attempts {
            let wake = Instant::now() + policy.interval;
            if wake > deadline.instant() {
                return PollOutcome::DeadlineExceeded { attempts: attempt };
            }
            tokio::time::sleep_until(wake).await;
        }
    }

    PollOutcome::Exhausted {
        attempts: policy.max_attempts,
        last_error,
    }
}

/// Delay schedule between retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay every time
    Fixed(Duration),
    /// Doubling delay starting at `base`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Bounded retry policy for transient errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay schedule
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// `retries` extra attempts with a fixed delay.
    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self {
            max_attempts: retries + 1,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// `retries` extra attempts with exponential backoff.
    pub fn exponential(retries: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: retries + 1,
            backoff: Backoff::Exponential { base, max },
        }
    }
}

/// Run `op`, retrying transient errors within the policy and the deadline.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, deadline: &Deadline, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if deadline.is_expired() {
            return Err(Error::DeadlineExceeded);
        }

        let err = match tokio::time::timeout_at(deadline.instant(), op(attempt)).await {
            Err(_) => return Err(Error::DeadlineExceeded),
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
        };

        if !err.is_transient() || attempt >= max_attempts {
            return Err(err);
        }

        let delay = policy.backoff.delay(attempt);
        if Instant::now() + delay > deadline.instant() {
            return Err(err);
        }

        tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying transient failure");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_poll_ready_on_third_attempt() {
        let deadline = Deadline::after(Duration::from_secs(10));
        let start = Instant::now();
        let outcome = poll_until(PollPolicy::default(), &deadline, |attempt| async move {
            Ok(if attempt == 3 { Some(attempt) } else { None })
        })
        .await;

        assert_eq!(outcome, PollOutcome::Ready { value: 3, attempts: 3 });
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400) && elapsed < Duration::from_millis(410));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_exhausts_attempts() {
        let deadline = Deadline::after(Duration::from_secs(10));
        let policy = PollPolicy::new(Duration::from_millis(200), 4);
        let outcome: PollOutcome<()> = poll_until(policy, &deadline, |_| async { Ok(None) }).await;

        assert_eq!(
            outcome,
            PollOutcome::Exhausted {
                attempts: 4,
                last_error: None
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_keeps_last_error() {
        let deadline = Deadline::after(Duration::from_secs(10));
        let policy = PollPolicy::new(Duration::from_millis(10), 2);
        let outcome: PollOutcome<()> = poll_until(policy, &deadline, |_| async {
            Err(Error::Transport("reset".into()))
        })
        .await;

        match outcome {
            PollOutcome::Exhausted { last_error, .. } => {
                assert!(last_error.unwrap().contains("reset"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_at_deadline() {
        let deadline = Deadline::after(Duration::from_millis(500));
        let start = Instant::now();
        let outcome: PollOutcome<()> =
            poll_until(PollPolicy::default(), &deadline, |_| async { Ok(None) }).await;

        assert!(matches!(outcome, PollOutcome::DeadlineExceeded { .. }));
        assert!(start.elapsed() <= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_aborts_hanging_attempt() {
        let deadline = Deadline::after(Duration::from_millis(300));
        let outcome: PollOutcome<()> = poll_until(PollPolicy::default(), &deadline, |_| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        })
        .await;

        assert_eq!(outcome, PollOutcome::DeadlineExceeded { attempts: 1 });
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_then_success() {
        let calls = AtomicU32::new(0);
        let deadline = Deadline::after(Duration::from_secs(5));
        let policy = RetryPolicy::fixed(2, Duration::from_millis(100));

        let value = retry(policy, &deadline, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(Error::Throttled("busy".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_does_not_retry_fatal() {
        let calls = AtomicU32::new(0);
        let deadline = Deadline::after(Duration::from_secs(5));
        let policy = RetryPolicy::fixed(3, Duration::from_millis(100));

        let result: Result<()> = retry(policy, &deadline, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::InvalidEvent("bad".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::InvalidEvent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_reports_timeout_kind() {
        let deadline = Deadline::after(Duration::from_secs(10));
        let result: Result<()> = within(&deadline, Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(50))));

        let short = Deadline::after(Duration::from_millis(20));
        let result: Result<()> = within(&short, Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }
}
