//! Core utilities and common types for regionguard.

pub mod clock;
pub mod error;
pub mod poll;
pub mod types;

pub use clock::{Clock, SharedClock, SystemClock};
pub use error::{Error, RedirectError, Result};
pub use poll::{poll_until, retry, within, Backoff, Deadline, PollOutcome, PollPolicy, RetryPolicy};
pub use types::*;
