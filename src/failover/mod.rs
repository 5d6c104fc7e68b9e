//! Failover module
//!
//! Provides failover coordination between the regions of a pair:
//! - Alarm signal and scheduler event decoding
//! - Failover events and the per-pair phase machine
//! - The coordinator with its conditional-create lease

pub mod coordinator;
pub mod event;
pub mod signal;

pub use coordinator::{FailoverCoordinator, FailoverOutcome};
pub use event::{EventLedger, EventOutcome, FailoverEvent, FailoverPhase, FailoverTrigger, PairLease};
pub use signal::{AlarmSignal, AlarmState, SchedulerEvent};
