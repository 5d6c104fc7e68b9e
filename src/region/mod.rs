//! Region health module
//!
//! Provides regional health tracking:
//! - Health probes of endpoint and store
//! - Hysteresis state machine per region
//! - Alarm signals for the failover coordinator

pub mod monitor;
pub mod state;

pub use monitor::{HealthMonitor, HealthObservation, ProbeTarget};
pub use state::{
    region_alarm_name, HealthSample, HealthThresholds, ProbeResult, RegionState, RegionStateStore,
    RegionStatus, Transition,
};
