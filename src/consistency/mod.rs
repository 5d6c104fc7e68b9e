//! Consistency module
//!
//! Provides replication checks between the regions of a pair:
//! - Replication-lag probes with guaranteed marker cleanup
//! - Report-only write-conflict scans
//! - Healthy / degraded / critical status aggregation

pub mod conflict;
pub mod lag;
pub mod validator;

pub use conflict::{ConflictRecord, RegionValue, Resolution};
pub use lag::{LagProbeResult, LagStatus, Marker, ReplicationProbe};
pub use validator::{ConsistencyStatus, ConsistencyValidator, ValidationReport};
