//! Collaborator Interfaces
//!
//! The engine talks to the outside world only through these traits:
//! - Replicated store (per-region handle)
//! - Traffic control plane (health query + redirect)
//! - Notification and metrics sinks (best-effort)
//! - Regional health endpoint

pub mod backends;
pub mod health;
pub mod sinks;
pub mod store;
pub mod traffic;

pub use health::{HealthEndpoint, HealthResponse};
pub use sinks::{notify_best_effort, record_best_effort, MetricsSink, NotificationSink};
pub use store::{Record, ReplicatedStore};
pub use traffic::TrafficControlPlane;
