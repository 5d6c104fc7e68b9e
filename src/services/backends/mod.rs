//! Collaborator implementations.
//!
//! - In-memory replicated store (single region or replicated pair)
//! - In-memory traffic control plane
//! - Notification sinks (tracing, in-memory)
//! - In-memory metrics recorder
//! - HTTP health endpoint

pub mod http;
pub mod memory;
pub mod metrics;
pub mod notify;
pub mod traffic;

pub use http::HttpHealthEndpoint;
pub use memory::InMemoryStore;
pub use metrics::{Datapoint, InMemoryMetrics, MetricStatistics};
pub use notify::{InMemoryNotifier, LogNotifier, Notification};
pub use traffic::InMemoryTrafficControl;
