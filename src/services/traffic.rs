//! TrafficControlPlane trait definition.

use crate::core::{RedirectError, Result};
use async_trait::async_trait;

/// DNS / load-balancer control plane steering traffic between regions.
///
/// Only the failover coordinator may call `redirect`.
#[async_trait]
pub trait TrafficControlPlane: Send + Sync {
    /// Whether at least one health checker currently observes the region as healthy.
    async fn verify_healthy(&self, region: &str) -> Result<bool>;

    /// Send all traffic for `source` to `target`.
    async fn redirect(&self, source: &str, target: &str) -> std::result::Result<(), RedirectError>;
}
