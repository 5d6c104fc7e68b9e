//! Notification and metrics sinks.
//!
//! Both are best-effort: a failed send is logged and never fails the caller.

use crate::core::Result;
use async_trait::async_trait;

/// Operator notification channel (e-mail / chat topic).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Send a notification.
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// Metric publisher.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Record one datapoint.
    async fn record(&self, name: &str, value: f64, dimensions: &[(&str, &str)]) -> Result<()>;
}

/// Send a notification, logging instead of propagating failures.
pub async fn notify_best_effort(sink: &dyn NotificationSink, subject: &str, body: &str) {
    if let Err(err) = sink.send(subject, body).await {
        tracing::warn!(subject, error = %err, "failed to send notification");
    }
}

/// Record a metric, logging instead of propagating failures.
pub async fn record_best_effort(sink: &dyn MetricsSink, name: &str, value: f64, dimensions: &[(&str, &str)]) {
    if let Err(err) = sink.record(name, value, dimensions).await {
        tracing::warn!(metric = name, error = %err, "failed to record metric");
    }
}
