//! In-memory metrics recorder.
//!
//! Keeps every datapoint so reports and tests can read statistics back.

use crate::core::{now, Error, Result, Timestamp};
use crate::services::sinks::MetricsSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// A recorded datapoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Metric name
    pub name: String,
    /// Value
    pub value: f64,
    /// Dimensions
    pub dimensions: BTreeMap<String, String>,
    /// Record time
    pub timestamp: Timestamp,
}

/// Summary statistics for one metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricStatistics {
    /// Datapoint count
    pub count: usize,
    /// Mean value
    pub average: f64,
    /// Minimum value
    pub minimum: f64,
    /// Maximum value
    pub maximum: f64,
}

/// Metrics sink that keeps datapoints in memory.
pub struct InMemoryMetrics {
    namespace: String,
    datapoints: RwLock<Vec<Datapoint>>,
    max_datapoints: usize,
}

impl InMemoryMetrics {
    /// Create a recorder for a namespace.
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            datapoints: RwLock::new(Vec::new()),
            max_datapoints: 10_000,
        }
    }

    /// Namespace the datapoints belong to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// All datapoints for a metric, oldest first.
    pub fn datapoints(&self, name: &str) -> Vec<Datapoint> {
        self.datapoints
            .read()
            .map(|points| points.iter().filter(|p| p.name == name).cloned().collect())
            .unwrap_or_default()
    }

    /// Values of a metric, oldest first.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.datapoints(name).into_iter().map(|p| p.value).collect()
    }

    /// Most recent value of a metric.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.values(name).last().copied()
    }

    /// Average, minimum and maximum of a metric.
    pub fn statistics(&self, name: &str) -> Option<MetricStatistics> {
        let values = self.values(name);
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().sum();
        Some(MetricStatistics {
            count: values.len(),
            average: sum / values.len() as f64,
            minimum: values.iter().copied().fold(f64::INFINITY, f64::min),
            maximum: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new("DR-System")
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetrics {
    async fn record(&self, name: &str, value: f64, dimensions: &[(&str, &str)]) -> Result<()> {
        let point = Datapoint {
            name: name.to_string(),
            value,
            dimensions: dimensions
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timestamp: now(),
        };

        tracing::debug!(namespace = %self.namespace, metric = name, value, "metric recorded");

        let mut points = self
            .datapoints
            .write()
            .map_err(|_| Error::Internal("metrics lock poisoned".to_string()))?;
        if points.len() >= self.max_datapoints {
            points.remove(0);
        }
        points.push(point);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_read_back() {
        let metrics = InMemoryMetrics::default();
        metrics
            .record("RTO", 1200.0, &[("FailedRegion", "ap-south-1"), ("TargetRegion", "ap-southeast-1")])
            .await
            .unwrap();

        let points = metrics.datapoints("RTO");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].dimensions["FailedRegion"], "ap-south-1");
        assert_eq!(metrics.last("RTO"), Some(1200.0));
        assert!(metrics.last("FailoverCount").is_none());
    }

    #[tokio::test]
    async fn test_statistics() {
        let metrics = InMemoryMetrics::default();
        for value in [10.0, 20.0, 60.0] {
            metrics.record("ReplicationLag", value, &[]).await.unwrap();
        }

        let stats = metrics.statistics("ReplicationLag").unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.average - 30.0).abs() < 1e-10);
        assert_eq!(stats.minimum, 10.0);
        assert_eq!(stats.maximum, 60.0);
        assert!(metrics.statistics("missing").is_none());
    }
}
