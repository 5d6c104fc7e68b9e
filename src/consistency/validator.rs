//! Consistency validator.
//!
//! Measures replication lag in both directions, scans candidate keys for
//! write conflicts and aggregates the findings into a three-level status.

use crate::config::ConsistencyConfig;
use crate::consistency::conflict::{ConflictRecord, RegionValue};
use crate::consistency::lag::{LagProbeResult, LagStatus, ReplicationProbe};
use crate::core::{
    poll_until, retry, Deadline, Error, PollOutcome, ReadConsistency, RegionPair, Result, SharedClock, Timestamp,
};
use crate::services::store::Record;
use crate::services::{notify_best_effort, record_best_effort, MetricsSink, NotificationSink, ReplicatedStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Aggregated consistency status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyStatus {
    Healthy,
    Degraded,
    Critical,
}

impl ConsistencyStatus {
    /// Value published as the `ConsistencyStatus` metric.
    pub fn metric_value(&self) -> f64 {
        match self {
            ConsistencyStatus::Healthy => 0.0,
            ConsistencyStatus::Degraded => 1.0,
            ConsistencyStatus::Critical => 2.0,
        }
    }

    /// Derive the status from probe and scan results.
    ///
    /// Any DIVERGED key is critical. A lag probe that timed out, failed or
    /// exceeded its threshold, or a scan error, is degraded.
    pub fn aggregate(lag: &[LagProbeResult], conflicts: &[ConflictRecord], scan_errors: usize) -> Self {
        if conflicts.iter().any(ConflictRecord::is_diverged) {
            ConsistencyStatus::Critical
        } else if scan_errors > 0 || lag.iter().any(|probe| !probe.within_threshold()) {
            ConsistencyStatus::Degraded
        } else {
            ConsistencyStatus::Healthy
        }
    }
}

impl std::fmt::Display for ConsistencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsistencyStatus::Healthy => write!(f, "healthy"),
            ConsistencyStatus::Degraded => write!(f, "degraded"),
            ConsistencyStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Result of one validation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub timestamp: Timestamp,
    pub primary_region: String,
    pub secondary_region: String,
    pub replication_lag: Vec<LagProbeResult>,
    pub conflicts: Vec<ConflictRecord>,
    /// Keys that could not be read from both regions
    pub scan_errors: Vec<String>,
    pub status: ConsistencyStatus,
}

/// Consistency validator over the two replicas of a region pair.
pub struct ConsistencyValidator {
    config: ConsistencyConfig,
    regions: RegionPair,
    primary: Arc<dyn ReplicatedStore>,
    secondary: Arc<dyn ReplicatedStore>,
    metrics: Arc<dyn MetricsSink>,
    notifier: Arc<dyn NotificationSink>,
    clock: SharedClock,
}

impl ConsistencyValidator {
    /// Create a validator. `primary` and `secondary` are the regional
    /// handles of the same replicated store.
    pub fn new(
        config: ConsistencyConfig,
        regions: RegionPair,
        primary: Arc<dyn ReplicatedStore>,
        secondary: Arc<dyn ReplicatedStore>,
        metrics: Arc<dyn MetricsSink>,
        notifier: Arc<dyn NotificationSink>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            regions,
            primary,
            secondary,
            metrics,
            notifier,
            clock,
        }
    }

    fn store(&self, region: &str) -> Result<&Arc<dyn ReplicatedStore>> {
        if region == self.regions.primary {
            Ok(&self.primary)
        } else if region == self.regions.secondary {
            Ok(&self.secondary)
        } else {
            Err(Error::UnknownRegion(region.to_string()))
        }
    }

    /// Measure replication lag from `source` to `target`.
    ///
    /// The marker is deleted from both regions whatever the outcome. Only an
    /// unknown region or an unencodable marker is an error; timeouts and
    /// write failures are reported in the result.
    pub async fn probe_replication_lag(
        &self,
        source: &str,
        target: &str,
        deadline: &Deadline,
    ) -> Result<LagProbeResult> {
        let source_store = self.store(source)?;
        let target_store = self.store(target)?;
        if source == target {
            return Err(Error::InvalidEvent(format!("lag probe from {} to itself", source)));
        }

        let write_ts = self.clock.now();
        let mut probe = ReplicationProbe::new(&self.config.marker_prefix, source, target, write_ts);
        let marker = Record::encode(&probe.marker(), write_ts, source)?;
        let key = probe.id.clone();
        let threshold_ms = self.config.lag_threshold_ms;

        let written = retry(self.config.read_retry_policy(), deadline, |_| {
            source_store.put(&key, marker.clone())
        })
        .await;

        let (status, attempts, error) = match written {
            Err(err) => {
                tracing::warn!(source, target, error = %err, "failed to write replication marker");
                let status = if err.is_timeout() { LagStatus::Timeout } else { LagStatus::Error };
                (status, 0, Some(err.to_string()))
            }
            Ok(()) => {
                let outcome = poll_until(self.config.poll_policy(), deadline, |_| {
                    target_store.get(&key, ReadConsistency::Strong)
                })
                .await;
                match outcome {
                    PollOutcome::Ready { attempts, .. } => {
                        probe.observe(self.clock.now());
                        (LagStatus::Success, attempts, None)
                    }
                    PollOutcome::Exhausted { attempts, last_error } => (LagStatus::Timeout, attempts, last_error),
                    PollOutcome::DeadlineExceeded { attempts } => {
                        (LagStatus::Timeout, attempts, Some(Error::DeadlineExceeded.to_string()))
                    }
                }
            }
        };

        let cleaned_up = self.remove_everywhere(&key).await;
        match probe.lag_ms {
            Some(lag_ms) => tracing::info!(source, target, lag_ms, attempts, "replication lag measured"),
            None => tracing::warn!(source, target, ?status, attempts, "replication marker not observed"),
        }

        Ok(LagProbeResult {
            probe,
            status,
            attempts,
            threshold_ms,
            cleaned_up,
            error,
        })
    }

    /// Read one key from both regions and classify it.
    pub async fn scan_key(&self, key: &str, deadline: &Deadline) -> Result<ConflictRecord> {
        let policy = self.config.read_retry_policy();
        let (a, b) = tokio::join!(
            retry(policy, deadline, |_| self.primary.get(key, ReadConsistency::Strong)),
            retry(policy, deadline, |_| self.secondary.get(key, ReadConsistency::Strong))
        );
        let record = ConflictRecord::classify(
            key,
            RegionValue::from_read(&self.regions.primary, a?.as_ref()),
            RegionValue::from_read(&self.regions.secondary, b?.as_ref()),
        );
        if record.is_diverged() {
            tracing::warn!(key, last_writer = ?record.last_writer, "regions diverged on key");
        }
        Ok(record)
    }

    /// Scan keys, collecting keys that could not be read.
    pub async fn scan_keys(&self, keys: &[String], deadline: &Deadline) -> (Vec<ConflictRecord>, Vec<String>) {
        let mut conflicts = Vec::with_capacity(keys.len());
        let mut errors = Vec::new();
        for key in keys {
            match self.scan_key(key, deadline).await {
                Ok(record) => conflicts.push(record),
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "conflict scan failed");
                    errors.push(format!("{}: {}", key, err));
                }
            }
        }
        (conflicts, errors)
    }

    /// Write different values for one fresh key in both regions at once,
    /// wait `settle`, and classify the key.
    ///
    /// The key is deleted from both regions afterwards.
    pub async fn concurrent_write_probe(&self, settle: Duration, deadline: &Deadline) -> Result<ConflictRecord> {
        let key = format!("{}-concurrent-{}", self.config.marker_prefix, Uuid::new_v4().simple());
        let at = self.clock.now();
        let value = |region: &str, n: u32| serde_json::json!({"id": key, "source": region, "value": n});
        let a = Record::new(value(&self.regions.primary, 100), at, &self.regions.primary);
        let b = Record::new(value(&self.regions.secondary, 200), at, &self.regions.secondary);

        let (wa, wb) = tokio::join!(self.primary.put(&key, a), self.secondary.put(&key, b));
        let result = match wa.and(wb) {
            Ok(()) => {
                tokio::time::sleep_until(deadline.bound(settle)).await;
                self.scan_key(&key, deadline).await
            }
            Err(err) => Err(err),
        };

        self.remove_everywhere(&key).await;
        result
    }

    /// Run a full validation and report it.
    pub async fn validate(&self, deadline: &Deadline) -> Result<ValidationReport> {
        let (primary, secondary) = (self.regions.primary.as_str(), self.regions.secondary.as_str());

        let replication_lag = vec![
            self.probe_replication_lag(primary, secondary, deadline).await?,
            self.probe_replication_lag(secondary, primary, deadline).await?,
        ];
        let (conflicts, scan_errors) = self.scan_keys(&self.config.candidate_keys, deadline).await;
        let status = ConsistencyStatus::aggregate(&replication_lag, &conflicts, scan_errors.len());

        let report = ValidationReport {
            timestamp: self.clock.now(),
            primary_region: primary.to_string(),
            secondary_region: secondary.to_string(),
            replication_lag,
            conflicts,
            scan_errors,
            status,
        };

        self.publish(&report).await;
        if report.status != ConsistencyStatus::Healthy {
            self.alert(&report).await;
        }
        tracing::info!(status = %report.status, "consistency validation finished");
        Ok(report)
    }

    async fn publish(&self, report: &ValidationReport) {
        for probe in &report.replication_lag {
            if let Some(lag_ms) = probe.lag_ms() {
                let dimensions = [
                    ("SourceRegion", probe.probe.source_region.as_str()),
                    ("TargetRegion", probe.probe.target_region.as_str()),
                ];
                record_best_effort(self.metrics.as_ref(), "ReplicationLag", lag_ms as f64, &dimensions).await;
            }
        }
        record_best_effort(
            self.metrics.as_ref(),
            "ConsistencyStatus",
            report.status.metric_value(),
            &[("Primary", report.primary_region.as_str())],
        )
        .await;
    }

    async fn alert(&self, report: &ValidationReport) {
        let subject = format!("[ALERT] Data Consistency Issue - {}", report.status);
        let details = serde_json::to_string_pretty(report).unwrap_or_default();
        let body = format!(
            "Data consistency validation reported {} between {} and {}.\n\nDetails:\n{}",
            report.status, report.primary_region, report.secondary_region, details
        );
        notify_best_effort(self.notifier.as_ref(), &subject, &body).await;
    }

    /// Delete a key in both regions. Returns false if either delete failed.
    async fn remove_everywhere(&self, key: &str) -> bool {
        let (a, b) = tokio::join!(self.primary.delete(key), self.secondary.delete(key));
        let mut removed = true;
        for (region, result) in [(&self.regions.primary, a), (&self.regions.secondary, b)] {
            if let Err(err) = result {
                tracing::warn!(key, region = %region, error = %err, "failed to delete probe key");
                removed = false;
            }
        }
        removed
    }
}
