//! Replication-lag probe records.

use crate::core::{millis_between, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome kind of a lag probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LagStatus {
    /// Marker observed in the target region
    Success,
    /// Marker not observed within the poll ceiling or the deadline
    Timeout,
    /// Marker could not be written
    Error,
}

/// Marker payload written to the source region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub probe_id: String,
    pub write_ts: Timestamp,
    pub region: String,
    pub test: bool,
}

/// One replication-lag measurement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationProbe {
    /// Probe ID, also the marker key
    pub id: String,
    /// Region the marker was written to
    pub source_region: String,
    /// Region the marker was polled in
    pub target_region: String,
    /// Marker write time
    pub write_ts: Timestamp,
    /// First time the marker was seen in the target
    pub observed_ts: Option<Timestamp>,
    /// `observed_ts - write_ts`
    pub lag_ms: Option<u64>,
}

impl ReplicationProbe {
    /// Start a probe with a unique marker key.
    pub fn new(prefix: &str, source: &str, target: &str, write_ts: Timestamp) -> Self {
        Self {
            id: format!(
                "{}-{}-{}",
                prefix,
                write_ts.timestamp_millis(),
                Uuid::new_v4().simple()
            ),
            source_region: source.to_string(),
            target_region: target.to_string(),
            write_ts,
            observed_ts: None,
            lag_ms: None,
        }
    }

    /// Marker payload for this probe.
    pub fn marker(&self) -> Marker {
        Marker {
            probe_id: self.id.clone(),
            write_ts: self.write_ts,
            region: self.source_region.clone(),
            test: true,
        }
    }

    /// Record the first observation of the marker.
    pub fn observe(&mut self, at: Timestamp) {
        if self.observed_ts.is_none() {
            self.observed_ts = Some(at);
            self.lag_ms = Some(millis_between(self.write_ts, at));
        }
    }
}

/// Result of a lag probe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagProbeResult {
    pub probe: ReplicationProbe,
    pub status: LagStatus,
    /// Marker reads made
    pub attempts: u32,
    /// Threshold the lag was judged against (ms)
    pub threshold_ms: u64,
    /// Marker removed from both regions
    pub cleaned_up: bool,
    pub error: Option<String>,
}

impl LagProbeResult {
    /// Measured lag, present only on success.
    pub fn lag_ms(&self) -> Option<u64> {
        match self.status {
            LagStatus::Success => self.probe.lag_ms,
            _ => None,
        }
    }

    /// Check if the probe succeeded within the threshold.
    pub fn within_threshold(&self) -> bool {
        self.lag_ms().map_or(false, |lag| lag <= self.threshold_ms)
    }
}
