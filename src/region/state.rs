//! Region health state and its hysteresis rules.
//!
//! A region only becomes FAILED after N consecutive failed samples and only
//! becomes HEALTHY again after M consecutive successes, so a single slow
//! probe can never trigger a failover.

use crate::core::{Error, ReadConsistency, Result, Timestamp};
use crate::failover::signal::{AlarmSignal, AlarmState};
use crate::services::store::{Record, ReplicatedStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Region status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegionStatus {
    /// Serving normally
    Healthy,
    /// At least one recent failure
    Suspect,
    /// Failure threshold reached
    Failed,
    /// Succeeding again, not yet trusted
    Recovering,
}

impl std::fmt::Display for RegionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegionStatus::Healthy => write!(f, "HEALTHY"),
            RegionStatus::Suspect => write!(f, "SUSPECT"),
            RegionStatus::Failed => write!(f, "FAILED"),
            RegionStatus::Recovering => write!(f, "RECOVERING"),
        }
    }
}

/// Result of one probe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeResult {
    /// Endpoint and store both answered in time
    Success { latency_ms: u64 },
    /// A check did not answer within its timeout or the deadline
    Timeout { error: String },
    /// A check answered with an error
    Error { error: String },
}

impl ProbeResult {
    /// Map a probe error to its result kind.
    pub fn from_error(err: &Error) -> Self {
        if err.is_timeout() {
            ProbeResult::Timeout {
                error: err.to_string(),
            }
        } else {
            ProbeResult::Error {
                error: err.to_string(),
            }
        }
    }
}

/// One health probe of one region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSample {
    /// Probed region
    pub region: String,
    /// Probe time
    pub timestamp: Timestamp,
    /// Outcome
    pub result: ProbeResult,
}

impl HealthSample {
    /// Create a sample.
    pub fn new(region: &str, timestamp: Timestamp, result: ProbeResult) -> Self {
        Self {
            region: region.to_string(),
            timestamp,
            result,
        }
    }

    /// Check if the probe succeeded.
    pub fn success(&self) -> bool {
        matches!(self.result, ProbeResult::Success { .. })
    }

    /// Latency, present only on success.
    pub fn latency_ms(&self) -> Option<u64> {
        match self.result {
            ProbeResult::Success { latency_ms } => Some(latency_ms),
            _ => None,
        }
    }

    /// Triggering error, present only on failure.
    pub fn error(&self) -> Option<&str> {
        match &self.result {
            ProbeResult::Success { .. } => None,
            ProbeResult::Timeout { error } | ProbeResult::Error { error } => Some(error),
        }
    }
}

/// Hysteresis thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Consecutive failures before FAILED (N)
    pub failure_threshold: u32,
    /// Consecutive successes before HEALTHY (M)
    pub recovery_threshold: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_threshold: 3,
        }
    }
}

/// A status change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Region
    pub region: String,
    /// Previous status
    pub from: RegionStatus,
    /// New status
    pub to: RegionStatus,
    /// Sample time that caused it
    pub at: Timestamp,
}

impl Transition {
    /// Alarm the scheduler should forward for this transition, if any.
    ///
    /// Entering FAILED raises the alarm; reaching HEALTHY clears it.
    pub fn alarm_signal(&self) -> Option<AlarmSignal> {
        let new_state = match self.to {
            RegionStatus::Failed => AlarmState::Alarm,
            RegionStatus::Healthy => AlarmState::Ok,
            _ => return None,
        };
        Some(AlarmSignal::new(&region_alarm_name(&self.region), new_state, &self.region))
    }
}

/// Name of the regional health alarm.
pub fn region_alarm_name(region: &str) -> String {
    format!("dr-region-health-{}", region)
}

/// Persisted health state of a region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionState {
    /// Region ID
    pub region: String,
    /// Current status
    pub status: RegionStatus,
    /// Consecutive failed samples
    pub consecutive_failure_count: u32,
    /// Consecutive successful samples
    pub consecutive_success_count: u32,
    /// Status RECOVERING was entered from
    pub recovering_from: Option<RegionStatus>,
    /// Last status change
    pub last_transition_at: Timestamp,
    /// Last applied sample
    pub last_sample_at: Option<Timestamp>,
    /// Incremented on every stored update
    #[serde(default)]
    pub version: u64,
}

impl RegionState {
    /// State of a region seen for the first time.
    pub fn new(region: &str, at: Timestamp) -> Self {
        Self {
            region: region.to_string(),
            status: RegionStatus::Healthy,
            consecutive_failure_count: 0,
            consecutive_success_count: 0,
            recovering_from: None,
            last_transition_at: at,
            last_sample_at: None,
            version: 0,
        }
    }

    /// Check if the region is FAILED.
    pub fn is_failed(&self) -> bool {
        self.status == RegionStatus::Failed
    }

    /// Check if the region is HEALTHY.
    pub fn is_healthy(&self) -> bool {
        self.status == RegionStatus::Healthy
    }

    /// Apply a sample and return the status change it caused.
    pub fn apply(&mut self, sample: &HealthSample, thresholds: &HealthThresholds) -> Option<Transition> {
        let from = self.status;
        self.last_sample_at = Some(sample.timestamp);

        if sample.success() {
            self.consecutive_failure_count = 0;
            self.consecutive_success_count = self.consecutive_success_count.saturating_add(1);

            if matches!(self.status, RegionStatus::Suspect | RegionStatus::Failed) {
                self.recovering_from = Some(self.status);
                self.status = RegionStatus::Recovering;
            }
            if self.status == RegionStatus::Recovering
                && self.consecutive_success_count >= thresholds.recovery_threshold
            {
                self.status = RegionStatus::Healthy;
                self.recovering_from = None;
            }
        } else {
            self.consecutive_success_count = 0;
            self.consecutive_failure_count = self.consecutive_failure_count.saturating_add(1);

            match self.status {
                RegionStatus::Healthy => self.status = RegionStatus::Suspect,
                RegionStatus::Recovering => {
                    self.status = match self.recovering_from.take() {
                        Some(RegionStatus::Failed) => RegionStatus::Failed,
                        _ => RegionStatus::Suspect,
                    };
                }
                RegionStatus::Suspect | RegionStatus::Failed => {}
            }
            if self.status == RegionStatus::Suspect
                && self.consecutive_failure_count >= thresholds.failure_threshold
            {
                self.status = RegionStatus::Failed;
            }
        }

        if self.status == from {
            return None;
        }

        self.last_transition_at = sample.timestamp;
        Some(Transition {
            region: self.region.clone(),
            from,
            to: self.status,
            at: sample.timestamp,
        })
    }
}

/// Attempts at writing a sample before giving up on a contended state.
const UPDATE_ATTEMPTS: u32 = 8;

/// Region states kept in the shared replicated store.
///
/// Updates are compare-and-swap on the whole stored state, so overlapping
/// invocations never lose each other's samples.
#[derive(Clone)]
pub struct RegionStateStore {
    store: Arc<dyn ReplicatedStore>,
    prefix: String,
}

impl RegionStateStore {
    /// Create over a shared store with a key prefix.
    pub fn new(store: Arc<dyn ReplicatedStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
        }
    }

    /// Key holding a region's state.
    pub fn key(&self, region: &str) -> String {
        format!("{}/region-state/{}", self.prefix, region)
    }

    /// Load a region's state, if it was ever probed.
    pub async fn load(&self, region: &str) -> Result<Option<RegionState>> {
        match self.store.get(&self.key(region), ReadConsistency::Strong).await? {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }

    /// Apply a sample to the stored state of its region.
    ///
    /// Reloads and reapplies when another writer updated the state first.
    pub async fn record_sample(
        &self,
        sample: &HealthSample,
        thresholds: &HealthThresholds,
        at: Timestamp,
    ) -> Result<(RegionState, Option<Transition>)> {
        let key = self.key(&sample.region);

        for attempt in 1..=UPDATE_ATTEMPTS {
            let current = self.store.get(&key, ReadConsistency::Strong).await?;
            let mut state = match &current {
                Some(record) => record.decode::<RegionState>()?,
                None => RegionState::new(&sample.region, sample.timestamp),
            };
            let transition = state.apply(sample, thresholds);
            state.version += 1;

            let record = Record::encode(&state, at, self.store.region())?;
            let written = match &current {
                Some(previous) => self.store.compare_and_swap(&key, &previous.value, record).await?,
                None => self.store.conditional_create(&key, record).await?,
            };
            if written {
                return Ok((state, transition));
            }
            tracing::debug!(region = %sample.region, attempt, "region state changed concurrently");
        }

        Err(Error::Conflict(key))
    }
}
