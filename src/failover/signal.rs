//! Alarm signals and scheduler events consumed by the coordinator.

use crate::core::{Error, RegionPair, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Alarm state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    /// Region failed
    Alarm,
    /// Region healthy again
    Ok,
    /// Alarm could not be evaluated
    InsufficientData,
}

/// `{alarm_name, new_state, region}` signal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmSignal {
    #[serde(alias = "AlarmName")]
    pub alarm_name: String,
    #[serde(alias = "NewStateValue")]
    pub new_state: AlarmState,
    #[serde(default, alias = "Region", skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl AlarmSignal {
    /// Create a signal for a region.
    pub fn new(alarm_name: &str, new_state: AlarmState, region: &str) -> Self {
        Self {
            alarm_name: alarm_name.to_string(),
            new_state,
            region: Some(region.to_string()),
        }
    }

    /// Region of the pair this alarm is about.
    ///
    /// An explicit region ID wins. Otherwise the alarm name and region text
    /// are matched against `aliases` and then against the pair's region IDs.
    pub fn resolve_region(&self, regions: &RegionPair, aliases: &BTreeMap<String, String>) -> Option<String> {
        if let Some(region) = self.region.as_deref() {
            if regions.contains(region) {
                return Some(region.to_string());
            }
        }

        let haystack = format!(
            "{} {}",
            self.alarm_name.to_lowercase(),
            self.region.as_deref().unwrap_or_default().to_lowercase()
        );

        let by_alias = aliases
            .iter()
            .filter(|(alias, region)| haystack.contains(&alias.to_lowercase()) && regions.contains(region))
            .map(|(_, region)| region.clone())
            .next();
        if by_alias.is_some() {
            return by_alias;
        }

        // Longest match so one region ID that prefixes another cannot shadow it.
        regions
            .regions()
            .into_iter()
            .filter(|region| haystack.contains(&region.to_lowercase()))
            .max_by_key(|region| region.len())
            .map(str::to_string)
    }
}

/// Event delivered by the external scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Regional health alarm changed state
    Alarm(AlarmSignal),
    /// Traffic-layer health check changed state
    HealthCheckChange { id: String, status: String },
}

impl SchedulerEvent {
    /// Decode a raw scheduler event.
    ///
    /// Accepts a bare alarm, an SNS envelope carrying an alarm in
    /// `Records[0].Sns.Message`, or a `{"health-check": {id, status}}` change.
    pub fn from_json(event: &Value) -> Result<Self> {
        if let Some(records) = event.get("Records") {
            let message = records
                .get(0)
                .and_then(|record| record.get("Sns"))
                .and_then(|sns| sns.get("Message"))
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidEvent("notification record has no message".to_string()))?;
            let inner: Value = serde_json::from_str(message)
                .map_err(|e| Error::InvalidEvent(format!("notification message is not JSON: {}", e)))?;
            return Self::alarm(&inner);
        }

        if let Some(check) = event.get("health-check") {
            let field = |name: &str| {
                check
                    .get(name)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| Error::InvalidEvent(format!("health-check change without {}", name)))
            };
            return Ok(SchedulerEvent::HealthCheckChange {
                id: field("id")?,
                status: field("status")?,
            });
        }

        Self::alarm(event)
    }

    fn alarm(value: &Value) -> Result<Self> {
        if value.get("alarm_name").is_none() && value.get("AlarmName").is_none() {
            return Err(Error::InvalidEvent("event is not an alarm".to_string()));
        }
        serde_json::from_value(value.clone())
            .map(SchedulerEvent::Alarm)
            .map_err(|e| Error::InvalidEvent(e.to_string()))
    }
}
