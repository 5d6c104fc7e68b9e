//! Configuration.
//!
//! Loaded from JSON, then overridden from the environment variables the
//! deployment sets for each scheduled function.

use crate::core::{Error, PollPolicy, RegionPair, Result, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrConfig {
    /// The two regions
    pub regions: RegionPair,
    /// Replicated table name
    pub table_name: Option<String>,
    /// Notification topic
    pub notification_topic: Option<String>,
    /// Metrics namespace
    pub metrics_namespace: String,
    /// Overall deadline per invocation (ms)
    pub invocation_deadline_ms: u64,
    /// Health monitor settings
    pub health: HealthConfig,
    /// Consistency validator settings
    pub consistency: ConsistencyConfig,
    /// Failover coordinator settings
    pub failover: FailoverConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for DrConfig {
    fn default() -> Self {
        Self {
            regions: RegionPair::default(),
            table_name: None,
            notification_topic: None,
            metrics_namespace: "DR-System".to_string(),
            invocation_deadline_ms: 30_000,
            health: HealthConfig::default(),
            consistency: ConsistencyConfig::default(),
            failover: FailoverConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DrConfig {
    /// Parse from a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid configuration: {}", e)))
    }

    /// Load from a JSON file, apply environment overrides and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from process environment variables.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Override fields from a variable lookup.
    ///
    /// Recognised: `PRIMARY_REGION`, `SECONDARY_REGION`, `TABLE_NAME`,
    /// `SNS_TOPIC`, `DR_LOG_LEVEL`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(primary) = set("PRIMARY_REGION") {
            self.regions.primary = primary;
        }
        if let Some(secondary) = set("SECONDARY_REGION") {
            self.regions.secondary = secondary;
        }
        if let Some(table) = set("TABLE_NAME") {
            self.table_name = Some(table);
        }
        if let Some(topic) = set("SNS_TOPIC") {
            self.notification_topic = Some(topic);
        }
        if let Some(level) = set("DR_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.regions.primary.is_empty() || self.regions.secondary.is_empty() {
            return Err(Error::Config("both regions must be named".to_string()));
        }
        if self.regions.primary == self.regions.secondary {
            return Err(Error::Config(format!(
                "primary and secondary region are both {}",
                self.regions.primary
            )));
        }
        if self.health.failure_threshold == 0 || self.health.recovery_threshold == 0 {
            return Err(Error::Config("health thresholds must be at least 1".to_string()));
        }
        if self.health.probe_timeout_ms == 0 {
            return Err(Error::Config("probe timeout must be positive".to_string()));
        }
        if self.consistency.max_poll_attempts == 0 {
            return Err(Error::Config("lag probe needs at least one poll attempt".to_string()));
        }
        if self.invocation_deadline_ms == 0 {
            return Err(Error::Config("invocation deadline must be positive".to_string()));
        }
        if self.consistency.poll_policy().ceiling() >= self.invocation_deadline() {
            return Err(Error::Config(
                "lag probe polling does not fit in the invocation deadline".to_string(),
            ));
        }
        if self.failover.abandoned_after_ms <= self.invocation_deadline_ms {
            return Err(Error::Config(format!(
                "abandoned_after_ms ({}) must exceed the invocation deadline ({} ms)",
                self.failover.abandoned_after_ms, self.invocation_deadline_ms
            )));
        }
        for region in self.failover.alarm_aliases.values() {
            if !self.regions.contains(region) {
                return Err(Error::Config(format!("alarm alias points at unknown region {}", region)));
            }
        }
        Ok(())
    }

    /// Overall deadline budget per invocation.
    pub fn invocation_deadline(&self) -> Duration {
        Duration::from_millis(self.invocation_deadline_ms)
    }
}

/// Health monitor settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures before SUSPECT becomes FAILED (N)
    pub failure_threshold: u32,
    /// Consecutive successes before RECOVERING becomes HEALTHY (M)
    pub recovery_threshold: u32,
    /// Timeout for each endpoint / store check (ms)
    pub probe_timeout_ms: u64,
    /// Extra attempts for transient probe errors
    pub probe_retries: u32,
    /// Delay between probe attempts (ms)
    pub retry_backoff_ms: u64,
    /// Key read from the store by each probe
    pub health_check_key: String,
    /// Probe latency that is logged as slow (ms)
    pub latency_alert_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_threshold: 3,
            probe_timeout_ms: 5_000,
            probe_retries: 1,
            retry_backoff_ms: 100,
            health_check_key: "health-check".to_string(),
            latency_alert_ms: 1_000,
        }
    }
}

impl HealthConfig {
    /// Per-check timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Retry policy for transient probe errors.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.probe_retries, Duration::from_millis(self.retry_backoff_ms))
    }
}

/// Consistency validator settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyConfig {
    /// Delay between marker reads (ms)
    pub poll_interval_ms: u64,
    /// Marker reads before the probe times out
    pub max_poll_attempts: u32,
    /// Lag above which consistency is degraded (ms)
    pub lag_threshold_ms: u64,
    /// Prefix of replication marker keys
    pub marker_prefix: String,
    /// Keys scanned for write conflicts
    pub candidate_keys: Vec<String>,
    /// Extra attempts for transient read errors during scans
    pub read_retries: u32,
    /// First retry delay for scan reads (ms)
    pub read_backoff_ms: u64,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            max_poll_attempts: 10,
            lag_threshold_ms: 5_000,
            marker_prefix: "replication-test".to_string(),
            candidate_keys: Vec::new(),
            read_retries: 2,
            read_backoff_ms: 100,
        }
    }
}

impl ConsistencyConfig {
    /// Polling policy of the lag probe.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(self.poll_interval_ms), self.max_poll_attempts)
    }

    /// Retry policy for conflict scan reads.
    pub fn read_retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.read_backoff_ms);
        RetryPolicy::exponential(self.read_retries, base, base * 8)
    }
}

/// Failover coordinator settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Recovery time objective (ms)
    pub rto_target_ms: u64,
    /// Extra attempts while the target is not yet confirmed healthy
    pub verify_retries: u32,
    /// Delay between verification attempts (ms)
    pub verify_backoff_ms: u64,
    /// Only fail over when the stored region state is FAILED
    pub require_failed_state: bool,
    /// Alarm-name substrings identifying a region
    pub alarm_aliases: BTreeMap<String, String>,
    /// Prefix of coordinator keys in the shared store
    pub key_prefix: String,
    /// Extra attempts for writing a failover outcome
    pub outcome_write_retries: u32,
    /// Time allowed for writing a failover outcome, after the invocation deadline (ms)
    pub outcome_write_budget_ms: u64,
    /// Age after which an unfinished pair lease is treated as abandoned (ms)
    pub abandoned_after_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        let mut alarm_aliases = BTreeMap::new();
        alarm_aliases.insert("mumbai".to_string(), "ap-south-1".to_string());
        alarm_aliases.insert("singapore".to_string(), "ap-southeast-1".to_string());

        Self {
            rto_target_ms: 60_000,
            verify_retries: 2,
            verify_backoff_ms: 250,
            require_failed_state: true,
            alarm_aliases,
            key_prefix: "dr".to_string(),
            outcome_write_retries: 4,
            outcome_write_budget_ms: 5_000,
            abandoned_after_ms: 90_000,
        }
    }
}

impl FailoverConfig {
    /// Polling policy for target verification.
    pub fn verify_policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(self.verify_backoff_ms), self.verify_retries + 1)
    }

    /// Retry policy for outcome writes.
    pub fn outcome_write_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.outcome_write_retries,
            Duration::from_millis(100),
            Duration::from_millis(1_000),
        )
    }

    /// Budget for outcome writes.
    pub fn outcome_write_budget(&self) -> Duration {
        Duration::from_millis(self.outcome_write_budget_ms)
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text
    Text,
    /// JSON
    Json,
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `regionguard=debug`
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Include module targets
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            with_target: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = DrConfig::default();
        assert_eq!(config.regions.primary, "ap-south-1");
        assert_eq!(config.regions.secondary, "ap-southeast-1");
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.health.recovery_threshold, 3);
        assert_eq!(config.consistency.poll_interval_ms, 200);
        assert_eq!(config.consistency.max_poll_attempts, 10);
        assert_eq!(config.consistency.lag_threshold_ms, 5_000);
        assert_eq!(config.failover.rto_target_ms, 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = DrConfig::from_json(
            r#"{"regions": {"primary": "us-east-1", "secondary": "us-west-2"},
                "health": {"failure_threshold": 5},
                "logging": {"format": "json"}}"#,
        )
        .unwrap();

        assert_eq!(config.regions.primary, "us-east-1");
        assert_eq!(config.health.failure_threshold, 5);
        assert_eq!(config.health.recovery_threshold, 3);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(DrConfig::from_json("{not json"), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PRIMARY_REGION", "eu-west-1"),
            ("SECONDARY_REGION", "eu-central-1"),
            ("TABLE_NAME", "dr-application-data"),
            ("SNS_TOPIC", ""),
        ]
        .into_iter()
        .collect();

        let mut config = DrConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.regions.primary, "eu-west-1");
        assert_eq!(config.regions.secondary, "eu-central-1");
        assert_eq!(config.table_name.as_deref(), Some("dr-application-data"));
        assert!(config.notification_topic.is_none());
    }

    #[test]
    fn test_validate_rejects_same_regions() {
        let mut config = DrConfig::default();
        config.regions.secondary = config.regions.primary.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = DrConfig::default();
        config.health.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = DrConfig::default();
        config.consistency.max_poll_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_polling_longer_than_deadline() {
        let mut config = DrConfig::default();
        config.consistency.poll_interval_ms = 5_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_abandon_window() {
        let mut config = DrConfig::default();
        config.failover.abandoned_after_ms = config.invocation_deadline_ms;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_alias_region() {
        let mut config = DrConfig::default();
        config
            .failover
            .alarm_aliases
            .insert("virginia".to_string(), "us-east-1".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policies() {
        let config = DrConfig::default();
        assert_eq!(config.consistency.poll_policy().max_attempts, 10);
        assert_eq!(config.health.retry_policy().max_attempts, 2);
        assert_eq!(config.failover.verify_policy().max_attempts, 3);
        assert_eq!(config.failover.outcome_write_policy().max_attempts, 5);
        assert_eq!(config.consistency.poll_policy().ceiling(), Duration::from_millis(1_800));

        let reads = config.consistency.read_retry_policy();
        assert_eq!(reads.max_attempts, 3);
        assert_eq!(reads.backoff.delay(3), Duration::from_millis(400));
    }
}
