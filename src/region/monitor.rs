//! Regional health monitor.
//!
//! Probes a region's service endpoint and its store replica, folds the sample
//! into the persisted `RegionState`, and reports metrics and alerts.

use crate::config::HealthConfig;
use crate::core::{retry, within, Deadline, Error, ReadConsistency, Result, SharedClock};
use crate::failover::signal::AlarmSignal;
use crate::region::state::{
    HealthSample, HealthThresholds, ProbeResult, RegionState, RegionStateStore, Transition,
};
use crate::services::{
    notify_best_effort, record_best_effort, HealthEndpoint, MetricsSink, NotificationSink,
    ReplicatedStore,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;

/// What a monitor probes in one region.
#[derive(Clone)]
pub struct ProbeTarget {
    /// Service health endpoint
    pub endpoint: Arc<dyn HealthEndpoint>,
    /// The region's store replica
    pub store: Arc<dyn ReplicatedStore>,
}

/// Result of one monitoring cycle for a region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthObservation {
    /// The probe sample
    pub sample: HealthSample,
    /// State after applying the sample
    pub state: RegionState,
    /// Status change, if any
    pub transition: Option<Transition>,
    /// Alarm to forward to the failover coordinator
    pub alarm: Option<AlarmSignal>,
}

/// Health monitor for the regions of a deployment.
pub struct HealthMonitor {
    config: HealthConfig,
    targets: BTreeMap<String, ProbeTarget>,
    states: RegionStateStore,
    metrics: Arc<dyn MetricsSink>,
    notifier: Arc<dyn NotificationSink>,
    clock: SharedClock,
}

impl HealthMonitor {
    /// Create a monitor with no regions.
    pub fn new(
        config: HealthConfig,
        states: RegionStateStore,
        metrics: Arc<dyn MetricsSink>,
        notifier: Arc<dyn NotificationSink>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            targets: BTreeMap::new(),
            states,
            metrics,
            notifier,
            clock,
        }
    }

    /// Add a region to probe.
    pub fn with_target(
        mut self,
        region: &str,
        endpoint: Arc<dyn HealthEndpoint>,
        store: Arc<dyn ReplicatedStore>,
    ) -> Self {
        self.targets
            .insert(region.to_string(), ProbeTarget { endpoint, store });
        self
    }

    /// Regions this monitor probes.
    pub fn regions(&self) -> Vec<&str> {
        self.targets.keys().map(|r| r.as_str()).collect()
    }

    /// Hysteresis thresholds in use.
    pub fn thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            failure_threshold: self.config.failure_threshold,
            recovery_threshold: self.config.recovery_threshold,
        }
    }

    /// Probe one region.
    ///
    /// Both the endpoint and a strongly consistent store read must answer
    /// within the probe timeout. Only an unknown region is an error; every
    /// probe failure is reported inside the sample.
    pub async fn probe(&self, region: &str, deadline: &Deadline) -> Result<HealthSample> {
        let target = self
            .targets
            .get(region)
            .ok_or_else(|| Error::UnknownRegion(region.to_string()))?;

        let timestamp = self.clock.now();
        let started = Instant::now();
        let timeout = self.config.probe_timeout();
        let policy = self.config.retry_policy();
        let key = self.config.health_check_key.as_str();

        let endpoint_check = retry(policy, deadline, |_| {
            within(deadline, timeout, Self::check_endpoint(region, target))
        });
        let store_check = retry(policy, deadline, |_| {
            within(deadline, timeout, target.store.get(key, ReadConsistency::Strong))
        });
        let (endpoint, store) = tokio::join!(endpoint_check, store_check);

        let result = match endpoint.and(store.map(|_| ())) {
            Ok(()) => ProbeResult::Success {
                latency_ms: started.elapsed().as_millis() as u64,
            },
            Err(err) => ProbeResult::from_error(&err),
        };

        let sample = HealthSample::new(region, timestamp, result);
        match sample.latency_ms() {
            Some(latency_ms) if latency_ms > self.config.latency_alert_ms => {
                tracing::warn!(region, latency_ms, "slow health probe");
            }
            Some(latency_ms) => tracing::debug!(region, latency_ms, "health probe succeeded"),
            None => tracing::warn!(region, error = ?sample.error(), "health probe failed"),
        }
        Ok(sample)
    }

    /// Probe a region, update its persisted state and report.
    pub async fn observe(&self, region: &str, deadline: &Deadline) -> Result<HealthObservation> {
        let sample = self.probe(region, deadline).await?;

        let (state, transition) = self
            .states
            .record_sample(&sample, &self.thresholds(), self.clock.now())
            .await?;

        if let Some(t) = &transition {
            tracing::info!(region, from = %t.from, to = %t.to, "region status changed");
        }

        self.publish(&sample).await;
        if !sample.success() {
            self.alert(&sample, &state).await;
        }

        let alarm = transition.as_ref().and_then(Transition::alarm_signal);
        Ok(HealthObservation {
            sample,
            state,
            transition,
            alarm,
        })
    }

    /// Observe every configured region concurrently, in region order.
    pub async fn observe_all(&self, deadline: &Deadline) -> Result<Vec<HealthObservation>> {
        join_all(self.targets.keys().map(|region| self.observe(region, deadline)))
            .await
            .into_iter()
            .collect()
    }

    async fn check_endpoint(region: &str, target: &ProbeTarget) -> Result<()> {
        let response = target.endpoint.check().await?;
        if !response.is_healthy() {
            return Err(Error::HealthCheck(format!(
                "endpoint reported status {}",
                response.status
            )));
        }
        if !response.region.is_empty() && response.region != region {
            return Err(Error::HealthCheck(format!(
                "endpoint answered from region {}",
                response.region
            )));
        }
        Ok(())
    }

    async fn publish(&self, sample: &HealthSample) {
        let dimensions = [("Region", sample.region.as_str())];
        if let Some(latency_ms) = sample.latency_ms() {
            record_best_effort(self.metrics.as_ref(), "StoreLatency", latency_ms as f64, &dimensions).await;
        }
        let status = if sample.success() { 1.0 } else { 0.0 };
        record_best_effort(self.metrics.as_ref(), "HealthCheckStatus", status, &dimensions).await;
    }

    async fn alert(&self, sample: &HealthSample, state: &RegionState) {
        let subject = format!("[ALERT] Health Check Failed - {}", sample.region);
        let details = serde_json::to_string_pretty(sample).unwrap_or_default();
        let body = format!(
            "Health Check Alert - {}\n\nTime: {}\nStatus: {} ({} consecutive failures)\n\nDetails:\n{}",
            sample.region,
            sample.timestamp.to_rfc3339(),
            state.status,
            state.consecutive_failure_count,
            details
        );
        notify_best_effort(self.notifier.as_ref(), &subject, &body).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SystemClock;
    use crate::failover::signal::AlarmState;
    use crate::region::state::RegionStatus;
    use crate::services::backends::{InMemoryMetrics, InMemoryNotifier, InMemoryStore};
    use crate::testing::ScriptedEndpoint;
    use std::time::Duration;

    struct Fixture {
        monitor: HealthMonitor,
        endpoint: Arc<ScriptedEndpoint>,
        store: Arc<InMemoryStore>,
        metrics: Arc<InMemoryMetrics>,
        notifier: Arc<InMemoryNotifier>,
    }

    fn fixture(config: HealthConfig) -> Fixture {
        let endpoint = Arc::new(ScriptedEndpoint::healthy("ap-south-1"));
        let store = Arc::new(InMemoryStore::new("ap-south-1"));
        let shared = Arc::new(InMemoryStore::new("ap-southeast-1"));
        let metrics = Arc::new(InMemoryMetrics::default());
        let notifier = Arc::new(InMemoryNotifier::new());

        let monitor = HealthMonitor::new(
            config,
            RegionStateStore::new(shared, "dr"),
            metrics.clone(),
            notifier.clone(),
            SystemClock::shared(),
        )
        .with_target("ap-south-1", endpoint.clone(), store.clone());

        Fixture {
            monitor,
            endpoint,
            store,
            metrics,
            notifier,
        }
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success() {
        let f = fixture(HealthConfig::default());
        let sample = f.monitor.probe("ap-south-1", &deadline()).await.unwrap();
        assert!(sample.success());
        assert!(sample.latency_ms().is_some());
    }

    #[tokio::test]
    async fn test_probe_unknown_region() {
        let f = fixture(HealthConfig::default());
        let err = f.monitor.probe("us-east-1", &deadline()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownRegion(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_endpoint_timeout() {
        let f = fixture(HealthConfig::default());
        f.endpoint.hang();

        let sample = f.monitor.probe("ap-south-1", &deadline()).await.unwrap();
        assert!(matches!(sample.result, ProbeResult::Timeout { .. }));
        assert!(sample.latency_ms().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_store_failure() {
        let f = fixture(HealthConfig::default());
        f.store.set_available(false).unwrap();

        let sample = f.monitor.probe("ap-south-1", &deadline()).await.unwrap();
        assert!(!sample.success());
        assert!(sample.error().unwrap().contains("unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_slow_store_times_out() {
        let f = fixture(HealthConfig {
            probe_timeout_ms: 100,
            ..Default::default()
        });
        f.store.set_latency(Duration::from_millis(500)).unwrap();

        let sample = f.monitor.probe("ap-south-1", &deadline()).await.unwrap();
        assert!(matches!(sample.result, ProbeResult::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_unhealthy_body() {
        let f = fixture(HealthConfig::default());
        f.endpoint.respond_status("degraded");

        let sample = f.monitor.probe("ap-south-1", &deadline()).await.unwrap();
        assert!(matches!(sample.result, ProbeResult::Error { .. }));
        assert!(sample.error().unwrap().contains("degraded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_retries_transient_error() {
        let f = fixture(HealthConfig::default());
        f.endpoint.fail_next(1);

        let sample = f.monitor.probe("ap-south-1", &deadline()).await.unwrap();
        assert!(sample.success());
        assert_eq!(f.endpoint.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_respects_deadline() {
        let f = fixture(HealthConfig::default());
        f.endpoint.hang();

        let short = Deadline::after(Duration::from_millis(300));
        let sample = f.monitor.probe("ap-south-1", &short).await.unwrap();
        assert!(matches!(sample.result, ProbeResult::Timeout { .. }));
        assert!(sample.error().unwrap().contains("deadline"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_timeouts_fail_region() {
        let f = fixture(HealthConfig::default());
        f.endpoint.hang();

        let first = f.monitor.observe("ap-south-1", &deadline()).await.unwrap();
        assert_eq!(first.state.status, RegionStatus::Suspect);
        assert!(first.alarm.is_none());

        f.monitor.observe("ap-south-1", &deadline()).await.unwrap();
        let third = f.monitor.observe("ap-south-1", &deadline()).await.unwrap();
        assert_eq!(third.state.status, RegionStatus::Failed);
        assert_eq!(third.alarm.unwrap().new_state, AlarmState::Alarm);

        assert_eq!(f.notifier.sent().len(), 3);
        assert!(f.notifier.contains_subject("Health Check Failed - ap-south-1"));
        assert_eq!(f.metrics.values("HealthCheckStatus"), vec![0.0, 0.0, 0.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_clears_alarm() {
        let f = fixture(HealthConfig::default());
        f.endpoint.hang();
        for _ in 0..3 {
            f.monitor.observe("ap-south-1", &deadline()).await.unwrap();
        }

        f.endpoint.recover();
        let mut last = None;
        for _ in 0..3 {
            last = Some(f.monitor.observe("ap-south-1", &deadline()).await.unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.state.status, RegionStatus::Healthy);
        assert_eq!(last.alarm.unwrap().new_state, AlarmState::Ok);
        assert_eq!(f.metrics.values("StoreLatency").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_observes_count_every_failure() {
        let endpoint = Arc::new(ScriptedEndpoint::healthy("ap-south-1"));
        endpoint.respond_status("unhealthy");
        let shared = Arc::new(InMemoryStore::new("ap-southeast-1"));
        shared.set_latency(Duration::from_millis(5)).unwrap();

        let monitor = HealthMonitor::new(
            HealthConfig::default(),
            RegionStateStore::new(shared.clone(), "dr"),
            Arc::new(InMemoryMetrics::default()),
            Arc::new(InMemoryNotifier::new()),
            SystemClock::shared(),
        )
        .with_target("ap-south-1", endpoint, Arc::new(InMemoryStore::new("ap-south-1")));

        let d = deadline();
        let (a, b, c) = tokio::join!(
            monitor.observe("ap-south-1", &d),
            monitor.observe("ap-south-1", &d),
            monitor.observe("ap-south-1", &d)
        );
        let alarms = [a.unwrap(), b.unwrap(), c.unwrap()]
            .iter()
            .filter(|o| o.alarm.is_some())
            .count();
        assert_eq!(alarms, 1);

        let state = RegionStateStore::new(shared, "dr").load("ap-south-1").await.unwrap().unwrap();
        assert_eq!(state.consecutive_failure_count, 3);
        assert_eq!(state.status, RegionStatus::Failed);
    }

    #[tokio::test]
    async fn test_observe_fails_when_state_store_unavailable() {
        let endpoint = Arc::new(ScriptedEndpoint::healthy("ap-south-1"));
        let shared = Arc::new(InMemoryStore::new("ap-southeast-1"));
        shared.set_available(false).unwrap();

        let monitor = HealthMonitor::new(
            HealthConfig::default(),
            RegionStateStore::new(shared, "dr"),
            Arc::new(InMemoryMetrics::default()),
            Arc::new(InMemoryNotifier::new()),
            SystemClock::shared(),
        )
        .with_target("ap-south-1", endpoint, Arc::new(InMemoryStore::new("ap-south-1")));

        let err = monitor.observe("ap-south-1", &deadline()).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }
}
