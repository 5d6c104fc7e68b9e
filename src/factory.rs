//! System factory.
//!
//! Wires the health monitor, consistency validator and failover coordinator
//! from one configuration and explicit collaborator handles.

use crate::config::{DrConfig, HealthConfig};
use crate::consistency::ConsistencyValidator;
use crate::core::{Deadline, Error, Result, SharedClock, SystemClock};
use crate::failover::FailoverCoordinator;
use crate::region::{HealthMonitor, RegionStateStore};
use crate::services::backends::{HttpHealthEndpoint, InMemoryMetrics, LogNotifier};
use crate::services::{HealthEndpoint, MetricsSink, NotificationSink, ReplicatedStore, TrafficControlPlane};
use std::sync::Arc;
use std::time::Duration;

/// Collaborators of one region.
#[derive(Clone)]
pub struct RegionServices {
    /// Service health endpoint
    pub endpoint: Arc<dyn HealthEndpoint>,
    /// The region's store replica
    pub store: Arc<dyn ReplicatedStore>,
}

impl RegionServices {
    pub fn new(endpoint: Arc<dyn HealthEndpoint>, store: Arc<dyn ReplicatedStore>) -> Self {
        Self { endpoint, store }
    }

    /// Probe `GET <base_url>/health` over HTTP.
    pub fn http(base_url: &str, store: Arc<dyn ReplicatedStore>, health: &HealthConfig) -> Result<Self> {
        let endpoint = HttpHealthEndpoint::new(base_url, health.probe_timeout())?;
        Ok(Self::new(Arc::new(endpoint), store))
    }
}

/// Collaborator handles for a whole deployment.
#[derive(Clone)]
pub struct DrServices {
    pub primary: RegionServices,
    pub secondary: RegionServices,
    /// Store holding region states, failover events and pair leases
    pub coordination_store: Arc<dyn ReplicatedStore>,
    pub traffic: Arc<dyn TrafficControlPlane>,
    /// Defaults to logging notifications
    pub notifier: Option<Arc<dyn NotificationSink>>,
    /// Defaults to in-memory metrics
    pub metrics: Option<Arc<dyn MetricsSink>>,
    /// Defaults to the system clock
    pub clock: Option<SharedClock>,
}

impl DrServices {
    pub fn new(
        primary: RegionServices,
        secondary: RegionServices,
        coordination_store: Arc<dyn ReplicatedStore>,
        traffic: Arc<dyn TrafficControlPlane>,
    ) -> Self {
        Self {
            primary,
            secondary,
            coordination_store,
            traffic,
            notifier: None,
            metrics: None,
            clock: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }
}

/// The three engine components of a deployment.
pub struct DrSystem {
    pub monitor: HealthMonitor,
    pub validator: ConsistencyValidator,
    pub coordinator: FailoverCoordinator,
    invocation_budget: Duration,
}

impl DrSystem {
    /// Deadline for an invocation starting now.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.invocation_budget)
    }
}

/// Build a system from configuration.
pub fn build_system(config: &DrConfig, services: DrServices) -> Result<DrSystem> {
    config.validate()?;

    let regions = config.regions.clone();
    for (expected, store) in [
        (&regions.primary, &services.primary.store),
        (&regions.secondary, &services.secondary.store),
    ] {
        if store.region() != expected {
            return Err(Error::Config(format!(
                "store for {} is a replica in {}",
                expected,
                store.region()
            )));
        }
    }

    let notifier = services
        .notifier
        .unwrap_or_else(|| Arc::new(LogNotifier::new(config.notification_topic.clone())) as Arc<dyn NotificationSink>);
    let metrics = services
        .metrics
        .unwrap_or_else(|| Arc::new(InMemoryMetrics::new(&config.metrics_namespace)) as Arc<dyn MetricsSink>);
    let clock = services.clock.unwrap_or_else(SystemClock::shared);
    let prefix = &config.failover.key_prefix;

    let monitor = HealthMonitor::new(
        config.health.clone(),
        RegionStateStore::new(services.coordination_store.clone(), prefix),
        metrics.clone(),
        notifier.clone(),
        clock.clone(),
    )
    .with_target(&regions.primary, services.primary.endpoint, services.primary.store.clone())
    .with_target(&regions.secondary, services.secondary.endpoint, services.secondary.store.clone());

    let validator = ConsistencyValidator::new(
        config.consistency.clone(),
        regions.clone(),
        services.primary.store,
        services.secondary.store,
        metrics.clone(),
        notifier.clone(),
        clock.clone(),
    );

    let coordinator = FailoverCoordinator::new(
        config.failover.clone(),
        regions,
        services.coordination_store,
        services.traffic,
        notifier,
        metrics,
        clock,
    );

    tracing::info!(regions = %config.regions, "disaster recovery system built");
    Ok(DrSystem {
        monitor,
        validator,
        coordinator,
        invocation_budget: config.invocation_deadline(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RegionPair;
    use crate::failover::FailoverOutcome;
    use crate::services::backends::{InMemoryNotifier, InMemoryStore, InMemoryTrafficControl};
    use crate::testing::ScriptedEndpoint;

    fn services() -> (DrServices, Arc<InMemoryTrafficControl>, Arc<InMemoryNotifier>) {
        let regions = RegionPair::default();
        let (primary, secondary) = InMemoryStore::replicated_pair(&regions, Duration::from_millis(200));
        let (primary, secondary) = (Arc::new(primary), Arc::new(secondary));
        let traffic = Arc::new(InMemoryTrafficControl::new());
        traffic.set_healthy(&regions.secondary, true).unwrap();
        let notifier = Arc::new(InMemoryNotifier::new());

        let services = DrServices::new(
            RegionServices::new(Arc::new(ScriptedEndpoint::healthy(&regions.primary)), primary),
            RegionServices::new(Arc::new(ScriptedEndpoint::healthy(&regions.secondary)), secondary.clone()),
            secondary,
            traffic.clone(),
        )
        .with_notifier(notifier.clone());
        (services, traffic, notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_and_run() {
        let (services, traffic, _) = services();
        let system = build_system(&DrConfig::default(), services).unwrap();
        let deadline = system.deadline();

        let observations = system.monitor.observe_all(&deadline).await.unwrap();
        assert_eq!(observations.len(), 2);
        assert!(observations.iter().all(|o| o.sample.success()));

        let report = system.validator.validate(&deadline).await.unwrap();
        assert_eq!(report.primary_region, "ap-south-1");

        let outcome = system
            .coordinator
            .operator_failover("ap-south-1", "ap-southeast-1", &deadline)
            .await
            .unwrap();
        assert!(matches!(outcome, FailoverOutcome::Succeeded(_)));
        assert_eq!(traffic.redirects().len(), 1);
    }

    #[test]
    fn test_rejects_mismatched_store() {
        let (mut services, _, _) = services();
        services.primary.store = Arc::new(InMemoryStore::new("us-east-1"));
        let err = build_system(&DrConfig::default(), services).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let (services, _, _) = services();
        let mut config = DrConfig::default();
        config.health.failure_threshold = 0;
        assert!(build_system(&config, services).is_err());
    }

    #[test]
    fn test_http_region_services() {
        let store: Arc<dyn ReplicatedStore> = Arc::new(InMemoryStore::new("ap-south-1"));
        let services = RegionServices::http("api.ap-south-1.example.com", store, &HealthConfig::default());
        assert!(services.is_ok());
    }
}
