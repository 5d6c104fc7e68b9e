//! Failover coordinator.
//!
//! Consumes alarm signals, decides whether to fail a region over to its peer
//! and drives the per-pair phase machine:
//!
//! `IDLE → TRIGGERED → VERIFYING_TARGET → REDIRECTING → COMPLETED | FAILED_ABORT`
//!
//! The pair lease is taken with a conditional create on the shared store, so
//! overlapping invocations for the same pair run at most one failover. The
//! lease stays held after a terminal phase until the source region recovers.
//! A lease stuck in an unfinished phase for longer than `abandoned_after_ms`
//! belongs to an invocation that died; it can be taken over or cleared, and
//! its event is closed as FAILED.

use crate::config::FailoverConfig;
use crate::core::{
    poll_until, retry, Deadline, Error, PollOutcome, ReadConsistency, RegionPair, Result, SharedClock,
    Timestamp,
};
use crate::failover::event::{EventLedger, FailoverEvent, FailoverPhase, FailoverTrigger, PairLease};
use crate::failover::signal::{AlarmSignal, AlarmState, SchedulerEvent};
use crate::region::state::{RegionStateStore, RegionStatus};
use crate::services::{
    notify_best_effort, record_best_effort, MetricsSink, NotificationSink, ReplicatedStore,
    TrafficControlPlane,
};
use serde_json::Value;
use std::sync::Arc;

/// Result of one coordinator invocation.
///
/// A failover that fails after it started is returned as
/// `Err(Error::FailoverFailed)` so the scheduler sees the invocation fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailoverOutcome {
    /// Traffic now goes to the target
    Succeeded(FailoverEvent),
    /// Target was not healthy; no traffic change was made
    Aborted { event: FailoverEvent, reason: String },
    /// Another trigger already holds the pair
    Duplicate {
        source_region: String,
        target_region: String,
        phase: Option<FailoverPhase>,
        event_id: Option<String>,
    },
    /// Nothing to do
    Ignored { reason: String },
    /// Recovery of a region was announced
    Recovered { region: String, released: bool },
    /// A notification was sent
    Notified { subject: String },
}

/// Failover coordinator for one region pair.
pub struct FailoverCoordinator {
    config: FailoverConfig,
    regions: RegionPair,
    ledger: EventLedger,
    states: RegionStateStore,
    traffic: Arc<dyn TrafficControlPlane>,
    notifier: Arc<dyn NotificationSink>,
    metrics: Arc<dyn MetricsSink>,
    clock: SharedClock,
}

impl FailoverCoordinator {
    /// Create a coordinator. `store` is the shared store holding events,
    /// pair leases and region states.
    pub fn new(
        config: FailoverConfig,
        regions: RegionPair,
        store: Arc<dyn ReplicatedStore>,
        traffic: Arc<dyn TrafficControlPlane>,
        notifier: Arc<dyn NotificationSink>,
        metrics: Arc<dyn MetricsSink>,
        clock: SharedClock,
    ) -> Self {
        let ledger = EventLedger::new(store.clone(), &config.key_prefix);
        let states = RegionStateStore::new(store, &config.key_prefix);
        Self {
            config,
            regions,
            ledger,
            states,
            traffic,
            notifier,
            metrics,
            clock,
        }
    }

    /// Handle a raw scheduler event.
    ///
    /// Fatal errors (malformed event, store unavailable) are returned to the
    /// scheduler after a best-effort notification.
    pub async fn handle_event(&self, event: &Value, deadline: &Deadline) -> Result<FailoverOutcome> {
        let result = match SchedulerEvent::from_json(event) {
            Ok(SchedulerEvent::Alarm(signal)) => self.handle_signal(&signal, deadline).await,
            Ok(SchedulerEvent::HealthCheckChange { id, status }) => {
                Ok(self.handle_health_check_change(&id, &status).await)
            }
            Err(err) => Err(err),
        };

        match &result {
            // Already reported by the failover itself
            Err(Error::FailoverFailed { .. }) => {}
            Err(err) => {
                tracing::error!(error = %err, "coordinator invocation failed");
                notify_best_effort(
                    self.notifier.as_ref(),
                    "DR Coordinator Error",
                    &format!("Failover coordination failed: {}", err),
                )
                .await;
            }
            Ok(_) => {}
        }
        result
    }

    /// Handle a regional health alarm.
    pub async fn handle_signal(&self, signal: &AlarmSignal, deadline: &Deadline) -> Result<FailoverOutcome> {
        let Some(region) = signal.resolve_region(&self.regions, &self.config.alarm_aliases) else {
            tracing::info!(alarm = %signal.alarm_name, "alarm does not name a monitored region");
            return Ok(FailoverOutcome::Ignored {
                reason: format!("alarm {} is not about {}", signal.alarm_name, self.regions),
            });
        };
        tracing::info!(alarm = %signal.alarm_name, state = ?signal.new_state, region = %region, "processing alarm");

        match signal.new_state {
            AlarmState::Alarm => {
                if let Some(reason) = self.stale_signal(&region, RegionStatus::Failed).await? {
                    return Ok(FailoverOutcome::Ignored { reason });
                }
                let target = self.peer(&region)?;
                let trigger = FailoverTrigger::Alarm {
                    alarm_name: signal.alarm_name.clone(),
                };
                self.initiate_failover(&region, &target, trigger, deadline).await
            }
            AlarmState::Ok => self.handle_recovery(&region).await,
            AlarmState::InsufficientData => Ok(FailoverOutcome::Ignored {
                reason: format!("alarm {} has insufficient data", signal.alarm_name),
            }),
        }
    }

    /// Fail `source` over to `target`.
    pub async fn initiate_failover(
        &self,
        source: &str,
        target: &str,
        trigger: FailoverTrigger,
        deadline: &Deadline,
    ) -> Result<FailoverOutcome> {
        self.check_pair(source, target)?;

        let event = FailoverEvent::new(source, target, trigger, self.clock.now());
        let mut lease = PairLease::triggered(&event);

        if !self.ledger.acquire(&lease).await? {
            let held = match self.ledger.lease(source, target, ReadConsistency::Strong).await {
                Ok(held) => held,
                Err(err) => {
                    tracing::warn!(source, target, error = %err, "could not read held pair lease");
                    None
                }
            };
            let taken_over = match &held {
                Some(held) if held.is_abandoned(self.clock.now(), self.config.abandoned_after_ms) => {
                    self.take_over(held, &lease).await?
                }
                _ => false,
            };
            if !taken_over {
                tracing::info!(source, target, "failover already in progress for pair");
                return Ok(FailoverOutcome::Duplicate {
                    source_region: source.to_string(),
                    target_region: target.to_string(),
                    phase: held.as_ref().map(|l| l.phase),
                    event_id: held.map(|l| l.event_id),
                });
            }
        }

        if let Err(err) = self.ledger.save_event(&event, event.started_at).await {
            // Nothing changed yet, so the pair can go back to IDLE
            if let Err(release_err) = self.ledger.release(source, target).await {
                tracing::error!(source, target, error = %release_err, "failed to release pair lease");
            }
            return Err(err);
        }
        tracing::info!(event_id = %event.id, source, target, "failover triggered");

        let result = self.execute(&mut lease, deadline).await;
        self.finalize(event, lease, result).await
    }

    /// Operator-requested failover, used for fail-back.
    ///
    /// Skips the FAILED-state requirement but still takes the pair lease.
    pub async fn operator_failover(&self, source: &str, target: &str, deadline: &Deadline) -> Result<FailoverOutcome> {
        tracing::info!(source, target, "operator failover requested");
        self.initiate_failover(source, target, FailoverTrigger::Operator, deadline)
            .await
    }

    /// Announce that `region` recovered and return its pair to IDLE.
    ///
    /// Traffic is never moved back automatically.
    pub async fn handle_recovery(&self, region: &str) -> Result<FailoverOutcome> {
        let peer = self.peer(region)?;
        if let Some(reason) = self.stale_signal(region, RegionStatus::Healthy).await? {
            return Ok(FailoverOutcome::Ignored { reason });
        }

        let released = self.release_settled(region, &peer).await?;

        let mut body = format!("Region {} has recovered and is now healthy.", region);
        if released {
            body.push_str(&format!(
                "\n\nTraffic stays on {}. Fail back with an operator failover from {} to {}.",
                peer, peer, region
            ));
        }
        notify_best_effort(
            self.notifier.as_ref(),
            &format!("Region Recovered: {}", region),
            &body,
        )
        .await;

        tracing::info!(region, released, "region recovered");
        Ok(FailoverOutcome::Recovered {
            region: region.to_string(),
            released,
        })
    }

    /// Return a terminal or abandoned pair to IDLE without a recovery signal.
    pub async fn reset_pair(&self, source: &str, target: &str) -> Result<bool> {
        self.check_pair(source, target)?;
        let released = self.release_settled(source, target).await?;
        if released {
            tracing::info!(source, target, "pair reset by operator");
        }
        Ok(released)
    }

    /// Current phase of a pair, as last replicated to this region.
    pub async fn pair_phase(&self, source: &str, target: &str) -> Result<FailoverPhase> {
        Ok(self
            .ledger
            .lease(source, target, ReadConsistency::Eventual)
            .await?
            .map(|lease| lease.phase)
            .unwrap_or(FailoverPhase::Idle))
    }

    /// Load a failover event, as last replicated to this region.
    pub async fn event(&self, id: &str) -> Result<Option<FailoverEvent>> {
        self.ledger.event(id, ReadConsistency::Eventual).await
    }

    /// Release the pair lease unless a live failover holds it.
    ///
    /// An abandoned lease is closed as FAILED_ABORT before it is released.
    async fn release_settled(&self, source: &str, target: &str) -> Result<bool> {
        let Some(lease) = self.ledger.lease(source, target, ReadConsistency::Strong).await? else {
            return Ok(false);
        };

        if !lease.phase.is_terminal() {
            let now = self.clock.now();
            if !lease.is_abandoned(now, self.config.abandoned_after_ms) {
                tracing::warn!(source, target, phase = ?lease.phase, "failover still in flight, keeping pair lease");
                return Ok(false);
            }

            let mut closed = lease.clone();
            closed.advance(FailoverPhase::FailedAbort, now)?;
            if !self.ledger.swap_lease(&lease, &closed).await? {
                tracing::warn!(source, target, "pair lease changed while closing it");
                return Ok(false);
            }
            tracing::warn!(event_id = %lease.event_id, phase = ?lease.phase, "closed abandoned pair lease");
            self.fail_abandoned_event(&lease.event_id).await;
        }

        self.ledger.release(source, target).await?;
        Ok(true)
    }

    /// Replace an abandoned lease with `lease`. False when another
    /// invocation changed it first.
    async fn take_over(&self, held: &PairLease, lease: &PairLease) -> Result<bool> {
        if !self.ledger.swap_lease(held, lease).await? {
            return Ok(false);
        }
        tracing::warn!(
            event_id = %held.event_id,
            phase = ?held.phase,
            new_event_id = %lease.event_id,
            "took over abandoned pair lease"
        );
        self.fail_abandoned_event(&held.event_id).await;
        Ok(true)
    }

    async fn fail_abandoned_event(&self, event_id: &str) {
        let reason = format!(
            "abandoned: no outcome recorded within {} ms",
            self.config.abandoned_after_ms
        );
        match self.close_pending_event(event_id, &reason).await {
            Ok(Some(event)) => self.report_failure(&event, &reason).await,
            Ok(None) => {}
            Err(err) => tracing::error!(event_id, error = %err, "failed to close abandoned event"),
        }
    }

    async fn close_pending_event(&self, event_id: &str, reason: &str) -> Result<Option<FailoverEvent>> {
        let Some(mut event) = self.ledger.event(event_id, ReadConsistency::Strong).await? else {
            return Ok(None);
        };
        if !event.is_pending() {
            return Ok(None);
        }
        let at = self.clock.now();
        event.fail(at, reason)?;
        self.save_outcome(&event, at).await?;
        Ok(Some(event))
    }

    /// Write an event outcome, retrying on its own budget.
    async fn save_outcome(&self, event: &FailoverEvent, at: Timestamp) -> Result<()> {
        let budget = Deadline::after(self.config.outcome_write_budget());
        retry(self.config.outcome_write_policy(), &budget, |_| {
            self.ledger.save_event(event, at)
        })
        .await
    }

    async fn handle_health_check_change(&self, id: &str, status: &str) -> FailoverOutcome {
        tracing::info!(health_check = id, status, "health check status changed");
        if !status.eq_ignore_ascii_case("unhealthy") {
            return FailoverOutcome::Ignored {
                reason: format!("health check {} is {}", id, status),
            };
        }

        let subject = format!("Health Check Unhealthy: {}", id);
        notify_best_effort(
            self.notifier.as_ref(),
            &subject,
            &format!("Health check {} is reporting unhealthy status.", id),
        )
        .await;
        FailoverOutcome::Notified { subject }
    }

    /// Steps 3 and 4: verify the target, then redirect. `Ok(false)` means
    /// the target was not healthy and no traffic change was made.
    async fn execute(&self, lease: &mut PairLease, deadline: &Deadline) -> Result<bool> {
        self.advance(lease, FailoverPhase::VerifyingTarget).await?;
        if !self.verify_target(&lease.target_region, deadline).await? {
            return Ok(false);
        }

        if deadline.is_expired() {
            return Err(Error::DeadlineExceeded);
        }
        self.advance(lease, FailoverPhase::Redirecting).await?;

        // Single attempt, not bounded by the deadline
        self.traffic
            .redirect(&lease.source_region, &lease.target_region)
            .await?;
        Ok(true)
    }

    async fn verify_target(&self, target: &str, deadline: &Deadline) -> Result<bool> {
        let outcome = poll_until(self.config.verify_policy(), deadline, |attempt| async move {
            let healthy = self.traffic.verify_healthy(target).await?;
            tracing::debug!(target, attempt, healthy, "target verification");
            Ok(healthy.then_some(()))
        })
        .await;

        match outcome {
            PollOutcome::Ready { .. } => Ok(true),
            PollOutcome::Exhausted { last_error: None, .. } => Ok(false),
            PollOutcome::Exhausted {
                last_error: Some(err),
                ..
            } => Err(Error::HealthCheck(format!("could not verify {}: {}", target, err))),
            PollOutcome::DeadlineExceeded { .. } => Err(Error::DeadlineExceeded),
        }
    }

    async fn advance(&self, lease: &mut PairLease, to: FailoverPhase) -> Result<()> {
        let mut next = lease.clone();
        next.advance(to, self.clock.now())?;
        if !self.ledger.swap_lease(lease, &next).await? {
            return Err(Error::LeaseLost(
                self.ledger.lease_key(&lease.source_region, &lease.target_region),
            ));
        }
        *lease = next;
        Ok(())
    }

    /// Record the outcome. Runs on every path once the event exists.
    async fn finalize(
        &self,
        mut event: FailoverEvent,
        mut lease: PairLease,
        result: Result<bool>,
    ) -> Result<FailoverOutcome> {
        let at = self.clock.now();
        let failure = match &result {
            Ok(true) => None,
            Ok(false) => Some(Error::TargetUnhealthy(event.target_region.clone()).to_string()),
            Err(err) => Some(err.to_string()),
        };

        match &failure {
            None => event.succeed(at)?,
            Some(reason) => event.fail(at, reason)?,
        }
        let phase = if failure.is_none() {
            FailoverPhase::Completed
        } else {
            FailoverPhase::FailedAbort
        };
        let held = lease.clone();
        if let Err(err) = lease.advance(phase, at) {
            tracing::error!(event_id = %event.id, error = %err, "unexpected pair phase");
        }

        // Write failures never change the outcome
        if let Err(err) = self.save_outcome(&event, at).await {
            tracing::error!(event_id = %event.id, error = %err, "failed to record failover outcome");
        }
        let budget = Deadline::after(self.config.outcome_write_budget());
        match retry(self.config.outcome_write_policy(), &budget, |_| {
            self.ledger.swap_lease(&held, &lease)
        })
        .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!(event_id = %event.id, "pair lease was taken over before the outcome was recorded")
            }
            Err(err) => tracing::error!(event_id = %event.id, error = %err, "failed to record pair phase"),
        }

        match (result, failure) {
            (Ok(_), None) => {
                self.report_success(&event).await;
                Ok(FailoverOutcome::Succeeded(event))
            }
            (Ok(_), Some(reason)) => {
                tracing::warn!(event_id = %event.id, reason = %reason, "failover aborted");
                self.report_failure(&event, &reason).await;
                Ok(FailoverOutcome::Aborted { event, reason })
            }
            (Err(_), reason) => {
                let reason = reason.unwrap_or_default();
                tracing::error!(event_id = %event.id, reason = %reason, "failover failed");
                self.report_failure(&event, &reason).await;
                Err(Error::FailoverFailed {
                    event_id: event.id,
                    source_region: event.source_region,
                    target_region: event.target_region,
                    reason,
                })
            }
        }
    }

    async fn report_success(&self, event: &FailoverEvent) {
        let rto_ms = event.rto_ms.unwrap_or_default();
        let within = event.within_target(self.config.rto_target_ms);
        tracing::info!(event_id = %event.id, rto_ms, within_target = within, "failover completed");

        let dimensions = [
            ("FailedRegion", event.source_region.as_str()),
            ("TargetRegion", event.target_region.as_str()),
        ];
        record_best_effort(self.metrics.as_ref(), "FailoverCount", 1.0, &dimensions).await;
        record_best_effort(self.metrics.as_ref(), "RTO", rto_ms as f64, &dimensions).await;

        let subject = format!("FAILOVER: {} → {}", event.source_region, event.target_region);
        let body = format!(
            "Automatic failover executed successfully.\n\n\
             Failed Region: {}\nTarget Region: {}\nRTO: {:.2} seconds (target {} s, {})\n\
             Event: {}\nTimestamp: {}\n\nAll traffic is now being routed to {}.",
            event.source_region,
            event.target_region,
            rto_ms as f64 / 1000.0,
            self.config.rto_target_ms / 1000,
            if within { "met" } else { "missed" },
            event.id,
            event.completed_at.unwrap_or(event.started_at).to_rfc3339(),
            event.target_region,
        );
        notify_best_effort(self.notifier.as_ref(), &subject, &body).await;
    }

    async fn report_failure(&self, event: &FailoverEvent, reason: &str) {
        let body = format!(
            "Failover failed: {}\n\nFailed Region: {}\nTarget Region: {}\nEvent: {}",
            reason, event.source_region, event.target_region, event.id
        );
        notify_best_effort(self.notifier.as_ref(), "FAILOVER FAILED", &body).await;
    }

    /// Reason to ignore a signal whose region state disagrees with it.
    async fn stale_signal(&self, region: &str, expected: RegionStatus) -> Result<Option<String>> {
        if !self.config.require_failed_state {
            return Ok(None);
        }
        Ok(match self.states.load(region).await? {
            Some(state) if state.status != expected => Some(format!(
                "region {} is {}, not {}",
                region, state.status, expected
            )),
            _ => None,
        })
    }

    fn peer(&self, region: &str) -> Result<String> {
        self.regions
            .peer_of(region)
            .map(str::to_string)
            .ok_or_else(|| Error::UnknownRegion(region.to_string()))
    }

    fn check_pair(&self, source: &str, target: &str) -> Result<()> {
        for region in [source, target] {
            if !self.regions.contains(region) {
                return Err(Error::UnknownRegion(region.to_string()));
            }
        }
        if source == target {
            return Err(Error::InvalidEvent(format!("cannot fail {} over to itself", source)));
        }
        Ok(())
    }
}
