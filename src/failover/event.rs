//! Failover events, per-pair phases and their persisted ledger.

use crate::core::{millis_between, Error, ReadConsistency, Result, Timestamp};
use crate::services::store::{Record, ReplicatedStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of a failover event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventOutcome {
    Pending,
    Succeeded,
    Failed,
}

/// What started a failover.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailoverTrigger {
    /// Regional health alarm
    Alarm { alarm_name: String },
    /// Explicit operator request
    Operator,
}

/// One failover attempt for an ordered region pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverEvent {
    /// Event ID
    pub id: String,
    /// Region traffic moves away from
    pub source_region: String,
    /// Region traffic moves to
    pub target_region: String,
    /// Trigger time
    pub started_at: Timestamp,
    /// Time the outcome was set
    pub completed_at: Option<Timestamp>,
    /// Current outcome
    pub outcome: EventOutcome,
    /// Recovery time, set on success
    pub rto_ms: Option<u64>,
    /// Failure cause
    pub error: Option<String>,
    /// Trigger
    pub trigger: FailoverTrigger,
}

impl FailoverEvent {
    /// Create a pending event.
    pub fn new(source: &str, target: &str, trigger: FailoverTrigger, started_at: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_region: source.to_string(),
            target_region: target.to_string(),
            started_at,
            completed_at: None,
            outcome: EventOutcome::Pending,
            rto_ms: None,
            error: None,
            trigger,
        }
    }

    /// Check if the outcome is still open.
    pub fn is_pending(&self) -> bool {
        self.outcome == EventOutcome::Pending
    }

    /// Mark the event succeeded and compute its RTO.
    pub fn succeed(&mut self, at: Timestamp) -> Result<()> {
        self.finish(EventOutcome::Succeeded, at)?;
        self.rto_ms = Some(millis_between(self.started_at, at));
        Ok(())
    }

    /// Mark the event failed.
    pub fn fail(&mut self, at: Timestamp, reason: &str) -> Result<()> {
        self.finish(EventOutcome::Failed, at)?;
        self.error = Some(reason.to_string());
        Ok(())
    }

    /// Check if the event succeeded within the RTO target.
    pub fn within_target(&self, rto_target_ms: u64) -> bool {
        self.outcome == EventOutcome::Succeeded && self.rto_ms.map_or(false, |rto| rto <= rto_target_ms)
    }

    fn finish(&mut self, outcome: EventOutcome, at: Timestamp) -> Result<()> {
        if !self.is_pending() {
            return Err(Error::InvalidTransition {
                from: format!("{:?}", self.outcome),
                to: format!("{:?}", outcome),
            });
        }
        self.outcome = outcome;
        self.completed_at = Some(at);
        Ok(())
    }
}

/// Phase of an ordered region pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailoverPhase {
    Idle,
    Triggered,
    VerifyingTarget,
    Redirecting,
    Completed,
    FailedAbort,
}

impl FailoverPhase {
    /// Check if the phase ends a failover.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FailoverPhase::Completed | FailoverPhase::FailedAbort)
    }

    /// Check if `to` may follow this phase.
    pub fn can_transition(&self, to: FailoverPhase) -> bool {
        use FailoverPhase::*;
        matches!(
            (self, to),
            (Idle, Triggered)
                | (Triggered, VerifyingTarget)
                | (Triggered, FailedAbort)
                | (VerifyingTarget, Redirecting)
                | (VerifyingTarget, FailedAbort)
                | (Redirecting, Completed)
                | (Redirecting, FailedAbort)
                | (Completed, Idle)
                | (FailedAbort, Idle)
        )
    }

    /// Move to `to`, rejecting transitions the machine does not allow.
    pub fn transition(self, to: FailoverPhase) -> Result<FailoverPhase> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(Error::InvalidTransition {
                from: format!("{:?}", self),
                to: format!("{:?}", to),
            })
        }
    }
}

/// Lease held on a pair while it is not IDLE.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairLease {
    pub source_region: String,
    pub target_region: String,
    pub phase: FailoverPhase,
    pub event_id: String,
    pub updated_at: Timestamp,
}

impl PairLease {
    /// Lease for a freshly triggered event.
    pub fn triggered(event: &FailoverEvent) -> Self {
        Self {
            source_region: event.source_region.clone(),
            target_region: event.target_region.clone(),
            phase: FailoverPhase::Triggered,
            event_id: event.id.clone(),
            updated_at: event.started_at,
        }
    }

    /// Advance the lease phase.
    pub fn advance(&mut self, to: FailoverPhase, at: Timestamp) -> Result<()> {
        self.phase = self.phase.transition(to)?;
        self.updated_at = at;
        Ok(())
    }

    /// Check if an unfinished lease has not moved for longer than `after_ms`.
    ///
    /// Terminal leases are never abandoned; they wait for a recovery.
    pub fn is_abandoned(&self, now: Timestamp, after_ms: u64) -> bool {
        !self.phase.is_terminal() && millis_between(self.updated_at, now) > after_ms
    }
}

/// Events and pair leases in the shared replicated store.
#[derive(Clone)]
pub struct EventLedger {
    store: Arc<dyn ReplicatedStore>,
    prefix: String,
}

impl EventLedger {
    pub fn new(store: Arc<dyn ReplicatedStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
        }
    }

    pub fn lease_key(&self, source: &str, target: &str) -> String {
        format!("{}/failover/pair/{}/{}", self.prefix, source, target)
    }

    pub fn event_key(&self, id: &str) -> String {
        format!("{}/failover/event/{}", self.prefix, id)
    }

    /// Take the pair lease. False when another trigger holds it.
    pub async fn acquire(&self, lease: &PairLease) -> Result<bool> {
        let record = Record::encode(lease, lease.updated_at, self.store.region())?;
        self.store
            .conditional_create(&self.lease_key(&lease.source_region, &lease.target_region), record)
            .await
    }

    pub async fn lease(
        &self,
        source: &str,
        target: &str,
        consistency: ReadConsistency,
    ) -> Result<Option<PairLease>> {
        match self.store.get(&self.lease_key(source, target), consistency).await? {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }

    /// Replace `current` with `next` for the same pair.
    ///
    /// False when the stored lease is no longer `current`.
    pub async fn swap_lease(&self, current: &PairLease, next: &PairLease) -> Result<bool> {
        let expected = serde_json::to_value(current)?;
        let record = Record::encode(next, next.updated_at, self.store.region())?;
        self.store
            .compare_and_swap(&self.lease_key(&next.source_region, &next.target_region), &expected, record)
            .await
    }

    pub async fn release(&self, source: &str, target: &str) -> Result<()> {
        self.store.delete(&self.lease_key(source, target)).await
    }

    pub async fn save_event(&self, event: &FailoverEvent, at: Timestamp) -> Result<()> {
        let record = Record::encode(event, at, self.store.region())?;
        self.store.put(&self.event_key(&event.id), record).await
    }

    pub async fn event(&self, id: &str, consistency: ReadConsistency) -> Result<Option<FailoverEvent>> {
        match self.store.get(&self.event_key(id), consistency).await? {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::now;
    use crate::services::backends::InMemoryStore;
    use chrono::Duration;

    fn event() -> FailoverEvent {
        FailoverEvent::new("ap-south-1", "ap-southeast-1", FailoverTrigger::Operator, now())
    }

    #[test]
    fn test_succeed_sets_rto() {
        let mut event = event();
        let done = event.started_at + Duration::milliseconds(1234);
        event.succeed(done).unwrap();

        assert_eq!(event.outcome, EventOutcome::Succeeded);
        assert_eq!(event.rto_ms, Some(1234));
        assert_eq!(event.completed_at, Some(done));
        assert!(event.within_target(60_000));
        assert!(!event.within_target(1000));
    }

    #[test]
    fn test_terminal_outcome_is_immutable() {
        let mut event = event();
        event.fail(now(), "target unhealthy").unwrap();

        assert!(event.succeed(now()).is_err());
        assert!(event.fail(now(), "again").is_err());
        assert_eq!(event.outcome, EventOutcome::Failed);
        assert_eq!(event.error.as_deref(), Some("target unhealthy"));
        assert!(!event.within_target(60_000));
    }

    #[test]
    fn test_phase_machine() {
        use FailoverPhase::*;
        let path = [Triggered, VerifyingTarget, Redirecting, Completed, Idle];
        let mut phase = Idle;
        for next in path {
            phase = phase.transition(next).unwrap();
        }
        assert_eq!(phase, Idle);

        assert!(Idle.transition(Redirecting).is_err());
        assert!(Triggered.transition(Redirecting).is_err());
        assert!(Completed.transition(Triggered).is_err());
        assert!(VerifyingTarget.can_transition(FailedAbort));
        assert!(FailedAbort.is_terminal());
        assert!(!Redirecting.is_terminal());
    }

    #[tokio::test]
    async fn test_lease_acquired_once() {
        let ledger = EventLedger::new(Arc::new(InMemoryStore::new("ap-south-1")), "dr");
        let first = event();
        let second = event();

        assert!(ledger.acquire(&PairLease::triggered(&first)).await.unwrap());
        assert!(!ledger.acquire(&PairLease::triggered(&second)).await.unwrap());

        let held = ledger
            .lease("ap-south-1", "ap-southeast-1", ReadConsistency::Strong)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(held.event_id, first.id);

        ledger.release("ap-south-1", "ap-southeast-1").await.unwrap();
        assert!(ledger.acquire(&PairLease::triggered(&second)).await.unwrap());
    }

    #[tokio::test]
    async fn test_event_roundtrip() {
        let ledger = EventLedger::new(Arc::new(InMemoryStore::new("ap-south-1")), "dr");
        let event = event();
        ledger.save_event(&event, now()).await.unwrap();

        assert_eq!(
            ledger.event(&event.id, ReadConsistency::Strong).await.unwrap(),
            Some(event.clone())
        );
        assert!(ledger.event("missing", ReadConsistency::Eventual).await.unwrap().is_none());
        assert_eq!(ledger.event_key(&event.id), format!("dr/failover/event/{}", event.id));
    }

    #[tokio::test]
    async fn test_swap_lease_needs_current_holder() {
        let ledger = EventLedger::new(Arc::new(InMemoryStore::new("ap-south-1")), "dr");
        let first = event();
        let lease = PairLease::triggered(&first);
        assert!(ledger.acquire(&lease).await.unwrap());

        let mut verifying = lease.clone();
        verifying.advance(FailoverPhase::VerifyingTarget, now()).unwrap();
        assert!(ledger.swap_lease(&lease, &verifying).await.unwrap());

        // The old lease no longer matches what is stored
        let mut stale = lease.clone();
        stale.advance(FailoverPhase::FailedAbort, now()).unwrap();
        assert!(!ledger.swap_lease(&lease, &stale).await.unwrap());

        let held = ledger
            .lease("ap-south-1", "ap-southeast-1", ReadConsistency::Strong)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(held, verifying);
    }

    #[test]
    fn test_abandoned_lease() {
        let started = now();
        let mut lease = PairLease::triggered(&event());
        lease.updated_at = started;

        assert!(!lease.is_abandoned(started + Duration::seconds(90), 90_000));
        assert!(lease.is_abandoned(started + Duration::seconds(91), 90_000));

        lease.advance(FailoverPhase::FailedAbort, started).unwrap();
        assert!(!lease.is_abandoned(started + Duration::hours(1), 90_000));
    }
}
