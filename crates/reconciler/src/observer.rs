use crate::ReconciliationOutcome;
use conductor_protocol::{ContractViolation, EventKind, PairKey};
use std::time::Duration;

/// Write-only sink for reconciliation telemetry. Implementations must be cheap and
/// must not fail; every method defaults to doing nothing.
pub trait ReconcileObserver: Send + Sync {
    fn on_event_received(&self, _kind: EventKind) {}

    /// `succeeded` is false when any pair failed or enumeration failed.
    fn on_event_finished(&self, _kind: EventKind, _succeeded: bool, _elapsed: Duration) {}

    fn on_event_rejected(&self, _violation: &ContractViolation) {}

    fn on_pair_outcome(&self, _kind: EventKind, _key: PairKey, _outcome: &ReconciliationOutcome) {}

    /// A transient failure scheduled retry number `attempt + 1`.
    fn on_retry(&self, _kind: EventKind, _attempt: u32) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ReconcileObserver for NoopObserver {}
