use crate::{BaseScenarioService, EventReport, HandlerError, ReconcileObserver, Shutdown};
use conductor_protocol::{ContractViolation, Envelope, Event, EventKind};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

static ROUTES: Lazy<HashMap<&'static str, EventKind>> =
    Lazy::new(|| EventKind::ALL.iter().map(|kind| (kind.as_str(), *kind)).collect());

/// Resolves an envelope type tag.
#[must_use]
pub fn route(event_type: &str) -> Option<EventKind> {
    ROUTES.get(event_type).copied()
}

/// Routes the envelope tag and decodes its payload into a typed event.
pub fn decode(envelope: &Envelope) -> Result<Event, ContractViolation> {
    let kind = route(&envelope.event_type).ok_or_else(|| ContractViolation::UnknownEventType {
        event_type: envelope.event_type.clone(),
    })?;
    Event::decode(kind, &envelope.payload)
}

/// What to do with a delivery whose reconciliation did not fully succeed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Redeliver,
    Acknowledge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acknowledge,
    Redeliver,
}

#[derive(Debug)]
pub enum DispatchState {
    Decoded {
        kind: EventKind,
        result: Result<EventReport, HandlerError>,
    },
    /// Unknown type or invalid payload. Never retried.
    Rejected(ContractViolation),
}

#[derive(Debug)]
pub struct Dispatched {
    pub state: DispatchState,
    pub disposition: Disposition,
}

pub struct Dispatcher {
    service: BaseScenarioService,
    observer: Arc<dyn ReconcileObserver>,
    failure_policy: FailurePolicy,
}

impl Dispatcher {
    pub fn new(service: BaseScenarioService, failure_policy: FailurePolicy) -> Self {
        let observer = Arc::clone(service.observer());
        Self {
            service,
            observer,
            failure_policy,
        }
    }

    pub async fn dispatch(&self, envelope: &Envelope, shutdown: &Shutdown) -> Dispatched {
        let event = match decode(envelope) {
            Ok(event) => event,
            Err(violation) => {
                log::error!("dropping event of type {:?}: {violation}", envelope.event_type);
                self.observer.on_event_rejected(&violation);
                return Dispatched {
                    state: DispatchState::Rejected(violation),
                    disposition: Disposition::Acknowledge,
                };
            }
        };

        let kind = event.kind();
        self.observer.on_event_received(kind);
        let started = Instant::now();
        let result = self.service.handle(&event, shutdown).await;
        let elapsed = started.elapsed();

        let succeeded = matches!(&result, Ok(report) if report.failed() == 0);
        self.observer.on_event_finished(kind, succeeded, elapsed);
        match &result {
            Ok(report) => log::info!(
                "{kind} for {}: {} created, {} already existing, {} failed in {elapsed:?}",
                report.anchor,
                report.created(),
                report.already_existing(),
                report.failed()
            ),
            Err(err) => log::error!("{kind} failed: {err}"),
        }

        let state = DispatchState::Decoded { kind, result };
        let disposition = self.disposition(&state);
        if disposition == Disposition::Acknowledge && !succeeded {
            log::error!("{kind}: acknowledging despite failures, affected pairs will not be retried");
        }
        Dispatched { state, disposition }
    }

    /// Acknowledge or redeliver, given how dispatch ended.
    #[must_use]
    pub fn disposition(&self, state: &DispatchState) -> Disposition {
        let failed = match state {
            DispatchState::Rejected(_) => return Disposition::Acknowledge,
            DispatchState::Decoded { result: Ok(report), .. } => {
                if report.failed() == 0 {
                    return Disposition::Acknowledge;
                }
                if report.has_cancelled() {
                    return Disposition::Redeliver;
                }
                true
            }
            DispatchState::Decoded {
                result: Err(HandlerError::Cancelled { .. }),
                ..
            } => return Disposition::Redeliver,
            DispatchState::Decoded { result: Err(_), .. } => true,
        };
        match (failed, self.failure_policy) {
            (true, FailurePolicy::Redeliver) => Disposition::Redeliver,
            _ => Disposition::Acknowledge,
        }
    }
}
