use conductor_directory::DirectoryError;
use conductor_protocol::{BaseScenarioId, EventKind, PairKey, ProjectId, RegionalScenarioId};
use std::fmt;

/// The side of a pair that triggered reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileAnchor {
    Project(ProjectId),
    RegionalScenario(RegionalScenarioId),
}

impl ReconcileAnchor {
    /// Event kind that anchors reconciliation on this side.
    #[must_use]
    pub fn kind(self) -> EventKind {
        match self {
            ReconcileAnchor::Project(_) => EventKind::ProjectCreated,
            ReconcileAnchor::RegionalScenario(_) => EventKind::RegionalScenarioCreated,
        }
    }
}

impl fmt::Display for ReconcileAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileAnchor::Project(id) => write!(f, "project {id}"),
            ReconcileAnchor::RegionalScenario(id) => write!(f, "regional scenario {id}"),
        }
    }
}

impl From<ProjectId> for ReconcileAnchor {
    fn from(id: ProjectId) -> Self {
        ReconcileAnchor::Project(id)
    }
}

impl From<RegionalScenarioId> for ReconcileAnchor {
    fn from(id: RegionalScenarioId) -> Self {
        ReconcileAnchor::RegionalScenario(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Permanent upstream error, not retried.
    Rejected { error: DirectoryError },
    Exhausted {
        attempts: u32,
        last_error: DirectoryError,
    },
    /// Shutdown was observed between attempts.
    Cancelled { attempts: u32 },
    /// The pair task died before producing an outcome.
    Aborted { reason: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Rejected { error } => write!(f, "rejected: {error}"),
            FailureReason::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempt(s): {last_error}"),
            FailureReason::Cancelled { attempts } => {
                write!(f, "cancelled by shutdown after {attempts} attempt(s)")
            }
            FailureReason::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    Created { base_scenario_id: BaseScenarioId },
    AlreadyExists,
    Failed(FailureReason),
}

impl ReconciliationOutcome {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, ReconciliationOutcome::Failed(_))
    }

    /// Label used for the `outcome` metric dimension.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ReconciliationOutcome::Created { .. } => "created",
            ReconciliationOutcome::AlreadyExists => "already_exists",
            ReconciliationOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairOutcome {
    pub key: PairKey,
    pub outcome: ReconciliationOutcome,
}

/// Result of reconciling one event: one outcome per counterpart, in counterpart order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReport {
    pub kind: EventKind,
    pub anchor: ReconcileAnchor,
    pub outcomes: Vec<PairOutcome>,
}

impl EventReport {
    #[must_use]
    pub fn empty(anchor: ReconcileAnchor) -> Self {
        Self {
            kind: anchor.kind(),
            anchor,
            outcomes: Vec::new(),
        }
    }

    #[must_use]
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, ReconciliationOutcome::Created { .. }))
    }

    #[must_use]
    pub fn already_existing(&self) -> usize {
        self.count(|o| matches!(o, ReconciliationOutcome::AlreadyExists))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(ReconciliationOutcome::is_failed)
    }

    #[must_use]
    pub fn has_cancelled(&self) -> bool {
        self.outcomes.iter().any(|p| {
            matches!(
                p.outcome,
                ReconciliationOutcome::Failed(FailureReason::Cancelled { .. })
            )
        })
    }

    /// Outcome labels in order, handy for assertions and logs.
    #[must_use]
    pub fn labels(&self) -> Vec<&'static str> {
        self.outcomes.iter().map(|p| p.outcome.label()).collect()
    }

    fn count(&self, pred: impl Fn(&ReconciliationOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|p| pred(&p.outcome)).count()
    }
}
