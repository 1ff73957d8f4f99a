use crate::retry::{run_with_retry, RetryError, RetryPolicy};
use crate::{
    EventReport, FailureReason, PairOutcome, ReconcileAnchor, ReconcileObserver,
    ReconciliationOutcome, Shutdown,
};
use conductor_directory::{DirectoryClient, ProjectRef, RegionalScenarioRef};
use conductor_protocol::{EventKind, PairKey, ProjectId, RegionalScenarioId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const DEFAULT_PAIR_CONCURRENCY: usize = 4;

/// The other side of a pair, relative to the anchor that triggered reconciliation.
pub trait Counterpart {
    type Anchor: Copy + Into<ReconcileAnchor>;

    fn pair_key(&self, anchor: Self::Anchor) -> PairKey;
}

impl Counterpart for RegionalScenarioRef {
    type Anchor = ProjectId;

    fn pair_key(&self, anchor: ProjectId) -> PairKey {
        PairKey::new(anchor, self.regional_scenario_id)
    }
}

impl Counterpart for ProjectRef {
    type Anchor = RegionalScenarioId;

    fn pair_key(&self, anchor: RegionalScenarioId) -> PairKey {
        PairKey::new(self.project_id, anchor)
    }
}

impl Counterpart for RegionalScenarioId {
    type Anchor = ProjectId;

    fn pair_key(&self, anchor: ProjectId) -> PairKey {
        PairKey::new(anchor, *self)
    }
}

impl Counterpart for ProjectId {
    type Anchor = RegionalScenarioId;

    fn pair_key(&self, anchor: RegionalScenarioId) -> PairKey {
        PairKey::new(*self, anchor)
    }
}

/// Ensures a base scenario exists for every (anchor, counterpart) pair.
///
/// Create is the only directory call made per pair; a `Conflict` answer means
/// another delivery got there first and is recorded as [`ReconciliationOutcome::AlreadyExists`].
#[derive(Clone)]
pub struct PairReconciler {
    directory: Arc<dyn DirectoryClient>,
    retry: RetryPolicy,
    concurrency: usize,
    observer: Arc<dyn ReconcileObserver>,
}

impl PairReconciler {
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        retry: RetryPolicy,
        concurrency: usize,
        observer: Arc<dyn ReconcileObserver>,
    ) -> Self {
        Self {
            directory,
            retry,
            concurrency: concurrency.max(1),
            observer,
        }
    }

    /// Reconciles all pairs of `anchor` with `counterparts`.
    ///
    /// The report holds one outcome per distinct pair, in counterpart order. Pair
    /// failures are reported, never returned as errors.
    pub async fn reconcile<C: Counterpart>(
        &self,
        anchor: C::Anchor,
        counterparts: &[C],
        shutdown: &Shutdown,
    ) -> EventReport {
        let anchor_id: ReconcileAnchor = anchor.into();
        let kind = anchor_id.kind();

        let mut seen = HashSet::new();
        let keys: Vec<PairKey> = counterparts
            .iter()
            .map(|c| c.pair_key(anchor))
            .filter(|key| seen.insert(*key))
            .collect();
        if keys.is_empty() {
            log::debug!("{anchor_id}: no counterparts, nothing to reconcile");
            return EventReport::empty(anchor_id);
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for (index, key) in keys.iter().copied().enumerate() {
            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, this.ensure_pair(kind, key, &shutdown).await)
            });
        }

        let mut slots: Vec<Option<ReconciliationOutcome>> = vec![None; keys.len()];
        let mut last_join_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(err) => {
                    log::error!("{anchor_id}: pair task failed: {err}");
                    last_join_error = Some(err.to_string());
                }
            }
        }

        let outcomes = keys
            .into_iter()
            .zip(slots)
            .map(|(key, slot)| {
                let outcome = slot.unwrap_or_else(|| {
                    let outcome = ReconciliationOutcome::Failed(FailureReason::Aborted {
                        reason: last_join_error
                            .clone()
                            .unwrap_or_else(|| "pair task produced no outcome".to_string()),
                    });
                    self.observer.on_pair_outcome(kind, key, &outcome);
                    outcome
                });
                PairOutcome { key, outcome }
            })
            .collect();

        EventReport {
            kind,
            anchor: anchor_id,
            outcomes,
        }
    }

    async fn ensure_pair(
        &self,
        kind: EventKind,
        key: PairKey,
        shutdown: &Shutdown,
    ) -> ReconciliationOutcome {
        let directory = &self.directory;
        let observer = &self.observer;

        let result = run_with_retry(
            &self.retry,
            shutdown,
            |attempt, err, delay| {
                log::warn!(
                    "create base scenario for {key} failed on attempt {attempt}: {err}; retrying in {delay:?}"
                );
                observer.on_retry(kind, attempt);
            },
            || directory.create_base_scenario(key.project_id, key.regional_scenario_id),
        )
        .await;

        let outcome = match result {
            Ok((base, attempts)) => {
                log::info!(
                    "created base scenario {} for {key} (attempts: {attempts})",
                    base.id
                );
                ReconciliationOutcome::Created {
                    base_scenario_id: base.id,
                }
            }
            Err(RetryError::Permanent { error, .. }) if error.is_conflict() => {
                log::warn!("base scenario for {key} already exists");
                ReconciliationOutcome::AlreadyExists
            }
            Err(RetryError::Permanent { error, .. }) => {
                ReconciliationOutcome::Failed(FailureReason::Rejected { error })
            }
            Err(RetryError::Exhausted { error, attempts }) => {
                ReconciliationOutcome::Failed(FailureReason::Exhausted {
                    attempts,
                    last_error: error,
                })
            }
            Err(RetryError::Cancelled { attempts, .. }) => {
                ReconciliationOutcome::Failed(FailureReason::Cancelled { attempts })
            }
        };

        if let ReconciliationOutcome::Failed(reason) = &outcome {
            log::error!("failed to ensure base scenario for {key}: {reason}");
        }
        observer.on_pair_outcome(kind, key, &outcome);
        outcome
    }
}
