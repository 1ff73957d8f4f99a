use crate::reconcile::{PairReconciler, DEFAULT_PAIR_CONCURRENCY};
use crate::retry::{run_with_retry, RetryError, RetryPolicy};
use crate::{EventReport, HandlerError, ReconcileObserver, Shutdown};
use conductor_directory::{DirectoryClient, DirectoryError, Result as DirectoryResult};
use conductor_protocol::{
    Event, EventKind, ProjectCreatedEvent, RegionalScenarioCreatedEvent, UserId,
};
use std::future::Future;
use std::sync::Arc;

/// Tuning shared by enumeration and pair creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub retry: RetryPolicy,
    pub pair_concurrency: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            pair_concurrency: DEFAULT_PAIR_CONCURRENCY,
        }
    }
}

/// Turns creation events into pair reconciliation.
pub struct BaseScenarioService {
    directory: Arc<dyn DirectoryClient>,
    reconciler: PairReconciler,
    retry: RetryPolicy,
    observer: Arc<dyn ReconcileObserver>,
}

impl BaseScenarioService {
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        settings: ReconcileSettings,
        observer: Arc<dyn ReconcileObserver>,
    ) -> Self {
        let reconciler = PairReconciler::new(
            Arc::clone(&directory),
            settings.retry.clone(),
            settings.pair_concurrency,
            Arc::clone(&observer),
        );
        Self {
            directory,
            reconciler,
            retry: settings.retry,
            observer,
        }
    }

    #[must_use]
    pub fn observer(&self) -> &Arc<dyn ReconcileObserver> {
        &self.observer
    }

    pub async fn handle(&self, event: &Event, shutdown: &Shutdown) -> Result<EventReport, HandlerError> {
        match event {
            Event::ProjectCreated(event) => self.handle_project_created(event, shutdown).await,
            Event::RegionalScenarioCreated(event) => {
                self.handle_regional_scenario_created(event, shutdown).await
            }
        }
    }

    /// Pairs a new project with every regional scenario of its owner.
    pub async fn handle_project_created(
        &self,
        event: &ProjectCreatedEvent,
        shutdown: &Shutdown,
    ) -> Result<EventReport, HandlerError> {
        let user_id = &event.user_id;
        let territory_id = event.territory_id;
        let scenarios = self
            .enumerate(
                EventKind::ProjectCreated,
                "regional scenarios",
                user_id,
                shutdown,
                || {
                    self.directory
                        .list_regional_scenarios_for_user(user_id, territory_id)
                },
            )
            .await?;

        let scenarios: Vec<_> = scenarios
            .into_iter()
            .filter(|s| &s.user_id == user_id && s.territory_id == territory_id && !s.is_based)
            .collect();
        log::info!(
            "project {} of user {user_id}: {} regional scenario(s) to pair",
            event.project_id,
            scenarios.len()
        );

        Ok(self
            .reconciler
            .reconcile(event.project_id, &scenarios, shutdown)
            .await)
    }

    /// Pairs a new regional scenario with every project of its owner in the same territory.
    pub async fn handle_regional_scenario_created(
        &self,
        event: &RegionalScenarioCreatedEvent,
        shutdown: &Shutdown,
    ) -> Result<EventReport, HandlerError> {
        let user_id = &event.user_id;
        let territory_id = event.territory_id;
        let projects = self
            .enumerate(
                EventKind::RegionalScenarioCreated,
                "projects",
                user_id,
                shutdown,
                || {
                    self.directory
                        .list_projects_for_user_in_territory(user_id, territory_id)
                },
            )
            .await?;

        let projects: Vec<_> = projects
            .into_iter()
            .filter(|p| &p.user_id == user_id && p.territory_id == territory_id)
            .collect();
        log::info!(
            "regional scenario {} of user {user_id}: {} project(s) in territory {territory_id} to pair",
            event.regional_scenario_id,
            projects.len()
        );

        Ok(self
            .reconciler
            .reconcile(event.regional_scenario_id, &projects, shutdown)
            .await)
    }

    /// Lists counterparts with retry. An unknown user or territory is an empty set.
    async fn enumerate<T, F, Fut>(
        &self,
        kind: EventKind,
        what: &'static str,
        user_id: &UserId,
        shutdown: &Shutdown,
        call: F,
    ) -> Result<Vec<T>, HandlerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DirectoryResult<Vec<T>>>,
    {
        let observer = &self.observer;
        let result = run_with_retry(
            &self.retry,
            shutdown,
            |attempt, err, delay| {
                log::warn!(
                    "listing {what} for user {user_id} failed on attempt {attempt}: {err}; retrying in {delay:?}"
                );
                observer.on_retry(kind, attempt);
            },
            call,
        )
        .await;

        match result {
            Ok((items, _)) => Ok(items),
            Err(RetryError::Permanent {
                error: DirectoryError::NotFound(message),
                ..
            }) => {
                log::warn!("no {what} found for user {user_id}: {message}");
                Ok(Vec::new())
            }
            Err(RetryError::Cancelled { attempts, .. }) => {
                Err(HandlerError::Cancelled { what, attempts })
            }
            Err(RetryError::Permanent { error, attempts })
            | Err(RetryError::Exhausted { error, attempts }) => Err(HandlerError::Enumeration {
                what,
                user_id: user_id.clone(),
                attempts,
                source: error,
            }),
        }
    }
}
