use crate::{
    BaseScenario, DirectoryClient, DirectoryError, ProjectRef, RegionalScenarioRef, Result,
};
use async_trait::async_trait;
use conductor_protocol::{
    BaseScenarioId, PairKey, ProjectId, RegionalScenarioId, TerritoryId, UserId,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Fault {
    error: DirectoryError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

impl Fault {
    fn fire(&mut self) -> Option<DirectoryError> {
        match &mut self.remaining {
            None => Some(self.error.clone()),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(self.error.clone())
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    projects: Vec<ProjectRef>,
    scenarios: Vec<RegionalScenarioRef>,
    base_scenarios: HashMap<PairKey, BaseScenarioId>,
    next_base_id: i64,
    create_calls: Vec<PairKey>,
    list_calls: usize,
    create_faults: HashMap<PairKey, Fault>,
    list_fault: Option<Fault>,
}

/// In-process registry with the same uniqueness guarantee as the real service:
/// a second create for the same pair fails with `Conflict`.
///
/// Faults can be injected per pair or for enumerations.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call, for exercising call timeouts.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn add_project(&self, project: ProjectRef) {
        self.state().projects.push(project);
    }

    pub fn add_regional_scenario(&self, scenario: RegionalScenarioRef) {
        self.state().scenarios.push(scenario);
    }

    /// Marks a pair as already existing, as if another worker created it.
    pub fn insert_base_scenario(&self, key: PairKey) -> BaseScenarioId {
        let mut state = self.state();
        insert_new(&mut state, key)
    }

    /// Every create for `key` fails with `error`.
    pub fn fail_create(&self, key: PairKey, error: DirectoryError) {
        self.state().create_faults.insert(
            key,
            Fault {
                error,
                remaining: None,
            },
        );
    }

    /// The next `times` creates for `key` fail with `error`, later ones go through.
    pub fn fail_create_times(&self, key: PairKey, error: DirectoryError, times: u32) {
        self.state().create_faults.insert(
            key,
            Fault {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Enumerations fail with `error`, forever when `times` is `None`.
    pub fn fail_listing(&self, error: DirectoryError, times: Option<u32>) {
        self.state().list_fault = Some(Fault {
            error,
            remaining: times,
        });
    }

    /// Create calls in the order they were received, including failed ones.
    #[must_use]
    pub fn create_calls(&self) -> Vec<PairKey> {
        self.state().create_calls.clone()
    }

    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    /// Existing base scenarios, sorted by key.
    #[must_use]
    pub fn base_scenarios(&self) -> Vec<PairKey> {
        let mut keys: Vec<_> = self.state().base_scenarios.keys().copied().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn base_scenario(&self, key: PairKey) -> Option<BaseScenarioId> {
        self.state().base_scenarios.get(&key).copied()
    }

    fn begin_listing(&self) -> Result<MutexGuard<'_, MemoryState>> {
        let mut state = self.state();
        state.list_calls += 1;
        if let Some(err) = state.list_fault.as_mut().and_then(Fault::fire) {
            return Err(err);
        }
        Ok(state)
    }
}

fn insert_new(state: &mut MemoryState, key: PairKey) -> BaseScenarioId {
    state.next_base_id += 1;
    let id = BaseScenarioId(state.next_base_id);
    state.base_scenarios.insert(key, id);
    id
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn list_regional_scenarios_for_user(
        &self,
        user_id: &UserId,
        territory_id: TerritoryId,
    ) -> Result<Vec<RegionalScenarioRef>> {
        self.simulate_latency().await;
        let state = self.begin_listing()?;
        Ok(state
            .scenarios
            .iter()
            .filter(|s| &s.user_id == user_id && s.territory_id == territory_id && !s.is_based)
            .cloned()
            .collect())
    }

    async fn list_projects_for_user_in_territory(
        &self,
        user_id: &UserId,
        territory_id: TerritoryId,
    ) -> Result<Vec<ProjectRef>> {
        self.simulate_latency().await;
        let state = self.begin_listing()?;
        Ok(state
            .projects
            .iter()
            .filter(|p| &p.user_id == user_id && p.territory_id == territory_id)
            .cloned()
            .collect())
    }

    async fn create_base_scenario(
        &self,
        project_id: ProjectId,
        regional_scenario_id: RegionalScenarioId,
    ) -> Result<BaseScenario> {
        self.simulate_latency().await;
        let key = PairKey::new(project_id, regional_scenario_id);
        let mut state = self.state();
        state.create_calls.push(key);

        if let Some(err) = state.create_faults.get_mut(&key).and_then(Fault::fire) {
            return Err(err);
        }
        if state.base_scenarios.contains_key(&key) {
            return Err(DirectoryError::Conflict(format!(
                "base scenario for {key} already exists"
            )));
        }
        let id = insert_new(&mut state, key);
        Ok(BaseScenario { id, key })
    }
}
