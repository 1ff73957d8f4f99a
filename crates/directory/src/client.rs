use crate::{BaseScenario, ProjectRef, RegionalScenarioRef, Result};
use async_trait::async_trait;
use conductor_protocol::{ProjectId, RegionalScenarioId, TerritoryId, UserId};
use std::sync::Arc;

/// Queries against the external entity registry.
///
/// List operations return unordered sets. `create_base_scenario` is the only
/// idempotency boundary: it fails with [`DirectoryError::Conflict`](crate::DirectoryError::Conflict)
/// when the pair already exists, and implementations must not try to pre-check existence.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Unbased regional scenarios owned by `user_id` whose region is `territory_id`.
    async fn list_regional_scenarios_for_user(
        &self,
        user_id: &UserId,
        territory_id: TerritoryId,
    ) -> Result<Vec<RegionalScenarioRef>>;

    async fn list_projects_for_user_in_territory(
        &self,
        user_id: &UserId,
        territory_id: TerritoryId,
    ) -> Result<Vec<ProjectRef>>;

    async fn create_base_scenario(
        &self,
        project_id: ProjectId,
        regional_scenario_id: RegionalScenarioId,
    ) -> Result<BaseScenario>;
}

#[async_trait]
impl<T: DirectoryClient + ?Sized> DirectoryClient for Arc<T> {
    async fn list_regional_scenarios_for_user(
        &self,
        user_id: &UserId,
        territory_id: TerritoryId,
    ) -> Result<Vec<RegionalScenarioRef>> {
        (**self)
            .list_regional_scenarios_for_user(user_id, territory_id)
            .await
    }

    async fn list_projects_for_user_in_territory(
        &self,
        user_id: &UserId,
        territory_id: TerritoryId,
    ) -> Result<Vec<ProjectRef>> {
        (**self)
            .list_projects_for_user_in_territory(user_id, territory_id)
            .await
    }

    async fn create_base_scenario(
        &self,
        project_id: ProjectId,
        regional_scenario_id: RegionalScenarioId,
    ) -> Result<BaseScenario> {
        (**self)
            .create_base_scenario(project_id, regional_scenario_id)
            .await
    }
}
