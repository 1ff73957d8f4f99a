use conductor_protocol::{
    BaseScenarioId, PairKey, ProjectId, RegionalScenarioId, TerritoryId, UserId,
};
use serde::{Deserialize, Serialize};

/// Project as seen when enumerating counterparts of a regional scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub territory_id: TerritoryId,
    #[serde(default)]
    pub name: String,
}

/// Regional scenario as seen when enumerating counterparts of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionalScenarioRef {
    pub regional_scenario_id: RegionalScenarioId,
    pub user_id: UserId,
    pub territory_id: TerritoryId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_based: bool,
}

/// Result of a successful create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseScenario {
    pub id: BaseScenarioId,
    pub key: PairKey,
}

// Wire models of the directory HTTP API. Only the fields the conductor reads are declared.

#[derive(Debug, Deserialize)]
pub(crate) struct ShortTerritory {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ShortProject {
    pub user_id: String,
    pub region: ShortTerritory,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScenarioModel {
    pub scenario_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_based: bool,
    pub project: ShortProject,
}

impl From<ScenarioModel> for RegionalScenarioRef {
    fn from(model: ScenarioModel) -> Self {
        Self {
            regional_scenario_id: RegionalScenarioId(model.scenario_id),
            user_id: UserId::new(model.project.user_id),
            territory_id: TerritoryId(model.project.region.id),
            name: model.name,
            is_based: model.is_based,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectModel {
    pub project_id: i64,
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    pub territory: ShortTerritory,
}

impl From<ProjectModel> for ProjectRef {
    fn from(model: ProjectModel) -> Self {
        Self {
            project_id: ProjectId(model.project_id),
            user_id: UserId::new(model.user_id),
            territory_id: TerritoryId(model.territory.id),
            name: model.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Paginated<T> {
    #[serde(default)]
    pub next: Option<String>,
    pub results: Vec<T>,
}
