use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a project in the directory.
    ProjectId
);
numeric_id!(
    /// Identifier of a regional scenario (a scenario of a regional project).
    RegionalScenarioId
);
numeric_id!(
    /// Identifier of a territory.
    TerritoryId
);
numeric_id!(
    /// Identifier the directory assigns to a newly created base scenario.
    BaseScenarioId
);

/// Owner of projects and scenarios. The directory identifies users by login (usually e-mail).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Natural key of a base scenario: at most one exists per (project, regional scenario).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub project_id: ProjectId,
    pub regional_scenario_id: RegionalScenarioId,
}

impl PairKey {
    #[must_use]
    pub const fn new(project_id: ProjectId, regional_scenario_id: RegionalScenarioId) -> Self {
        Self {
            project_id,
            regional_scenario_id,
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}/R{}", self.project_id, self.regional_scenario_id)
    }
}
