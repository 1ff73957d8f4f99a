use crate::ids::{ProjectId, RegionalScenarioId, TerritoryId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Closed set of event types the conductor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProjectCreated,
    RegionalScenarioCreated,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::ProjectCreated, EventKind::RegionalScenarioCreated];

    /// Type tag carried by envelopes on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::ProjectCreated => "ProjectCreated",
            EventKind::RegionalScenarioCreated => "RegionalScenarioCreated",
        }
    }

    /// Snake-case name used for metric families and log fields.
    #[must_use]
    pub const fn metric_prefix(self) -> &'static str {
        match self {
            EventKind::ProjectCreated => "project_created",
            EventKind::RegionalScenarioCreated => "regional_scenario_created",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCreatedEvent {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub territory_id: TerritoryId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionalScenarioCreatedEvent {
    #[serde(alias = "scenario_id")]
    pub regional_scenario_id: RegionalScenarioId,
    pub user_id: UserId,
    pub territory_id: TerritoryId,
}

/// A decoded, strongly typed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ProjectCreated(ProjectCreatedEvent),
    RegionalScenarioCreated(RegionalScenarioCreatedEvent),
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ProjectCreated(_) => EventKind::ProjectCreated,
            Event::RegionalScenarioCreated(_) => EventKind::RegionalScenarioCreated,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        match self {
            Event::ProjectCreated(event) => &event.user_id,
            Event::RegionalScenarioCreated(event) => &event.user_id,
        }
    }

    /// Decodes a payload whose kind has already been resolved from the envelope tag.
    ///
    /// Unknown payload fields are ignored; missing or mistyped required fields and an
    /// empty `user_id` are contract violations.
    pub fn decode(kind: EventKind, payload: &Value) -> Result<Self, ContractViolation> {
        let invalid = |reason: String| ContractViolation::InvalidPayload { kind, reason };

        let event = match kind {
            EventKind::ProjectCreated => {
                let event: ProjectCreatedEvent = serde_json::from_value(payload.clone())
                    .map_err(|err| invalid(err.to_string()))?;
                Event::ProjectCreated(event)
            }
            EventKind::RegionalScenarioCreated => {
                let event: RegionalScenarioCreatedEvent = serde_json::from_value(payload.clone())
                    .map_err(|err| invalid(err.to_string()))?;
                Event::RegionalScenarioCreated(event)
            }
        };

        if event.user_id().as_str().trim().is_empty() {
            return Err(invalid("user_id must not be empty".to_string()));
        }
        Ok(event)
    }
}

impl From<ProjectCreatedEvent> for Event {
    fn from(event: ProjectCreatedEvent) -> Self {
        Event::ProjectCreated(event)
    }
}

impl From<RegionalScenarioCreatedEvent> for Event {
    fn from(event: RegionalScenarioCreatedEvent) -> Self {
        Event::RegionalScenarioCreated(event)
    }
}

/// Tagged event as produced by the transport's decode step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

impl From<&Event> for Envelope {
    fn from(event: &Event) -> Self {
        let payload = match event {
            Event::ProjectCreated(inner) => serde_json::to_value(inner),
            Event::RegionalScenarioCreated(inner) => serde_json::to_value(inner),
        };
        // Both records are plain structs of ids; serialization cannot fail.
        Envelope::new(event.kind().as_str(), payload.unwrap_or(Value::Null))
    }
}

/// A message that can never be processed: wrong type tag or malformed payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("unknown event type: {event_type:?}")]
    UnknownEventType { event_type: String },

    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: EventKind, reason: String },
}
