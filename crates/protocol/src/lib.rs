//! # Conductor Protocol
//!
//! Identifiers and event records shared by the directory client, the reconciler
//! and the service binary.
//!
//! Events arrive as a tagged [`Envelope`] (`{"type": ..., "payload": {...}}`) and are
//! decoded into the closed [`Event`] enum. Anything that cannot be decoded is a
//! [`ContractViolation`].

mod events;
mod ids;

pub use events::{
    ContractViolation, Envelope, Event, EventKind, ProjectCreatedEvent,
    RegionalScenarioCreatedEvent,
};
pub use ids::{BaseScenarioId, PairKey, ProjectId, RegionalScenarioId, TerritoryId, UserId};
