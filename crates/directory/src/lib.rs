//! # Conductor Directory
//!
//! Client side of the external entity registry that owns projects, regional
//! scenarios and base scenarios.
//!
//! - [`DirectoryClient`]: the contract the reconciler depends on
//! - [`HttpDirectoryClient`]: REST implementation over a shared `reqwest` pool
//! - [`MemoryDirectory`]: in-process registry with fault injection
//!
//! Errors are tagged ([`DirectoryError`]) so callers can tell a conflict from a
//! transient outage from a permanent rejection.

mod client;
mod error;
mod http;
mod memory;
mod models;

pub use client::DirectoryClient;
pub use error::{DirectoryError, Result};
pub use http::{HttpDirectoryClient, HttpDirectoryConfig};
pub use memory::MemoryDirectory;
pub use models::{BaseScenario, ProjectRef, RegionalScenarioRef};
