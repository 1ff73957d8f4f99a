use conductor_directory::DirectoryError;
use conductor_protocol::UserId;
use thiserror::Error;

/// Whole-event failure of a handler. Per-pair failures never end up here; they
/// are part of the [`EventReport`](crate::EventReport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("failed to list {what} for user {user_id} after {attempts} attempt(s): {source}")]
    Enumeration {
        what: &'static str,
        user_id: UserId,
        attempts: u32,
        #[source]
        source: DirectoryError,
    },

    #[error("listing {what} interrupted by shutdown after {attempts} attempt(s)")]
    Cancelled { what: &'static str, attempts: u32 },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("event source failed: {0}")]
    Source(String),
}
