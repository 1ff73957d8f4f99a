use thiserror::Error;

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Failure of a directory call, tagged by how the caller should react to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Timeout, refused connection, 5xx or 429. Worth retrying.
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// The base scenario for the requested pair already exists.
    #[error("already exists: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error("invalid directory configuration: {0}")]
    Configuration(String),
}

impl DirectoryError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, DirectoryError::Unavailable(_))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, DirectoryError::Conflict(_))
    }
}
