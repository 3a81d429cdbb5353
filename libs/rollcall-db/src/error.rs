use rollcall_errors::{ErrorKind, HasErrorKind};
use uuid::Uuid;

/// Failure reported by the data backend itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be reached or dropped the connection.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("{table} row not found: {id}")]
    NotFound { table: String, id: Uuid },

    /// A write conflicted with existing data (e.g. duplicate primary key).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("backend internal error: {0}")]
    Internal(String),
}

impl HasErrorKind for BackendError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::BackendError
    }
}
