use rollcall_errors::{ErrorKind, HasErrorKind};
use rollcall_security::AccessDenied;

use crate::error::BackendError;

/// Errors that can occur during scoped query execution.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// Refused locally; no backend call was made.
    #[error(transparent)]
    Denied(#[from] AccessDenied),

    /// The record being written lies outside the caller's scope.
    #[error("record outside caller scope on '{table}'")]
    OutOfScope { table: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl HasErrorKind for ScopeError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Denied(_) | Self::OutOfScope { .. } => ErrorKind::PermissionDenied,
            Self::Backend(_) => ErrorKind::BackendError,
        }
    }
}
