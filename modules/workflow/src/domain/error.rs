use uuid::Uuid;

use rollcall_db::{BackendError, BatchError, ScopeError};
use rollcall_errors::{ErrorKind, HasErrorKind};
use rollcall_security::AccessDenied;

/// Failure of a single step's `execute` or `compensate`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// Business-rule check failed (capacity, duplicate, incomplete training).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error(transparent)]
    PermissionDenied(#[from] AccessDenied),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The step body panicked; the unwind treats it like any other failure.
    #[error("step panicked: {0}")]
    Panicked(String),
}

impl StepError {
    #[must_use]
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::PreconditionFailed(reason.into())
    }
}

impl From<ScopeError> for StepError {
    fn from(err: ScopeError) -> Self {
        match err {
            ScopeError::Denied(denied) => Self::PermissionDenied(denied),
            ScopeError::OutOfScope { table } => {
                Self::PreconditionFailed(format!("record outside caller scope on '{table}'"))
            }
            ScopeError::Backend(e) => Self::Backend(e),
        }
    }
}

impl HasErrorKind for StepError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Backend(_) => ErrorKind::BackendError,
            Self::Panicked(_) => ErrorKind::Internal,
        }
    }
}

/// Refusal to run, or misuse of the orchestrator API.
///
/// Once a transaction has started its outcome is always reported through a
/// `TransactionResult`, never through this type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    PermissionDenied(#[from] AccessDenied),

    #[error("invalid transaction definition: {0}")]
    InvalidDefinition(String),

    #[error("transaction {0} is not active")]
    UnknownTransaction(Uuid),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HasErrorKind for WorkflowError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Batch(e) => e.kind(),
            Self::InvalidDefinition(_) | Self::UnknownTransaction(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}
