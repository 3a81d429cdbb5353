use serde::{Deserialize, Serialize};

use crate::catalog::{self, ErrDef};

/// Failure category surfaced across the core boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Authorization refused locally; no backend call was made.
    PermissionDenied,
    /// A business-rule check failed (capacity, duplicate, incomplete training).
    PreconditionFailed,
    /// The data backend itself returned a failure.
    BackendError,
    /// A compensating action errored during an unwind.
    CompensationFailed,
    /// A subscription could not be re-established.
    ReconnectExhausted,
    /// Misuse of the core API (invalid definitions, lifecycle errors).
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn def(self) -> ErrDef {
        match self {
            Self::PermissionDenied => catalog::PERMISSION_DENIED,
            Self::PreconditionFailed => catalog::PRECONDITION_FAILED,
            Self::BackendError => catalog::BACKEND_ERROR,
            Self::CompensationFailed => catalog::COMPENSATION_FAILED,
            Self::ReconnectExhausted => catalog::RECONNECT_EXHAUSTED,
            Self::Internal => catalog::INTERNAL,
        }
    }

    #[must_use]
    pub fn code(self) -> &'static str {
        self.def().code
    }
}

/// Implemented by every component error so callers can classify it.
pub trait HasErrorKind {
    fn kind(&self) -> ErrorKind;
}
