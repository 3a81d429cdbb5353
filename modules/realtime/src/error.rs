use uuid::Uuid;

use rollcall_errors::{ErrorKind, HasErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeError {
    /// The subscription was dropped after too many consecutive failures.
    #[error("subscription {id} gave up after {attempts} reconnect attempts: {last_error}")]
    ReconnectExhausted {
        id: Uuid,
        attempts: u32,
        last_error: String,
    },

    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("subscription manager is shut down")]
    ShutDown,
}

impl HasErrorKind for RealtimeError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::ReconnectExhausted { .. } => ErrorKind::ReconnectExhausted,
            Self::InvalidSubscription(_) | Self::ShutDown => ErrorKind::Internal,
        }
    }
}
