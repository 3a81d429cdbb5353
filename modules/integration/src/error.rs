use rollcall_errors::{ErrorKind, HasErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    #[error("failed to load configuration: {0}")]
    Config(#[source] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("core is already initialized")]
    AlreadyInitialized,

    #[error("core is not initialized")]
    NotInitialized,
}

impl From<figment::Error> for IntegrationError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl HasErrorKind for IntegrationError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_)
            | Self::InvalidConfig(_)
            | Self::Logging(_)
            | Self::AlreadyInitialized
            | Self::NotInitialized => ErrorKind::Internal,
        }
    }
}
