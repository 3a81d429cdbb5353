//! Layered core configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional YAML
//! file, then `ROLLCALL__*` environment variables where `__` separates
//! nesting levels (`ROLLCALL__REALTIME__BASE_DELAY=500ms`).

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use rollcall_realtime::RealtimeConfig;
use rollcall_security::AccessMatrix;
use rollcall_workflow::{BatchConfig, WorkflowConfig};

use crate::error::IntegrationError;

pub const ENV_PREFIX: &str = "ROLLCALL__";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
        }
    }
}

/// Everything the core needs at startup. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub logging: LoggingConfig,
    pub batch: BatchConfig,
    pub realtime: RealtimeConfig,
    pub workflow: WorkflowConfig,
    /// Replaces the built-in access table when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessMatrix>,
}

impl CoreConfig {
    /// Load defaults, then `path` (if any), then the environment.
    ///
    /// # Errors
    /// Returns [`IntegrationError::Config`] when a source cannot be parsed
    /// and [`IntegrationError::InvalidConfig`] when values are out of range.
    pub fn load(path: Option<&Path>) -> Result<Self, IntegrationError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        Self::from_figment(&figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate from an already-assembled figment.
    ///
    /// # Errors
    /// See [`Self::load`].
    pub fn from_figment(figment: &Figment) -> Result<Self, IntegrationError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`IntegrationError::InvalidConfig`] naming the first bad value.
    pub fn validate(&self) -> Result<(), IntegrationError> {
        let invalid = |msg: &str| Err(IntegrationError::InvalidConfig(msg.to_owned()));
        if self.batch.chunk_size == 0 {
            return invalid("batch.chunk_size must be at least 1");
        }
        if self.realtime.base_delay > self.realtime.max_delay {
            return invalid("realtime.base_delay must not exceed realtime.max_delay");
        }
        if self.realtime.max_reconnect_attempts == 0 {
            return invalid("realtime.max_reconnect_attempts must be at least 1");
        }
        if self.workflow.verification_code_length == 0 {
            return invalid("workflow.verification_code_length must be at least 1");
        }
        if self.workflow.verification_code_attempts == 0 {
            return invalid("workflow.verification_code_attempts must be at least 1");
        }
        Ok(())
    }

    /// The access table in effect.
    #[must_use]
    pub fn access_matrix(&self) -> AccessMatrix {
        self.access.clone().unwrap_or_default()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        CoreConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut cfg = CoreConfig::default();
        cfg.realtime.max_reconnect_attempts = 0;
        assert!(matches!(
            cfg.validate(),
            Err(IntegrationError::InvalidConfig(msg)) if msg.contains("max_reconnect_attempts")
        ));
    }

    #[test]
    fn base_above_cap_rejected() {
        let mut cfg = CoreConfig::default();
        cfg.realtime.base_delay = cfg.realtime.max_delay * 2;
        assert!(cfg.validate().is_err());
    }
}
