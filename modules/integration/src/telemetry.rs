//! Process-wide `tracing` subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::IntegrationError;

/// Install the global subscriber. `RUST_LOG` wins over `config.level`.
///
/// # Errors
/// Returns [`IntegrationError::Logging`] for an unparsable level or when a
/// global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), IntegrationError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| IntegrationError::Logging(format!("bad level '{}': {e}", config.level)))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .try_init(),
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| IntegrationError::Logging(e.to_string()))
}

/// Map `-v` repetitions onto a level, falling back to the configured one.
#[must_use]
pub fn level_for_verbosity(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_owned(),
        1 => "info".to_owned(),
        2 => "debug".to_owned(),
        _ => "trace".to_owned(),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn verbosity_overrides_configured_level() {
        assert_eq!(level_for_verbosity(0, "warn"), "warn");
        assert_eq!(level_for_verbosity(2, "warn"), "debug");
        assert_eq!(level_for_verbosity(9, "warn"), "trace");
    }
}
