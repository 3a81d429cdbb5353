//! Startup, shutdown and health reporting for the Rollcall core.
//!
//! [`init`] builds the core once per process from a [`CoreConfig`] and a
//! data backend; [`get`] hands it out; [`shutdown`] rolls back running
//! transactions and drops every subscription.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod telemetry;

pub use config::{CoreConfig, LogFormat, LoggingConfig};
pub use error::IntegrationError;
pub use health::{ComponentHealth, HealthReport, HealthStatus};
pub use manager::{IntegrationManager, ShutdownSummary, get, init, require, shutdown};
pub use telemetry::init_logging;
