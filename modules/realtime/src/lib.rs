//! Realtime change subscriptions.
//!
//! A [`SubscriptionManager`] keeps a registry of change-stream subscriptions.
//! Each one sees only the rows its caller may observe: a role-derived
//! field-equality filter is pushed to backends that can filter server-side,
//! and [`should_deliver`] gates every event client-side regardless. Payloads
//! are enriched with derived fields before the callback runs, and lost
//! channels are re-established with capped exponential backoff.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod backoff;
pub mod config;
pub mod enrich;
pub mod error;
pub mod filter;
pub mod manager;

pub use backoff::{backoff_delay, jitter};
pub use config::RealtimeConfig;
pub use enrich::PayloadEnricher;
pub use error::RealtimeError;
pub use filter::{server_filter_for, should_deliver};
pub use manager::{
    ChangeCallback, ErrorCallback, LinkStatus, RealtimeStats, SubscriptionConfig,
    SubscriptionManager, SubscriptionSnapshot,
};
