use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reconnection policy for change subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RealtimeConfig {
    /// Delay before the first reconnect attempt (default: 1s).
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound for any single backoff delay (default: 30s).
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Consecutive failed reconnects before a subscription is dropped.
    pub max_reconnect_attempts: u32,

    /// Upper bound of the random delay spread over a full reconnect sweep.
    #[serde(with = "humantime_serde")]
    pub reconnect_jitter: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            reconnect_jitter: Duration::from_secs(1),
        }
    }
}

impl RealtimeConfig {
    /// Millisecond delays and no jitter, for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            max_reconnect_attempts: 3,
            reconnect_jitter: Duration::ZERO,
        }
    }
}
