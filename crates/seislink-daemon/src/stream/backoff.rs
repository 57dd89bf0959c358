//! Two-tier respawn policy.

use std::time::Duration;

use seislink_core::config::SupervisorConfig;

use super::entry::StreamStatus;

/// Respawn policy for a supervised streamer.
///
/// Up to `window` consecutive failures the endpoint is `Connecting` and
/// respawns after `short_delay`; beyond that it is `Error` and respawns after
/// `long_delay`. Retries never stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub window: u32,
    pub short_delay: Duration,
    pub long_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            window: 3,
            short_delay: Duration::from_secs(30),
            long_delay: Duration::from_secs(120),
        }
    }
}

impl From<&SupervisorConfig> for RetryPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            window: config.retry_window,
            short_delay: Duration::from_secs(config.short_backoff_secs),
            long_delay: Duration::from_secs(config.long_backoff_secs),
        }
    }
}

impl RetryPolicy {
    /// Status after `retry_count` consecutive failures, shown until the
    /// next spawn.
    pub const fn status_for(&self, retry_count: u32) -> StreamStatus {
        if retry_count <= self.window {
            StreamStatus::Connecting
        } else {
            StreamStatus::Error
        }
    }

    /// Delay before the next spawn after `retry_count` consecutive failures.
    pub const fn delay_for(&self, retry_count: u32) -> Duration {
        if retry_count <= self.window {
            self.short_delay
        } else {
            self.long_delay
        }
    }
}
