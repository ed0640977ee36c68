//! Presence engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Timings and thresholds for the presence engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Delay after a transport connect before writing presence, in milliseconds.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// Delay after a transport drop before scheduling a reconnect retry, in milliseconds.
    #[serde(default = "default_disconnect_retry_delay")]
    pub disconnect_retry_delay_ms: u64,
    /// Heartbeat period in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Per-heartbeat write timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,
    /// Quiet period for foreground/background debouncing, in milliseconds.
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
    /// Presence cache TTL in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    /// Maximum number of cached presence records.
    #[serde(default = "default_cache_capacity")]
    pub cache_max_capacity: u64,
    /// Per-call timeout for presence reads, in milliseconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Per-call timeout for presence writes, in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
    /// Device description stored on each connection session.
    #[serde(default = "default_device_info")]
    pub device_info: String,
    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Online evaluation thresholds.
    #[serde(default)]
    pub staleness: StalenessConfig,
}

/// Bounded linear-backoff retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per retry round.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay in milliseconds; attempt `n` waits `base * n`.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Pause after an exhausted connection retry round, in seconds.
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
}

/// Windows after which presumed-online data is demoted to offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalenessConfig {
    /// Maximum age of `last_seen` for a user to count as online, in seconds.
    #[serde(default = "default_online_window")]
    pub online_window_seconds: u64,
    /// Maximum age of `heartbeat` (when present), in seconds.
    #[serde(default = "default_heartbeat_window")]
    pub heartbeat_window_seconds: u64,
}

impl PresenceConfig {
    /// Settle delay as a [`Duration`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Disconnect retry delay as a [`Duration`].
    pub fn disconnect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.disconnect_retry_delay_ms)
    }

    /// Heartbeat period as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// Heartbeat write timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Debounce quiet period as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Cache TTL as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.heartbeat_interval_seconds == 0 {
            return Err(AppError::configuration(
                "presence.heartbeat_interval_seconds must be greater than zero",
            ));
        }
        if self.cache_ttl_seconds == 0 {
            return Err(AppError::configuration(
                "presence.cache_ttl_seconds must be greater than zero",
            ));
        }
        if self.read_timeout_ms == 0 || self.write_timeout_ms == 0 || self.heartbeat_timeout_ms == 0
        {
            return Err(AppError::configuration(
                "presence timeouts must be greater than zero",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::configuration(
                "presence.retry.max_attempts must be at least 1",
            ));
        }
        if self.staleness.heartbeat_window_seconds > self.staleness.online_window_seconds {
            return Err(AppError::configuration(format!(
                "presence.staleness.heartbeat_window_seconds ({}) exceeds online_window_seconds ({})",
                self.staleness.heartbeat_window_seconds, self.staleness.online_window_seconds
            )));
        }
        Ok(())
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay(),
            disconnect_retry_delay_ms: default_disconnect_retry_delay(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            debounce_ms: default_debounce(),
            cache_ttl_seconds: default_cache_ttl(),
            cache_max_capacity: default_cache_capacity(),
            read_timeout_ms: default_read_timeout(),
            write_timeout_ms: default_write_timeout(),
            device_info: default_device_info(),
            retry: RetryConfig::default(),
            staleness: StalenessConfig::default(),
        }
    }
}

impl RetryConfig {
    /// Base delay as a [`Duration`].
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Cooldown as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            cooldown_seconds: default_cooldown(),
        }
    }
}

impl StalenessConfig {
    /// Online window as a chrono duration.
    pub fn online_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.online_window_seconds as i64)
    }

    /// Heartbeat window as a chrono duration.
    pub fn heartbeat_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_window_seconds as i64)
    }
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            online_window_seconds: default_online_window(),
            heartbeat_window_seconds: default_heartbeat_window(),
        }
    }
}

fn default_settle_delay() -> u64 {
    1000
}

fn default_disconnect_retry_delay() -> u64 {
    2000
}

fn default_heartbeat_interval() -> u64 {
    45
}

fn default_heartbeat_timeout() -> u64 {
    6000
}

fn default_debounce() -> u64 {
    2500
}

fn default_cache_ttl() -> u64 {
    45
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_read_timeout() -> u64 {
    2500
}

fn default_write_timeout() -> u64 {
    5000
}

fn default_device_info() -> String {
    "unknown-device".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_cooldown() -> u64 {
    60
}

fn default_online_window() -> u64 {
    120
}

fn default_heartbeat_window() -> u64 {
    60
}
