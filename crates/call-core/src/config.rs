//! Engine configuration
//!
//! ```rust
//! use homeops_call_core::CallConfig;
//! use std::time::Duration;
//!
//! let config = CallConfig::new()
//!     .with_ring_timeout(Duration::from_secs(20))
//!     .with_connect_timeout(Duration::from_secs(10));
//!
//! assert_eq!(config.ring_timeout(), Duration::from_secs(20));
//! // Dial timeout follows the ring timeout unless set on its own
//! assert_eq!(config.dial_timeout(), Duration::from_secs(20));
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CallError, CallResult};

pub const DEFAULT_RING_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

const ENV_RING_TIMEOUT: &str = "HOMEOPS_CALL_RING_TIMEOUT_MS";
const ENV_DIAL_TIMEOUT: &str = "HOMEOPS_CALL_DIAL_TIMEOUT_MS";
const ENV_CONNECT_TIMEOUT: &str = "HOMEOPS_CALL_CONNECT_TIMEOUT_MS";
const ENV_TICK_INTERVAL: &str = "HOMEOPS_CALL_TICK_INTERVAL_MS";

/// Timing and buffering settings for a call engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// How long an incoming call rings before it is marked missed
    pub ring_timeout_ms: u64,
    /// How long an outgoing call waits for an answer. `None` means the
    /// same as `ring_timeout_ms`, keeping both sides symmetric.
    pub dial_timeout_ms: Option<u64>,
    /// How long `connecting` may wait for media join plus remote presence
    pub connect_timeout_ms: u64,
    /// Period of the connected-duration counter
    pub tick_interval_ms: u64,
    /// Buffer size of the notification broadcast channel
    pub notification_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout_ms: DEFAULT_RING_TIMEOUT_MS,
            dial_timeout_ms: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            notification_capacity: 64,
        }
    }
}

impl CallConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout_ms = millis(timeout);
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout_ms = Some(millis(timeout));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = millis(timeout);
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = millis(interval);
        self
    }

    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_millis(self.ring_timeout_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms.unwrap_or(self.ring_timeout_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> CallResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CallError::invalid_config("json", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `HOMEOPS_CALL_*` environment variables
    pub fn from_env() -> CallResult<Self> {
        let mut config = Self::default();
        if let Some(ms) = env_millis(ENV_RING_TIMEOUT)? {
            config.ring_timeout_ms = ms;
        }
        if let Some(ms) = env_millis(ENV_DIAL_TIMEOUT)? {
            config.dial_timeout_ms = Some(ms);
        }
        if let Some(ms) = env_millis(ENV_CONNECT_TIMEOUT)? {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_millis(ENV_TICK_INTERVAL)? {
            config.tick_interval_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CallResult<()> {
        if self.ring_timeout_ms == 0 {
            return Err(CallError::invalid_config("ring_timeout_ms", "must be greater than zero"));
        }
        if self.dial_timeout_ms == Some(0) {
            return Err(CallError::invalid_config("dial_timeout_ms", "must be greater than zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(CallError::invalid_config("connect_timeout_ms", "must be greater than zero"));
        }
        if self.tick_interval_ms == 0 {
            return Err(CallError::invalid_config("tick_interval_ms", "must be greater than zero"));
        }
        if self.notification_capacity == 0 {
            return Err(CallError::invalid_config("notification_capacity", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn env_millis(name: &str) -> CallResult<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| CallError::invalid_config(name, format!("'{}': {}", raw, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_symmetric() {
        let config = CallConfig::default();
        assert_eq!(config.ring_timeout(), config.dial_timeout());
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_dial_timeout_differs() {
        let config = CallConfig::new()
            .with_ring_timeout(Duration::from_secs(30))
            .with_dial_timeout(Duration::from_secs(45));
        assert_eq!(config.dial_timeout(), Duration::from_secs(45));
        assert_eq!(config.ring_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_json_partial_config() {
        let config = CallConfig::from_json_str(r#"{ "ring_timeout_ms": 5000 }"#).unwrap();
        assert_eq!(config.ring_timeout_ms, 5000);
        assert_eq!(config.dial_timeout(), Duration::from_secs(5));
        assert_eq!(config.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
    }

    #[test]
    fn test_zero_values_rejected() {
        let err = CallConfig::new()
            .with_tick_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidConfiguration { ref field, .. } if field == "tick_interval_ms"));

        let err = CallConfig::from_json_str(r#"{ "dial_timeout_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, CallError::InvalidConfiguration { ref field, .. } if field == "dial_timeout_ms"));
    }

    #[test]
    fn test_huge_durations_saturate() {
        let config = CallConfig::new().with_connect_timeout(Duration::MAX);
        assert_eq!(config.connect_timeout_ms, u64::MAX);
        assert_eq!(millis(Duration::from_millis(1_500)), 1_500);
    }

    #[test]
    fn test_malformed_json() {
        let err = CallConfig::from_json_str("{ ring_timeout_ms: }").unwrap_err();
        assert!(matches!(err, CallError::InvalidConfiguration { ref field, .. } if field == "json"));
    }
}
