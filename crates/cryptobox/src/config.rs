//! Cryptobox configuration

use proteus::keys::MAX_PREKEY_ID;
use serde::{Deserialize, Serialize};

/// Default bound of the session and queue caches
pub const DEFAULT_CAPACITY: usize = 1000;

/// Box configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoboxConfig {
    /// Pre-keys the store should hold, last-resort key included
    pub minimum_prekeys: u16,
    /// Sessions kept in memory
    pub session_cache_capacity: usize,
    /// Idle per-session queues kept in memory
    pub queue_cache_capacity: usize,
    /// Events buffered per subscriber before it lags
    pub event_channel_capacity: usize,
}

impl Default for CryptoboxConfig {
    fn default() -> Self {
        Self {
            minimum_prekeys: 1,
            session_cache_capacity: DEFAULT_CAPACITY,
            queue_cache_capacity: DEFAULT_CAPACITY,
            event_channel_capacity: 64,
        }
    }
}

impl CryptoboxConfig {
    /// Create with a pre-key pool size, clamped to the id space
    pub fn with_minimum_prekeys(minimum_prekeys: u16) -> Self {
        Self {
            minimum_prekeys: minimum_prekeys.min(MAX_PREKEY_ID),
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.minimum_prekeys == 0 {
            return Err("minimum_prekeys must be at least 1".to_string());
        }
        if self.session_cache_capacity == 0 {
            return Err("session_cache_capacity must be greater than 0".to_string());
        }
        if self.queue_cache_capacity == 0 {
            return Err("queue_cache_capacity must be greater than 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CryptoboxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session_cache_capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn test_invalid_config() {
        let config = CryptoboxConfig {
            queue_cache_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(CryptoboxConfig::with_minimum_prekeys(0).validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let config: CryptoboxConfig = serde_json::from_str(r#"{"minimum_prekeys": 10}"#).unwrap();
        assert_eq!(config.minimum_prekeys, 10);
        assert_eq!(config.queue_cache_capacity, DEFAULT_CAPACITY);
    }
}
