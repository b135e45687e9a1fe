//! Engine configuration.

use std::time::Duration;

use chunkup_protocol::constants::{DEFAULT_CHUNK_SIZE, MAX_RETRIES, RETRY_DELAY};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Tunables for a [`TransferEngine`](crate::TransferEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bytes per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Attempts per chunk before the run fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff; attempt `n` waits `n` times this long.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Buffered events before new ones are dropped.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    RETRY_DELAY.as_millis() as u64
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1000);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"chunk_size": 1000000}"#).unwrap();
        assert_eq!(config.chunk_size, 1_000_000);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn retry_policy_from_config() {
        let config = EngineConfig {
            max_retries: 0,
            retry_delay_ms: 250,
            ..Default::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
    }
}
