//! Client configuration

use serde::Deserialize;
use std::time::Duration;

use crate::error::QueueError;
use crate::validation::QueueLimits;

/// Settings for a [`QueueClient`](crate::QueueClient)
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub limits: QueueLimits,

    /// Longest a long-polling receive may wait
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// Re-check interval while long polling
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Queue names fetched per storage round trip when listing
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            limits: QueueLimits::default(),
            max_wait_secs: default_max_wait_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            list_page_size: default_list_page_size(),
        }
    }
}

impl ClientConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Validate a caller-supplied long-poll wait in seconds
    pub fn wait(&self, secs: i64) -> Result<Duration, QueueError> {
        u64::try_from(secs)
            .ok()
            .filter(|secs| *secs <= self.max_wait_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                QueueError::invalid(format!(
                    "Incorrect value for wait parameter; allowed range is 0 to {} seconds.",
                    self.max_wait_secs
                ))
            })
    }
}

fn default_max_wait_secs() -> u64 {
    20
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_list_page_size() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_bounds() {
        let config = ClientConfig::default();
        assert_eq!(config.wait(0).unwrap(), Duration::ZERO);
        assert_eq!(config.wait(20).unwrap(), Duration::from_secs(20));
        assert!(matches!(config.wait(21), Err(QueueError::InvalidParameter(_))));
        assert!(matches!(config.wait(-1), Err(QueueError::InvalidParameter(_))));
    }
}
