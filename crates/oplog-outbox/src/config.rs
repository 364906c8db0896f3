//! Producer configuration.

use crate::{OutboxError, OutboxResult};
use std::time::Duration;

/// Retries after the first publish before an event is dead-lettered.
pub const MAX_RETRY: u32 = 3;

/// What the reaper does with an entry that outlived the staleness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReaperPolicy {
    /// Remove it and log a warning.
    #[default]
    Drop,
    /// Remove it and forward it to the dead-letter route.
    DeadLetter,
}

/// Configuration for [`crate::OperationLogProducer`].
///
/// Defaults:
/// - `max_retries`: 3
/// - `retry_delay`: 5s
/// - `reap_interval`: 60s
/// - `pending_ttl`: 10 minutes
/// - `workers`: 2
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub max_retries: u32,
    /// Fixed delay before a re-publish.
    pub retry_delay: Duration,
    /// How often the reaper scans the pending store.
    pub reap_interval: Duration,
    /// Age after which an unconfirmed entry is reaped.
    pub pending_ttl: Duration,
    /// Scheduler pool size.
    pub workers: usize,
    pub reaper_policy: ReaperPolicy,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRY,
            retry_delay: Duration::from_secs(5),
            reap_interval: Duration::from_secs(60),
            pending_ttl: Duration::from_secs(10 * 60),
            workers: 2,
            reaper_policy: ReaperPolicy::Drop,
        }
    }
}

impl ProducerConfig {
    pub fn validate(&self) -> OutboxResult<()> {
        if self.workers == 0 {
            return Err(OutboxError::Config("workers must be at least 1".to_string()));
        }
        if self.reap_interval.is_zero() {
            return Err(OutboxError::Config("reap_interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProducerConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.reap_interval, Duration::from_secs(60));
        assert_eq!(config.pending_ttl, Duration::from_secs(600));
        assert_eq!(config.workers, 2);
        assert_eq!(config.reaper_policy, ReaperPolicy::Drop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = ProducerConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(OutboxError::Config(_))));
    }
}
