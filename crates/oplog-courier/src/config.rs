//! Configuration for the courier.

use crate::error::{CourierError, CourierResult};
use oplog_broker::{RedisBrokerConfig, Topology};
use oplog_outbox::MAX_RETRY;
use std::path::PathBuf;

/// Consumer retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Republishes allowed before a persistence failure is dead-lettered.
    pub max_retries: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRY,
        }
    }
}

/// Courier configuration.
#[derive(Debug, Clone)]
pub struct CourierConfig {
    /// Redis connection URL
    pub redis_url: String,

    /// SQLite database holding operation logs and dead letters
    pub db_path: PathBuf,

    /// Consumer group name
    pub consumer_group: String,

    /// Consumer name. Stable across restarts so unacked entries from a
    /// previous run are redelivered to this consumer.
    pub consumer_name: String,

    /// XREADGROUP block timeout in milliseconds
    pub block_timeout_ms: u64,

    /// Optional JSONL log file
    pub log_file: Option<PathBuf>,

    pub consumer: ConsumerConfig,
}

impl CourierConfig {
    /// Build from process environment variables, using defaults for unset ones.
    pub fn from_env() -> CourierResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// Recognised variables: `REDIS_URL`, `OPLOG_DB_PATH`,
    /// `OPLOG_CONSUMER_GROUP`, `OPLOG_CONSUMER_NAME`, `OPLOG_BLOCK_MS`,
    /// `OPLOG_LOG_FILE`.
    pub fn from_lookup<F>(lookup: F) -> CourierResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let redis_url =
            lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());

        let db_path = match lookup("OPLOG_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_db_path()?,
        };

        let block_timeout_ms = match lookup("OPLOG_BLOCK_MS") {
            Some(value) => value.parse().map_err(|_| {
                CourierError::Config(format!("OPLOG_BLOCK_MS is not a number: {value}"))
            })?,
            None => 5000,
        };

        Ok(Self {
            redis_url,
            db_path,
            consumer_group: lookup("OPLOG_CONSUMER_GROUP")
                .unwrap_or_else(|| "oplog-courier".to_string()),
            consumer_name: lookup("OPLOG_CONSUMER_NAME")
                .unwrap_or_else(|| "courier-0".to_string()),
            block_timeout_ms,
            log_file: lookup("OPLOG_LOG_FILE").map(PathBuf::from),
            consumer: ConsumerConfig::default(),
        })
    }

    /// Broker settings for this courier.
    pub fn broker_config(&self) -> RedisBrokerConfig {
        RedisBrokerConfig {
            redis_url: self.redis_url.clone(),
            consumer_group: self.consumer_group.clone(),
            consumer_name: self.consumer_name.clone(),
            block_timeout_ms: self.block_timeout_ms,
            topology: Topology::default(),
        }
    }
}

/// `~/.oplog/oplog.db`
pub fn default_db_path() -> CourierResult<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".oplog").join("oplog.db"))
        .ok_or_else(|| CourierError::Config("cannot determine home directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CourierConfig::from_lookup(lookup_in(&[("OPLOG_DB_PATH", "/tmp/oplog.db")]))
            .unwrap();

        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.db_path, PathBuf::from("/tmp/oplog.db"));
        assert_eq!(config.consumer_group, "oplog-courier");
        assert_eq!(config.consumer_name, "courier-0");
        assert_eq!(config.block_timeout_ms, 5000);
        assert!(config.log_file.is_none());
        assert_eq!(config.consumer.max_retries, 3);
    }

    #[test]
    fn test_overrides() {
        let config = CourierConfig::from_lookup(lookup_in(&[
            ("REDIS_URL", "redis://cache:6380"),
            ("OPLOG_DB_PATH", "/data/audit.db"),
            ("OPLOG_CONSUMER_GROUP", "audit"),
            ("OPLOG_CONSUMER_NAME", "courier-7"),
            ("OPLOG_BLOCK_MS", "250"),
            ("OPLOG_LOG_FILE", "/var/log/oplog.jsonl"),
        ]))
        .unwrap();

        let broker = config.broker_config();
        assert_eq!(broker.redis_url, "redis://cache:6380");
        assert_eq!(broker.consumer_group, "audit");
        assert_eq!(broker.consumer_name, "courier-7");
        assert_eq!(broker.block_timeout_ms, 250);
        assert_eq!(broker.topology, Topology::default());
        assert_eq!(config.log_file, Some(PathBuf::from("/var/log/oplog.jsonl")));
    }

    #[test]
    fn test_invalid_block_timeout() {
        let err = CourierConfig::from_lookup(lookup_in(&[
            ("OPLOG_DB_PATH", "/tmp/oplog.db"),
            ("OPLOG_BLOCK_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, CourierError::Config(_)));
    }
}
