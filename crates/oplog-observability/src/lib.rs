//! # oplog-observability
//!
//! Logging setup for the oplog binaries.
//!
//! Pipeline code never configures logging itself. It uses plain `tracing`
//! macros with structured fields, and the binary calls [`init_with_config`]
//! once at startup:
//!
//! ```rust,ignore
//! oplog_observability::init_with_config(oplog_observability::LogConfig {
//!     service_name: "oplog-courier".into(),
//!     default_level: "debug".into(),
//!     log_path: Some("/var/log/oplog/courier.jsonl".into()),
//!     ..Default::default()
//! });
//! ```
//!
//! Output:
//! - a compact human-readable stream on stderr (unless disabled), and
//! - an optional append-only JSONL file, one object per event, suitable for
//!   `tail -f | jq`. Dead-letter and expiry warnings land here too, which is
//!   how operators follow up on failed audit events.

mod file_writer;
mod json_layer;

pub use file_writer::{default_log_path, JsonlFileWriter};
pub use json_layer::{JsonLayer, LogEntry};

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g. "oplog-courier").
    /// Included in every JSONL line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g. "debug", "info").
    /// Overridden by `RUST_LOG` when set.
    pub default_level: String,

    /// Optional JSONL log file.
    pub log_path: Option<PathBuf>,

    /// Emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "oplog".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
        }
    }
}

/// Initialize logging with default settings for the given service.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// If the JSONL file cannot be opened the error is reported on stderr and
/// logging continues without the file layer.
pub fn init_with_config(config: LogConfig) {
    let file_layer = match config.log_path.as_ref().map(JsonlFileWriter::new) {
        Some(Ok(writer)) => Some(
            JsonLayer::new(config.service_name.clone(), writer).with_filter(env_filter(&config)),
        ),
        Some(Err(e)) => {
            eprintln!("oplog-observability: failed to open log file: {e}");
            None
        }
        None => None,
    };

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config))
    });

    let result = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init();

    match result {
        Ok(()) => tracing::debug!(
            service = %config.service_name,
            log_path = ?config.log_path,
            "observability initialized"
        ),
        Err(e) => eprintln!("oplog-observability: subscriber already set: {e}"),
    }
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level))
}

pub use tracing::{debug, error, info, instrument, trace, warn, Level};
