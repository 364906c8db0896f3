//! oplog binary entry point.
//!
//! Usage:
//!   oplog serve
//!   oplog emit --user-id <id> --action <action> [--ip <ip>] [--detail <json>]
//!   oplog logs [--limit <n>]
//!   oplog dead-letters [--limit <n>]

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use oplog_broker::RedisBroker;
use oplog_courier::{Courier, CourierConfig};
use oplog_envelope::OperationEvent;
use oplog_outbox::{OperationLogProducer, SystemClock};
use oplog_store::SqliteStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// oplog: reliable delivery of operation-audit events.
#[derive(Parser, Debug)]
#[command(name = "oplog")]
#[command(about = "Reliable delivery of operation-audit events over Redis Streams")]
struct Cli {
    /// Redis connection URL.
    #[arg(long, global = true, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// SQLite database for operation logs and dead letters.
    #[arg(long, global = true, env = "OPLOG_DB_PATH")]
    db_path: Option<PathBuf>,

    /// JSONL log file.
    #[arg(long, global = true, env = "OPLOG_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the operation-log consumer and the dead-letter sink.
    Serve,
    /// Publish one operation event and wait for it to settle.
    Emit(EmitArgs),
    /// Show the most recent persisted operation logs.
    Logs {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show the most recent dead letters.
    DeadLetters {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Args, Debug)]
struct EmitArgs {
    #[arg(long)]
    user_id: i64,

    /// Action name, e.g. USER_LOGIN.
    #[arg(long)]
    action: String,

    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Detail document as JSON.
    #[arg(long, default_value = "{}")]
    detail: String,

    /// Seconds to wait for confirmation, retries included.
    #[arg(long, default_value = "30")]
    wait_secs: u64,
}

impl Cli {
    fn apply(&self, config: &mut CourierConfig) {
        if let Some(redis_url) = &self.redis_url {
            config.redis_url = redis_url.clone();
        }
        if let Some(db_path) = &self.db_path {
            config.db_path = db_path.clone();
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = Some(log_file.clone());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = CourierConfig::from_env()?;
    cli.apply(&mut config);

    oplog_observability::init_with_config(oplog_observability::LogConfig {
        service_name: "oplog".into(),
        default_level: cli.log_level.clone(),
        log_path: config.log_file.clone(),
        also_stderr: true,
    });

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Emit(args) => emit(config, args).await,
        Command::Logs { limit } => show_logs(config, limit).await,
        Command::DeadLetters { limit } => show_dead_letters(config, limit).await,
    }
}

async fn serve(config: CourierConfig) -> anyhow::Result<()> {
    info!(
        redis_url = %config.redis_url,
        db_path = %config.db_path.display(),
        group = %config.consumer_group,
        consumer = %config.consumer_name,
        "Configuration loaded"
    );

    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .await
            .with_context(|| format!("opening {}", config.db_path.display()))?,
    );
    let broker = Arc::new(
        RedisBroker::connect(config.broker_config())
            .await
            .context("connecting to Redis")?,
    );

    let courier = Courier::new(
        broker,
        store.clone(),
        store,
        Arc::new(SystemClock),
        config.consumer,
    );

    let (stop, stopped) = watch::channel(false);
    let run = courier.run(stopped);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            if let Err(e) = result {
                error!(error = %e, "Courier exited with error");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, exiting...");
            let _ = stop.send(true);
            run.await?;
        }
    }

    Ok(())
}

async fn emit(config: CourierConfig, args: EmitArgs) -> anyhow::Result<()> {
    let detail: serde_json::Value =
        serde_json::from_str(&args.detail).context("--detail must be valid JSON")?;

    let broker = Arc::new(
        RedisBroker::connect(config.broker_config())
            .await
            .context("connecting to Redis")?,
    );
    let producer = OperationLogProducer::with_defaults(broker)?;

    let id = producer.publish(OperationEvent::new(args.user_id, args.action, args.ip, detail));
    let settled = producer
        .drain(Duration::from_secs(args.wait_secs))
        .await;
    producer.shutdown().await;

    if !settled {
        warn!(correlation_id = %id, "Event still unconfirmed at exit");
        anyhow::bail!("event {id} not settled within {}s", args.wait_secs);
    }

    println!("{id}");
    Ok(())
}

async fn show_logs(config: CourierConfig, limit: usize) -> anyhow::Result<()> {
    let store = SqliteStore::open(&config.db_path).await?;
    let total = store.count_operation_logs().await?;
    let logs = store.recent_operation_logs(limit).await?;

    println!("{} of {} operation logs", logs.len(), total);
    for log in logs {
        println!(
            "{}  {}  user={}  {}  ip={}  {}",
            log.created_at.to_rfc3339(),
            log.log_id,
            log.user_id,
            log.action,
            log.ip,
            log.detail
        );
    }
    Ok(())
}

async fn show_dead_letters(config: CourierConfig, limit: usize) -> anyhow::Result<()> {
    let store = SqliteStore::open(&config.db_path).await?;
    let total = store.count_dead_letters().await?;
    let dead_letters = store.recent_dead_letters(limit).await?;

    println!("{} of {} dead letters", dead_letters.len(), total);
    for stored in dead_letters {
        println!("#{} {}", stored.id, serde_json::to_string(&stored.record)?);
    }
    Ok(())
}
