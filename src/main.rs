mod app;
mod cache;
mod config;
mod db;
mod error;
mod event;
mod host;
mod net;
mod policy;
mod relay;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cache::{CacheStorage, SqliteStorage};
use crate::db::StagingStore;

#[derive(Parser, Debug)]
#[command(name = "ritase")]
#[command(about = "Offline asset cache and geofence relay for the timesheet app")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./ritase.yaml or $XDG_CONFIG_HOME/ritase/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Serve host events from stdin (default)
  Run,
  /// Print staged records waiting for upload
  Pending,
  /// Delete staged records after a confirmed upload
  Ack {
    #[arg(required = true)]
    keys: Vec<i64>,
  },
  /// List cache generations
  Caches,
}

/// Initialize the tracing subscriber for logging.
///
/// Stdout carries the host protocol, so logs go to a daily file under the
/// data directory unless `--log-stderr` is given. Use RUST_LOG to control
/// the level (default: info).
fn init_tracing(log_dir: &std::path::Path, to_stderr: bool) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  if to_stderr {
    tracing_subscriber::registry()
      .with(fmt::layer().with_writer(io::stderr))
      .with(filter)
      .init();
    return None;
  }

  let appender = tracing_appender::rolling::daily(log_dir, "ritase.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(filter)
    .init();
  Some(guard)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  std::fs::create_dir_all(&data_dir)
    .map_err(|e| eyre!("Failed to create data directory {}: {}", data_dir.display(), e))?;

  let _guard = init_tracing(&data_dir, args.log_stderr);

  match args.command.unwrap_or(Command::Run) {
    Command::Run => run(config).await,
    Command::Pending => pending(&config, &data_dir),
    Command::Ack { keys } => ack(&config, &data_dir, &keys),
    Command::Caches => caches(&data_dir),
  }
}

async fn run(config: config::Config) -> Result<()> {
  info!(cache = %config.cache.version, "worker starting");

  let (outbox, output) = host::Outbox::channel();
  let writer = host::spawn_writer(tokio::io::stdout(), output);

  let worker = Arc::new(app::Worker::open(config, outbox)?);
  let events = event::EventHandler::new(tokio::io::BufReader::new(tokio::io::stdin()));
  worker.run(events).await;

  // Client forwarders may still hold outbox senders; give the writer a
  // moment to drain instead of waiting on them.
  if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
    debug!("host output still open at shutdown");
  }
  Ok(())
}

fn open_staging(config: &config::Config, data_dir: &std::path::Path) -> Result<StagingStore> {
  let store = StagingStore::open(data_dir, &config.staging.database, config.staging.version)
    .map_err(|e| eyre!("Failed to open staging database: {}", e))?;
  debug!(path = %store.path().display(), "staging database opened");
  Ok(store)
}

fn pending(config: &config::Config, data_dir: &std::path::Path) -> Result<()> {
  let store = open_staging(config, data_dir)?;
  for entry in store.records()? {
    println!("{}", serde_json::to_string(&entry)?);
  }
  Ok(())
}

fn ack(config: &config::Config, data_dir: &std::path::Path, keys: &[i64]) -> Result<()> {
  let store = open_staging(config, data_dir)?;
  for &key in keys {
    if store.delete(key)? {
      info!(key, "staged record acknowledged");
    } else {
      eprintln!("No staged record with key {}", key);
    }
  }
  Ok(())
}

fn caches(data_dir: &std::path::Path) -> Result<()> {
  let storage = SqliteStorage::open(&data_dir.join("cache.db"))
    .map_err(|e| eyre!("Failed to open cache database: {}", e))?;
  for generation in storage.generations()? {
    println!(
      "{}\t{}\t{} entries",
      generation.name,
      generation.state.as_str(),
      generation.entries
    );
  }
  Ok(())
}
