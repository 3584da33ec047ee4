mod bus;
mod cache;
mod classify;
mod config;
mod http;
mod net;
mod queue;
mod server;
mod strategy;
mod sync;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use worker::{Worker, WorkerEvent};

#[derive(Parser, Debug)]
#[command(name = "scangate")]
#[command(about = "Offline-first caching gateway for a mobile scanning app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/scangate/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Listen address override
  #[arg(short, long)]
  listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let config = if let Some(listen) = args.listen {
    config::Config { listen, ..config }
  } else {
    config
  };

  let data_dir = config::Config::data_dir()?;
  let _guard = init_tracing(&data_dir)?;

  let caches = Arc::new(cache::SqliteCacheStore::open(&data_dir.join("cache.db"))?);
  let queue = Arc::new(queue::SqliteQueueStore::open(&data_dir.join("queue.db"))?);
  let net = Arc::new(net::UpstreamClient::new()?);
  let bus = Arc::new(bus::MessageBus::new());

  let worker = Arc::new(Worker::new(&config, caches, queue, net, bus)?);

  // A new worker generation installs, then activates immediately. If the
  // precache fails this generation is not adopted: the gateway keeps
  // serving from whatever the previous run left in the caches.
  match worker.handle_event(WorkerEvent::Install).await {
    Ok(_) => {
      worker.handle_event(WorkerEvent::Activate).await?;
    }
    Err(e) => warn!("install failed, serving previous generation: {}", e),
  }

  let app = server::router(Arc::clone(&worker));
  let listener = tokio::net::TcpListener::bind(&config.listen).await?;
  info!(listen = %config.listen, upstream = %config.upstream, "scangate listening");
  axum::serve(listener, app).await?;

  Ok(())
}

/// Console logging plus a rolling file log under the data directory.
fn init_tracing(data_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir)?;
  let file_appender = tracing_appender::rolling::daily(log_dir, "scangate.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(fmt::layer())
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .init();

  Ok(guard)
}
