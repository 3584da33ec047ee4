//! The worker: an explicit event-to-handler dispatch over the strategy
//! engine, lifecycle manager, sync coordinator and messaging bus.
//!
//! Every host interaction is one `WorkerEvent`; each is handled by a
//! single async task that suspends only at I/O boundaries.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::bus::{ClientMessage, MessageBus};
use crate::cache::{CacheStore, Lifecycle, WorkerPhase, RUNTIME_CACHE};
use crate::classify::Classifier;
use crate::config::Config;
use crate::http::{FetchRequest, ResponseSnapshot};
use crate::net::Network;
use crate::queue::{OfflineRecord, QueueStore};
use crate::strategy::StrategyEngine;
use crate::sync::SyncCoordinator;

/// Everything the host environment can deliver to the worker.
#[derive(Debug)]
pub enum WorkerEvent {
  Install,
  Activate,
  Fetch(FetchRequest),
  Message(ClientMessage),
  /// Background-sync trigger carrying its tag.
  Sync(String),
}

/// What handling an event produced.
#[derive(Debug)]
pub enum EventOutcome {
  /// A fetch was served (real, cached or synthetic).
  Response(ResponseSnapshot),
  /// A lifecycle, message or sync event was handled.
  Handled,
}

pub struct Worker<S, N, Q> {
  strategy: StrategyEngine<S, N>,
  lifecycle: Lifecycle<S, N>,
  sync: SyncCoordinator<Q, N>,
  bus: Arc<MessageBus>,
  caches: Arc<S>,
  queue: Arc<Q>,
  net: Arc<N>,
  upstream: Url,
}

impl<S, N, Q> Worker<S, N, Q>
where
  S: CacheStore + 'static,
  N: Network + 'static,
  Q: QueueStore + 'static,
{
  pub fn new(
    config: &Config,
    caches: Arc<S>,
    queue: Arc<Q>,
    net: Arc<N>,
    bus: Arc<MessageBus>,
  ) -> Result<Self> {
    let upstream = config.upstream_url()?;

    let classifier = Classifier::new(
      config.routes.api_prefix.clone(),
      config.routes.static_prefixes.clone(),
    );

    let strategy = StrategyEngine::new(
      Arc::clone(&caches),
      Arc::clone(&net),
      classifier,
      config.offline.fallback_page.clone(),
      config.offline.message.clone(),
    );

    let lifecycle = Lifecycle::new(
      Arc::clone(&caches),
      Arc::clone(&net),
      Arc::clone(&bus),
      upstream.clone(),
      config.precache.clone(),
    );

    let sync_endpoint = upstream
      .join(&config.sync.push_path)
      .map_err(|e| eyre!("Invalid sync path {}: {}", config.sync.push_path, e))?;
    let sync = SyncCoordinator::new(
      Arc::clone(&queue),
      Arc::clone(&net),
      Arc::clone(&bus),
      sync_endpoint,
      config.sync.tag.clone(),
    );

    Ok(Self {
      strategy,
      lifecycle,
      sync,
      bus,
      caches,
      queue,
      net,
      upstream,
    })
  }

  pub fn bus(&self) -> &Arc<MessageBus> {
    &self.bus
  }

  /// The upstream origin requests are resolved against.
  pub fn upstream(&self) -> &Url {
    &self.upstream
  }

  /// Store a scan captured while offline. It stays queued until the next
  /// sync trigger drains it.
  pub fn enqueue(&self, record: &OfflineRecord) -> Result<()> {
    debug!(id = record.id, "queueing offline record");
    self.queue.create(record)
  }

  /// Dispatch one host event to its handler.
  pub async fn handle_event(&self, event: WorkerEvent) -> Result<EventOutcome> {
    match event {
      WorkerEvent::Install => {
        self.lifecycle.on_install().await?;
        Ok(EventOutcome::Handled)
      }
      WorkerEvent::Activate => {
        self.lifecycle.on_activate().await?;
        Ok(EventOutcome::Handled)
      }
      WorkerEvent::Fetch(req) => {
        let resp = self.strategy.handle(&req).await?;
        Ok(EventOutcome::Response(resp))
      }
      WorkerEvent::Message(msg) => {
        self.on_message(msg).await?;
        Ok(EventOutcome::Handled)
      }
      WorkerEvent::Sync(tag) => {
        self.sync.on_sync(&tag).await;
        Ok(EventOutcome::Handled)
      }
    }
  }

  async fn on_message(&self, msg: ClientMessage) -> Result<()> {
    debug!(?msg, "client message received");
    match msg {
      ClientMessage::SkipWaiting => {
        if self.lifecycle.phase()? == WorkerPhase::Waiting {
          self.lifecycle.on_activate().await?;
        } else {
          debug!("skip-waiting with no waiting generation");
        }
        Ok(())
      }
      ClientMessage::CacheUrls { urls } => {
        self.cache_urls(urls).await;
        Ok(())
      }
    }
  }

  /// Best-effort priming of the runtime cache with explicit URLs.
  /// Individual failures are logged, never propagated.
  async fn cache_urls(&self, urls: Vec<String>) {
    let tasks = urls.iter().map(|path| async move {
      if let Err(e) = self.prime_one(path).await {
        warn!(%path, "failed to cache URL: {}", e);
      }
    });
    futures::future::join_all(tasks).await;
  }

  async fn prime_one(&self, path: &str) -> Result<()> {
    let url = self
      .upstream
      .join(path)
      .map_err(|e| eyre!("Invalid URL {}: {}", path, e))?;
    let req = FetchRequest::get(url);

    let resp = self.net.fetch(&req).await?;
    if resp.status != 200 {
      return Err(eyre!("fetch returned status {}", resp.status));
    }

    self.caches.put(RUNTIME_CACHE, &req.cache_key(), &resp)
  }
}
