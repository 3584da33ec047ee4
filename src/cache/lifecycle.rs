//! Install/activate lifecycle for cache generations.
//!
//! Install populates the shell generation from the precache list and
//! requests immediate activation. Activation purges every generation
//! outside the protected set and claims connected clients, so at most the
//! shell, runtime and API generations survive it.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;

use super::names::{protected_generations, SHELL_CACHE};
use super::store::CacheStore;
use crate::bus::MessageBus;
use crate::http::FetchRequest;
use crate::net::Network;

/// Lifecycle phase of the worker generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
  /// Freshly constructed, install not yet run.
  Installing,
  /// Installed, waiting for activation.
  Waiting,
  /// Activated and controlling clients.
  Active,
}

/// Summary of one activation pass.
#[derive(Debug)]
pub struct ActivationReport {
  /// Generation names that were purged.
  pub deleted: Vec<String>,
  /// Clients under this generation's control after the claim.
  pub clients_claimed: usize,
}

pub struct Lifecycle<S, N> {
  caches: Arc<S>,
  net: Arc<N>,
  bus: Arc<MessageBus>,
  upstream: Url,
  precache: Vec<String>,
  phase: Mutex<WorkerPhase>,
}

impl<S: CacheStore, N: Network> Lifecycle<S, N> {
  pub fn new(
    caches: Arc<S>,
    net: Arc<N>,
    bus: Arc<MessageBus>,
    upstream: Url,
    precache: Vec<String>,
  ) -> Self {
    Self {
      caches,
      net,
      bus,
      upstream,
      precache,
      phase: Mutex::new(WorkerPhase::Installing),
    }
  }

  pub fn phase(&self) -> Result<WorkerPhase> {
    self
      .phase
      .lock()
      .map(|p| *p)
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn set_phase(&self, phase: WorkerPhase) -> Result<()> {
    *self
      .phase
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))? = phase;
    Ok(())
  }

  /// Populate the shell generation from the precache list.
  ///
  /// Any fetch or store failure aborts the install and the new generation
  /// is not adopted; generations written by earlier versions are left
  /// alone. On success the worker requests immediate activation, so the
  /// caller is expected to run `on_activate` next rather than waiting for
  /// clients to disconnect.
  pub async fn on_install(&self) -> Result<()> {
    info!(urls = self.precache.len(), "installing worker generation");

    for path in &self.precache {
      let url = self
        .upstream
        .join(path)
        .map_err(|e| eyre!("Invalid precache path {}: {}", path, e))?;
      let req = FetchRequest::get(url);

      let resp = self
        .net
        .fetch(&req)
        .await
        .map_err(|e| eyre!("Precache fetch for {} failed: {}", path, e))?;

      if resp.status != 200 {
        return Err(eyre!(
          "Precache fetch for {} returned status {}",
          path,
          resp.status
        ));
      }

      self.caches.put(SHELL_CACHE, &req.cache_key(), &resp)?;
    }

    self.set_phase(WorkerPhase::Waiting)?;
    info!("install complete, immediate activation requested");
    Ok(())
  }

  /// Purge stale generations and claim all connected clients.
  ///
  /// Deletions are best-effort per generation: one failure is logged and
  /// must not block the rest. Running activation twice in a row is
  /// idempotent.
  pub async fn on_activate(&self) -> Result<ActivationReport> {
    let protected = protected_generations();
    let mut deleted = Vec::new();

    for name in self.caches.list_generations()? {
      if protected.contains(&name.as_str()) {
        continue;
      }
      match self.caches.delete_generation(&name) {
        Ok(entries) => {
          info!(generation = %name, entries, "purged stale cache generation");
          deleted.push(name);
        }
        Err(e) => warn!(generation = %name, "failed to purge generation: {}", e),
      }
    }

    let clients_claimed = self.bus.claim_clients();
    self.set_phase(WorkerPhase::Active)?;
    info!(clients_claimed, "worker generation activated");

    Ok(ActivationReport {
      deleted,
      clients_claimed,
    })
  }
}
