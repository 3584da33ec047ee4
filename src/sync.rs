//! Background reconciliation of offline records with the server.
//!
//! Records are deleted only after the server acknowledges the batch, so a
//! failed attempt leaves the whole batch queued for the next trigger:
//! at-least-once delivery, made safe by idempotent deletion by identifier.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;

use crate::bus::{MessageBus, WorkerNotice};
use crate::net::Network;
use crate::queue::QueueStore;

pub struct SyncCoordinator<Q, N> {
  queue: Arc<Q>,
  net: Arc<N>,
  bus: Arc<MessageBus>,
  /// Absolute URL of the sync push endpoint.
  endpoint: Url,
  /// Only triggers carrying this tag are ours.
  tag: String,
}

impl<Q: QueueStore, N: Network> SyncCoordinator<Q, N> {
  pub fn new(queue: Arc<Q>, net: Arc<N>, bus: Arc<MessageBus>, endpoint: Url, tag: String) -> Self {
    Self {
      queue,
      net,
      bus,
      endpoint,
      tag,
    }
  }

  /// Handle a background-sync trigger.
  ///
  /// Unrelated tags are ignored. Failures are logged and swallowed: the
  /// batch stays queued and the next trigger retries it.
  pub async fn on_sync(&self, tag: &str) {
    if tag != self.tag {
      debug!(tag, "ignoring unrelated sync tag");
      return;
    }

    if let Err(e) = self.drain().await {
      error!("offline sync failed, batch retained for retry: {}", e);
    }
  }

  async fn drain(&self) -> Result<()> {
    let records = self.queue.read_all()?;
    if records.is_empty() {
      debug!("no offline records to sync");
      return Ok(());
    }

    let batch = records.len();
    let body = serde_json::json!({ "offline_data": &records });

    let resp = self.net.post_json(&self.endpoint, &body).await?;
    if !resp.is_success() {
      return Err(eyre!("sync endpoint returned status {}", resp.status));
    }

    // Server acknowledged the whole batch; only now do records go away.
    for record in &records {
      self.queue.delete(record.id)?;
    }

    self.bus.broadcast(WorkerNotice::SyncComplete {
      success: true,
      synced_count: batch,
    });
    info!(synced = batch, "offline records synced");

    Ok(())
  }
}
