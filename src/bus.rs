//! Bidirectional control channel between the worker and the application.
//!
//! Inbound messages arrive over the control endpoint and are dispatched by
//! the worker. Outbound notices are broadcast to every currently connected
//! subscriber; there is no queueing for clients that connect later.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Inbound control messages from the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
  /// Apply a waiting worker generation immediately.
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
  /// Best-effort add the listed URLs to the runtime cache.
  #[serde(rename = "CACHE_URLS")]
  CacheUrls { urls: Vec<String> },
}

/// Outbound notifications to the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerNotice {
  #[serde(rename = "SYNC_COMPLETE")]
  SyncComplete {
    success: bool,
    #[serde(rename = "syncedCount")]
    synced_count: usize,
  },
}

/// In-process broadcast bus connecting the worker to its clients.
pub struct MessageBus {
  tx: broadcast::Sender<WorkerNotice>,
  claimed: AtomicBool,
}

impl MessageBus {
  pub fn new() -> Self {
    let (tx, _) = broadcast::channel(16);
    Self {
      tx,
      claimed: AtomicBool::new(false),
    }
  }

  /// Subscribe as a connected client.
  pub fn subscribe(&self) -> broadcast::Receiver<WorkerNotice> {
    self.tx.subscribe()
  }

  /// Number of currently connected clients.
  pub fn connected(&self) -> usize {
    self.tx.receiver_count()
  }

  /// Broadcast a notice to every connected client. A bus with no
  /// listeners is not an error.
  pub fn broadcast(&self, notice: WorkerNotice) {
    let delivered = self.tx.send(notice.clone()).unwrap_or(0);
    debug!(?notice, delivered, "broadcast worker notice");
  }

  /// Take control of all connected clients. Returns how many were claimed.
  pub fn claim_clients(&self) -> usize {
    self.claimed.store(true, Ordering::SeqCst);
    self.connected()
  }

  /// Whether this worker generation has claimed its clients.
  pub fn has_claimed(&self) -> bool {
    self.claimed.load(Ordering::SeqCst)
  }
}

impl Default for MessageBus {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_inbound_message_wire_format() {
    let msg: ClientMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
    assert_eq!(msg, ClientMessage::SkipWaiting);

    let msg: ClientMessage =
      serde_json::from_str(r#"{"type":"CACHE_URLS","urls":["/a","/b"]}"#).unwrap();
    assert_eq!(
      msg,
      ClientMessage::CacheUrls {
        urls: vec!["/a".to_string(), "/b".to_string()]
      }
    );
  }

  #[test]
  fn test_outbound_notice_wire_format() {
    let notice = WorkerNotice::SyncComplete {
      success: true,
      synced_count: 2,
    };
    let json = serde_json::to_value(&notice).unwrap();
    assert_eq!(json["type"], "SYNC_COMPLETE");
    assert_eq!(json["success"], true);
    assert_eq!(json["syncedCount"], 2);
  }

  #[tokio::test]
  async fn test_broadcast_reaches_all_subscribers() {
    let bus = MessageBus::new();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();
    assert_eq!(bus.connected(), 2);

    bus.broadcast(WorkerNotice::SyncComplete {
      success: true,
      synced_count: 1,
    });

    assert!(a.recv().await.is_ok());
    assert!(b.recv().await.is_ok());
  }

  #[test]
  fn test_broadcast_without_listeners_is_not_fatal() {
    let bus = MessageBus::new();
    bus.broadcast(WorkerNotice::SyncComplete {
      success: true,
      synced_count: 0,
    });
  }

  #[test]
  fn test_claim_counts_connected_clients() {
    let bus = MessageBus::new();
    let _a = bus.subscribe();
    let _b = bus.subscribe();

    assert!(!bus.has_claimed());
    assert_eq!(bus.claim_clients(), 2);
    assert!(bus.has_claimed());
  }
}
