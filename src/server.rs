//! HTTP surface of the gateway.
//!
//! The fallback route intercepts every application request and runs it
//! through the worker. Control traffic uses dedicated endpoints:
//! `POST /_worker/message` for client messages, `POST /_worker/queue` to
//! store a scan captured while offline, `POST /_worker/sync` for the
//! background-sync trigger, and `GET /_worker/notices` as a long-poll for
//! the next broadcast notice.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

use crate::bus::ClientMessage;
use crate::cache::CacheStore;
use crate::http::{FetchRequest, ResponseSnapshot};
use crate::net::Network;
use crate::queue::{OfflineRecord, QueueStore};
use crate::worker::{EventOutcome, Worker, WorkerEvent};

pub fn router<S, N, Q>(worker: Arc<Worker<S, N, Q>>) -> Router
where
  S: CacheStore + 'static,
  N: Network + 'static,
  Q: QueueStore + 'static,
{
  Router::new()
    .route("/_worker/message", post(handle_message))
    .route("/_worker/queue", post(handle_enqueue))
    .route("/_worker/sync", post(handle_sync))
    .route("/_worker/notices", get(poll_notice))
    .fallback(handle_fetch)
    .with_state(worker)
}

async fn handle_fetch<S, N, Q>(
  State(worker): State<Arc<Worker<S, N, Q>>>,
  method: Method,
  uri: Uri,
  headers: HeaderMap,
  body: Bytes,
) -> Response
where
  S: CacheStore + 'static,
  N: Network + 'static,
  Q: QueueStore + 'static,
{
  let path_and_query = uri
    .path_and_query()
    .map(|pq| pq.as_str())
    .unwrap_or("/");

  let url = match worker.upstream().join(path_and_query) {
    Ok(url) => url,
    Err(e) => {
      return (StatusCode::BAD_REQUEST, format!("invalid request path: {}", e)).into_response();
    }
  };

  let req = FetchRequest {
    method: method.as_str().to_string(),
    url,
    headers: headers
      .iter()
      // The Host header belongs to the gateway, not the upstream.
      .filter(|(k, _)| k.as_str() != "host")
      .filter_map(|(k, v)| {
        v.to_str()
          .ok()
          .map(|v| (k.as_str().to_string(), v.to_string()))
      })
      .collect(),
    body: body.to_vec(),
  };

  match worker.handle_event(WorkerEvent::Fetch(req)).await {
    Ok(EventOutcome::Response(snapshot)) => into_response(snapshot),
    Ok(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    // Only pass-through (non-GET) requests can land here.
    Err(e) => (StatusCode::BAD_GATEWAY, format!("upstream unreachable: {}", e)).into_response(),
  }
}

async fn handle_message<S, N, Q>(
  State(worker): State<Arc<Worker<S, N, Q>>>,
  Json(msg): Json<ClientMessage>,
) -> StatusCode
where
  S: CacheStore + 'static,
  N: Network + 'static,
  Q: QueueStore + 'static,
{
  match worker.handle_event(WorkerEvent::Message(msg)).await {
    Ok(_) => StatusCode::ACCEPTED,
    Err(e) => {
      error!("message handling failed: {}", e);
      StatusCode::INTERNAL_SERVER_ERROR
    }
  }
}

async fn handle_enqueue<S, N, Q>(
  State(worker): State<Arc<Worker<S, N, Q>>>,
  Json(record): Json<OfflineRecord>,
) -> StatusCode
where
  S: CacheStore + 'static,
  N: Network + 'static,
  Q: QueueStore + 'static,
{
  match worker.enqueue(&record) {
    Ok(()) => StatusCode::CREATED,
    Err(e) => {
      error!("failed to queue offline record: {}", e);
      StatusCode::INTERNAL_SERVER_ERROR
    }
  }
}

#[derive(Debug, Deserialize)]
struct SyncTrigger {
  tag: String,
}

async fn handle_sync<S, N, Q>(
  State(worker): State<Arc<Worker<S, N, Q>>>,
  Json(trigger): Json<SyncTrigger>,
) -> StatusCode
where
  S: CacheStore + 'static,
  N: Network + 'static,
  Q: QueueStore + 'static,
{
  match worker.handle_event(WorkerEvent::Sync(trigger.tag)).await {
    Ok(_) => StatusCode::ACCEPTED,
    Err(e) => {
      error!("sync trigger failed: {}", e);
      StatusCode::INTERNAL_SERVER_ERROR
    }
  }
}

/// Long-poll for the next broadcast notice. The pending request counts as
/// a connected client for claim and broadcast purposes.
async fn poll_notice<S, N, Q>(State(worker): State<Arc<Worker<S, N, Q>>>) -> Response
where
  S: CacheStore + 'static,
  N: Network + 'static,
  Q: QueueStore + 'static,
{
  let mut rx = worker.bus().subscribe();
  match rx.recv().await {
    Ok(notice) => Json(notice).into_response(),
    Err(_) => StatusCode::NO_CONTENT.into_response(),
  }
}

fn into_response(snapshot: ResponseSnapshot) -> Response {
  let mut builder = Response::builder().status(snapshot.status);
  for (name, value) in &snapshot.headers {
    builder = builder.header(name, value);
  }
  builder
    .body(Body::from(snapshot.body))
    .unwrap_or_else(|e| {
      error!("failed to build response: {}", e);
      StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bus::MessageBus;
  use crate::cache::{SqliteCacheStore, RUNTIME_CACHE};
  use crate::config::Config;
  use crate::net::testing::MockNetwork;
  use crate::queue::SqliteQueueStore;

  type TestWorker = Worker<SqliteCacheStore, MockNetwork, SqliteQueueStore>;

  fn worker() -> (
    Arc<TestWorker>,
    Arc<SqliteCacheStore>,
    Arc<SqliteQueueStore>,
    Arc<MockNetwork>,
  ) {
    let config: Config = serde_yaml::from_str("upstream: http://upstream.local\n").unwrap();
    let caches = Arc::new(SqliteCacheStore::open_in_memory().unwrap());
    let queue = Arc::new(SqliteQueueStore::open_in_memory().unwrap());
    let net = Arc::new(MockNetwork::new());
    let bus = Arc::new(MessageBus::new());
    let worker = Arc::new(
      Worker::new(
        &config,
        Arc::clone(&caches),
        Arc::clone(&queue),
        Arc::clone(&net),
        bus,
      )
      .unwrap(),
    );
    (worker, caches, queue, net)
  }

  #[tokio::test]
  async fn test_fetch_handler_serves_through_worker() {
    let (worker, _caches, _queue, net) = worker();
    net.respond(
      "/mobile/app",
      ResponseSnapshot::new(200, vec![], b"<html/>".to_vec()),
    );

    let resp = handle_fetch(
      State(worker),
      Method::GET,
      Uri::from_static("/mobile/app"),
      HeaderMap::new(),
      Bytes::new(),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn test_fetch_handler_keeps_query_in_identity() {
    let (worker, _caches, _queue, net) = worker();
    net.fail("/mobile/api/status");

    // Offline API call: synthetic sentinel, still HTTP 200.
    let resp = handle_fetch(
      State(worker),
      Method::GET,
      Uri::from_static("/mobile/api/status?v=2"),
      HeaderMap::new(),
      Bytes::new(),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn test_message_handler_dispatches_cache_urls() {
    let (worker, caches, _queue, net) = worker();
    net.respond(
      "/mobile/app/scan",
      ResponseSnapshot::new(200, vec![], b"scan".to_vec()),
    );

    let status = handle_message(
      State(worker),
      Json(ClientMessage::CacheUrls {
        urls: vec!["/mobile/app/scan".to_string()],
      }),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(
      caches.list_generations().unwrap(),
      vec![RUNTIME_CACHE.to_string()]
    );
  }

  #[tokio::test]
  async fn test_enqueue_handler_stores_record() {
    let (worker, _caches, queue, _net) = worker();

    // Clients may omit created_at; it defaults to enqueue time.
    let record: OfflineRecord =
      serde_json::from_str(r#"{"id": 7, "payload": {"code": "SCAN-7"}}"#).unwrap();
    let status = handle_enqueue(State(worker), Json(record)).await;

    assert_eq!(status, StatusCode::CREATED);
    let queued = queue.read_all().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, 7);
    assert_eq!(queued[0].payload["code"], "SCAN-7");
  }

  #[tokio::test]
  async fn test_sync_handler_accepts_trigger() {
    let (worker, _caches, _queue, net) = worker();

    let status = handle_sync(
      State(worker),
      Json(SyncTrigger {
        tag: "sync-scans".to_string(),
      }),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(net.posts().is_empty());
  }
}
