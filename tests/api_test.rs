//! HTTP control plane against in-memory backends.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Map, Value};
use snapshot_store::{AuditLog, MemorySource, SnapshotStore, SourceReader};
use snapshot_sync::{App, Config};
use sync_core::{AuditEntry, SourceRecord, SyncIntent};
use sync_pipeline::{Backends, MemoryHandles};
use tokio::sync::Notify;
use tower::ServiceExt;

fn app() -> (App, MemoryHandles) {
    let (backends, handles) = Backends::in_memory();
    (App::new(backends, &Config::default()), handles)
}

fn fields(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        _ => unreachable!(),
    }
}

async fn call(router: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_liveness() {
    let (app, _) = app();
    let (status, body) = call(&app.router(), "GET", "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn test_poll_then_drain_then_status() {
    let (app, handles) = app();
    let router = app.router();
    handles
        .source
        .write(1, fields(json!({"name": "A", "email": "a@x.com"})))
        .await;

    let (status, body) = call(&router, "POST", "/api/sync/poll").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], json!("completed"));
    assert_eq!(body["mode"], json!("bootstrap"));
    assert_eq!(body["inserts"], json!(1));

    app.consumer.drain().await.unwrap();

    let (status, body) = call(&router, "GET", "/api/sync/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["counts"]["synced"], json!(1));
    assert_eq!(body["total"], json!(1));
    assert_eq!(body["lastCycle"]["inserts"], json!(1));

    let (status, body) = call(&router, "GET", "/api/sync/status/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sourceId"], json!(1));
    assert_eq!(body["syncStatus"], json!("synced"));
    assert_eq!(body["document"]["email"], json!("a@x.com"));
}

#[tokio::test]
async fn test_status_for_unknown_id() {
    let (app, _) = app();
    let router = app.router();

    let (status, body) = call(&router, "GET", "/api/sync/status/404").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("404"));

    let (status, _) = call(&router, "GET", "/api/sync/status/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_backfill_and_reconcile() {
    let (app, handles) = app();
    let router = app.router();
    for id in 1..=3 {
        handles.source.write(id, fields(json!({"n": id}))).await;
    }

    let (status, body) = call(&router, "POST", "/api/sync/reconcile").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalSource"], json!(3));
    assert_eq!(body["outOfSync"][0]["issue"], json!("missing_in_target"));

    let (status, body) = call(&router, "POST", "/api/sync/backfill").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["queued"], json!(3));
    app.consumer.drain().await.unwrap();

    let (_, body) = call(&router, "POST", "/api/sync/reconcile").await;
    assert_eq!(body["outOfSync"], json!([]));
}

#[tokio::test]
async fn test_logs_filtering() {
    let (app, handles) = app();
    let router = app.router();
    let intent = SyncIntent::delete(7);
    let err = sync_core::ApplyError::Storage(anyhow::anyhow!("timeout"));
    for _ in 0..3 {
        handles
            .audit
            .append(&AuditEntry::retry(
                &intent,
                &err,
                std::time::Duration::from_secs(5),
                std::time::Duration::ZERO,
            ))
            .await
            .unwrap();
    }
    handles
        .audit
        .append(&AuditEntry::success(&intent, std::time::Duration::ZERO))
        .await
        .unwrap();

    let (status, body) = call(&router, "GET", "/api/sync/logs").await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0]["status"], json!("success"));
    assert_eq!(entries[0]["id"], json!(4));

    let (_, body) = call(&router, "GET", "/api/sync/logs?status=retry&limit=2").await;
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["metadata"]["delaySecs"], json!(5));
    assert!(entries[0]["errorDetails"].as_str().unwrap().contains("timeout"));

    let (status, body) = call(&router, "GET", "/api/sync/logs?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("bogus"));
}

#[tokio::test]
async fn test_retry_failed_endpoint() {
    let (app, handles) = app();
    let router = app.router();
    handles.source.write(1, fields(json!({"n": 1}))).await;
    handles
        .snapshots
        .upsert(1, &json!({"id": 1}), chrono::Utc::now())
        .await
        .unwrap();
    handles.snapshots.mark_failed(1).await.unwrap();

    let (status, body) = call(&router, "POST", "/api/sync/retry-failed").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["queued"], json!(1));

    app.consumer.drain().await.unwrap();
    let (_, body) = call(&router, "GET", "/api/sync/status").await;
    assert_eq!(body["counts"]["failed"], json!(0));
    assert_eq!(body["counts"]["synced"], json!(1));
}

/// Source whose full reads wait until released.
#[derive(Default)]
struct GatedSource {
    inner: MemorySource,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl SourceReader for GatedSource {
    async fn fetch_all(&self) -> anyhow::Result<Vec<SourceRecord>> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.fetch_all().await
    }

    async fn fetch_one(&self, id: i64) -> anyhow::Result<Option<SourceRecord>> {
        self.inner.fetch_one(id).await
    }
}

#[tokio::test]
async fn test_poll_while_cycle_running_conflicts() {
    let source = Arc::new(GatedSource::default());
    let (mut backends, _handles) = Backends::in_memory();
    backends.source = source.clone();
    let app = App::new(backends, &Config::default());
    let router = app.router();

    let first = tokio::spawn({
        let router = router.clone();
        async move { call(&router, "POST", "/api/sync/poll").await }
    });
    source.entered.notified().await;

    let (status, body) = call(&router, "POST", "/api/sync/poll").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["outcome"], json!("skipped"));

    source.release.notify_one();
    let (status, body) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], json!("completed"));
}
