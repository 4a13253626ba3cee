//! HTTP control plane.
//!
//! | Method | Path | Effect |
//! |---|---|---|
//! | GET | `/` | liveness |
//! | POST | `/api/sync/backfill` | enqueue an INSERT for every source row |
//! | GET | `/api/sync/status` | counts per status, queue depth, last poll cycle |
//! | GET | `/api/sync/status/:id` | one snapshot |
//! | GET | `/api/sync/logs?limit&status&record_id` | audit entries, newest first |
//! | POST | `/api/sync/reconcile` | drift report |
//! | POST | `/api/sync/retry-failed` | re-enqueue failed snapshots |
//! | POST | `/api/sync/poll` | run one poll cycle now |

use std::fmt;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use snapshot_store::AuditQuery;
use sync_core::AuditStatus;
use sync_pipeline::{PollOutcome, SyncService};
use tracing::error;

pub const DEFAULT_LOG_LIMIT: usize = 100;
pub const MAX_LOG_LIMIT: usize = 1000;

pub fn router(service: SyncService) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/sync/backfill", post(backfill))
        .route("/api/sync/status", get(status))
        .route("/api/sync/status/:id", get(snapshot))
        .route("/api/sync/logs", get(logs))
        .route("/api/sync/reconcile", post(reconcile))
        .route("/api/sync/retry-failed", post(retry_failed))
        .route("/api/sync/poll", post(poll))
        .with_state(service)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(message) | ApiError::NotFound(message) => f.write_str(message),
            ApiError::Internal(err) => write!(f, "{err:#}"),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal(err) => {
                error!("Request failed: {err:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

async fn health() -> Response {
    Json(json!({ "status": "ok", "service": "snapshot-sync" })).into_response()
}

async fn backfill(State(service): State<SyncService>) -> ApiResult {
    let queued = service.backfill().await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": queued }))).into_response())
}

async fn status(State(service): State<SyncService>) -> ApiResult {
    Ok(Json(service.status().await?).into_response())
}

async fn snapshot(State(service): State<SyncService>, Path(id): Path<i64>) -> ApiResult {
    match service.snapshot(id).await? {
        Some(snapshot) => Ok(Json(snapshot).into_response()),
        None => Err(ApiError::NotFound(format!("no snapshot for record {id}"))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsParams {
    pub limit: Option<usize>,
    pub status: Option<String>,
    pub record_id: Option<i64>,
}

impl LogsParams {
    pub fn to_query(&self) -> Result<AuditQuery, ApiError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<AuditStatus>)
            .transpose()
            .map_err(|e| ApiError::BadRequest(format!("{e}; expected success, failed or retry")))?;

        Ok(AuditQuery {
            limit: self.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT),
            status,
            record_id: self.record_id,
        })
    }
}

async fn logs(State(service): State<SyncService>, Query(params): Query<LogsParams>) -> ApiResult {
    let query = params.to_query()?;
    Ok(Json(service.logs(&query).await?).into_response())
}

async fn reconcile(State(service): State<SyncService>) -> ApiResult {
    Ok(Json(service.reconcile().await?).into_response())
}

async fn retry_failed(State(service): State<SyncService>) -> ApiResult {
    let queued = service.retry_failed().await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": queued }))).into_response())
}

async fn poll(State(service): State<SyncService>) -> ApiResult {
    let outcome = service.poll_now().await?;
    let status = match outcome {
        PollOutcome::Completed(_) => StatusCode::OK,
        PollOutcome::Skipped => StatusCode::CONFLICT,
    };
    Ok((status, Json(outcome)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_params_defaults_and_cap() {
        let query = LogsParams::default().to_query().unwrap();
        assert_eq!(query.limit, DEFAULT_LOG_LIMIT);

        let query = LogsParams {
            limit: Some(5000),
            status: Some("retry".to_string()),
            record_id: None,
        }
        .to_query()
        .unwrap();
        assert_eq!(query.limit, MAX_LOG_LIMIT);
        assert_eq!(query.status, Some(AuditStatus::Retry));

        let bad = LogsParams {
            status: Some("exploded".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad.to_query(), Err(ApiError::BadRequest(_))));
    }
}
