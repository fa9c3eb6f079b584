//! Axum JSON API over the reconciliation pipeline.
//!
//! Thin glue by design: every handler parses its input, calls one
//! pipeline operation, and maps the typed error onto a status code.

use std::sync::Arc;

use arfu_core::{Domain, MasterRecord, NormalizedRecord, ReconcileSummary};
use arfu_recon::{export_filename, IngestError, Reconciler};
use arfu_store::{PgStore, RecordStore, StoreConfig, StoreError};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::error;

pub const CRATE_NAME: &str = "arfu-web";

#[derive(Clone)]
pub struct AppState {
    recon: Arc<Reconciler<Arc<dyn RecordStore>>>,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            recon: Arc::new(Reconciler::new(store)),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/{domain}", get(list_handler))
        .route("/api/{domain}/preview", post(preview_handler))
        .route("/api/{domain}/staging", post(staging_handler))
        .route("/api/{domain}/sync", post(sync_handler))
        .route("/api/{domain}/upload", post(upload_handler))
        .route("/api/{domain}/annotate", post(annotate_handler))
        .route("/api/{domain}/export", get(export_handler))
        .with_state(state)
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("ARFU_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let store = PgStore::connect(&StoreConfig::from_env()).await?;
    let state = AppState::new(Arc::new(store));
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

#[derive(Debug)]
enum ApiError {
    UnknownDomain(String),
    Validation(String),
    NotFound(String),
    Store(StoreError),
    Internal(anyhow::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key, .. } => ApiError::NotFound(key),
            other => ApiError::Store(other),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Normalize(e) => ApiError::Validation(e.to_string()),
            IngestError::Store(e) => e.into(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_phase: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::UnknownDomain(name) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: format!("unknown domain {name:?}"),
                    failed_phase: None,
                },
            ),
            ApiError::Validation(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: message,
                    failed_phase: None,
                },
            ),
            ApiError::NotFound(key) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: format!("no record with key {key:?}"),
                    failed_phase: None,
                },
            ),
            ApiError::Store(err) => {
                error!(error = %err, "store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: err.to_string(),
                        failed_phase: err.failed_phase().map(|p| p.to_string()),
                    },
                )
            }
            ApiError::Internal(err) => {
                error!(error = %err, "internal failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: err.to_string(),
                        failed_phase: None,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn parse_domain(raw: &str) -> Result<Domain, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::UnknownDomain(raw.to_string()))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_handler(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Json<Vec<MasterRecord>>, ApiError> {
    let domain = parse_domain(&domain)?;
    let records = state.recon.store().fetch_master(domain).await?;
    Ok(Json(records))
}

/// Parse an uploaded extract and return the normalized rows without any
/// store mutation.
async fn preview_handler(
    Path(domain): Path<String>,
    body: String,
) -> Result<Json<Vec<NormalizedRecord>>, ApiError> {
    let domain = parse_domain(&domain)?;
    let records = arfu_ingest::normalize(domain, body.as_bytes())
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(Json(records))
}

/// Replace the staging snapshot from already-normalized rows.
async fn staging_handler(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(records): Json<Vec<NormalizedRecord>>,
) -> Result<StatusCode, ApiError> {
    let domain = parse_domain(&domain)?;
    state.recon.stage(domain, &records).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_handler(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Json<ReconcileSummary>, ApiError> {
    let domain = parse_domain(&domain)?;
    let summary = state.recon.sync(domain).await?;
    Ok(Json(summary))
}

#[derive(Serialize)]
struct UploadResponse {
    staged_rows: usize,
    deleted: u64,
    inserted: u64,
}

/// One-shot pipeline: normalize, replace staging, reconcile.
async fn upload_handler(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    body: String,
) -> Result<Json<UploadResponse>, ApiError> {
    let domain = parse_domain(&domain)?;
    let records = state.recon.ingest_and_stage(domain, body.as_bytes()).await?;
    let summary = state.recon.sync(domain).await?;
    Ok(Json(UploadResponse {
        staged_rows: records.len(),
        deleted: summary.deleted,
        inserted: summary.inserted,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateRequest {
    key: String,
    #[serde(default)]
    note: String,
    #[serde(default)]
    action_date: Option<NaiveDate>,
}

async fn annotate_handler(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(request): Json<AnnotateRequest>,
) -> Result<StatusCode, ApiError> {
    let domain = parse_domain(&domain)?;
    state
        .recon
        .annotate(domain, &request.key, &request.note, request.action_date)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn export_handler(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Response, ApiError> {
    let domain = parse_domain(&domain)?;
    let csv = state
        .recon
        .export_csv(domain)
        .await
        .map_err(ApiError::Internal)?;
    let filename = export_filename(domain, Utc::now().date_naive());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        csv,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arfu_store::MemStore;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> Router {
        app(AppState::new(Arc::new(MemStore::new())))
    }

    fn post_body(uri: &str, content_type: &str, body: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let resp = test_app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn upload_stages_and_syncs_in_one_call() {
        let app = test_app();
        let csv = "Quote,Name,Total Amount\nQ-1,Acme,$10\nQ-2,Globex,$20\n";
        let resp = app
            .clone()
            .oneshot(post_body("/api/quotes/upload", "text/csv", csv))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["staged_rows"], 2);
        assert_eq!(json["inserted"], 2);
        assert_eq!(json["deleted"], 0);

        let list = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/quotes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(list.status(), StatusCode::OK);
        let rows = body_json(list).await;
        assert_eq!(rows.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn preview_does_not_mutate_anything() {
        let app = test_app();
        let csv = "Quote,Name,Total Amount\nQ-1,<b>Acme</b>,$10\n";
        let resp = app
            .clone()
            .oneshot(post_body("/api/quotes/preview", "text/csv", csv))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let rows = body_json(resp).await;
        assert_eq!(rows[0]["display_name"], "Acme");

        let list = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/quotes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(list).await.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn malformed_upload_is_unprocessable() {
        let resp = test_app()
            .oneshot(post_body(
                "/api/quotes/upload",
                "text/csv",
                "Name,Total Amount\nAcme,$10\n",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn staging_then_sync_via_json_rows() {
        let app = test_app();
        let rows = serde_json::json!([
            { "key": "Q-1", "display_name": "Acme", "due_date": null, "location": null, "amount": "10.00" }
        ]);
        let resp = app
            .clone()
            .oneshot(post_body(
                "/api/quotes/staging",
                "application/json",
                &rows.to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app
            .oneshot(post_body("/api/quotes/sync", "application/json", ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["inserted"], 1);
    }

    #[tokio::test]
    async fn annotate_unknown_key_is_404() {
        let resp = test_app()
            .oneshot(post_body(
                "/api/invoices/annotate",
                "application/json",
                r#"{"key":"missing","note":"call back","actionDate":"2024-05-01"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_domain_is_404() {
        let resp = test_app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/orders")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn export_sets_csv_headers_and_filename() {
        let app = test_app();
        app.clone()
            .oneshot(post_body(
                "/api/invoices/upload",
                "text/csv",
                "Invoice,Customer Name,Total Amount\n1001,Acme,$250.00\n",
            ))
            .await
            .unwrap();

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/invoices/export")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/csv");
        let disposition = resp.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=invoices_"));
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("\"1001\""));
    }
}
