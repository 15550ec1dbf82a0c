//! HTTP surface for the translation pipeline.

use crate::error::PipelineError;
use crate::health::{FixReport, HealthSnapshot};
use crate::i18n::{LanguageCode, MetricsReport, TranslationMetrics};
use crate::pipeline::Pipeline;
use crate::progress::{EvaluationProgress, StuckJob};
use crate::security::is_authorized;
use crate::sync::SyncReport;
use crate::translation::{TranslateJobRequest, TranslateJobResponse};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub api_key: Option<Arc<str>>,
    pub poll_interval_secs: u64,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, api_key: Option<&str>, poll_interval_secs: u64) -> Self {
        Self {
            pipeline,
            api_key: api_key.map(Arc::from),
            poll_interval_secs,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/translate", post(translate))
        .route("/sync", post(sync))
        .route("/health", get(health))
        .route("/health/fix", post(fix_health))
        .route("/health/retranslate", post(retranslate_all))
        .route("/progress", get(list_progress))
        .route("/progress/reset-stuck", post(reset_stuck))
        .route("/progress/:language", get(get_progress))
        .route("/evaluate/:language", post(evaluate))
        .route("/approve", post(approve))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let shutdown = state.pipeline.shutdown.clone();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("HTTP server listening on port {}", port);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if is_authorized(state.api_key.as_deref(), request.headers()) {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "Rejected request with missing or invalid API key");
        ApiError::Unauthorized.into_response()
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    BadRequest(String),
    Unauthorized,
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Pipeline(e) => {
                let (status, code) = match &e {
                    PipelineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                    PipelineError::ExternalService(_) => {
                        (StatusCode::BAD_GATEWAY, "external_service_error")
                    }
                    PipelineError::Persistence(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error")
                    }
                    PipelineError::StaleJob { .. } => (StatusCode::CONFLICT, "stale_job"),
                };
                if status.is_server_error() {
                    error!(error = %e, "Request failed");
                }
                (status, code, e.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Missing or invalid API key".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Handlers
// ============================================================================

async fn translate(
    State(state): State<AppState>,
    body: Result<Json<TranslateJobRequest>, JsonRejection>,
) -> ApiResult<TranslateJobResponse> {
    let Json(request) = body?;
    let cancel = state.pipeline.shutdown.child_token();
    Ok(Json(state.pipeline.orchestrator.translate(&request, &cancel).await?))
}

async fn sync(State(state): State<AppState>) -> ApiResult<SyncReport> {
    Ok(Json(state.pipeline.sync.sync().await?))
}

async fn health(State(state): State<AppState>) -> ApiResult<HealthSnapshot> {
    Ok(Json(state.pipeline.health.scan().await?))
}

async fn fix_health(State(state): State<AppState>) -> ApiResult<FixReport> {
    let cancel = state.pipeline.shutdown.child_token();
    Ok(Json(state.pipeline.health.fix_all(&cancel).await?))
}

#[derive(Debug, Default, Deserialize)]
struct RetranslateRequest {
    #[serde(default)]
    confirm: bool,
}

async fn retranslate_all(
    State(state): State<AppState>,
    body: Result<Json<RetranslateRequest>, JsonRejection>,
) -> ApiResult<FixReport> {
    let Json(request) = body?;
    let cancel = state.pipeline.shutdown.child_token();
    Ok(Json(
        state
            .pipeline
            .health
            .retranslate_all(request.confirm, &cancel)
            .await?,
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressOverview {
    languages: Vec<EvaluationProgress>,
    stuck: Vec<StuckJob>,
    average_duration_secs: Option<i64>,
    poll_interval_secs: u64,
}

async fn list_progress(State(state): State<AppState>) -> ApiResult<ProgressOverview> {
    let tracker = &state.pipeline.tracker;
    Ok(Json(ProgressOverview {
        languages: tracker.list().await?,
        stuck: tracker.detect_stuck().await?,
        average_duration_secs: tracker.average_duration().await?.map(|d| d.num_seconds()),
        poll_interval_secs: state.poll_interval_secs,
    }))
}

async fn get_progress(
    State(state): State<AppState>,
    Path(language): Path<String>,
) -> ApiResult<EvaluationProgress> {
    let code = LanguageCode::parse(&language)?;
    Ok(Json(state.pipeline.tracker.get(code.as_str()).await?))
}

async fn reset_stuck(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let reset = state.pipeline.tracker.reset_stuck().await?;
    Ok(Json(json!({ "reset": reset })))
}

/// Begin (or resume) an evaluation and run it in the background.
/// Poll `/progress/:language` for completion.
async fn evaluate(
    State(state): State<AppState>,
    Path(language): Path<String>,
) -> Result<(StatusCode, Json<EvaluationProgress>), ApiError> {
    let progress = state.pipeline.evaluator.begin(&language).await?;

    let pipeline = state.pipeline.clone();
    let started = progress.clone();
    tokio::spawn(async move {
        let cancel = pipeline.shutdown.child_token();
        if let Err(e) = pipeline.evaluator.run(started, &cancel).await {
            error!(error = %e, "Evaluation run failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(progress)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveRequest {
    language: String,
    translation_keys: Vec<String>,
}

async fn approve(
    State(state): State<AppState>,
    body: Result<Json<ApproveRequest>, JsonRejection>,
) -> ApiResult<serde_json::Value> {
    let Json(request) = body?;
    let approved = state
        .pipeline
        .evaluator
        .approve(&request.language, &request.translation_keys)
        .await?;
    Ok(Json(json!({ "approved": approved })))
}

async fn metrics() -> Json<MetricsReport> {
    Json(TranslationMetrics::global().report())
}
