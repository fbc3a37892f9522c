use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::admin::AdminState;
use crate::blocking::engine::{ViolationSummary, MAX_BLOCK_DURATION};
use crate::blocking::types::IpBlockInfo;
use crate::events::export::{export, ExportFormat};
use crate::events::sink::{EventPage, EventQuery};
use crate::events::types::{DetectorReport, SecurityEvent};
use crate::pipeline::PipelineStatus;
use crate::severity::Severity;
use crate::store::StoreError;
use crate::threat::alerts::{AlertError, ResolveOutcome, SecurityAlert};

/// Failures surfaced by the admin API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("export failed: {0}")]
    Export(#[from] serde_json::Error),
}

impl From<AlertError> for ApiError {
    fn from(error: AlertError) -> Self {
        ApiError::NotFound(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Admin request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub async fn get_status(State(state): State<AdminState>) -> Json<PipelineStatus> {
    Json(state.pipeline.status())
}

pub async fn list_events(State(state): State<AdminState>, Query(query): Query<EventQuery>) -> Json<EventPage> {
    Json(state.pipeline.sink().query(&query))
}

pub async fn submit_event(
    State(state): State<AdminState>,
    Json(report): Json<DetectorReport>,
) -> (StatusCode, Json<SecurityEvent>) {
    let event = state.pipeline.report(report).await;
    (StatusCode::ACCEPTED, Json(event))
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    #[serde(default)]
    pub format: ExportFormat,
}

pub async fn export_events(
    State(state): State<AdminState>,
    Query(params): Query<ExportParams>,
) -> ApiResult<Response> {
    let events = state.pipeline.sink().all();
    let body = export(&events, params.format)?;
    let disposition = format!("attachment; filename=\"security-events.{}\"", params.format.extension());
    Ok((
        [
            (header::CONTENT_TYPE, params.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct AlertParams {
    pub severity: Option<String>,
}

pub async fn list_alerts(
    State(state): State<AdminState>,
    Query(params): Query<AlertParams>,
) -> ApiResult<Json<Vec<SecurityAlert>>> {
    let severity = match params.severity.as_deref() {
        None => None,
        Some(raw) => Some(
            Severity::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("unknown severity '{raw}'")))?,
        ),
    };
    Ok(Json(state.pipeline.correlator().active_alerts(severity)))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolved_by: String,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn resolve_alert(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<SecurityAlert>> {
    let outcome = state
        .pipeline
        .correlator()
        .resolve(id, &request.resolved_by, request.notes)?;
    if let ResolveOutcome::AlreadyResolved(alert) = &outcome {
        tracing::debug!(alert_id = %alert.alert_id, "Alert already resolved");
    }
    Ok(Json(outcome.alert().clone()))
}

pub async fn list_blocks(State(state): State<AdminState>) -> ApiResult<Json<Vec<IpBlockInfo>>> {
    Ok(Json(state.pipeline.blocking().list_blocks().await?))
}

pub async fn block_history(State(state): State<AdminState>) -> Json<Vec<IpBlockInfo>> {
    Json(state.pipeline.blocking().history())
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub ip: IpAddr,
    pub reason: String,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub permanent: bool,
}

pub async fn create_block(
    State(state): State<AdminState>,
    Json(request): Json<BlockRequest>,
) -> ApiResult<(StatusCode, Json<IpBlockInfo>)> {
    let engine = state.pipeline.blocking();
    if engine.is_whitelisted(request.ip) {
        return Err(ApiError::BadRequest(format!("{} is whitelisted", request.ip)));
    }
    let duration = match request.duration_secs {
        Some(0) => return Err(ApiError::BadRequest("duration_secs must be positive".into())),
        Some(secs) if secs > MAX_BLOCK_DURATION.as_secs() => {
            return Err(ApiError::BadRequest(format!(
                "duration_secs must be at most {}",
                MAX_BLOCK_DURATION.as_secs()
            )))
        }
        Some(secs) => Duration::from_secs(secs),
        None => engine.default_block_duration(request.permanent),
    };
    let block = engine
        .block(request.ip, request.reason, duration, request.permanent)
        .await?;
    Ok((StatusCode::CREATED, Json(block)))
}

#[derive(Debug, Deserialize)]
pub struct UnblockRequest {
    pub unblocked_by: String,
    #[serde(default)]
    pub reason: String,
}

pub async fn unblock(
    State(state): State<AdminState>,
    Path(ip): Path<IpAddr>,
    Json(request): Json<UnblockRequest>,
) -> ApiResult<Json<IpBlockInfo>> {
    state
        .pipeline
        .blocking()
        .unblock(ip, &request.unblocked_by, &request.reason)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{ip} is not blocked")))
}

pub async fn get_violations(
    State(state): State<AdminState>,
    Path(ip): Path<IpAddr>,
) -> ApiResult<Json<ViolationSummary>> {
    Ok(Json(state.pipeline.blocking().violation_summary(ip).await?))
}
