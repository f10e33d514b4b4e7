use crate::handler::HandlerError;
use crate::logging::TraceId;
use crate::state::AppState;
use alarmlens_analysis::EnrichError;
use alarmlens_common::types::EnrichedResult;
use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

/// Uniform response envelope.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 0 on success.
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "upstream_error" => 1201,
        "dispatch_error" => 1202,
        "timeout" => 1203,
        "shutting_down" => 1204,
        "internal_error" => 1500,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/events", post(handle_event))
}

#[derive(Serialize)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    channel: String,
}

async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime,
            channel: state.handler.channel_type().to_string(),
        },
    )
}

/// Accepts a raw "CloudWatch Alarm State Change" event, enriches it and
/// dispatches the result. Responds with the dispatched result.
async fn handle_event(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Bytes,
) -> Response {
    match state.handler.handle_json(&body, &state.shutdown).await {
        Ok(result) => success_response::<EnrichedResult>(StatusCode::OK, &trace_id, result),
        Err(e) => {
            tracing::error!(trace_id = %trace_id.0, error = %e, "Event handling failed");
            let (status, code) = classify_error(&e);
            error_response(status, &trace_id, code, &e.to_string())
        }
    }
}

fn classify_error(err: &HandlerError) -> (StatusCode, &'static str) {
    match err {
        HandlerError::InvalidEvent(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        HandlerError::Enrich(EnrichError::AlarmNotFound(_)) => {
            (StatusCode::NOT_FOUND, "not_found")
        }
        HandlerError::Enrich(EnrichError::Cancelled) => {
            (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
        }
        HandlerError::Enrich(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
        HandlerError::Dispatch(_) => (StatusCode::BAD_GATEWAY, "dispatch_error"),
        HandlerError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
    }
}
