//! Call and line management API handlers

use super::dto::{ActiveCallsResponse, ApiResponse, DialRequest, LinesResponse};
use crate::application::{CallOrchestrator, CallSnapshot};
use crate::domain::shared::value_objects::LineId;
use crate::infrastructure::event_bus::{EventBus, IngressEventBus};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CallOrchestrator>,
    /// Backend envelopes posted to `/events` enter here
    pub events: Arc<IngressEventBus>,
}

/// Health check endpoint
pub async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("OK"))
}

/// Get registered lines
pub async fn get_lines(State(state): State<AppState>) -> Json<ApiResponse<LinesResponse>> {
    let mut lines = Vec::new();
    for line in state.orchestrator.lines() {
        lines.push(line.snapshot().await);
    }
    let total = lines.len();
    Json(ApiResponse::success(LinesResponse { lines, total }))
}

/// Get active calls
pub async fn get_active_calls(
    State(state): State<AppState>,
) -> Json<ApiResponse<ActiveCallsResponse>> {
    let calls: Vec<CallSnapshot> = state
        .orchestrator
        .active_calls()
        .iter()
        .map(|call| call.snapshot())
        .collect();
    let total = calls.len();
    Json(ApiResponse::success(ActiveCallsResponse { calls, total }))
}

/// Place an outbound call
pub async fn dial_call(
    State(state): State<AppState>,
    Json(request): Json<DialRequest>,
) -> Result<Json<ApiResponse<CallSnapshot>>, StatusCode> {
    info!(
        "API: Dialing {} on line {}",
        request.destination.address, request.line_id
    );

    let Some(line_id) = LineId::parse(&request.line_id) else {
        return Err(StatusCode::BAD_REQUEST);
    };

    match state
        .orchestrator
        .make_call(line_id, request.destination)
        .await
    {
        Ok(call) => Ok(Json(ApiResponse::success(call.snapshot()))),
        Err(e) => {
            error!("API: Failed to dial: {}", e);
            Ok(Json(ApiResponse::error(e.to_string())))
        }
    }
}

/// Hang up a call by correlation id or backend call id
pub async fn hangup_call(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> Result<Json<ApiResponse<String>>, StatusCode> {
    info!("API: Hanging up call {}", call_id);

    let Some(call) = state.orchestrator.find_call(&call_id) else {
        return Err(StatusCode::NOT_FOUND);
    };

    match call.end().await {
        Ok(()) => Ok(Json(ApiResponse::success(format!(
            "Call {} hung up",
            call_id
        )))),
        Err(e) => {
            error!("API: Failed to hang up call: {}", e);
            Ok(Json(ApiResponse::error(e.to_string())))
        }
    }
}

/// Forward one backend envelope onto the event bus
pub async fn post_event(
    State(state): State<AppState>,
    Json(envelope): Json<Value>,
) -> Result<(StatusCode, Json<ApiResponse<usize>>), StatusCode> {
    if !state.events.is_connected() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let delivered = state.events.publish(envelope);
    debug!("API: Envelope delivered to {} subscribers", delivered);
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(delivered))))
}
