//! API Router configuration

use super::calls_handler::{
    dial_call, get_active_calls, get_lines, hangup_call, health_check, post_event, AppState,
};
use super::metrics_handler::metrics_handler;
use super::ws_handler::bridge_ws_handler;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn build_router(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    let health_routes = Router::new().route("/health", get(health_check));

    let call_routes = Router::new()
        .route("/lines", get(get_lines))
        .route("/calls", get(get_active_calls).post(dial_call))
        .route("/calls/:call_id/hangup", post(hangup_call))
        .route("/events", post(post_event));

    let bridge_routes = Router::new().route("/bridge/ws", get(bridge_ws_handler));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    Router::new()
        .merge(health_routes)
        .merge(call_routes)
        .merge(bridge_routes)
        .with_state(state)
        .merge(metrics_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
