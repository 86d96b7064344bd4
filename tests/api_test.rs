//! Control API integration tests

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use callrelay::application::CallOrchestrator;
use callrelay::config::{CallingConfig, DiscoveryConfig};
use callrelay::domain::line::ServerSet;
use callrelay::infrastructure::event_bus::IngressEventBus;
use callrelay::infrastructure::http::{HttpMethod, HttpResponse};
use callrelay::interface::api::{build_router, AppState};
use common::*;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // For `oneshot`

async fn setup_api_test() -> (Router, Arc<CallOrchestrator>, Arc<RecordingHttp>) {
    let create_url = format!("{}/devices/{}/call", SERVER, DEVICE_ID);
    let http = RecordingHttp::new(move |method, url, _| {
        if let Some(response) = registration_response(method, url) {
            return Some(response);
        }
        (method == HttpMethod::Post && url == create_url)
            .then(|| HttpResponse::json(200, &json!({"callId": "out-1"})))
    });
    let orchestrator = CallOrchestrator::new(
        CallingConfig::default(),
        DiscoveryConfig::default(),
        http.clone(),
        Arc::new(FakeMediaFactory::default()),
    );
    orchestrator.set_servers(ServerSet::new(vec![SERVER.into()], Vec::new()));

    // Recorder is built but not installed globally
    let prometheus_handle = PrometheusBuilder::new().build_recorder().handle();
    let events = Arc::new(IngressEventBus::new());
    orchestrator.attach_event_bus(events.clone()).await.unwrap();
    let state = AppState {
        orchestrator: orchestrator.clone(),
        events,
    };
    (build_router(state, prometheus_handle), orchestrator, http)
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_api_health() {
    let (app, _, _) = setup_api_test().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"], "OK");
}

#[tokio::test]
async fn test_api_dial_list_and_hangup() {
    let (app, orchestrator, http) = setup_api_test().await;
    let line = orchestrator.create_line().await.unwrap();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/lines").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["lines"][0]["status"], "active");

    let dial = json!({
        "lineId": line.id().to_string(),
        "destination": {"type": "uri", "address": "sip:bob@example.com"}
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/calls")
                .header("content-type", "application/json")
                .body(Body::from(dial.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["callId"], "out-1");
    assert_eq!(json["data"]["state"], "proceeding");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/calls").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"]["total"], 1);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/calls/out-1/hangup")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(http.matching(HttpMethod::Delete, "/calls/out-1").len(), 1);
    assert!(orchestrator.active_calls().is_empty());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_api_hangup_unknown_call() {
    let (app, _, _) = setup_api_test().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/calls/nope/hangup")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_api_dial_rejects_bad_line_id() {
    let (app, _, http) = setup_api_test().await;

    let dial = json!({
        "lineId": "not-a-uuid",
        "destination": {"type": "tel", "address": "+15551234567"}
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/calls")
                .header("content-type", "application/json")
                .body(Body::from(dial.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(http.requests().is_empty());
}

#[tokio::test]
async fn test_api_metrics_endpoint() {
    let (app, _, _) = setup_api_test().await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_api_posted_envelope_reaches_orchestrator() {
    let (app, orchestrator, _) = setup_api_test().await;
    orchestrator.create_line().await.unwrap();

    let setup = envelope("callsetup", "in-1", Some(roap(1, "OFFER", Some(FAKE_SDP))));
    let response = app.clone().oneshot(post_json("/events", &setup)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["data"], 1);

    let calls = orchestrator.clone();
    assert!(eventually(|| calls.active_calls().len() == 1).await);
    assert_eq!(
        orchestrator.active_calls()[0].call_id().as_deref(),
        Some("in-1")
    );

    // Shutdown disconnects the bus
    orchestrator.shutdown().await;
    let response = app.oneshot(post_json("/events", &setup)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
