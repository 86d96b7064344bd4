//! Orchestrator integration tests: line lifecycle, inbound routing and
//! teardown with fake HTTP, media and event bus

mod common;

use callrelay::application::{CallOrchestrator, LineEvent, LineRegistry, OrchestratorEvent};
use callrelay::config::{CallingConfig, DiscoveryConfig};
use callrelay::domain::call::{CallDirection, CallState, Destination, DisconnectReason};
use callrelay::domain::line::{LineStatus, ServerSet};
use callrelay::domain::shared::error::DomainError;
use callrelay::domain::shared::value_objects::LineId;
use callrelay::infrastructure::event_bus::EventBus;
use callrelay::infrastructure::http::{HttpMethod, HttpResponse};
use common::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Registration plus call creation; outbound calls get ids `out-1`, `out-2`, ...
fn backend() -> Arc<RecordingHttp> {
    let created = AtomicUsize::new(0);
    let create_url = format!("{}/devices/{}/call", SERVER, DEVICE_ID);
    RecordingHttp::new(move |method, url, _| {
        if let Some(response) = registration_response(method, url) {
            return Some(response);
        }
        (method == HttpMethod::Post && url == create_url).then(|| {
            let n = created.fetch_add(1, Ordering::SeqCst) + 1;
            HttpResponse::json(200, &json!({ "callId": format!("out-{}", n) }))
        })
    })
}

struct Harness {
    http: Arc<RecordingHttp>,
    media: Arc<FakeMediaFactory>,
    orchestrator: Arc<CallOrchestrator>,
    line: Arc<LineRegistry>,
}

async fn harness() -> Harness {
    let http = backend();
    let media = Arc::new(FakeMediaFactory::default());
    let orchestrator = CallOrchestrator::new(
        CallingConfig::default(),
        DiscoveryConfig::default(),
        http.clone(),
        media.clone(),
    );
    orchestrator.set_servers(ServerSet::new(vec![SERVER.into()], Vec::new()));
    let line = orchestrator.create_line().await.unwrap();
    Harness {
        http,
        media,
        orchestrator,
        line,
    }
}

fn count_orchestrator(orchestrator: &CallOrchestrator) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    orchestrator
        .events()
        .on("incoming_call", move |_: &OrchestratorEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        });
    counter
}

fn count_line(line: &LineRegistry) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    line.events().on("incoming_call", move |_: &LineEvent| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    counter
}

fn setup(call_id: &str) -> serde_json::Value {
    envelope("callsetup", call_id, Some(roap(1, "OFFER", Some(FAKE_SDP))))
}

#[tokio::test]
async fn test_create_line_registers_once() {
    let h = harness().await;

    assert_eq!(h.line.status().await, LineStatus::Active);
    assert_eq!(h.line.device_id().await.as_deref(), Some(DEVICE_ID));
    assert!(h.line.is_keepalive_running());
    assert_eq!(h.orchestrator.lines().len(), 1);
    assert_eq!(h.http.matching(HttpMethod::Post, "/device").len(), 1);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_create_line_without_servers_fails() {
    let orchestrator = CallOrchestrator::new(
        CallingConfig::default(),
        DiscoveryConfig::default(),
        RecordingHttp::registering(),
        Arc::new(FakeMediaFactory::default()),
    );
    let err = orchestrator.create_line().await.err().unwrap();
    assert!(matches!(err, DomainError::ValidationError(_)));
    assert!(orchestrator.lines().is_empty());
}

#[tokio::test]
async fn test_call_setup_creates_one_alerting_call() {
    let h = harness().await;
    let on_orchestrator = count_orchestrator(&h.orchestrator);
    let on_line = count_line(&h.line);

    h.orchestrator.route_inbound_event(setup("in-1")).await;

    let calls = h.orchestrator.active_calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.direction(), CallDirection::Inbound);
    assert_eq!(call.state(), CallState::Alerting);
    assert_eq!(call.call_id().as_deref(), Some("in-1"));
    assert_eq!(on_orchestrator.load(Ordering::SeqCst), 1);
    assert_eq!(on_line.load(Ordering::SeqCst), 1);

    // Later events for the same call are routed to it, not treated as new calls
    h.orchestrator
        .route_inbound_event(envelope("callprogress", "in-1", None))
        .await;
    assert_eq!(h.orchestrator.active_calls().len(), 1);
    assert_eq!(on_orchestrator.load(Ordering::SeqCst), 1);

    // Answering uses the offer that came with the setup
    call.answer(None).await.unwrap();
    assert_eq!(call.state(), CallState::Connected);
    let answers = h.http.roap_posts("ANSWER");
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["seq"], 1);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_call_setup_suppressed_while_dialing_out() {
    let h = harness().await;
    let on_orchestrator = count_orchestrator(&h.orchestrator);

    let outbound = h
        .orchestrator
        .make_call(h.line.id(), Destination::uri("sip:bob@example.com"))
        .await
        .unwrap();
    assert_eq!(outbound.state(), CallState::Proceeding);

    // The backend echoes our own call back as incoming, twice
    h.orchestrator.route_inbound_event(setup("in-2")).await;
    h.orchestrator.route_inbound_event(setup("in-3")).await;

    let calls = h.orchestrator.active_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].direction(), CallDirection::Outbound);
    assert_eq!(on_orchestrator.load(Ordering::SeqCst), 0);
    assert_eq!(h.media.created(), 1);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_unrelated_events_are_dropped() {
    let h = harness().await;

    h.orchestrator
        .route_inbound_event(envelope("callprogress", "nobody", None))
        .await;
    h.orchestrator
        .route_inbound_event(json!({"data": {"eventType": "conversation.activity"}}))
        .await;
    h.orchestrator
        .route_inbound_event(json!({"data": {"eventType": "mobius.callsetup", "callId": "x"}}))
        .await;

    assert!(h.orchestrator.active_calls().is_empty());
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_make_call_on_unknown_line() {
    let h = harness().await;

    let err = h
        .orchestrator
        .make_call(LineId::new(), Destination::uri("sip:bob@example.com"))
        .await
        .err().unwrap();
    assert!(matches!(err, DomainError::NotFound(_)));

    let err = h
        .orchestrator
        .make_call(h.line.id(), Destination::tel(""))
        .await
        .err().unwrap();
    assert!(matches!(err, DomainError::ValidationError(_)));
    assert!(h.orchestrator.active_calls().is_empty());

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_remote_hangup_removes_call() {
    let h = harness().await;
    let call = h
        .orchestrator
        .make_call(h.line.id(), Destination::uri("sip:bob@example.com"))
        .await
        .unwrap();

    h.orchestrator
        .route_inbound_event(envelope("calldisconnected", "out-1", None))
        .await;

    assert_eq!(call.state(), CallState::Disconnected);
    assert_eq!(call.disconnect_reason(), Some(DisconnectReason::RemoteHangup));
    assert!(h.orchestrator.active_calls().is_empty());
    assert!(h
        .http
        .matching(HttpMethod::Delete, "/calls/out-1")
        .is_empty());

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_ends_calls_and_deregisters_lines() {
    let h = harness().await;
    let first = h
        .orchestrator
        .make_call(h.line.id(), Destination::uri("sip:bob@example.com"))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .make_call(h.line.id(), Destination::tel("+15551234567"))
        .await
        .unwrap();
    assert_eq!(h.orchestrator.active_calls().len(), 2);

    h.orchestrator.shutdown().await;

    for call in [&first, &second] {
        assert_eq!(call.state(), CallState::Disconnected);
        assert_eq!(call.disconnect_reason(), Some(DisconnectReason::Shutdown));
    }
    assert_eq!(MediaStats::get(&h.media.stats(0).closed), 1);
    assert_eq!(MediaStats::get(&h.media.stats(1).closed), 1);
    assert_eq!(h.http.matching(HttpMethod::Delete, "/calls/out-1").len(), 1);
    assert_eq!(h.http.matching(HttpMethod::Delete, "/calls/out-2").len(), 1);
    assert_eq!(h.http.matching(HttpMethod::Delete, "/devices/dev-1").len(), 1);

    assert_eq!(h.line.status().await, LineStatus::Inactive);
    assert!(!h.line.is_keepalive_running());
    assert!(h.orchestrator.active_calls().is_empty());
    assert!(h.orchestrator.lines().is_empty());

    // Second shutdown has nothing left to do
    let before = h.http.requests().len();
    h.orchestrator.shutdown().await;
    assert_eq!(h.http.requests().len(), before);
}

#[tokio::test]
async fn test_event_bus_envelopes_are_dispatched() {
    let h = harness().await;
    let bus = Arc::new(FakeEventBus::default());

    h.orchestrator.attach_event_bus(bus.clone()).await.unwrap();
    assert_eq!(bus.connects(), 1);

    bus.publish(setup("in-7"));
    let orchestrator = h.orchestrator.clone();
    assert!(eventually(|| orchestrator.active_calls().len() == 1).await);

    bus.publish(envelope("calldisconnected", "in-7", None));
    assert!(eventually(|| orchestrator.active_calls().is_empty()).await);

    h.orchestrator.shutdown().await;
    assert!(!bus.is_connected());
}
