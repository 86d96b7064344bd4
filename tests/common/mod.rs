//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use callrelay::domain::shared::result::Result;
use callrelay::infrastructure::event_bus::{EnvelopeHandler, EventBus};
use callrelay::infrastructure::http::{HttpCore, HttpMethod, HttpResponse};
use callrelay::infrastructure::media::RtpSource;
use callrelay::infrastructure::protocols::webrtc::{MediaSession, MediaSessionFactory};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

pub const SERVER: &str = "https://mobius.example/api/v1/calling/web";
pub const DEVICE_ID: &str = "dev-1";
pub const FAKE_SDP: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Value>,
}

type Responder = Box<dyn Fn(HttpMethod, &str, Option<&Value>) -> HttpResponse + Send + Sync>;

/// HTTP core recording every request and answering from a script.
/// Requests the script does not cover get `200 {}`.
pub struct RecordingHttp {
    requests: Mutex<Vec<Recorded>>,
    responder: Responder,
}

impl RecordingHttp {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(HttpMethod, &str, Option<&Value>) -> Option<HttpResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responder: Box::new(move |method: HttpMethod, url: &str, body: Option<&Value>| {
                responder(method, url, body).unwrap_or_else(|| HttpResponse::json(200, &json!({})))
            }),
        })
    }

    /// Registration succeeds as `DEVICE_ID`, everything else returns `200 {}`
    pub fn registering() -> Arc<Self> {
        Self::new(|method, url, _| registration_response(method, url))
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn matching(&self, method: HttpMethod, suffix: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.url.ends_with(suffix))
            .collect()
    }

    /// Media posts carrying a ROAP message of `message_type`
    pub fn roap_posts(&self, message_type: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == HttpMethod::Post)
            .filter_map(|r| r.body)
            .filter(|body| body["localMedia"]["roap"]["messageType"] == message_type)
            .map(|body| body["localMedia"]["roap"].clone())
            .collect()
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
    }
}

#[async_trait]
impl HttpCore for RecordingHttp {
    async fn issue(&self, method: HttpMethod, url: &str, body: Option<Value>) -> Result<HttpResponse> {
        let response = (self.responder)(method, url, body.as_ref());
        self.requests.lock().push(Recorded {
            method,
            url: url.to_string(),
            body,
        });
        Ok(response)
    }
}

/// Device registration reply for `POST {server}/device`
pub fn registration_response(method: HttpMethod, url: &str) -> Option<HttpResponse> {
    (method == HttpMethod::Post && url == format!("{}/device", SERVER)).then(|| {
        HttpResponse::json(
            200,
            &json!({
                "userId": "user-1",
                "device": {"deviceId": DEVICE_ID, "uri": "https://wdm/devices/dev-1"},
                "keepaliveInterval": 3600
            }),
        )
    })
}

/// Counters shared between a fake media session and its test
#[derive(Default)]
pub struct MediaStats {
    pub offers_created: AtomicUsize,
    pub answers_created: AtomicUsize,
    pub remote_offers: AtomicUsize,
    pub answers_applied: AtomicUsize,
    pub closed: AtomicUsize,
}

impl MediaStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Media session with a minimal signaling state: an ANSWER only applies
/// while a local offer is outstanding.
pub struct FakeMediaSession {
    stats: Arc<MediaStats>,
    awaiting_answer: AtomicBool,
    muted: AtomicBool,
    connected: watch::Sender<bool>,
}

impl FakeMediaSession {
    pub fn new(stats: Arc<MediaStats>) -> Self {
        Self {
            stats,
            awaiting_answer: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            connected: watch::channel(false).0,
        }
    }
}

#[async_trait]
impl MediaSession for FakeMediaSession {
    async fn add_audio_track(&self) -> Result<()> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        self.stats.offers_created.fetch_add(1, Ordering::SeqCst);
        self.awaiting_answer.store(true, Ordering::SeqCst);
        Ok(FAKE_SDP.to_string())
    }

    async fn create_answer(&self) -> Result<String> {
        self.stats.answers_created.fetch_add(1, Ordering::SeqCst);
        Ok(FAKE_SDP.to_string())
    }

    async fn set_remote_offer(&self, _sdp: &str) -> Result<()> {
        self.stats.remote_offers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_remote_answer(&self, _sdp: &str) -> Result<bool> {
        if !self.awaiting_answer.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        self.stats.answers_applied.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn local_track(&self) -> Option<Arc<TrackLocalStaticRTP>> {
        None
    }

    fn remote_track(&self) -> Option<Arc<dyn RtpSource>> {
        None
    }

    fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out fake sessions and keeps their stats, in creation order
#[derive(Default)]
pub struct FakeMediaFactory {
    sessions: Mutex<Vec<Arc<MediaStats>>>,
}

impl FakeMediaFactory {
    pub fn stats(&self, index: usize) -> Arc<MediaStats> {
        Arc::clone(&self.sessions.lock()[index])
    }

    pub fn created(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl MediaSessionFactory for FakeMediaFactory {
    async fn create(&self) -> Result<Box<dyn MediaSession>> {
        let stats = Arc::new(MediaStats::default());
        self.sessions.lock().push(Arc::clone(&stats));
        Ok(Box::new(FakeMediaSession::new(stats)))
    }
}

/// In-process event bus; tests push envelopes with `publish`
#[derive(Default)]
pub struct FakeEventBus {
    connected: AtomicBool,
    connects: AtomicUsize,
    handlers: Mutex<Vec<EnvelopeHandler>>,
}

impl FakeEventBus {
    pub fn publish(&self, envelope: Value) {
        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            handler(envelope.clone());
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventBus for FakeEventBus {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self, _pattern: &str, handler: EnvelopeHandler) {
        self.handlers.lock().push(handler);
    }
}

/// Backend envelope as delivered over the event bus
pub fn envelope(event_type: &str, call_id: &str, message: Option<Value>) -> Value {
    let mut data = json!({
        "eventType": format!("mobius.{}", event_type),
        "callId": call_id,
        "deviceId": DEVICE_ID,
    });
    if let Some(message) = message {
        data["message"] = message;
    }
    json!({ "id": format!("evt-{}", call_id), "data": data })
}

pub fn roap(seq: u32, message_type: &str, sdp: Option<&str>) -> Value {
    let mut message = json!({ "seq": seq, "messageType": message_type });
    if let Some(sdp) = sdp {
        message["sdp"] = json!(sdp);
    }
    message
}

/// Poll `check` until it holds or a second passes
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}
