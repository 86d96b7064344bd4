//! Audio bridge - browser-facing peer connection relaying RTP to and from
//! the attached call's media session
//!
//! Three background tasks live as long as the bridge: the call→browser relay,
//! the silence generator, and one browser→call relay per browser track. All of
//! them stop on the bridge's cancellation token.

use crate::application::call_controller::CallController;
use crate::config::MediaConfig;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::CorrelationId;
use crate::infrastructure::media::{
    CallView, GateDecision, RelayGate, RtpSink, RtpSource, SilenceGenerator, ThrottledLog,
};
use crate::infrastructure::metrics::{self, RelayDirection};
use crate::infrastructure::protocols::webrtc::{new_peer_connection, opus_capability};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Bridge timing and ICE settings
#[derive(Debug, Clone)]
pub struct AudioBridgeConfig {
    pub ice_servers: Vec<String>,
    pub silence_interval: Duration,
    pub remote_track_poll: Duration,
}

impl AudioBridgeConfig {
    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            silence_interval: config.silence_interval(),
            remote_track_poll: config.remote_track_poll(),
        }
    }
}

impl Default for AudioBridgeConfig {
    fn default() -> Self {
        Self::from_config(&MediaConfig::default())
    }
}

/// Browser signaling message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BrowserSignal {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate { candidate: RTCIceCandidateInit },
}

/// Bidirectional byte-message channel to the browser
#[async_trait]
pub trait SignalingTransport: Send {
    /// Next message; `None` once the channel is closed
    async fn recv(&mut self) -> Option<Vec<u8>>;

    async fn send(&mut self, message: Vec<u8>) -> Result<()>;
}

type CallSlot = Arc<Mutex<Option<Weak<CallController>>>>;

fn current_call(slot: &CallSlot) -> Option<Arc<CallController>> {
    slot.lock().as_ref().and_then(Weak::upgrade)
}

fn is_attached(slot: &CallSlot, id: CorrelationId) -> bool {
    current_call(slot).map_or(false, |call| call.correlation_id() == id)
}

enum Step {
    Inbound(Option<Vec<u8>>),
    Candidate(Option<RTCIceCandidateInit>),
}

/// Browser-facing WebRTC session bridged to at most one call
pub struct AudioBridge {
    id: Uuid,
    pc: Arc<RTCPeerConnection>,
    browser_track: Arc<TrackLocalStaticRTP>,
    call: CallSlot,
    token: CancellationToken,
    silence: Arc<SilenceGenerator>,
    candidates: Mutex<Option<mpsc::UnboundedReceiver<RTCIceCandidateInit>>>,
    closed: AtomicBool,
}

impl AudioBridge {
    pub async fn new(config: AudioBridgeConfig) -> Result<Arc<Self>> {
        let id = Uuid::new_v4();
        let pc = new_peer_connection(&config.ice_servers).await?;
        let token = CancellationToken::new();
        let call: CallSlot = Arc::new(Mutex::new(None));

        let browser_track = Arc::new(TrackLocalStaticRTP::new(
            opus_capability(),
            "audio".to_owned(),
            format!("callrelay-bridge-{}", id),
        ));
        let sender = pc
            .add_track(Arc::clone(&browser_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(DomainError::media)?;

        let rtcp_token = token.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    _ = rtcp_token.cancelled() => break,
                    read = sender.read(&mut buf) => if read.is_err() { break },
                }
            }
        });

        let silence = SilenceGenerator::start(
            Arc::clone(&browser_track) as Arc<dyn RtpSink>,
            config.silence_interval,
            &token,
        );

        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidate_tx.send(init);
                    }
                    Err(e) => warn!("Bridge {} could not serialize candidate: {}", id, e),
                }
            }
            Box::pin(async {})
        }));

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!("Bridge {} peer connection state: {}", id, state);
            Box::pin(async {})
        }));

        let slot = Arc::clone(&call);
        let track_token = token.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            info!(
                "Bridge {} received browser track (ssrc={}, codec={})",
                id,
                track.ssrc(),
                track.codec().capability.mime_type
            );
            tokio::spawn(relay_browser_to_call(
                track,
                Arc::clone(&slot),
                track_token.clone(),
            ));
            Box::pin(async {})
        }));

        tokio::spawn(relay_call_to_browser(
            Arc::clone(&call),
            Arc::clone(&browser_track) as Arc<dyn RtpSink>,
            Arc::clone(&silence),
            token.clone(),
            config.remote_track_poll,
        ));

        info!("Audio bridge {} ready", id);
        Ok(Arc::new(Self {
            id,
            pc,
            browser_track,
            call,
            token,
            silence,
            candidates: Mutex::new(Some(candidate_rx)),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Track carrying audio towards the browser
    pub fn browser_track(&self) -> Arc<TrackLocalStaticRTP> {
        Arc::clone(&self.browser_track)
    }

    /// Bridge `call`; replaces any previously attached call
    pub fn attach_call(&self, call: &Arc<CallController>) {
        info!(
            "Bridge {} attached to call {}",
            self.id,
            call.correlation_id()
        );
        *self.call.lock() = Some(Arc::downgrade(call));
    }

    pub fn detach_call(&self) {
        if self.call.lock().take().is_some() {
            info!("Bridge {} detached", self.id);
        }
    }

    /// Detach only if `id` is the attached call
    pub fn detach_if(&self, id: CorrelationId) -> bool {
        let mut slot = self.call.lock();
        let attached = slot
            .as_ref()
            .and_then(Weak::upgrade)
            .map_or(true, |call| call.correlation_id() == id);
        if attached && slot.is_some() {
            *slot = None;
            debug!("Bridge {} detached from call {}", self.id, id);
            return true;
        }
        false
    }

    pub fn get_call(&self) -> Option<Arc<CallController>> {
        current_call(&self.call)
    }

    pub fn is_silence_running(&self) -> bool {
        self.silence.is_running()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Serve one browser signaling session. Returns when the transport closes.
    pub async fn handle_signaling<T: SignalingTransport>(&self, transport: &mut T) -> Result<()> {
        let mut candidates = self.candidates.lock().take();
        info!("Bridge {} signaling session started", self.id);

        let result = self.signaling_loop(transport, &mut candidates).await;

        // Hand the candidate stream back so the next session keeps trickling.
        if let Some(rx) = candidates {
            *self.candidates.lock() = Some(rx);
        }
        match &result {
            Ok(()) => info!("Bridge {} signaling session ended", self.id),
            Err(e) => warn!("Bridge {} signaling session failed: {}", self.id, e),
        }
        result
    }

    async fn signaling_loop<T: SignalingTransport>(
        &self,
        transport: &mut T,
        candidates: &mut Option<mpsc::UnboundedReceiver<RTCIceCandidateInit>>,
    ) -> Result<()> {
        loop {
            let step = match candidates.as_mut() {
                Some(rx) => tokio::select! {
                    message = transport.recv() => Step::Inbound(message),
                    candidate = rx.recv() => Step::Candidate(candidate),
                },
                None => Step::Inbound(transport.recv().await),
            };

            match step {
                Step::Inbound(None) => break,
                Step::Inbound(Some(bytes)) => {
                    if let Err(e) = self.on_browser_message(&bytes, transport).await {
                        warn!("Bridge {} signaling message failed: {}", self.id, e);
                    }
                }
                Step::Candidate(Some(candidate)) => {
                    let message = BrowserSignal::IceCandidate { candidate };
                    transport.send(serde_json::to_vec(&message)?).await?;
                }
                Step::Candidate(None) => *candidates = None,
            }
        }
        Ok(())
    }

    async fn on_browser_message<T: SignalingTransport>(
        &self,
        bytes: &[u8],
        transport: &mut T,
    ) -> Result<()> {
        match serde_json::from_slice::<BrowserSignal>(bytes)? {
            BrowserSignal::Offer { sdp } => {
                debug!("Bridge {} received browser offer", self.id);
                let offer = RTCSessionDescription::offer(sdp).map_err(DomainError::protocol)?;
                self.pc
                    .set_remote_description(offer)
                    .await
                    .map_err(DomainError::media)?;

                let answer = self
                    .pc
                    .create_answer(None)
                    .await
                    .map_err(DomainError::media)?;
                let mut gather_complete = self.pc.gathering_complete_promise().await;
                self.pc
                    .set_local_description(answer)
                    .await
                    .map_err(DomainError::media)?;
                let _ = gather_complete.recv().await;

                let sdp = self
                    .pc
                    .local_description()
                    .await
                    .map(|d| d.sdp)
                    .ok_or_else(|| DomainError::Media("bridge answer missing".into()))?;
                transport
                    .send(serde_json::to_vec(&BrowserSignal::Answer { sdp })?)
                    .await
            }
            BrowserSignal::Answer { sdp } => {
                let answer = RTCSessionDescription::answer(sdp).map_err(DomainError::protocol)?;
                self.pc
                    .set_remote_description(answer)
                    .await
                    .map_err(DomainError::media)
            }
            BrowserSignal::IceCandidate { candidate } => self
                .pc
                .add_ice_candidate(candidate)
                .await
                .map_err(DomainError::media),
        }
    }

    /// Stop relays and silence, then close the peer connection. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing audio bridge {}", self.id);
        self.token.cancel();
        self.silence.stop();
        self.detach_call();
        self.pc.close().await.map_err(DomainError::media)
    }
}

/// Browser → call. Packets are dropped until the attached call has a target
/// track and its media session connected.
async fn relay_browser_to_call(track: Arc<TrackRemote>, slot: CallSlot, token: CancellationToken) {
    let mut gate = RelayGate::new();
    let mut failures = ThrottledLog::default();
    let mut forwarded: u64 = 0;

    loop {
        let read = tokio::select! {
            _ = token.cancelled() => break,
            read = track.read_rtp() => read,
        };
        let packet = match read {
            Ok((packet, _)) => packet,
            Err(e) => {
                debug!("Browser track {} ended: {}", track.ssrc(), e);
                break;
            }
        };

        let call = current_call(&slot);
        let key = call.as_ref().map(|c| c.correlation_id().to_string());
        let target = call.as_ref().and_then(|c| c.local_track());
        let view = match (&call, &key) {
            (Some(call), Some(key)) => Some(CallView {
                key: key.as_str(),
                has_target: target.is_some(),
                connected: gate.is_open() || call.is_media_connected(),
                muted: call.is_muted(),
            }),
            _ => None,
        };

        let decision = gate.evaluate(view);
        if decision != GateDecision::Forward {
            continue;
        }
        let Some(target) = target else { continue };

        match target.write_packet(&packet).await {
            Ok(()) => {
                forwarded += 1;
                metrics::record_relayed_packet(RelayDirection::BrowserToCall);
                if forwarded == 1 {
                    info!("First browser packet forwarded to call");
                }
            }
            Err(e) => {
                if let Some(n) = failures.record() {
                    warn!("Browser->call write failed ({} so far): {}", n, e);
                }
            }
        }
    }
    debug!("Browser->call relay exited after {} packets", forwarded);
}

/// Call → browser. Polls for the attached call's remote track, then relays
/// until the track ends or the call is detached.
async fn relay_call_to_browser(
    slot: CallSlot,
    browser: Arc<dyn RtpSink>,
    silence: Arc<SilenceGenerator>,
    token: CancellationToken,
    poll: Duration,
) {
    let mut failures = ThrottledLog::default();

    'outer: loop {
        let (id, track) = loop {
            if let Some(call) = current_call(&slot) {
                if call.is_media_connected() {
                    if let Some(track) = call.remote_track() {
                        break (call.correlation_id(), track);
                    }
                }
            }
            tokio::select! {
                _ = token.cancelled() => break 'outer,
                _ = tokio::time::sleep(poll) => {}
            }
        };

        info!("Relaying call {} audio to browser", id);
        loop {
            let read = tokio::select! {
                _ = token.cancelled() => break 'outer,
                read = track.read_packet() => read,
            };
            let packet = match read {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("Call {} remote track ended: {}", id, e);
                    break;
                }
            };
            if !is_attached(&slot, id) {
                debug!("Call {} detached, leaving relay", id);
                break;
            }

            match browser.write_packet(&packet).await {
                Ok(()) => {
                    metrics::record_relayed_packet(RelayDirection::CallToBrowser);
                    if silence.stop() {
                        info!("Real audio flowing from call {}, silence stopped", id);
                    }
                }
                Err(e) => {
                    if let Some(n) = failures.record() {
                        warn!("Call->browser write failed ({} so far): {}", n, e);
                    }
                }
            }
        }

        // An ended track stays visible until the call detaches.
        tokio::select! {
            _ = token.cancelled() => break 'outer,
            _ = tokio::time::sleep(poll) => {}
        }
    }
    debug!("Call->browser relay exited");
}
