//! Call controller - one call's state machine and signaling handshake

use crate::domain::call::{
    CallDirection, CallEvent, CallState, Destination, DisconnectReason, InboundEvent,
    InboundEventType, MessageType, SignalingMessage, TransferKind,
};
use crate::domain::line::DeviceBinding;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::events::EventEmitter;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::CorrelationId;
use crate::infrastructure::http::{join_url, HttpCore, HttpMethod, HttpResponse};
use crate::infrastructure::media::RtpSource;
use crate::infrastructure::protocols::webrtc::{sdp, MediaSession};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

const DTMF_TONES: &str = "0123456789*#ABCD";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallCreated {
    call_id: String,
    #[serde(default)]
    message: Option<SignalingMessage>,
}

/// Serializable view of a call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub correlation_id: CorrelationId,
    pub call_id: Option<String>,
    pub direction: CallDirection,
    pub state: CallState,
    pub destination: Option<Destination>,
    pub device_id: String,
    pub muted: bool,
    pub held: bool,
    pub connected: bool,
    pub disconnect_reason: Option<DisconnectReason>,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
}

struct CallInner {
    call_id: Option<String>,
    state: CallState,
    destination: Option<Destination>,
    muted: bool,
    held: bool,
    connected: bool,
    established: bool,
    answering: bool,
    disconnect_reason: Option<DisconnectReason>,
    seq: u32,
    /// Backend offer of an inbound call waiting for `answer`
    pending_offer: Option<SignalingMessage>,
    created_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
}

/// Drives a single call.
///
/// Caller-initiated operations return errors. Backend-initiated handling
/// (`handle_inbound_event`) never fails; problems are logged and emitted as
/// `call_error`.
pub struct CallController {
    correlation_id: CorrelationId,
    direction: CallDirection,
    binding: DeviceBinding,
    media_id: Uuid,
    http: Arc<dyn HttpCore>,
    media: Box<dyn MediaSession>,
    inner: Mutex<CallInner>,
    events: EventEmitter<CallEvent>,
}

impl CallController {
    /// New outbound call in `Idle`, ready to `dial`
    pub fn outbound(
        binding: DeviceBinding,
        destination: Destination,
        http: Arc<dyn HttpCore>,
        media: Box<dyn MediaSession>,
    ) -> Arc<Self> {
        Self::build(
            CallDirection::Outbound,
            CallState::Idle,
            binding,
            Some(destination),
            None,
            http,
            media,
        )
    }

    /// New inbound call in `Alerting`, offered by the backend as `call_id`
    pub fn inbound(
        binding: DeviceBinding,
        call_id: Option<String>,
        http: Arc<dyn HttpCore>,
        media: Box<dyn MediaSession>,
    ) -> Arc<Self> {
        Self::build(
            CallDirection::Inbound,
            CallState::Alerting,
            binding,
            None,
            call_id,
            http,
            media,
        )
    }

    fn build(
        direction: CallDirection,
        state: CallState,
        binding: DeviceBinding,
        destination: Option<Destination>,
        call_id: Option<String>,
        http: Arc<dyn HttpCore>,
        media: Box<dyn MediaSession>,
    ) -> Arc<Self> {
        Arc::new(Self {
            correlation_id: CorrelationId::new(),
            direction,
            binding,
            media_id: Uuid::new_v4(),
            http,
            media,
            inner: Mutex::new(CallInner {
                call_id,
                state,
                destination,
                muted: false,
                held: false,
                connected: false,
                established: false,
                answering: false,
                disconnect_reason: None,
                seq: 0,
                pending_offer: None,
                created_at: Utc::now(),
                connected_at: None,
            }),
            events: EventEmitter::new(),
        })
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn device_id(&self) -> &str {
        &self.binding.device_id
    }

    pub fn events(&self) -> &EventEmitter<CallEvent> {
        &self.events
    }

    pub fn call_id(&self) -> Option<String> {
        self.inner.lock().call_id.clone()
    }

    pub fn state(&self) -> CallState {
        self.inner.lock().state
    }

    pub fn is_muted(&self) -> bool {
        self.inner.lock().muted
    }

    pub fn is_held(&self) -> bool {
        self.inner.lock().held
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.inner.lock().disconnect_reason.clone()
    }

    /// True if `call_id` or `correlation_id` identifies this call
    pub fn matches(&self, call_id: Option<&str>, correlation_id: Option<&str>) -> bool {
        let by_call_id = match (call_id, self.inner.lock().call_id.as_deref()) {
            (Some(theirs), Some(ours)) => theirs == ours,
            _ => false,
        };
        by_call_id || correlation_id.map_or(false, |c| c == self.correlation_id.to_string())
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let inner = self.inner.lock();
        CallSnapshot {
            correlation_id: self.correlation_id,
            call_id: inner.call_id.clone(),
            direction: self.direction,
            state: inner.state,
            destination: inner.destination.clone(),
            device_id: self.binding.device_id.clone(),
            muted: inner.muted,
            held: inner.held,
            connected: inner.connected,
            disconnect_reason: inner.disconnect_reason.clone(),
            created_at: inner.created_at,
            connected_at: inner.connected_at,
        }
    }

    // ----- media accessors used by the audio bridge -----

    pub fn local_track(&self) -> Option<Arc<TrackLocalStaticRTP>> {
        self.media.local_track()
    }

    pub fn remote_track(&self) -> Option<Arc<dyn RtpSource>> {
        self.media.remote_track()
    }

    pub fn media_connected(&self) -> watch::Receiver<bool> {
        self.media.connected()
    }

    pub fn is_media_connected(&self) -> bool {
        *self.media.connected().borrow()
    }

    // ----- caller-initiated operations -----

    /// Place the outbound call
    pub async fn dial(&self) -> Result<()> {
        let destination = {
            let mut inner = self.inner.lock();
            if inner.state != CallState::Idle {
                return Err(DomainError::InvalidStateTransition(format!(
                    "cannot dial in state {}",
                    inner.state
                )));
            }
            let destination = match &inner.destination {
                Some(d) if !d.is_empty() => d.clone(),
                _ => {
                    return Err(DomainError::ValidationError(
                        "destination address is empty".into(),
                    ))
                }
            };
            inner.state = CallState::Proceeding;
            destination
        };

        info!(
            "Dialing {} on device {} (correlation {})",
            destination.address, self.binding.device_id, self.correlation_id
        );

        match self.place_call(&destination).await {
            Ok(()) => {
                self.events.emit(CallEvent::Progress);
                Ok(())
            }
            Err(e) => {
                error!("Dial {} failed: {}", self.correlation_id, e);
                self.finish(DisconnectReason::Failed(e.to_string()), true).await;
                Err(e)
            }
        }
    }

    async fn place_call(&self, destination: &Destination) -> Result<()> {
        self.media.add_audio_track().await?;
        let local = sdp::to_backend(&self.media.create_offer().await?);
        let offer = SignalingMessage::offer(self.next_seq(), local);

        let body = json!({
            "device": self.device_json(),
            "callee": destination,
            "localMedia": self.local_media(&offer),
        });
        let path = format!("devices/{}/call", self.binding.device_id);
        let created: CallCreated = self
            .send(HttpMethod::Post, &path, body, "call create")
            .await?
            .parse()?;

        info!(
            "Call {} created by backend as {}",
            self.correlation_id, created.call_id
        );
        self.inner.lock().call_id = Some(created.call_id);

        if let Some(message) = created.message {
            self.process_signaling(message).await?;
        }
        Ok(())
    }

    /// Answer an alerting call. Without `remote_offer` the offer delivered
    /// with the call-setup event is used.
    pub async fn answer(&self, remote_offer: Option<&str>) -> Result<()> {
        let pending = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, CallState::Alerting | CallState::Idle) {
                return Err(DomainError::InvalidStateTransition(format!(
                    "cannot answer in state {}",
                    inner.state
                )));
            }
            if inner.answering {
                return Err(DomainError::InvalidStateTransition(
                    "answer already in progress".into(),
                ));
            }
            inner.answering = true;
            inner.pending_offer.clone()
        };

        let result = self.answer_with(remote_offer, pending.as_ref()).await;
        self.inner.lock().answering = false;

        match result {
            Ok(()) => {
                let changed = self.advance(CallState::Connected, |inner| {
                    inner.connected = true;
                    inner.established = true;
                    inner.pending_offer = None;
                    inner.connected_at = Some(Utc::now());
                });
                if changed {
                    info!("Call {} answered", self.correlation_id);
                    self.events.emit(CallEvent::Connect);
                    self.events.emit(CallEvent::Established);
                }
                Ok(())
            }
            Err(e) => {
                error!("Answer {} failed: {}", self.correlation_id, e);
                Err(e)
            }
        }
    }

    async fn answer_with(
        &self,
        remote_offer: Option<&str>,
        pending: Option<&SignalingMessage>,
    ) -> Result<()> {
        let offer_sdp = match (remote_offer, pending) {
            (Some(sdp), _) => sdp.to_string(),
            (None, Some(message)) => message.sdp()?.to_string(),
            (None, None) => {
                return Err(DomainError::ValidationError(
                    "no remote offer to answer".into(),
                ))
            }
        };
        let seq = match pending {
            Some(message) => message.seq,
            None => self.next_seq(),
        };

        self.media.add_audio_track().await?;
        self.media.set_remote_offer(&offer_sdp).await?;
        let local = sdp::to_backend(&self.media.create_answer().await?);

        let mut answer = SignalingMessage::answer(seq, local);
        if let Some(offer) = pending {
            answer = answer.echo_session(offer);
        }
        self.post_media(answer).await
    }

    /// Hang up. Ending a disconnected call is a no-op.
    pub async fn end(&self) -> Result<()> {
        self.finish(DisconnectReason::LocalHangup, true).await;
        Ok(())
    }

    /// Hang up with an explicit reason
    pub async fn terminate(&self, reason: DisconnectReason) {
        self.finish(reason, true).await;
    }

    pub async fn hold(&self) -> Result<()> {
        self.change_hold(true).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.change_hold(false).await
    }

    /// Toggle hold: resume a held call, hold a connected one
    pub async fn do_hold_resume(&self) -> Result<()> {
        let held = self.state() == CallState::Held;
        self.change_hold(!held).await
    }

    async fn change_hold(&self, hold: bool) -> Result<()> {
        let (required, target, action) = if hold {
            (CallState::Connected, CallState::Held, "hold")
        } else {
            (CallState::Held, CallState::Connected, "resume")
        };

        let call_id = {
            let inner = self.inner.lock();
            if inner.state != required {
                return Err(DomainError::InvalidStateTransition(format!(
                    "cannot {} in state {}",
                    action, inner.state
                )));
            }
            inner.call_id.clone()
        };

        let body = json!({ "device": self.device_json(), "callId": call_id });
        let path = format!("services/callhold/{}", action);

        match self.send(HttpMethod::Post, &path, body, action).await {
            Ok(_) => {
                let changed = self.advance(target, |inner| inner.held = hold);
                if changed {
                    info!("Call {} {}", self.correlation_id, target);
                    self.events
                        .emit(if hold { CallEvent::Held } else { CallEvent::Resumed });
                }
                Ok(())
            }
            Err(e) => {
                warn!("Call {} {} failed: {}", self.correlation_id, action, e);
                self.events.emit(if hold {
                    CallEvent::HoldError(e.to_string())
                } else {
                    CallEvent::ResumeError(e.to_string())
                });
                Err(e)
            }
        }
    }

    pub async fn mute(&self) -> Result<()> {
        self.set_mute(true)
    }

    pub async fn unmute(&self) -> Result<()> {
        self.set_mute(false)
    }

    fn set_mute(&self, muted: bool) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if !inner.state.is_established() {
                return Err(DomainError::InvalidStateTransition(format!(
                    "cannot change mute in state {}",
                    inner.state
                )));
            }
            if inner.muted == muted {
                return Ok(());
            }
            inner.muted = muted;
        }
        self.media.set_muted(muted);
        self.events
            .emit(if muted { CallEvent::Muted } else { CallEvent::Unmuted });
        Ok(())
    }

    /// Send one DTMF tone
    pub async fn send_digit(&self, tone: &str) -> Result<()> {
        if tone.is_empty() || !tone.chars().all(|c| DTMF_TONES.contains(c)) {
            return Err(DomainError::ValidationError(format!(
                "invalid DTMF tone '{}'",
                tone
            )));
        }

        let call_id = {
            let inner = self.inner.lock();
            if inner.state != CallState::Connected {
                return Err(DomainError::InvalidStateTransition(format!(
                    "cannot send DTMF in state {}",
                    inner.state
                )));
            }
            inner.call_id.clone().ok_or_else(|| {
                DomainError::InvalidStateTransition("backend call id not known yet".into())
            })?
        };

        let body = json!({ "device": self.device_json(), "callId": call_id, "tone": tone });
        let path = format!("devices/{}/calls/{}/dtmf", self.binding.device_id, call_id);
        self.send(HttpMethod::Post, &path, body, "dtmf").await?;
        debug!("Call {} sent DTMF {}", self.correlation_id, tone);
        Ok(())
    }

    /// Commit a transfer. Blind transfers need `target`, consult transfers
    /// need `other_call_id`.
    pub async fn complete_transfer(
        &self,
        kind: TransferKind,
        other_call_id: Option<&str>,
        target: Option<&str>,
    ) -> Result<()> {
        let call_id = {
            let inner = self.inner.lock();
            if !inner.state.is_established() {
                return Err(DomainError::InvalidStateTransition(format!(
                    "cannot transfer in state {}",
                    inner.state
                )));
            }
            inner.call_id.clone().ok_or_else(|| {
                DomainError::InvalidStateTransition("backend call id not known yet".into())
            })?
        };

        let context = match kind {
            TransferKind::Blind => {
                let target = target.filter(|t| !t.trim().is_empty()).ok_or_else(|| {
                    DomainError::ValidationError("blind transfer needs a target".into())
                })?;
                json!({ "blindTransferContext": {
                    "transferorCallId": call_id,
                    "destination": target,
                }})
            }
            TransferKind::Consult => {
                let other = other_call_id.filter(|o| !o.is_empty()).ok_or_else(|| {
                    DomainError::ValidationError("consult transfer needs the other call id".into())
                })?;
                json!({ "consultTransferContext": {
                    "transferorCallId": call_id,
                    "transferToCallId": other,
                }})
            }
        };

        let mut body = json!({ "device": self.device_json(), "callId": call_id });
        if let (Some(fields), Some(context)) = (body.as_object_mut(), context.as_object()) {
            fields.extend(context.clone());
        }

        match self
            .send(HttpMethod::Post, "services/calltransfer/commit", body, "transfer")
            .await
        {
            Ok(_) => {
                info!("Call {} transfer ({:?}) committed", self.correlation_id, kind);
                Ok(())
            }
            Err(e) => {
                warn!("Call {} transfer failed: {}", self.correlation_id, e);
                self.events.emit(CallEvent::TransferError(e.to_string()));
                Err(e)
            }
        }
    }

    // ----- backend-initiated handling -----

    /// Consume one backend event. Never fails.
    pub async fn handle_inbound_event(&self, event: InboundEvent) {
        if let Some(caller_id) = event.caller_id.clone() {
            self.events.emit(CallEvent::CallerId(caller_id));
        }
        for service in &event.mid_call_events {
            self.events.emit(CallEvent::MidCall(service.clone()));
        }

        let kind = event.event_type.clone();
        if let Err(e) = self.dispatch_inbound(event).await {
            warn!(
                "Call {} failed handling {:?}: {}",
                self.correlation_id, kind, e
            );
            self.events.emit(CallEvent::Error(e.to_string()));
        }
    }

    async fn dispatch_inbound(&self, event: InboundEvent) -> Result<()> {
        match event.event_type {
            InboundEventType::CallSetup => {
                if self.direction != CallDirection::Inbound {
                    debug!("Ignoring call setup for outbound call {}", self.correlation_id);
                    return Ok(());
                }
                {
                    let mut inner = self.inner.lock();
                    if inner.call_id.is_none() {
                        inner.call_id = event.call_id.clone();
                    }
                    if inner.state == CallState::Idle {
                        inner.state = CallState::Alerting;
                    }
                }
                self.route_message(event.message).await
            }
            InboundEventType::CallProgress => {
                self.adopt_call_id(event.call_id.as_deref());
                if self.advance(CallState::Alerting, |_| {}) {
                    self.events.emit(CallEvent::Alerting);
                }
                self.route_message(event.message).await
            }
            InboundEventType::CallConnected => {
                let changed = {
                    let mut inner = self.inner.lock();
                    let allowed = inner.state.can_transition_to(&CallState::Connected)
                        && inner.state != CallState::Held;
                    if allowed {
                        inner.state = CallState::Connected;
                        inner.connected = true;
                        inner.connected_at = Some(Utc::now());
                    }
                    allowed
                };
                if changed {
                    info!("Call {} connected", self.correlation_id);
                    self.events.emit(CallEvent::Connect);
                }
                self.route_message(event.message).await
            }
            InboundEventType::CallMedia => self.route_message(event.message).await,
            InboundEventType::CallDisconnected => {
                self.finish(DisconnectReason::RemoteHangup, false).await;
                Ok(())
            }
            InboundEventType::Other(tag) => {
                debug!("Call {} ignoring event {}", self.correlation_id, tag);
                Ok(())
            }
        }
    }

    async fn route_message(&self, message: Option<SignalingMessage>) -> Result<()> {
        match message {
            Some(message) => self.process_signaling(message).await,
            None => Ok(()),
        }
    }

    /// Embedded signaling message handler
    async fn process_signaling(&self, message: SignalingMessage) -> Result<()> {
        message.validate()?;
        self.observe_seq(message.seq);
        debug!(
            "Call {} signaling {:?} seq={}",
            self.correlation_id, message.message_type, message.seq
        );

        match message.message_type {
            MessageType::Answer => {
                let applied = self.media.set_remote_answer(message.sdp()?).await?;
                if !applied {
                    debug!(
                        "Call {} ignoring duplicate ANSWER seq={}",
                        self.correlation_id, message.seq
                    );
                    return Ok(());
                }
                let ok = SignalingMessage::ok(message.seq).echo_session(&message);
                self.post_media(ok).await?;
                self.mark_established();
                Ok(())
            }
            MessageType::Offer => {
                let established = self.inner.lock().state.is_established();
                if !established && self.direction == CallDirection::Inbound {
                    debug!(
                        "Call {} holding offer seq={} until answered",
                        self.correlation_id, message.seq
                    );
                    self.inner.lock().pending_offer = Some(message);
                    return Ok(());
                }

                self.media.add_audio_track().await?;
                self.media.set_remote_offer(message.sdp()?).await?;
                let local = sdp::to_backend(&self.media.create_answer().await?);
                let answer = SignalingMessage::answer(message.seq, local).echo_session(&message);
                self.post_media(answer).await
            }
            MessageType::Ok => {
                debug!(
                    "Call {} negotiation seq={} complete",
                    self.correlation_id, message.seq
                );
                self.mark_established();
                Ok(())
            }
            MessageType::OfferRequest => {
                self.media.add_audio_track().await?;
                let local = sdp::to_backend(&self.media.create_offer().await?);
                let offer = SignalingMessage::offer(message.seq, local).echo_session(&message);
                self.post_media(offer).await
            }
            MessageType::Error => {
                let detail = Value::Object(message.extra.clone()).to_string();
                warn!(
                    "Call {} backend signaling ERROR seq={}: {}",
                    self.correlation_id, message.seq, detail
                );
                self.events.emit(CallEvent::Error(format!(
                    "signaling error seq={}: {}",
                    message.seq, detail
                )));
                Ok(())
            }
        }
    }

    // ----- internals -----

    fn mark_established(&self) {
        let first = {
            let mut inner = self.inner.lock();
            let first = !inner.established && inner.state.is_active();
            inner.established = true;
            first
        };
        if first {
            self.events.emit(CallEvent::Established);
        }
    }

    fn adopt_call_id(&self, call_id: Option<&str>) {
        let mut inner = self.inner.lock();
        if inner.call_id.is_none() {
            inner.call_id = call_id.map(str::to_string);
        }
    }

    /// Check-then-set transition; `extra` runs under the same lock
    fn advance(&self, to: CallState, extra: impl FnOnce(&mut CallInner)) -> bool {
        let mut inner = self.inner.lock();
        if !inner.state.can_transition_to(&to) {
            return false;
        }
        inner.state = to;
        extra(&mut inner);
        true
    }

    async fn finish(&self, reason: DisconnectReason, notify_backend: bool) {
        let (previous, call_id) = {
            let mut inner = self.inner.lock();
            if inner.state == CallState::Disconnected {
                return;
            }
            let previous = inner.state;
            inner.state = CallState::Disconnected;
            inner.connected = false;
            inner.held = false;
            inner.disconnect_reason = Some(reason.clone());
            (previous, inner.call_id.clone())
        };

        info!(
            "Call {} disconnected from {} ({:?})",
            self.correlation_id, previous, reason
        );

        if let (true, Some(call_id)) = (notify_backend && previous != CallState::Idle, call_id) {
            let url = join_url(
                &self.binding.server_url,
                &format!("devices/{}/calls/{}", self.binding.device_id, call_id),
            );
            match self.http.issue(HttpMethod::Delete, &url, None).await {
                Ok(response) if !response.is_success() => {
                    warn!("Call delete for {} returned {}", call_id, response.status)
                }
                Ok(_) => {}
                Err(e) => warn!("Call delete for {} failed: {}", call_id, e),
            }
        }

        if let Err(e) = self.media.close().await {
            warn!("Closing media for call {} failed: {}", self.correlation_id, e);
        }

        self.events.emit(CallEvent::Disconnect(reason));
    }

    fn next_seq(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.seq += 1;
        inner.seq
    }

    fn observe_seq(&self, seq: u32) {
        let mut inner = self.inner.lock();
        inner.seq = inner.seq.max(seq);
    }

    fn device_json(&self) -> Value {
        json!({
            "deviceId": self.binding.device_id,
            "correlationId": self.correlation_id.to_string(),
        })
    }

    fn local_media(&self, message: &SignalingMessage) -> Value {
        json!({ "roap": message, "mediaId": self.media_id.to_string() })
    }

    async fn post_media(&self, message: SignalingMessage) -> Result<()> {
        let call_id = self.call_id().ok_or_else(|| {
            DomainError::InvalidStateTransition("backend call id not known yet".into())
        })?;
        let body = json!({
            "device": self.device_json(),
            "callId": call_id,
            "localMedia": self.local_media(&message),
        });
        let path = format!(
            "devices/{}/calls/{}/media",
            self.binding.device_id, call_id
        );
        self.send(HttpMethod::Post, &path, body, "media update").await?;
        Ok(())
    }

    /// Every request except teardown goes through here; nothing is sent once
    /// the call is disconnected.
    async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Value,
        context: &str,
    ) -> Result<HttpResponse> {
        if self.state() == CallState::Disconnected {
            return Err(DomainError::InvalidStateTransition(format!(
                "{} after disconnect",
                context
            )));
        }
        let url = join_url(&self.binding.server_url, path);
        self.http
            .issue(method, &url, Some(body))
            .await?
            .error_for_status(context)
    }
}
