//! Backend-facing media session
//!
//! Wraps one peer connection restricted to the two-codec audio policy,
//! produces and applies complete (fully gathered) descriptions, and exposes
//! the tracks the audio bridge relays between.

use super::codecs::{new_peer_connection, opus_capability};
use super::sdp;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::infrastructure::media::RtpSource;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// One negotiated media leg towards the call-control backend
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Add the bidirectional audio transceiver
    async fn add_audio_track(&self) -> Result<()>;

    /// Complete local offer, after candidate gathering finished
    async fn create_offer(&self) -> Result<String>;

    /// Complete local answer to the applied remote offer
    async fn create_answer(&self) -> Result<String>;

    /// Apply a backend offer (inbound transform applied here)
    async fn set_remote_offer(&self, sdp: &str) -> Result<()>;

    /// Apply a backend answer. Returns `false` without touching the session
    /// when negotiation is already stable, i.e. the answer is a duplicate.
    async fn set_remote_answer(&self, sdp: &str) -> Result<bool>;

    /// Track carrying audio towards the backend
    fn local_track(&self) -> Option<Arc<TrackLocalStaticRTP>>;

    /// Track carrying audio from the backend; may stay unset for a while after connect
    fn remote_track(&self) -> Option<Arc<dyn RtpSource>>;

    /// Flips to `true` once the peer connection reports connected
    fn connected(&self) -> watch::Receiver<bool>;

    fn set_muted(&self, muted: bool);

    fn is_muted(&self) -> bool;

    /// Idempotent
    async fn close(&self) -> Result<()>;
}

/// Builds media sessions for new calls
#[async_trait]
pub trait MediaSessionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn MediaSession>>;
}

/// `webrtc`-crate implementation of [`MediaSession`]
pub struct WebRtcMediaSession {
    id: Uuid,
    pc: Arc<RTCPeerConnection>,
    local_track: Mutex<Option<Arc<TrackLocalStaticRTP>>>,
    remote_track: Arc<Mutex<Option<Arc<TrackRemote>>>>,
    connected_tx: Arc<watch::Sender<bool>>,
    /// Serializes remote description changes
    negotiation: tokio::sync::Mutex<()>,
    muted: AtomicBool,
    closed: AtomicBool,
}

impl WebRtcMediaSession {
    pub async fn new(ice_servers: &[String]) -> Result<Self> {
        let pc = new_peer_connection(ice_servers).await?;
        let id = Uuid::new_v4();
        let remote_track = Arc::new(Mutex::new(None));
        let (connected_tx, _) = watch::channel(false);
        let connected_tx = Arc::new(connected_tx);

        let slot = Arc::clone(&remote_track);
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            info!(
                "Media session {} received remote track (ssrc={}, codec={})",
                id,
                track.ssrc(),
                track.codec().capability.mime_type
            );
            *slot.lock() = Some(track);
            Box::pin(async {})
        }));

        let tx = Arc::clone(&connected_tx);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!("Media session {} peer connection state: {}", id, state);
            if state == RTCPeerConnectionState::Connected {
                tx.send_replace(true);
            }
            Box::pin(async {})
        }));

        debug!("Created media session {}", id);
        Ok(Self {
            id,
            pc,
            local_track: Mutex::new(None),
            remote_track,
            connected_tx,
            negotiation: tokio::sync::Mutex::new(()),
            muted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn signaling_state(&self) -> RTCSignalingState {
        self.pc.signaling_state()
    }

    /// Set the local description and wait for ICE gathering to finish
    async fn finish_local(&self, description: RTCSessionDescription) -> Result<String> {
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(description)
            .await
            .map_err(DomainError::media)?;
        let _ = gather_complete.recv().await;

        self.pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .ok_or_else(|| DomainError::Media("local description missing after gathering".into()))
    }
}

#[async_trait]
impl MediaSession for WebRtcMediaSession {
    async fn add_audio_track(&self) -> Result<()> {
        if self.local_track.lock().is_some() {
            return Ok(());
        }

        let track = Arc::new(TrackLocalStaticRTP::new(
            opus_capability(),
            "audio".to_owned(),
            format!("callrelay-{}", self.id),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(DomainError::media)?;

        // RTCP must be read for the interceptors to keep working.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        *self.local_track.lock() = Some(track);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self.pc.create_offer(None).await.map_err(DomainError::media)?;
        let sdp = self.finish_local(offer).await?;
        debug!("Media session {} created offer", self.id);
        Ok(sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self.pc.create_answer(None).await.map_err(DomainError::media)?;
        let sdp = self.finish_local(answer).await?;
        debug!("Media session {} created answer", self.id);
        Ok(sdp)
    }

    async fn set_remote_offer(&self, sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp::from_backend(sdp)).map_err(DomainError::protocol)?;
        let _negotiation = self.negotiation.lock().await;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(DomainError::media)
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<bool> {
        // Held across the check and the apply so a concurrent duplicate sees Stable.
        let _negotiation = self.negotiation.lock().await;
        if self.pc.signaling_state() == RTCSignalingState::Stable {
            debug!("Media session {} already stable, ignoring answer", self.id);
            return Ok(false);
        }

        let answer =
            RTCSessionDescription::answer(sdp::from_backend(sdp)).map_err(DomainError::protocol)?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(DomainError::media)?;
        Ok(true)
    }

    fn local_track(&self) -> Option<Arc<TrackLocalStaticRTP>> {
        self.local_track.lock().clone()
    }

    fn remote_track(&self) -> Option<Arc<dyn RtpSource>> {
        self.remote_track
            .lock()
            .clone()
            .map(|track| track as Arc<dyn RtpSource>)
    }

    fn connected(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing media session {}", self.id);
        if let Err(e) = self.pc.close().await {
            warn!("Media session {} close failed: {}", self.id, e);
            return Err(DomainError::media(e));
        }
        Ok(())
    }
}

/// Factory producing [`WebRtcMediaSession`]s
pub struct WebRtcMediaSessionFactory {
    ice_servers: Vec<String>,
}

impl WebRtcMediaSessionFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl MediaSessionFactory for WebRtcMediaSessionFactory {
    async fn create(&self) -> Result<Box<dyn MediaSession>> {
        Ok(Box::new(WebRtcMediaSession::new(&self.ice_servers).await?))
    }
}
