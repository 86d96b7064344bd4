//! Two-codec audio policy shared by every peer connection we build
//!
//! Both the backend-facing session and the browser-facing bridge register
//! the same two codecs, so whatever the backend picks can be relayed to the
//! browser byte for byte without transcoding.

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_PCMU};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};

pub const OPUS_PAYLOAD_TYPE: u8 = 111;
pub const OPUS_CLOCK_RATE: u32 = 48_000;
pub const PCMU_PAYLOAD_TYPE: u8 = 0;
pub const PCMU_CLOCK_RATE: u32 = 8_000;

/// Capability of the outbound audio tracks we create
pub fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: OPUS_CLOCK_RATE,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
        rtcp_feedback: vec![],
    }
}

fn pcmu_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_PCMU.to_owned(),
        clock_rate: PCMU_CLOCK_RATE,
        channels: 1,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// The only codecs a session will ever negotiate
pub fn audio_codecs() -> Vec<RTCRtpCodecParameters> {
    vec![
        RTCRtpCodecParameters {
            capability: opus_capability(),
            payload_type: OPUS_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTCRtpCodecParameters {
            capability: pcmu_capability(),
            payload_type: PCMU_PAYLOAD_TYPE,
            ..Default::default()
        },
    ]
}

/// Build a WebRTC API restricted to [`audio_codecs`]
pub fn restricted_api() -> Result<API> {
    let mut media_engine = MediaEngine::default();
    for codec in audio_codecs() {
        media_engine
            .register_codec(codec, RTPCodecType::Audio)
            .map_err(DomainError::media)?;
    }

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(DomainError::media)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Create a peer connection using the restricted codec set
pub async fn new_peer_connection(ice_servers: &[String]) -> Result<Arc<RTCPeerConnection>> {
    let api = restricted_api()?;

    let config = RTCConfiguration {
        ice_servers: if ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }]
        },
        ..Default::default()
    };

    let pc = api
        .new_peer_connection(config)
        .await
        .map_err(DomainError::media)?;
    Ok(Arc::new(pc))
}
