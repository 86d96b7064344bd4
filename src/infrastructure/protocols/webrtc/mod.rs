//! WebRTC protocol integration
pub mod codecs;
pub mod media_session;
pub mod sdp;

pub use codecs::{audio_codecs, new_peer_connection, opus_capability, OPUS_PAYLOAD_TYPE};
pub use media_session::{
    MediaSession, MediaSessionFactory, WebRtcMediaSession, WebRtcMediaSessionFactory,
};
