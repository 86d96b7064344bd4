//! Protocol integrations
pub mod webrtc;
