//! Infrastructure layer - seams to external collaborators
//!
//! HTTP Core, Event Bus, the WebRTC engine and RTP plumbing.

pub mod event_bus;
pub mod http;
pub mod media;
pub mod metrics;
pub mod protocols;
