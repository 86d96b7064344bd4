//! Interface layer - the local HTTP control API and the browser signaling
//! WebSocket

pub mod api;
