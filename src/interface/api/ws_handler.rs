//! Browser signaling WebSocket feeding the audio bridge

use super::calls_handler::AppState;
use crate::application::SignalingTransport;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

/// [`SignalingTransport`] over an axum WebSocket
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn recv(&mut self) -> Option<Vec<u8>> {
        while let Some(message) = self.socket.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(text.into_bytes()),
                Ok(Message::Binary(bytes)) => return Some(bytes),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Err(e) => {
                    debug!("Signaling socket error: {}", e);
                    return None;
                }
            }
        }
        None
    }

    async fn send(&mut self, message: Vec<u8>) -> Result<()> {
        let text = String::from_utf8(message).map_err(DomainError::protocol)?;
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| DomainError::Transport(e.to_string()))
    }
}

/// `GET /bridge/ws`
pub async fn bridge_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let Some(bridge) = state.orchestrator.audio_bridge() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "audio bridge not configured").into_response();
    };

    ws.on_upgrade(move |socket| async move {
        info!("Browser signaling client connected");
        let mut transport = WebSocketTransport::new(socket);
        if let Err(e) = bridge.handle_signaling(&mut transport).await {
            warn!("Browser signaling ended with error: {}", e);
        }
        info!("Browser signaling client disconnected");
    })
}
