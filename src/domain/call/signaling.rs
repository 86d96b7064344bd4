//! Numbered offer/answer signaling messages exchanged with the backend

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Signaling message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Offer,
    Answer,
    Ok,
    Error,
    OfferRequest,
}

impl MessageType {
    /// OFFER and ANSWER carry a session description
    pub fn carries_sdp(&self) -> bool {
        matches!(self, MessageType::Offer | MessageType::Answer)
    }
}

/// Wire message: `{"seq": 1, "messageType": "OFFER", "sdp": "v=0..."}`
///
/// Session identifier fields the backend adds are kept in `extra` and echoed
/// back unchanged on replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    pub seq: u32,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SignalingMessage {
    pub fn offer(seq: u32, sdp: impl Into<String>) -> Self {
        Self::with_sdp(seq, MessageType::Offer, sdp)
    }

    pub fn answer(seq: u32, sdp: impl Into<String>) -> Self {
        Self::with_sdp(seq, MessageType::Answer, sdp)
    }

    pub fn ok(seq: u32) -> Self {
        Self {
            seq,
            message_type: MessageType::Ok,
            sdp: None,
            extra: Map::new(),
        }
    }

    fn with_sdp(seq: u32, message_type: MessageType, sdp: impl Into<String>) -> Self {
        Self {
            seq,
            message_type,
            sdp: Some(sdp.into()),
            extra: Map::new(),
        }
    }

    /// Copy the session identifier fields of `other` onto this reply
    pub fn echo_session(mut self, other: &SignalingMessage) -> Self {
        for (key, value) in &other.extra {
            self.extra.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self
    }

    /// Reject OFFER/ANSWER messages without a usable description
    pub fn validate(&self) -> Result<()> {
        if self.message_type.carries_sdp()
            && self.sdp.as_deref().map_or(true, |sdp| sdp.trim().is_empty())
        {
            return Err(DomainError::Protocol(format!(
                "{:?} seq={} carries no sdp",
                self.message_type, self.seq
            )));
        }
        Ok(())
    }

    /// The description, for messages that passed [`validate`](Self::validate)
    pub fn sdp(&self) -> Result<&str> {
        self.validate()?;
        self.sdp
            .as_deref()
            .ok_or_else(|| DomainError::Protocol(format!("seq={} has no sdp", self.seq)))
    }
}
