//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Call direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// Call offered to us by the backend
    Inbound,
    /// Call we dialed
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }
}

/// Call state
///
/// `Idle -> Proceeding -> Alerting -> Connected <-> Held -> Disconnected`.
/// Inbound calls start at `Alerting`. Apart from the hold toggle every
/// transition moves forward, and nothing leaves `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Proceeding,
    Alerting,
    Connected,
    Held,
    Disconnected,
}

impl CallState {
    fn rank(&self) -> u8 {
        match self {
            CallState::Idle => 0,
            CallState::Proceeding => 1,
            CallState::Alerting => 2,
            CallState::Connected | CallState::Held => 3,
            CallState::Disconnected => 4,
        }
    }

    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: &CallState) -> bool {
        use CallState::*;

        match (self, new_state) {
            (Disconnected, _) => false,
            (Connected, Held) | (Held, Connected) => true,
            (from, to) => to.rank() > from.rank(),
        }
    }

    /// Anything that has not been torn down yet
    pub fn is_active(&self) -> bool {
        !matches!(self, CallState::Disconnected)
    }

    /// Media is established (possibly on hold)
    pub fn is_established(&self) -> bool {
        matches!(self, CallState::Connected | CallState::Held)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Proceeding => "proceeding",
            CallState::Alerting => "alerting",
            CallState::Connected => "connected",
            CallState::Held => "held",
            CallState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reason for call ending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// We hung up
    LocalHangup,
    /// The backend reported the far end hung up
    RemoteHangup,
    /// Dial or answer failed before media was established
    Failed(String),
    /// Torn down as part of orchestrator shutdown
    Shutdown,
}

/// Destination address type accepted by call creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    Uri,
    Tel,
}

/// Outbound call destination, serialized as `{"type": "uri", "address": "sip:a@b.com"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(rename = "type")]
    pub dest_type: DestinationType,
    pub address: String,
}

impl Destination {
    pub fn uri(address: impl Into<String>) -> Self {
        Self {
            dest_type: DestinationType::Uri,
            address: address.into(),
        }
    }

    pub fn tel(address: impl Into<String>) -> Self {
        Self {
            dest_type: DestinationType::Tel,
            address: address.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.address.trim().is_empty()
    }
}

/// Transfer flavour for `complete_transfer`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Hand the call to an address we have not called
    Blind,
    /// Join the call to another call we already hold
    Consult,
}
