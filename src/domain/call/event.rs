//! Call notifications

use crate::domain::call::value_object::DisconnectReason;
use crate::domain::shared::events::NamedEvent;
use serde_json::Value;

/// Notifications emitted by a call controller
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    Progress,
    Alerting,
    Connect,
    Established,
    Held,
    Resumed,
    Muted,
    Unmuted,
    Disconnect(DisconnectReason),
    /// Informational caller-id update forwarded verbatim
    CallerId(Value),
    /// Informational mid-call service notification forwarded verbatim
    MidCall(Value),
    HoldError(String),
    ResumeError(String),
    TransferError(String),
    /// Failure while handling a backend-initiated event
    Error(String),
}

impl NamedEvent for CallEvent {
    fn name(&self) -> &'static str {
        match self {
            CallEvent::Progress => "progress",
            CallEvent::Alerting => "alerting",
            CallEvent::Connect => "connect",
            CallEvent::Established => "established",
            CallEvent::Held => "held",
            CallEvent::Resumed => "resumed",
            CallEvent::Muted => "mute",
            CallEvent::Unmuted => "unmute",
            CallEvent::Disconnect(_) => "disconnect",
            CallEvent::CallerId(_) => "caller_id",
            CallEvent::MidCall(_) => "mid_call",
            CallEvent::HoldError(_) => "hold_error",
            CallEvent::ResumeError(_) => "resume_error",
            CallEvent::TransferError(_) => "transfer_error",
            CallEvent::Error(_) => "call_error",
        }
    }
}
