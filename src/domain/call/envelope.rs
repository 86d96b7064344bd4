//! Inbound backend event envelopes delivered over the Event Bus

use super::signaling::SignalingMessage;
use crate::domain::shared::result::Result;
use serde::Deserialize;
use serde_json::Value;

/// Backend event kind, decoded from the prefixed `eventType` tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEventType {
    CallSetup,
    CallProgress,
    CallConnected,
    CallMedia,
    CallDisconnected,
    Other(String),
}

impl InboundEventType {
    /// Decode `tag` after stripping `prefix`; `None` for events outside the prefix
    pub fn from_tag(tag: &str, prefix: &str) -> Option<Self> {
        let kind = tag.strip_prefix(prefix)?;
        Some(match kind {
            "callsetup" => InboundEventType::CallSetup,
            "callprogress" => InboundEventType::CallProgress,
            "callconnected" => InboundEventType::CallConnected,
            "media" => InboundEventType::CallMedia,
            "calldisconnected" => InboundEventType::CallDisconnected,
            other => InboundEventType::Other(other.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEventData {
    event_type: String,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    message: Option<SignalingMessage>,
    #[serde(default)]
    caller_id: Option<Value>,
    #[serde(default)]
    mid_call_service: Option<Vec<Value>>,
}

/// One decoded backend event. Consumed by a single dispatch, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub event_type: InboundEventType,
    pub call_id: Option<String>,
    pub correlation_id: Option<String>,
    pub device_id: Option<String>,
    pub message: Option<SignalingMessage>,
    pub caller_id: Option<Value>,
    pub mid_call_events: Vec<Value>,
}

impl InboundEvent {
    /// Decode a raw envelope. The payload may sit under a `data` key or at the
    /// top level. Returns `Ok(None)` for events that do not carry `prefix`.
    pub fn parse(raw: &Value, prefix: &str) -> Result<Option<Self>> {
        let payload = raw.get("data").filter(|d| d.is_object()).unwrap_or(raw);

        let Some(tag) = payload.get("eventType").and_then(Value::as_str) else {
            return Ok(None);
        };
        if !tag.starts_with(prefix) {
            return Ok(None);
        }

        let data: RawEventData = serde_json::from_value(payload.clone())?;
        let Some(event_type) = InboundEventType::from_tag(&data.event_type, prefix) else {
            return Ok(None);
        };

        Ok(Some(Self {
            event_type,
            call_id: data.call_id,
            correlation_id: data.correlation_id,
            device_id: data.device_id,
            message: data.message,
            caller_id: data.caller_id,
            mid_call_events: data.mid_call_service.unwrap_or_default(),
        }))
    }

    /// Minimal event, mostly useful for building fixtures
    pub fn new(event_type: InboundEventType) -> Self {
        Self {
            event_type,
            call_id: None,
            correlation_id: None,
            device_id: None,
            message: None,
            caller_id: None,
            mid_call_events: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::signaling::MessageType;
    use serde_json::json;

    #[test]
    fn test_parse_wrapped_call_setup() {
        let raw = json!({
            "id": "evt-1",
            "data": {
                "eventType": "mobius.callsetup",
                "callId": "call-7",
                "deviceId": "dev-9",
                "correlationId": "corr-1",
                "message": {"seq": 1, "messageType": "OFFER", "sdp": "v=0"},
                "callerId": {"from": "sip:x@y"}
            }
        });

        let event = InboundEvent::parse(&raw, "mobius.").unwrap().unwrap();
        assert_eq!(event.event_type, InboundEventType::CallSetup);
        assert_eq!(event.call_id.as_deref(), Some("call-7"));
        assert_eq!(event.device_id.as_deref(), Some("dev-9"));
        assert_eq!(event.message.unwrap().message_type, MessageType::Offer);
        assert!(event.caller_id.is_some());
        assert!(event.mid_call_events.is_empty());
    }

    #[test]
    fn test_parse_unwrapped_and_unknown_kinds() {
        let raw = json!({"eventType": "mobius.somethingnew", "callId": "c"});
        let event = InboundEvent::parse(&raw, "mobius.").unwrap().unwrap();
        assert_eq!(event.event_type, InboundEventType::Other("somethingnew".into()));
    }

    #[test]
    fn test_foreign_prefix_is_ignored() {
        let raw = json!({"data": {"eventType": "conversation.activity"}});
        assert_eq!(InboundEvent::parse(&raw, "mobius.").unwrap(), None);
        assert_eq!(InboundEvent::parse(&json!({"x": 1}), "mobius.").unwrap(), None);
    }

    #[test]
    fn test_malformed_message_is_a_protocol_error() {
        let raw = json!({"data": {"eventType": "mobius.media", "message": {"seq": "one"}}});
        assert!(InboundEvent::parse(&raw, "mobius.").is_err());
    }
}
