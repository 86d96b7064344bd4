//! Call bounded context - state, signaling wire types and backend events

pub mod envelope;
pub mod event;
pub mod signaling;
pub mod value_object;

pub use envelope::{InboundEvent, InboundEventType};
pub use event::CallEvent;
pub use signaling::{MessageType, SignalingMessage};
pub use value_object::{
    CallDirection, CallState, Destination, DestinationType, DisconnectReason, TransferKind,
};
