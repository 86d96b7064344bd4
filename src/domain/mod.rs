//! Domain layer - Core call-control rules
//!
//! This layer contains:
//! - Value Objects: call state machine, destinations, identifiers
//! - Entities: the telephony line
//! - Wire types: signaling messages and inbound event envelopes
//! - Domain Events: notifications published through the shared emitter

pub mod call;
pub mod line;
pub mod shared;

// Re-export commonly used types
pub use shared::{DomainError, Result};
