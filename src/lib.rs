//! callrelay - call control and media relay core
//!
//! Registers a telephony line against a call-control backend, places and
//! receives calls over the numbered OFFER/ANSWER signaling protocol, and
//! relays RTP between the backend-facing media session and a browser peer
//! connection.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
