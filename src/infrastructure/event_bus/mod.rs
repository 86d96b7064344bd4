//! Event Bus - asynchronous backend notification transport
//!
//! The transport itself (socket management, reconnects, acknowledgements) is
//! provided by the host application. This crate only connects, subscribes with
//! a wildcard and filters envelopes by their event-type prefix.

mod ingress;

pub use ingress::IngressEventBus;

use crate::domain::shared::result::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Callback receiving opaque JSON envelopes
pub type EnvelopeHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Pattern matching every event on the bus
pub const WILDCARD: &str = "*";

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Deliver every envelope whose event name matches `pattern` to `handler`
    fn subscribe(&self, pattern: &str, handler: EnvelopeHandler);
}
