//! In-process Event Bus fed by the control API
//!
//! The host application forwards backend envelopes to `POST /events`; they
//! are delivered synchronously, in arrival order, to the subscribers whose
//! pattern matches.

use super::{EnvelopeHandler, EventBus, WILDCARD};
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

#[derive(Default)]
pub struct IngressEventBus {
    connected: AtomicBool,
    subscribers: Mutex<Vec<(String, EnvelopeHandler)>>,
}

impl IngressEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `envelope` to matching subscribers. Returns how many received it;
    /// nothing is delivered while disconnected.
    pub fn publish(&self, envelope: Value) -> usize {
        if !self.is_connected() {
            debug!("Event bus disconnected, dropping envelope");
            return 0;
        }

        let event_type = envelope
            .pointer("/data/eventType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let handlers: Vec<EnvelopeHandler> = self
            .subscribers
            .lock()
            .iter()
            .filter(|(pattern, _)| pattern_matches(pattern, &event_type))
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in &handlers {
            handler(envelope.clone());
        }
        handlers.len()
    }
}

fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    pattern == WILDCARD || event_type.starts_with(pattern.trim_end_matches('*'))
}

#[async_trait]
impl EventBus for IngressEventBus {
    async fn connect(&self) -> Result<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!("Event bus ingress connected");
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Event bus ingress disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self, pattern: &str, handler: EnvelopeHandler) {
        self.subscribers.lock().push((pattern.to_string(), handler));
    }
}
