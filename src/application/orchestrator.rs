//! Call orchestrator - composition root owning every line and call
//!
//! Active lines and calls live in one registry guarded by its own lock. That
//! lock is never held across an await and is independent of any call's
//! internal lock, so a call removing itself on disconnect cannot deadlock
//! with event routing.

use crate::application::audio_bridge::AudioBridge;
use crate::application::call_controller::CallController;
use crate::application::discovery::ServerDiscovery;
use crate::application::line_registry::{LineEvent, LineRegistry, LineSettings};
use crate::config::{CallingConfig, DiscoveryConfig};
use crate::domain::call::{
    CallDirection, CallEvent, Destination, DisconnectReason, InboundEvent, InboundEventType,
};
use crate::domain::line::{DeviceBinding, ServerSet};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::events::{EventEmitter, NamedEvent};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CorrelationId, LineId};
use crate::infrastructure::event_bus::{EventBus, WILDCARD};
use crate::infrastructure::http::HttpCore;
use crate::infrastructure::metrics;
use crate::infrastructure::protocols::webrtc::MediaSessionFactory;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Orchestrator notifications
#[derive(Clone)]
pub enum OrchestratorEvent {
    IncomingCall(Arc<CallController>),
}

impl NamedEvent for OrchestratorEvent {
    fn name(&self) -> &'static str {
        match self {
            OrchestratorEvent::IncomingCall(_) => "incoming_call",
        }
    }
}

#[derive(Default)]
struct Registry {
    lines: HashMap<LineId, Arc<LineRegistry>>,
    calls: HashMap<CorrelationId, Arc<CallController>>,
}

struct BusAttachment {
    bus: Arc<dyn EventBus>,
    token: CancellationToken,
    dispatch: JoinHandle<()>,
}

type BridgeSlot = Arc<Mutex<Option<Arc<AudioBridge>>>>;

pub struct CallOrchestrator {
    calling: CallingConfig,
    discovery: DiscoveryConfig,
    http: Arc<dyn HttpCore>,
    media_factory: Arc<dyn MediaSessionFactory>,
    registry: Arc<Mutex<Registry>>,
    servers: RwLock<ServerSet>,
    bridge: BridgeSlot,
    bus: Mutex<Option<BusAttachment>>,
    events: EventEmitter<OrchestratorEvent>,
}

impl CallOrchestrator {
    pub fn new(
        calling: CallingConfig,
        discovery: DiscoveryConfig,
        http: Arc<dyn HttpCore>,
        media_factory: Arc<dyn MediaSessionFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            calling,
            discovery,
            http,
            media_factory,
            registry: Arc::new(Mutex::new(Registry::default())),
            servers: RwLock::new(ServerSet::default()),
            bridge: Arc::new(Mutex::new(None)),
            bus: Mutex::new(None),
            events: EventEmitter::new(),
        })
    }

    pub fn events(&self) -> &EventEmitter<OrchestratorEvent> {
        &self.events
    }

    pub fn servers(&self) -> ServerSet {
        self.servers.read().clone()
    }

    /// Use a known server set instead of discovering one
    pub fn set_servers(&self, servers: ServerSet) {
        *self.servers.write() = servers;
    }

    /// Learn candidate servers. Falls back to the configured host.
    pub async fn discover(&self) -> ServerSet {
        let servers = ServerDiscovery::new(Arc::clone(&self.http), self.discovery.clone())
            .discover()
            .await;
        *self.servers.write() = servers.clone();
        servers
    }

    /// Build and register a line against the known servers
    pub async fn create_line(&self) -> Result<Arc<LineRegistry>> {
        let servers = self.servers();
        if servers.is_empty() {
            return Err(DomainError::ValidationError(
                "no servers known; run discovery first".into(),
            ));
        }

        let line = LineRegistry::new(
            servers,
            Arc::clone(&self.http),
            LineSettings::from_config(&self.calling),
        );

        let registry = Arc::downgrade(&self.registry);
        line.events().on("incoming_call", move |event| {
            if let (LineEvent::IncomingCall(call), Some(registry)) = (event, registry.upgrade()) {
                let mut registry = registry.lock();
                registry
                    .calls
                    .entry(call.correlation_id())
                    .or_insert_with(|| Arc::clone(call));
                metrics::set_active_calls(registry.calls.len());
            }
        });

        line.register().await?;
        self.registry.lock().lines.insert(line.id(), Arc::clone(&line));
        info!("Line {} created", line.id());
        Ok(line)
    }

    /// Place an outbound call on a registered line
    pub async fn make_call(
        &self,
        line_id: LineId,
        destination: Destination,
    ) -> Result<Arc<CallController>> {
        if destination.is_empty() {
            return Err(DomainError::ValidationError(
                "destination address is empty".into(),
            ));
        }

        let line = self
            .get_line(line_id)
            .ok_or_else(|| DomainError::NotFound(format!("line {}", line_id)))?;
        let binding = line.binding().await.ok_or_else(|| {
            DomainError::InvalidStateTransition(format!("line {} is not registered", line_id))
        })?;

        let media = self.media_factory.create().await?;
        let call = CallController::outbound(binding, destination, Arc::clone(&self.http), media);
        self.track_call(&call);
        self.remove_on_disconnect(&call);

        call.dial().await?;

        let bridge = self.bridge.lock().clone();
        if let Some(bridge) = bridge {
            bridge.attach_call(&call);
        }
        Ok(call)
    }

    /// Route one raw Event Bus envelope. Never fails.
    pub async fn route_inbound_event(&self, raw: Value) {
        let event = match InboundEvent::parse(&raw, &self.calling.event_prefix) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                warn!("Dropping malformed backend event: {}", e);
                return;
            }
        };

        let existing = {
            let registry = self.registry.lock();
            registry
                .calls
                .values()
                .find(|call| {
                    call.matches(event.call_id.as_deref(), event.correlation_id.as_deref())
                })
                .cloned()
        };
        if let Some(call) = existing {
            call.handle_inbound_event(event).await;
            return;
        }

        if event.event_type != InboundEventType::CallSetup {
            debug!(
                "No active call for {:?} (call id {:?})",
                event.event_type, event.call_id
            );
            return;
        }

        let Some(device_id) = event.device_id.clone() else {
            warn!("Call setup without device id dropped");
            return;
        };

        if self.has_active_outbound(&device_id) {
            info!(
                "Suppressing call setup on device {}: outbound call in progress",
                device_id
            );
            return;
        }

        let Some((line, binding)) = self.line_for_device(&device_id).await else {
            warn!("Call setup for unknown device {}", device_id);
            return;
        };

        let media = match self.media_factory.create().await {
            Ok(media) => media,
            Err(e) => {
                warn!("Cannot create media for inbound call: {}", e);
                return;
            }
        };

        let call = CallController::inbound(
            binding,
            event.call_id.clone(),
            Arc::clone(&self.http),
            media,
        );
        self.track_call(&call);
        self.remove_on_disconnect(&call);
        self.attach_bridge_on_connect(&call);

        info!(
            "Incoming call {:?} on line {} (correlation {})",
            event.call_id,
            line.id(),
            call.correlation_id()
        );
        call.handle_inbound_event(event).await;

        line.notify_incoming_call(Arc::clone(&call));
        self.events.emit(OrchestratorEvent::IncomingCall(call));
    }

    /// Connect `bus` and feed its envelopes, in order, to `route_inbound_event`
    pub async fn attach_event_bus(self: &Arc<Self>, bus: Arc<dyn EventBus>) -> Result<()> {
        if !bus.is_connected() {
            bus.connect().await?;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        bus.subscribe(
            WILDCARD,
            Arc::new(move |envelope| {
                let _ = tx.send(envelope);
            }),
        );

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let orchestrator = Arc::downgrade(self);
        let dispatch = tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    _ = cancelled.cancelled() => break,
                    envelope = rx.recv() => match envelope {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };
                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                orchestrator.route_inbound_event(envelope).await;
            }
            debug!("Event dispatch loop exited");
        });

        let previous = self.bus.lock().replace(BusAttachment {
            bus,
            token,
            dispatch,
        });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        info!("Event bus attached");
        Ok(())
    }

    /// Register (or clear) the audio bridge. A new bridge is attached to an
    /// already active call right away.
    pub fn set_audio_bridge(&self, bridge: Option<Arc<AudioBridge>>) {
        let previous = std::mem::replace(&mut *self.bridge.lock(), bridge.clone());
        if let Some(previous) = previous {
            previous.detach_call();
        }

        let Some(bridge) = bridge else { return };
        let calls = self.active_calls();
        let target = calls
            .iter()
            .find(|call| call.state().is_established())
            .or_else(|| {
                calls
                    .iter()
                    .find(|call| call.direction() == CallDirection::Outbound)
            });
        if let Some(call) = target {
            bridge.attach_call(call);
        }
    }

    pub fn audio_bridge(&self) -> Option<Arc<AudioBridge>> {
        self.bridge.lock().clone()
    }

    /// Tear everything down. Safe to call more than once.
    pub async fn shutdown(&self) {
        info!("Shutting down call orchestrator");

        let attachment = self.bus.lock().take();
        if let Some(attachment) = attachment {
            attachment.token.cancel();
            if let Err(e) = attachment.bus.disconnect().await {
                warn!("Event bus disconnect failed: {}", e);
            }
            if let Err(e) = attachment.dispatch.await {
                warn!("Event dispatch task ended abnormally: {}", e);
            }
        }

        let bridge = self.bridge.lock().take();
        if let Some(bridge) = bridge {
            bridge.detach_call();
        }

        for call in self.active_calls() {
            call.terminate(DisconnectReason::Shutdown).await;
        }

        for line in self.lines() {
            if let Err(e) = line.deregister().await {
                warn!("Line {} deregister failed: {}", line.id(), e);
            }
        }

        let mut registry = self.registry.lock();
        registry.calls.clear();
        registry.lines.clear();
        metrics::set_active_calls(0);
    }

    pub fn active_calls(&self) -> Vec<Arc<CallController>> {
        self.registry.lock().calls.values().cloned().collect()
    }

    pub fn lines(&self) -> Vec<Arc<LineRegistry>> {
        self.registry.lock().lines.values().cloned().collect()
    }

    pub fn get_line(&self, id: LineId) -> Option<Arc<LineRegistry>> {
        self.registry.lock().lines.get(&id).cloned()
    }

    /// Look a call up by correlation id or backend call id
    pub fn find_call(&self, id: &str) -> Option<Arc<CallController>> {
        self.registry
            .lock()
            .calls
            .values()
            .find(|call| call.matches(Some(id), Some(id)))
            .cloned()
    }

    fn track_call(&self, call: &Arc<CallController>) {
        let mut registry = self.registry.lock();
        registry
            .calls
            .insert(call.correlation_id(), Arc::clone(call));
        metrics::set_active_calls(registry.calls.len());
        metrics::record_call(call.direction().as_str());
    }

    fn remove_on_disconnect(&self, call: &Arc<CallController>) {
        let registry = Arc::downgrade(&self.registry);
        let bridge = Arc::clone(&self.bridge);
        let id = call.correlation_id();

        call.events().once("disconnect", move |_: &CallEvent| {
            if let Some(registry) = registry.upgrade() {
                let mut registry = registry.lock();
                registry.calls.remove(&id);
                metrics::set_active_calls(registry.calls.len());
            }
            let bridge = bridge.lock().clone();
            if let Some(bridge) = bridge {
                bridge.detach_if(id);
            }
        });
    }

    fn attach_bridge_on_connect(&self, call: &Arc<CallController>) {
        let bridge = Arc::clone(&self.bridge);
        let call_ref = Arc::downgrade(call);

        call.events().once("connect", move |_: &CallEvent| {
            let bridge = bridge.lock().clone();
            if let (Some(bridge), Some(call)) = (bridge, call_ref.upgrade()) {
                bridge.attach_call(&call);
            }
        });
    }

    fn has_active_outbound(&self, device_id: &str) -> bool {
        self.registry.lock().calls.values().any(|call| {
            call.direction() == CallDirection::Outbound
                && call.device_id() == device_id
                && call.state().is_active()
        })
    }

    async fn line_for_device(&self, device_id: &str) -> Option<(Arc<LineRegistry>, DeviceBinding)> {
        for line in self.lines() {
            if let Some(binding) = line.binding().await {
                if binding.device_id == device_id {
                    return Some((line, binding));
                }
            }
        }
        None
    }
}
