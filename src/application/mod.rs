//! Application layer - lines, calls and the bridge between them
//!
//! Components here drive the domain types through the infrastructure seams
//! (HTTP Core, Event Bus, media sessions).

pub mod audio_bridge;
pub mod call_controller;
pub mod discovery;
pub mod line_registry;
pub mod orchestrator;

pub use audio_bridge::{AudioBridge, AudioBridgeConfig, BrowserSignal, SignalingTransport};
pub use call_controller::{CallController, CallSnapshot};
pub use discovery::{ServerDiscovery, ServiceDescriptor};
pub use line_registry::{LineEvent, LineRegistry, LineSettings};
pub use orchestrator::{CallOrchestrator, OrchestratorEvent};
