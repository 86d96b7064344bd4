//! Local control API

pub mod calls_handler;
pub mod dto;
pub mod metrics_handler;
pub mod router;
pub mod ws_handler;

pub use calls_handler::AppState;
pub use metrics_handler::init_metrics;
pub use router::build_router;
pub use ws_handler::WebSocketTransport;
