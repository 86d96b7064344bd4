//! Line bounded context - a registered telephony endpoint

pub mod entity;

pub use entity::{DeviceBinding, Line, LineStatus, RegistrationInfo, ServerSet, DEFAULT_KEEPALIVE_INTERVAL};
