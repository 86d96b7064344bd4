//! Line entity

use crate::domain::shared::value_objects::LineId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Keepalive interval used when the backend does not negotiate one
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Registration status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Idle,
    Connecting,
    Active,
    Inactive,
}

/// Ordered registration candidates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSet {
    pub primary: Vec<String>,
    pub backup: Vec<String>,
}

impl ServerSet {
    pub fn new(primary: Vec<String>, backup: Vec<String>) -> Self {
        Self { primary, backup }
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.backup.is_empty()
    }

    pub fn len(&self) -> usize {
        self.primary.len() + self.backup.len()
    }

    /// Primary candidates in order, then backups in order
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        self.primary
            .iter()
            .chain(self.backup.iter())
            .map(String::as_str)
    }
}

/// Outcome of a successful device registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub server_url: String,
    pub device_id: String,
    pub user_id: Option<String>,
    pub keepalive_interval: Duration,
}

/// Server and device a registered line (and every call on it) talks to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceBinding {
    pub server_url: String,
    pub device_id: String,
}

/// A telephony line.
///
/// `device_id` and `active_url` are only populated while the line is
/// `Active`; every transition goes through `activate`/`deactivate` so the two
/// cannot drift apart.
#[derive(Debug, Clone, Serialize)]
pub struct Line {
    id: LineId,
    status: LineStatus,
    device_id: Option<String>,
    user_id: Option<String>,
    active_url: Option<String>,
    servers: ServerSet,
    #[serde(with = "keepalive_secs")]
    keepalive_interval: Duration,
    registered_at: Option<DateTime<Utc>>,
}

mod keepalive_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }
}

impl Line {
    pub fn new(servers: ServerSet) -> Self {
        Self {
            id: LineId::new(),
            status: LineStatus::Idle,
            device_id: None,
            user_id: None,
            active_url: None,
            servers,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            registered_at: None,
        }
    }

    pub fn begin_connecting(&mut self) {
        self.status = LineStatus::Connecting;
    }

    pub fn activate(&mut self, info: RegistrationInfo) {
        self.status = LineStatus::Active;
        self.device_id = Some(info.device_id);
        self.active_url = Some(info.server_url);
        if info.user_id.is_some() {
            self.user_id = info.user_id;
        }
        self.keepalive_interval = info.keepalive_interval;
        self.registered_at = Some(Utc::now());
    }

    /// Clear registration data; returns the `(server_url, device_id)` that was active
    pub fn deactivate(&mut self) -> Option<(String, String)> {
        self.status = LineStatus::Inactive;
        self.registered_at = None;
        match (self.active_url.take(), self.device_id.take()) {
            (Some(url), Some(device)) => Some((url, device)),
            _ => None,
        }
    }

    pub fn id(&self) -> LineId {
        self.id
    }

    pub fn status(&self) -> LineStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == LineStatus::Active
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn active_url(&self) -> Option<&str> {
        self.active_url.as_deref()
    }

    /// Active server and device, only while registered
    pub fn binding(&self) -> Option<DeviceBinding> {
        match (&self.active_url, &self.device_id) {
            (Some(url), Some(device)) if self.is_active() => Some(DeviceBinding {
                server_url: url.clone(),
                device_id: device.clone(),
            }),
            _ => None,
        }
    }

    pub fn servers(&self) -> &ServerSet {
        &self.servers
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    pub fn registered_at(&self) -> Option<&DateTime<Utc>> {
        self.registered_at.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers() -> ServerSet {
        ServerSet::new(
            vec!["https://p1".into(), "https://p2".into()],
            vec!["https://b1".into()],
        )
    }

    #[test]
    fn test_candidates_order_primary_then_backup() {
        let set = servers();
        let order: Vec<&str> = set.candidates().collect();
        assert_eq!(order, vec!["https://p1", "https://p2", "https://b1"]);
        assert_eq!(servers().len(), 3);
    }

    #[test]
    fn test_device_and_url_only_set_while_active() {
        let mut line = Line::new(servers());
        assert_eq!(line.status(), LineStatus::Idle);
        assert!(line.device_id().is_none());

        line.activate(RegistrationInfo {
            server_url: "https://b1".into(),
            device_id: "dev-9".into(),
            user_id: Some("user-1".into()),
            keepalive_interval: Duration::from_secs(45),
        });
        assert!(line.is_active());
        assert_eq!(line.device_id(), Some("dev-9"));
        assert_eq!(line.active_url(), Some("https://b1"));
        assert_eq!(line.keepalive_interval(), Duration::from_secs(45));
        assert_eq!(line.binding().map(|b| b.device_id), Some("dev-9".to_string()));

        let cleared = line.deactivate();
        assert_eq!(cleared, Some(("https://b1".into(), "dev-9".into())));
        assert_eq!(line.status(), LineStatus::Inactive);
        assert!(line.device_id().is_none());
        assert!(line.active_url().is_none());
        assert_eq!(line.deactivate(), None);
    }
}
