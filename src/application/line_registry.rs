//! Line registry - registers a telephony line against ordered candidate
//! servers and keeps the registration alive

use crate::application::call_controller::CallController;
use crate::config::CallingConfig;
use crate::domain::line::{DeviceBinding, Line, LineStatus, RegistrationInfo, ServerSet};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::events::{EventEmitter, NamedEvent};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::LineId;
use crate::infrastructure::http::{join_url, HttpCore, HttpMethod, HttpResponse};
use crate::infrastructure::metrics;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backend error code meaning "this device is already registered"
const ALREADY_REGISTERED_CODE: i64 = 101;

/// Line notifications
#[derive(Clone)]
pub enum LineEvent {
    Connecting,
    Registered,
    Unregistered,
    Error(String),
    IncomingCall(Arc<CallController>),
}

impl NamedEvent for LineEvent {
    fn name(&self) -> &'static str {
        match self {
            LineEvent::Connecting => "connecting",
            LineEvent::Registered => "registered",
            LineEvent::Unregistered => "unregistered",
            LineEvent::Error(_) => "error",
            LineEvent::IncomingCall(_) => "incoming_call",
        }
    }
}

/// Identity sent with every device registration
#[derive(Debug, Clone)]
pub struct LineSettings {
    pub user_id: String,
    pub client_device_uri: String,
    pub domain: String,
    /// Used when the backend does not negotiate a keepalive interval
    pub default_keepalive: Duration,
}

impl LineSettings {
    pub fn from_config(config: &CallingConfig) -> Self {
        Self {
            user_id: config.user_id.clone(),
            client_device_uri: config.client_device_uri.clone(),
            domain: config.domain.clone(),
            default_keepalive: config.keepalive_interval(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRegistration {
    #[serde(default)]
    user_id: Option<String>,
    device: RegisteredDevice,
    #[serde(default)]
    keepalive_interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisteredDevice {
    device_id: String,
}

struct KeepaliveTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// One telephony line and its registration lifecycle.
///
/// All line state sits behind a single async lock, so concurrent
/// `register`/`deregister` calls serialize and a second `register` on an
/// active line is a no-op.
pub struct LineRegistry {
    id: LineId,
    line: Mutex<Line>,
    http: Arc<dyn HttpCore>,
    settings: LineSettings,
    events: EventEmitter<LineEvent>,
    keepalive: parking_lot::Mutex<Option<KeepaliveTask>>,
}

impl LineRegistry {
    pub fn new(servers: ServerSet, http: Arc<dyn HttpCore>, settings: LineSettings) -> Arc<Self> {
        let line = Line::new(servers);
        Arc::new(Self {
            id: line.id(),
            line: Mutex::new(line),
            http,
            settings,
            events: EventEmitter::new(),
            keepalive: parking_lot::Mutex::new(None),
        })
    }

    pub fn id(&self) -> LineId {
        self.id
    }

    pub fn events(&self) -> &EventEmitter<LineEvent> {
        &self.events
    }

    pub async fn status(&self) -> LineStatus {
        self.line.lock().await.status()
    }

    pub async fn device_id(&self) -> Option<String> {
        self.line.lock().await.device_id().map(str::to_string)
    }

    pub async fn active_url(&self) -> Option<String> {
        self.line.lock().await.active_url().map(str::to_string)
    }

    /// Server and device of the active registration
    pub async fn binding(&self) -> Option<DeviceBinding> {
        self.line.lock().await.binding()
    }

    /// Copy of the line entity
    pub async fn snapshot(&self) -> Line {
        self.line.lock().await.clone()
    }

    pub fn is_keepalive_running(&self) -> bool {
        self.keepalive
            .lock()
            .as_ref()
            .map_or(false, |task| !task.handle.is_finished())
    }

    /// Announce a new inbound call owned by this line
    pub fn notify_incoming_call(&self, call: Arc<CallController>) {
        self.events.emit(LineEvent::IncomingCall(call));
    }

    /// Register the line. Tries primary candidates in order, then backups.
    pub async fn register(self: &Arc<Self>) -> Result<()> {
        let mut line = self.line.lock().await;
        if line.is_active() {
            debug!("Line {} already registered, skipping", self.id);
            return Ok(());
        }

        let candidates: Vec<String> = line.servers().candidates().map(str::to_string).collect();
        if candidates.is_empty() {
            return Err(DomainError::ValidationError(
                "line has no candidate servers".into(),
            ));
        }

        line.begin_connecting();
        self.events.emit(LineEvent::Connecting);
        info!("Registering line {} ({} candidates)", self.id, candidates.len());

        for server in &candidates {
            match self.register_at(server).await {
                Ok(registration) => {
                    let device_id = registration.device_id.clone();
                    let interval = registration.keepalive_interval;
                    line.activate(registration);

                    metrics::record_registration(true);
                    metrics::line_registered();
                    info!(
                        "Line {} registered at {} as device {} (keepalive {:?})",
                        self.id, server, device_id, interval
                    );

                    // Keepalive start and the event stay under the line lock so a
                    // waiting deregister always observes them.
                    self.start_keepalive(server, &device_id, interval);
                    self.events.emit(LineEvent::Registered);
                    drop(line);
                    return Ok(());
                }
                Err(e) => {
                    metrics::record_registration(false);
                    warn!("Line {} registration at {} failed: {}", self.id, server, e);
                }
            }
        }

        line.deactivate();
        drop(line);

        let message = format!(
            "registration failed on all {} candidate servers",
            candidates.len()
        );
        self.events.emit(LineEvent::Error(message.clone()));
        Err(DomainError::Transport(message))
    }

    /// Deregister the line. Calling it on an unregistered line is a no-op.
    pub async fn deregister(&self) -> Result<()> {
        let mut line = self.line.lock().await;
        let task = self.cancel_keepalive();

        let Some((server, device_id)) = line.deactivate() else {
            drop(line);
            self.join_keepalive(task).await;
            debug!("Line {} not registered, nothing to deregister", self.id);
            return Ok(());
        };

        if let Err(e) = self.delete_device(&server, &device_id).await {
            warn!("Failed to delete device {} at {}: {}", device_id, server, e);
        }

        metrics::line_unregistered();
        info!("Line {} deregistered", self.id);
        self.events.emit(LineEvent::Unregistered);
        drop(line);

        // The task may be parked on the line lock in demote, so join after release.
        self.join_keepalive(task).await;
        Ok(())
    }

    /// Stop the keepalive task and wait for it to exit
    pub async fn stop_keepalive(&self) {
        let task = self.cancel_keepalive();
        self.join_keepalive(task).await;
    }

    fn cancel_keepalive(&self) -> Option<KeepaliveTask> {
        let task = self.keepalive.lock().take();
        if let Some(task) = &task {
            task.token.cancel();
        }
        task
    }

    async fn join_keepalive(&self, task: Option<KeepaliveTask>) {
        if let Some(task) = task {
            if let Err(e) = task.handle.await {
                warn!("Keepalive task for line {} ended abnormally: {}", self.id, e);
            }
        }
    }

    fn start_keepalive(self: &Arc<Self>, server: &str, device_id: &str, interval: Duration) {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let registry = Arc::downgrade(self);
        let http = Arc::clone(&self.http);
        let url = join_url(server, &format!("devices/{}/status", device_id));
        let line_id = self.id;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let result = tokio::select! {
                    _ = cancelled.cancelled() => break,
                    result = http.issue(HttpMethod::Put, &url, None) => result,
                };

                match result {
                    Ok(response) if response.is_not_found() => {
                        warn!("Line {} keepalive: device no longer known", line_id);
                        if let Some(registry) = registry.upgrade() {
                            registry.demote(&cancelled).await;
                        }
                        break;
                    }
                    Ok(response) if !response.is_success() => {
                        warn!(
                            "Line {} keepalive returned status {}",
                            line_id, response.status
                        );
                    }
                    Ok(_) => debug!("Line {} keepalive ok", line_id),
                    Err(e) => warn!("Line {} keepalive failed: {}", line_id, e),
                }
            }
            debug!("Keepalive loop for line {} exited", line_id);
        });

        let previous = self.keepalive.lock().replace(KeepaliveTask { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
    }

    /// Keepalive found the device gone
    async fn demote(&self, keepalive: &CancellationToken) {
        let mut line = self.line.lock().await;
        // Cancelled under the line lock by deregister or a newer registration.
        if keepalive.is_cancelled() {
            return;
        }
        if line.deactivate().is_some() {
            self.keepalive.lock().take();
            metrics::line_unregistered();
            self.events.emit(LineEvent::Unregistered);
        }
    }

    async fn register_at(&self, server: &str) -> Result<RegistrationInfo> {
        let url = join_url(server, "device");
        let response = self
            .http
            .issue(HttpMethod::Post, &url, Some(self.registration_body()))
            .await?;

        if let Some(stale) = stale_device(&response) {
            info!(
                "Device {} already registered at {}, deleting and retrying",
                stale, server
            );
            if let Err(e) = self.delete_device(server, &stale).await {
                warn!("Failed to delete stale device {}: {}", stale, e);
            }
            let retry = self
                .http
                .issue(HttpMethod::Post, &url, Some(self.registration_body()))
                .await?;
            return self.registration_info(server, retry);
        }

        self.registration_info(server, response)
    }

    fn registration_info(&self, server: &str, response: HttpResponse) -> Result<RegistrationInfo> {
        let registration: DeviceRegistration =
            response.error_for_status("device registration")?.parse()?;

        let keepalive_interval = registration
            .keepalive_interval
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.settings.default_keepalive);

        Ok(RegistrationInfo {
            server_url: server.to_string(),
            device_id: registration.device.device_id,
            user_id: registration.user_id,
            keepalive_interval,
        })
    }

    async fn delete_device(&self, server: &str, device_id: &str) -> Result<()> {
        let url = join_url(server, &format!("devices/{}", device_id));
        self.http
            .issue(HttpMethod::Delete, &url, None)
            .await?
            .error_for_status("device delete")?;
        Ok(())
    }

    fn registration_body(&self) -> Value {
        json!({
            "userId": self.settings.user_id,
            "clientDeviceUri": self.settings.client_device_uri,
            "serviceData": {
                "indicator": "calling",
                "domain": self.settings.domain,
            },
        })
    }
}

/// Stale device id from an "already registered" conflict response
fn stale_device(response: &HttpResponse) -> Option<String> {
    let body = response.value();
    let conflict = match response.status {
        409 => true,
        403 => body.get("errorCode").and_then(Value::as_i64) == Some(ALREADY_REGISTERED_CODE),
        _ => false,
    };
    if !conflict {
        return None;
    }
    body.pointer("/devices/0/deviceId")
        .and_then(Value::as_str)
        .map(str::to_string)
}
