//! Configuration management
//!
//! Layered as built-in defaults, then an optional TOML file, then
//! `CALLRELAY__SECTION__KEY` environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub calling: CallingConfig,
    pub discovery: DiscoveryConfig,
    pub media: MediaConfig,
}

/// Local control and bridge endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallingConfig {
    pub access_token: String,
    pub user_id: String,
    pub client_device_uri: String,
    pub domain: String,
    /// Event-type prefix identifying call-control events on the Event Bus
    pub event_prefix: String,
    /// Used when registration does not negotiate an interval
    pub keepalive_interval_secs: u64,
    pub tracking_id_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub device_registration_url: String,
    pub region_url: String,
    /// Host-catalog key fragment identifying call-control hosts
    pub service_name: String,
    pub fallback_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub ice_servers: Vec<String>,
    pub silence_interval_ms: u64,
    pub remote_track_poll_ms: u64,
}

impl CallingConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

impl MediaConfig {
    pub fn silence_interval(&self) -> Duration {
        Duration::from_millis(self.silence_interval_ms)
    }

    pub fn remote_track_poll(&self) -> Duration {
        Duration::from_millis(self.remote_track_poll_ms)
    }
}

impl Default for CallingConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            user_id: String::new(),
            client_device_uri: String::new(),
            domain: String::new(),
            event_prefix: "mobius.".to_string(),
            keepalive_interval_secs: 30,
            tracking_id_prefix: "callrelay".to_string(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            device_registration_url: "https://wdm-a.wbx2.com/wdm/api/v1/devices".to_string(),
            region_url: "https://ds.ciscospark.com/v1/region".to_string(),
            service_name: "mobius".to_string(),
            fallback_host: "mobius-us-east-1.prod.infra.webex.com".to_string(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            silence_interval_ms: 20,
            remote_track_poll_ms: 200,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            calling: CallingConfig::default(),
            discovery: DiscoveryConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration; a missing file is not an error
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder
            .add_source(
                config::Environment::with_prefix("CALLRELAY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("media.ice_servers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
