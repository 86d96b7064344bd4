//! Call-control server discovery
//!
//! 1. Register an internal client device to learn the host catalog.
//! 2. Ask the region service for locale hints.
//! 3. Ask each candidate host's discovery endpoint for primary/backup URLs.
//! 4. Fall back to the configured host when every step fails.

use crate::config::DiscoveryConfig;
use crate::domain::line::ServerSet;
use crate::domain::shared::result::Result;
use crate::infrastructure::http::{join_url, HttpCore, HttpMethod};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DISCOVERY_PATH: &str = "api/v1/calling/web/";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostEntry {
    pub host: String,
}

/// A host-catalog value. The backend sends any of three shapes; serde tries
/// them in declaration order:
///
/// 1. `[{"host": "a"}, {"host": "b"}]`
/// 2. `{"host": "a"}`
/// 3. `"a"`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ServiceDescriptor {
    Hosts(Vec<HostEntry>),
    Endpoint(HostEntry),
    Url(String),
}

impl ServiceDescriptor {
    pub fn hosts(&self) -> Vec<String> {
        match self {
            ServiceDescriptor::Hosts(entries) => entries.iter().map(|e| e.host.clone()).collect(),
            ServiceDescriptor::Endpoint(entry) => vec![entry.host.clone()],
            ServiceDescriptor::Url(url) => vec![url.clone()],
        }
    }
}

/// Locale hints from the region service
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionInfo {
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub region_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UriList {
    #[serde(default)]
    uris: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DiscoveryResponse {
    #[serde(default)]
    primary: UriList,
    #[serde(default)]
    backup: UriList,
}

/// Learns candidate servers for line registration
pub struct ServerDiscovery {
    http: Arc<dyn HttpCore>,
    config: DiscoveryConfig,
}

impl ServerDiscovery {
    pub fn new(http: Arc<dyn HttpCore>, config: DiscoveryConfig) -> Self {
        Self { http, config }
    }

    /// Discover servers; never fails, the fallback host is the last resort
    pub async fn discover(&self) -> ServerSet {
        let hosts = match self.catalog_hosts().await {
            Ok(hosts) => hosts,
            Err(e) => {
                warn!("Host catalog lookup failed: {}", e);
                Vec::new()
            }
        };

        let region = match self.region().await {
            Ok(region) => region,
            Err(e) => {
                debug!("Region lookup failed, continuing without locale: {}", e);
                RegionInfo::default()
            }
        };

        for host in &hosts {
            match self.query_host(host, &region).await {
                Ok(servers) if !servers.is_empty() => {
                    info!(
                        "Discovered {} primary / {} backup servers via {}",
                        servers.primary.len(),
                        servers.backup.len(),
                        host
                    );
                    return servers;
                }
                Ok(_) => debug!("Host {} returned no servers", host),
                Err(e) => warn!("Discovery via {} failed: {}", host, e),
            }
        }

        let fallback = &self.config.fallback_host;
        match self.query_host(fallback, &region).await {
            Ok(servers) if !servers.is_empty() => {
                info!("Discovered servers via fallback host {}", fallback);
                servers
            }
            _ => {
                warn!("Discovery failed everywhere, using fallback host {}", fallback);
                ServerSet::new(vec![discovery_url(fallback)], Vec::new())
            }
        }
    }

    /// Hosts whose catalog key names the call-control service
    async fn catalog_hosts(&self) -> Result<Vec<String>> {
        let body = json!({
            "deviceName": "callrelay",
            "deviceType": "UNKNOWN",
            "localizedModel": "rust",
            "model": "rust",
            "name": "callrelay",
            "systemName": "callrelay",
            "systemVersion": env!("CARGO_PKG_VERSION"),
        });
        let response = self
            .http
            .issue(HttpMethod::Post, &self.config.device_registration_url, Some(body))
            .await?
            .error_for_status("client device registration")?;
        let registration = response.value();

        // The internal device exists only to fetch the catalog.
        if let Some(url) = registration.get("url").and_then(Value::as_str) {
            if let Err(e) = self.http.issue(HttpMethod::Delete, url, None).await {
                debug!("Failed to delete client device {}: {}", url, e);
            }
        }

        let catalog = registration
            .pointer("/serviceHostMap/hostCatalog")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Ok(hosts_for_service(&catalog, &self.config.service_name))
    }

    async fn region(&self) -> Result<RegionInfo> {
        self.http
            .issue(HttpMethod::Get, &self.config.region_url, None)
            .await?
            .error_for_status("region lookup")?
            .parse()
    }

    async fn query_host(&self, host: &str, region: &RegionInfo) -> Result<ServerSet> {
        let mut url = discovery_url(host);
        if let (Some(region_code), Some(country_code)) = (&region.region_code, &region.country_code)
        {
            url.push_str(&format!(
                "?regionCode={}&countryCode={}",
                region_code, country_code
            ));
        }

        let discovered: DiscoveryResponse = self
            .http
            .issue(HttpMethod::Get, &url, None)
            .await?
            .error_for_status("host discovery")?
            .parse()?;
        Ok(ServerSet::new(discovered.primary.uris, discovered.backup.uris))
    }
}

fn discovery_url(host: &str) -> String {
    let base = if host.starts_with("https://") || host.starts_with("http://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    };
    join_url(&base, DISCOVERY_PATH)
}

/// Candidate hosts from a host catalog, in catalog order
pub fn hosts_for_service(catalog: &Map<String, Value>, service_name: &str) -> Vec<String> {
    let mut hosts = Vec::new();
    for (key, value) in catalog {
        if !key.contains(service_name) {
            continue;
        }
        match serde_json::from_value::<ServiceDescriptor>(value.clone()) {
            Ok(descriptor) => {
                for host in descriptor.hosts() {
                    if !hosts.contains(&host) {
                        hosts.push(host);
                    }
                }
            }
            Err(e) => debug!("Skipping catalog entry {}: {}", key, e),
        }
    }
    hosts
}
