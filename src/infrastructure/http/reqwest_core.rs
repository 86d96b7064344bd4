//! `reqwest`-backed HTTP Core

use super::{HttpCore, HttpMethod, HttpResponse};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Adds bearer authorization and a per-request tracking id
pub struct ReqwestHttpCore {
    client: reqwest::Client,
    access_token: String,
    tracking_prefix: String,
    session: Uuid,
    counter: AtomicU64,
}

impl ReqwestHttpCore {
    pub fn new(access_token: impl Into<String>, tracking_prefix: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DomainError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            access_token: access_token.into(),
            tracking_prefix: tracking_prefix.into(),
            session: Uuid::new_v4(),
            counter: AtomicU64::new(0),
        })
    }

    fn tracking_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}_{}_{}", self.tracking_prefix, self.session, n)
    }
}

#[async_trait]
impl HttpCore for ReqwestHttpCore {
    async fn issue(&self, method: HttpMethod, url: &str, body: Option<Value>) -> Result<HttpResponse> {
        let tracking_id = self.tracking_id();
        debug!("{} {} (TrackingID {})", method, url, tracking_id);

        let builder = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
            HttpMethod::Delete => self.client.delete(url),
        };

        let mut builder = builder
            .bearer_auth(&self.access_token)
            .header("TrackingID", tracking_id);
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DomainError::Transport(format!("{} {}: {}", method, url, e)))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DomainError::Transport(format!("{} {}: {}", method, url, e)))?;

        debug!("{} {} -> {}", method, url, status);
        Ok(HttpResponse::new(status, bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_ids_are_sequential() {
        let core = ReqwestHttpCore::new("token", "webclient").unwrap();
        let first = core.tracking_id();
        let second = core.tracking_id();
        assert!(first.starts_with("webclient_"));
        assert!(first.ends_with("_0"));
        assert!(second.ends_with("_1"));
    }
}
