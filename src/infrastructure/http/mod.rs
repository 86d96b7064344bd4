//! HTTP Core - the authenticated request seam every backend call goes through
//!
//! Retry, backoff and token refresh live behind this trait; this crate only
//! issues single requests and interprets status codes.

mod reqwest_core;

pub use reqwest_core::ReqwestHttpCore;

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

/// HTTP method subset used by the backend surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Status and raw body of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Response with a JSON body
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string().into_bytes())
    }

    pub fn empty(status: u16) -> Self {
        Self::new(status, Vec::new())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Decode the body
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(DomainError::protocol)
    }

    /// Decode the body as loose JSON; an empty body is `Value::Null`
    pub fn value(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    /// Turn a non-success status into a transport error naming the request
    pub fn error_for_status(self, context: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(DomainError::Transport(format!(
                "{} failed with status {}",
                context, self.status
            )))
        }
    }
}

/// Append `path` to a server URL that may or may not end with `/`
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Issues authenticated requests against the backend.
///
/// Network failures are `Err(DomainError::Transport)`; HTTP error statuses
/// come back as `Ok` responses so callers can act on specific codes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpCore: Send + Sync {
    async fn issue(&self, method: HttpMethod, url: &str, body: Option<Value>) -> Result<HttpResponse>;
}
