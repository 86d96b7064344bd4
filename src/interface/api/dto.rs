//! Request and response bodies of the control API

use crate::application::CallSnapshot;
use crate::domain::call::Destination;
use crate::domain::line::Line;
use serde::{Deserialize, Serialize};

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// `POST /calls`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialRequest {
    pub line_id: String,
    pub destination: Destination,
}

/// Active calls list response
#[derive(Debug, Serialize)]
pub struct ActiveCallsResponse {
    pub calls: Vec<CallSnapshot>,
    pub total: usize,
}

/// Registered lines list response
#[derive(Debug, Serialize)]
pub struct LinesResponse {
    pub lines: Vec<Line>,
    pub total: usize,
}
