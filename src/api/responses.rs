//! Serializable payloads exchanged with a transport

use crate::error::{BgRemovalError, ErrorStatus};
use crate::registry::ModelStatus;
use serde::{Deserialize, Serialize};

/// Structured failure; no raw error type crosses the service boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: ErrorStatus,
}

impl ErrorResponse {
    /// HTTP status code a transport should answer with
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.status.http_status()
    }
}

impl From<BgRemovalError> for ErrorResponse {
    fn from(error: BgRemovalError) -> Self {
        Self {
            status: error.status(),
            error: error.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.error, self.status)
    }
}

impl std::error::Error for ErrorResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelStatus>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResponse {
    pub status: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnloadResponse {
    pub status: String,
    pub model: String,
    /// Whether an instance was actually released
    pub unloaded: bool,
}

/// Successful removal; `png` holds the encoded RGBA result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalResponse {
    pub status: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}
