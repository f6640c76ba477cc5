//! Unified error type for sitewatch.

use thiserror::Error;

use crate::types::Channel;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid range: start {start_ms}ms is after end {end_ms}ms")]
    InvalidRange { start_ms: i64, end_ms: i64 },

    #[error("Site {site} does not belong to the {expected} channel family")]
    InvalidChannel { site: String, expected: Channel },

    #[error("Telemetry API error (status={status}): {body}")]
    Api { status: u16, body: String },

    #[error("Telemetry request timed out: {0}")]
    Timeout(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Cache store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures of the remote telemetry collaborator.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Api { .. } | Self::Timeout(_) | Self::Http(_))
    }

    /// True for caller mistakes that retrying will not fix.
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, Self::InvalidRange { .. } | Self::InvalidChannel { .. })
    }
}
