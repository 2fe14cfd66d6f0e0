//! MIG error taxonomy.
//!
//! Every failure that crosses a binding boundary is a [`MigError`] carrying
//! one of the closed set of [`ErrorCode`]s, a human-readable message, a
//! retryability hint, and optional structured details. Bindings map the code
//! to their transport-native status; the engine never invents codes outside
//! this set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::envelope::MessageHeader;

/// The closed set of MIG v0.1 error codes.
///
/// Serialized on the wire as the `MIG_*` string constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "MIG_INVALID_REQUEST")]
    InvalidRequest,
    #[serde(rename = "MIG_UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "MIG_FORBIDDEN")]
    Forbidden,
    #[serde(rename = "MIG_NOT_FOUND")]
    NotFound,
    #[serde(rename = "MIG_UNSUPPORTED_CAPABILITY")]
    UnsupportedCapability,
    #[serde(rename = "MIG_VERSION_MISMATCH")]
    VersionMismatch,
    #[serde(rename = "MIG_TIMEOUT")]
    Timeout,
    #[serde(rename = "MIG_RATE_LIMITED")]
    RateLimited,
    #[serde(rename = "MIG_BACKPRESSURE")]
    Backpressure,
    #[serde(rename = "MIG_UNAVAILABLE")]
    Unavailable,
    #[serde(rename = "MIG_INTERNAL")]
    Internal,
}

impl ErrorCode {
    /// The wire constant for this code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "MIG_INVALID_REQUEST",
            Self::Unauthorized => "MIG_UNAUTHORIZED",
            Self::Forbidden => "MIG_FORBIDDEN",
            Self::NotFound => "MIG_NOT_FOUND",
            Self::UnsupportedCapability => "MIG_UNSUPPORTED_CAPABILITY",
            Self::VersionMismatch => "MIG_VERSION_MISMATCH",
            Self::Timeout => "MIG_TIMEOUT",
            Self::RateLimited => "MIG_RATE_LIMITED",
            Self::Backpressure => "MIG_BACKPRESSURE",
            Self::Unavailable => "MIG_UNAVAILABLE",
            Self::Internal => "MIG_INTERNAL",
        }
    }

    /// Whether a client may retry the same request without changing it.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::Backpressure | Self::Unavailable
        )
    }

    /// HTTP status the HTTP binding uses for this code.
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound | Self::UnsupportedCapability => 404,
            Self::VersionMismatch => 412,
            Self::Timeout => 504,
            Self::RateLimited | Self::Backpressure => 429,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed MIG error as it travels through the engine and onto the wire.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct MigError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

impl MigError {
    /// Build an error with the code's default retryability.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.retryable(),
            details: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn unsupported_capability(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedCapability, message)
    }

    pub fn version_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::VersionMismatch, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimited, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

/// The wire form every binding uses to deliver a [`MigError`]: the echoed
/// (shaped) envelope header plus the error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub header: MessageHeader,
    pub error: MigError,
}

impl ErrorEnvelope {
    /// Shape a header for an error response: blank identity fields are
    /// filled so the envelope is always well-formed even when the request
    /// never made it through normalization.
    pub fn shaped(mut header: MessageHeader, error: MigError) -> Self {
        if header.tenant_id.is_empty() {
            header.tenant_id = "unknown".to_string();
        }
        if header.message_id.is_empty() {
            header.message_id = crate::envelope::new_message_id();
        }
        if header.mig_version.is_empty() {
            header.mig_version = crate::envelope::MIG_VERSION.to_string();
        }
        if header.timestamp.is_empty() {
            header.timestamp = crate::envelope::rfc3339_now();
        }
        Self { header, error }
    }
}
