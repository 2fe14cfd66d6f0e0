//! The MIG v0.1 message envelope.
//!
//! Every request and response carries a [`MessageHeader`]. Bindings hand the
//! header to the engine as-received; [`MessageHeader::normalize`] applies the
//! defaulting and validation contract exactly once per operation.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::MigError;

/// The single protocol version this gateway speaks.
pub const MIG_VERSION: &str = "0.1";

/// Default invocation deadline when the client does not set one.
pub const DEFAULT_DEADLINE_MS: i64 = 30_000;

/// Canonical MIG v0.1 envelope header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageHeader {
    pub mig_version: String,
    pub message_id: String,
    pub timestamp: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub traceparent: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub idempotency_key: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub deadline_ms: i64,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

impl MessageHeader {
    /// Apply MIG defaults and required-field validation.
    ///
    /// Fails with `MIG_INVALID_REQUEST` when `tenant_id` is empty or
    /// `mig_version` names anything other than the supported version.
    pub fn normalize(&mut self) -> Result<(), MigError> {
        if self.mig_version.is_empty() {
            self.mig_version = MIG_VERSION.to_string();
        }
        if self.mig_version != MIG_VERSION {
            return Err(MigError::invalid(format!(
                "unsupported mig_version {:?}",
                self.mig_version
            )));
        }
        if self.message_id.is_empty() {
            self.message_id = new_message_id();
        }
        if self.timestamp.is_empty() {
            self.timestamp = rfc3339_now();
        }
        if self.tenant_id.is_empty() {
            return Err(MigError::invalid("tenant_id is required"));
        }
        if self.deadline_ms <= 0 {
            self.deadline_ms = DEFAULT_DEADLINE_MS;
        }
        Ok(())
    }

    /// Annotate the standardized product telemetry fields in `meta`.
    pub fn add_idg_meta(&mut self, product_tier: &str) {
        self.meta.insert(
            "idg.product_tier".to_string(),
            Value::String(product_tier.to_string()),
        );
        self.meta.insert(
            "idg.meter_key".to_string(),
            Value::String("invocations_capability_tier".to_string()),
        );
    }
}

/// A fresh opaque message id: 16 random bytes, hex-encoded.
pub fn new_message_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Current wall-clock time as RFC3339 UTC with second precision.
pub fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
