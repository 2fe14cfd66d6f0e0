//! Wire types for the MIG v0.1 protocol verbs and the admin surfaces.
//!
//! These are the JSON shapes shared by the HTTP and NATS bindings; the gRPC
//! binding converts them to and from the proto equivalents. Payloads and
//! `meta` are untyped JSON objects by design.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::envelope::MessageHeader;
use crate::error::MigError;

/// Version negotiation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloRequest {
    pub header: MessageHeader,
    pub supported_versions: Vec<String>,
    pub requested_bindings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requested_features: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloResponse {
    pub header: MessageHeader,
    pub selected_version: String,
    pub selected_binding: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enabled_features: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub server_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverRequest {
    pub header: MessageHeader,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub query: String,
    pub include_schema_refs: bool,
    pub include_qos: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverResponse {
    pub header: MessageHeader,
    pub capabilities: Vec<CapabilityDescriptor>,
}

/// Declared payload bounds, replay support, delivery semantics, and
/// ordering flag advertised per capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QoSProfile {
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub max_payload_bytes: i64,
    pub supports_replay: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub delivery_semantics: String,
    pub supports_ordering: bool,
}

fn is_zero_i64(value: &i64) -> bool {
    *value == 0
}

/// A named, versioned, schema-described unit of work the gateway can invoke.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityDescriptor {
    pub id: String,
    pub version: String,
    pub modes: Vec<String>,
    pub input_schema_uri: String,
    pub output_schema_uri: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub event_topics: Vec<String>,
    pub auth_scopes: Vec<String>,
    pub qos: QoSProfile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokeRequest {
    pub header: MessageHeader,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub capability: String,
    pub payload: Map<String, Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stream_preference: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokeResponse {
    pub header: MessageHeader,
    pub capability: String,
    pub payload: Map<String, Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub result_schema_uri: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishRequest {
    pub header: MessageHeader,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub topic: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishAck {
    pub header: MessageHeader,
    pub topic: String,
    pub event_id: String,
    pub sequence: i64,
    pub accepted: bool,
}

/// Entry in a per-topic event log. Stored events always carry
/// `replay == false`; the flag is flipped on the copies delivered as
/// historical catch-up at subscribe time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventMessage {
    pub header: MessageHeader,
    pub topic: String,
    pub event_id: String,
    pub sequence: i64,
    pub payload: Map<String, Value>,
    pub published_at: String,
    pub replay: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CancelRequest {
    pub header: MessageHeader,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target_message_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CancelAck {
    pub header: MessageHeader,
    pub target_message_id: String,
    pub accepted: bool,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatRequest {
    pub header: MessageHeader,
    pub interval_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatAck {
    pub header: MessageHeader,
    pub suggested_interval_ms: i64,
    pub load_factor: f64,
}

/// One frame of a duplex stream (WebSocket or gRPC bidi). `kind` selects
/// the dispatch: `request`, `response`, `event`, `control`, or `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamFrame {
    pub header: MessageHeader,
    pub stream_id: String,
    pub capability: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
    pub end_stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MigError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConformanceHealth {
    pub core: bool,
    pub streaming: bool,
    pub evented: bool,
    pub full: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityUpsertRequest {
    pub descriptor: CapabilityDescriptor,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaUpsertRequest {
    pub uri: String,
    pub schema: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyValidateRequest {
    pub tenant_id: String,
    pub capability: String,
    pub action: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyValidateResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaRequest {
    pub tenant_id: String,
    pub max_invocations: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaResponse {
    pub tenant_id: String,
    pub max_invocations: i64,
}

/// One line of the audit trail, also the line format of the audit log file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditRecord {
    pub actor: String,
    pub tenant_id: String,
    pub capability: String,
    pub outcome: String,
    pub timestamp: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSnapshot {
    pub tenant_invocations: BTreeMap<String, i64>,
    pub capability_invocations: BTreeMap<String, i64>,
    pub total_invocations: i64,
}

/// Point-in-time view of one long-lived session in the connection registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSnapshot {
    pub id: String,
    pub protocol: String,
    pub kind: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub actor: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub remote_addr: String,
    pub started_at: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSummary {
    pub total: usize,
    pub by_protocol: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,
    pub by_tenant: BTreeMap<String, usize>,
    pub nats_binding_active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionsResponse {
    pub generated_at: String,
    pub summary: ConnectionSummary,
    pub connections: Vec<ConnectionSnapshot>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub filter_tenant: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub filter_kind: String,
    #[serde(rename = "filter_protocol", skip_serializing_if = "String::is_empty")]
    pub filter_protocol: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Org {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tenant {
    pub id: String,
    pub org_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Gateway {
    pub id: String,
    pub tenant_id: String,
    pub region: String,
    pub binding: String,
}
