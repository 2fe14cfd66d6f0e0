//! Conversions between the internal protocol types and their proto
//! equivalents.
//!
//! Dynamic payloads and `meta` maps cross the boundary as
//! `google.protobuf.Struct`; timestamps as `google.protobuf.Timestamp`.
//! Unknown enum values collapse to the unspecified variant on the way in
//! and to internal on the way out, so a skewed client never panics the
//! gateway.

use chrono::{DateTime, SecondsFormat, Utc};
use mig_core::envelope::MessageHeader;
use mig_core::error::{ErrorCode, MigError};
use mig_core::protocol::{CapabilityDescriptor, EventMessage, StreamFrame};
use serde_json::{Map, Number, Value};

use super::pb;

pub fn header_from_proto(header: Option<pb::MessageHeader>) -> MessageHeader {
    let Some(header) = header else {
        return MessageHeader::default();
    };
    MessageHeader {
        mig_version: header.mig_version,
        message_id: header.message_id,
        timestamp: header
            .timestamp
            .map(timestamp_to_rfc3339)
            .unwrap_or_default(),
        tenant_id: header.tenant_id,
        session_id: header.session_id,
        traceparent: header.traceparent,
        idempotency_key: header.idempotency_key,
        deadline_ms: i64::from(header.deadline_ms),
        meta: struct_to_map(header.meta),
    }
}

pub fn header_to_proto(header: &MessageHeader) -> pb::MessageHeader {
    pb::MessageHeader {
        mig_version: header.mig_version.clone(),
        message_id: header.message_id.clone(),
        timestamp: Some(rfc3339_to_timestamp(&header.timestamp)),
        tenant_id: header.tenant_id.clone(),
        session_id: header.session_id.clone(),
        traceparent: header.traceparent.clone(),
        idempotency_key: header.idempotency_key.clone(),
        deadline_ms: header.deadline_ms.clamp(0, i64::from(u32::MAX)) as u32,
        meta: Some(map_to_struct(&header.meta)),
    }
}

pub fn binding_types_from_proto(bindings: &[i32]) -> Vec<String> {
    bindings
        .iter()
        .map(|raw| {
            match pb::BindingType::try_from(*raw).unwrap_or(pb::BindingType::Unspecified) {
                pb::BindingType::Http => "http".to_string(),
                pb::BindingType::Grpc => "grpc".to_string(),
                pb::BindingType::Nats => "nats".to_string(),
                pb::BindingType::Unspecified => String::new(),
            }
        })
        .collect()
}

pub fn binding_type_to_proto(binding: &str) -> pb::BindingType {
    match binding.trim().to_lowercase().as_str() {
        "http" => pb::BindingType::Http,
        "grpc" => pb::BindingType::Grpc,
        "nats" => pb::BindingType::Nats,
        _ => pb::BindingType::Unspecified,
    }
}

pub fn stream_preference_from_proto(pref: i32) -> String {
    match pb::StreamPreference::try_from(pref).unwrap_or(pb::StreamPreference::Unspecified) {
        pb::StreamPreference::Unary => "unary".to_string(),
        pb::StreamPreference::ServerStream => "server_stream".to_string(),
        pb::StreamPreference::BidiStream => "bidi_stream".to_string(),
        pb::StreamPreference::Unspecified => String::new(),
    }
}

fn invocation_mode_to_proto(mode: &str) -> pb::InvocationMode {
    match mode.trim().to_lowercase().as_str() {
        "unary" => pb::InvocationMode::Unary,
        "server_stream" => pb::InvocationMode::ServerStream,
        "client_stream" => pb::InvocationMode::ClientStream,
        "bidi_stream" => pb::InvocationMode::BidiStream,
        _ => pb::InvocationMode::Unspecified,
    }
}

fn delivery_semantics_to_proto(value: &str) -> pb::DeliverySemantics {
    match value.trim().to_lowercase().as_str() {
        "best_effort" => pb::DeliverySemantics::BestEffort,
        "at_least_once" => pb::DeliverySemantics::AtLeastOnce,
        "exactly_once" => pb::DeliverySemantics::ExactlyOnce,
        _ => pb::DeliverySemantics::Unspecified,
    }
}

pub fn capability_to_proto(capability: &CapabilityDescriptor) -> pb::CapabilityDescriptor {
    pb::CapabilityDescriptor {
        id: capability.id.clone(),
        version: capability.version.clone(),
        modes: capability
            .modes
            .iter()
            .map(|mode| invocation_mode_to_proto(mode) as i32)
            .collect(),
        input_schema_uri: capability.input_schema_uri.clone(),
        output_schema_uri: capability.output_schema_uri.clone(),
        event_topics: capability.event_topics.clone(),
        auth_scopes: capability.auth_scopes.clone(),
        qos: Some(pb::QoSProfile {
            max_payload_bytes: capability.qos.max_payload_bytes.max(0) as u64,
            supports_replay: capability.qos.supports_replay,
            delivery_semantics: delivery_semantics_to_proto(&capability.qos.delivery_semantics)
                as i32,
            supports_ordering: capability.qos.supports_ordering,
        }),
    }
}

pub fn frame_kind_from_proto(kind: i32) -> String {
    match pb::FrameKind::try_from(kind).unwrap_or(pb::FrameKind::Unspecified) {
        pb::FrameKind::Request => "request".to_string(),
        pb::FrameKind::Response => "response".to_string(),
        pb::FrameKind::Event => "event".to_string(),
        pb::FrameKind::Control => "control".to_string(),
        pb::FrameKind::Error => "error".to_string(),
        pb::FrameKind::Unspecified => String::new(),
    }
}

pub fn frame_kind_to_proto(kind: &str) -> pb::FrameKind {
    match kind.trim().to_lowercase().as_str() {
        "request" => pb::FrameKind::Request,
        "response" => pb::FrameKind::Response,
        "event" => pb::FrameKind::Event,
        "control" => pb::FrameKind::Control,
        "error" => pb::FrameKind::Error,
        _ => pb::FrameKind::Unspecified,
    }
}

pub fn stream_frame_from_proto(frame: pb::StreamFrame) -> StreamFrame {
    StreamFrame {
        header: header_from_proto(frame.header),
        stream_id: frame.stream_id,
        capability: frame.capability,
        kind: frame_kind_from_proto(frame.kind),
        payload: struct_to_map(frame.payload),
        end_stream: frame.end_stream,
        error: frame.error.map(mig_error_from_proto),
    }
}

pub fn stream_frame_to_proto(frame: &StreamFrame) -> pb::StreamFrame {
    pb::StreamFrame {
        header: Some(header_to_proto(&frame.header)),
        stream_id: frame.stream_id.clone(),
        capability: frame.capability.clone(),
        kind: frame_kind_to_proto(&frame.kind) as i32,
        payload: Some(map_to_struct(&frame.payload)),
        end_stream: frame.end_stream,
        error: frame.error.as_ref().map(mig_error_to_proto),
    }
}

pub fn event_to_proto(event: &EventMessage) -> pb::EventMessage {
    pb::EventMessage {
        header: Some(header_to_proto(&event.header)),
        topic: event.topic.clone(),
        event_id: event.event_id.clone(),
        sequence: event.sequence.max(0) as u64,
        payload: Some(map_to_struct(&event.payload)),
        published_at: Some(rfc3339_to_timestamp(&event.published_at)),
        replay: event.replay,
    }
}

pub fn mig_error_from_proto(error: pb::MigError) -> MigError {
    MigError {
        code: error_code_from_proto(error.code),
        message: error.message,
        retryable: error.retryable,
        details: error.details.map(|d| struct_to_map(Some(d))),
    }
}

pub fn mig_error_to_proto(error: &MigError) -> pb::MigError {
    pb::MigError {
        code: error_code_to_proto(error.code) as i32,
        message: error.message.clone(),
        retryable: error.retryable,
        details: error.details.as_ref().map(|d| map_to_struct(d)),
    }
}

fn error_code_from_proto(code: i32) -> ErrorCode {
    match pb::MigErrorCode::try_from(code).unwrap_or(pb::MigErrorCode::Unspecified) {
        pb::MigErrorCode::MigInvalidRequest => ErrorCode::InvalidRequest,
        pb::MigErrorCode::MigUnauthorized => ErrorCode::Unauthorized,
        pb::MigErrorCode::MigForbidden => ErrorCode::Forbidden,
        pb::MigErrorCode::MigNotFound => ErrorCode::NotFound,
        pb::MigErrorCode::MigUnsupportedCapability => ErrorCode::UnsupportedCapability,
        pb::MigErrorCode::MigVersionMismatch => ErrorCode::VersionMismatch,
        pb::MigErrorCode::MigTimeout => ErrorCode::Timeout,
        pb::MigErrorCode::MigRateLimited => ErrorCode::RateLimited,
        pb::MigErrorCode::MigBackpressure => ErrorCode::Backpressure,
        pb::MigErrorCode::MigUnavailable => ErrorCode::Unavailable,
        pb::MigErrorCode::MigInternal | pb::MigErrorCode::Unspecified => ErrorCode::Internal,
    }
}

fn error_code_to_proto(code: ErrorCode) -> pb::MigErrorCode {
    match code {
        ErrorCode::InvalidRequest => pb::MigErrorCode::MigInvalidRequest,
        ErrorCode::Unauthorized => pb::MigErrorCode::MigUnauthorized,
        ErrorCode::Forbidden => pb::MigErrorCode::MigForbidden,
        ErrorCode::NotFound => pb::MigErrorCode::MigNotFound,
        ErrorCode::UnsupportedCapability => pb::MigErrorCode::MigUnsupportedCapability,
        ErrorCode::VersionMismatch => pb::MigErrorCode::MigVersionMismatch,
        ErrorCode::Timeout => pb::MigErrorCode::MigTimeout,
        ErrorCode::RateLimited => pb::MigErrorCode::MigRateLimited,
        ErrorCode::Backpressure => pb::MigErrorCode::MigBackpressure,
        ErrorCode::Unavailable => pb::MigErrorCode::MigUnavailable,
        ErrorCode::Internal => pb::MigErrorCode::MigInternal,
    }
}

// ───────────────────────────────────────────────────────────────────────
// Struct / Timestamp plumbing
// ───────────────────────────────────────────────────────────────────────

pub fn struct_to_map(value: Option<prost_types::Struct>) -> Map<String, Value> {
    let Some(value) = value else {
        return Map::new();
    };
    value
        .fields
        .into_iter()
        .map(|(key, value)| (key, proto_value_to_json(value)))
        .collect()
}

pub fn map_to_struct(map: &Map<String, Value>) -> prost_types::Struct {
    prost_types::Struct {
        fields: map
            .iter()
            .map(|(key, value)| (key.clone(), json_to_proto_value(value)))
            .collect(),
    }
}

fn proto_value_to_json(value: prost_types::Value) -> Value {
    use prost_types::value::Kind;
    match value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::NumberValue(n)) => Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::StructValue(s)) => Value::Object(struct_to_map(Some(s))),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(proto_value_to_json).collect())
        }
    }
}

fn json_to_proto_value(value: &Value) -> prost_types::Value {
    use prost_types::value::Kind;
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(prost_types::ListValue {
            values: items.iter().map(json_to_proto_value).collect(),
        }),
        Value::Object(map) => Kind::StructValue(map_to_struct(map)),
    };
    prost_types::Value { kind: Some(kind) }
}

fn timestamp_to_rfc3339(ts: prost_types::Timestamp) -> String {
    DateTime::<Utc>::from_timestamp(ts.seconds, ts.nanos.max(0) as u32)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn rfc3339_to_timestamp(value: &str) -> prost_types::Timestamp {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    prost_types::Timestamp {
        seconds: parsed.timestamp(),
        nanos: parsed.timestamp_subsec_nanos().min(999_999_999) as i32,
    }
}
