//! Shared dispatch for duplex stream frames.
//!
//! The WebSocket binding and the gRPC bidi binding carry the same
//! [`StreamFrame`] shape and the same per-frame semantics, so both route
//! through this one dispatcher: `request` frames invoke, `control` frames
//! with a cancel action cancel, everything else is answered with a terminal
//! error frame. The stream itself stays usable for subsequent frames.

use serde_json::{Map, Value};

use crate::auth::{apply_principal_header, Principal};
use crate::error::MigError;
use crate::protocol::{CancelRequest, InvokeRequest, StreamFrame};

use super::Service;

/// Dispatch one inbound frame and produce the reply frame.
///
/// `cancel_reason` names the transport in the sticky-cancellation record
/// (for example `"websocket control cancel"`).
pub async fn dispatch_frame(
    service: &Service,
    principal: &Principal,
    mut frame: StreamFrame,
    cancel_reason: &str,
) -> StreamFrame {
    if frame.stream_id.is_empty() {
        frame.stream_id = format!("stream-{}", frame.header.message_id);
    }
    if let Err(err) = apply_principal_header(&mut frame.header, principal, None) {
        return error_frame(&frame, err);
    }

    match frame.kind.as_str() {
        "request" => {
            let invoke_req = InvokeRequest {
                header: frame.header.clone(),
                capability: frame.capability.clone(),
                payload: frame.payload.clone(),
                stream_preference: String::new(),
            };
            let actor = if principal.subject.is_empty() {
                "anonymous"
            } else {
                principal.subject.as_str()
            };
            match service
                .invoke(&frame.capability, invoke_req, actor, principal)
                .await
            {
                Ok(resp) => StreamFrame {
                    header: frame.header,
                    stream_id: frame.stream_id,
                    capability: frame.capability,
                    kind: "response".to_string(),
                    payload: resp.payload,
                    end_stream: true,
                    error: None,
                },
                Err(err) => error_frame(&frame, err),
            }
        }
        "control" => {
            let action = frame
                .payload
                .get("action")
                .and_then(Value::as_str)
                .map(|a| a.trim().to_lowercase())
                .unwrap_or_default();
            if action != "cancel" {
                return error_frame(&frame, MigError::invalid("unsupported control action"));
            }
            let cancel_req = CancelRequest {
                header: frame.header.clone(),
                target_message_id: frame.header.message_id.clone(),
                reason: cancel_reason.to_string(),
            };
            let target = cancel_req.target_message_id.clone();
            match service.cancel(cancel_req, &target) {
                Ok(ack) => {
                    let mut payload = Map::new();
                    payload.insert("accepted".to_string(), Value::Bool(ack.accepted));
                    payload.insert("status".to_string(), Value::String(ack.status));
                    StreamFrame {
                        header: frame.header,
                        stream_id: frame.stream_id,
                        capability: frame.capability,
                        kind: "control".to_string(),
                        payload,
                        end_stream: true,
                        error: None,
                    }
                }
                Err(err) => error_frame(&frame, err),
            }
        }
        _ => error_frame(
            &frame,
            MigError::invalid("frame.kind must be request or control"),
        ),
    }
}

fn error_frame(frame: &StreamFrame, error: MigError) -> StreamFrame {
    StreamFrame {
        header: frame.header.clone(),
        stream_id: frame.stream_id.clone(),
        capability: frame.capability.clone(),
        kind: "error".to_string(),
        payload: Map::new(),
        end_stream: true,
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MessageHeader;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn request_frame(capability: &str) -> StreamFrame {
        let payload = match json!({"input": "hello"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        StreamFrame {
            header: MessageHeader {
                tenant_id: "acme".to_string(),
                message_id: "m1".to_string(),
                ..MessageHeader::default()
            },
            capability: capability.to_string(),
            kind: "request".to_string(),
            payload,
            ..StreamFrame::default()
        }
    }

    #[tokio::test]
    async fn request_frame_returns_terminal_response() {
        let svc = Service::new();
        let out = dispatch_frame(
            &svc,
            &Principal::anonymous(),
            request_frame("observatory.models.infer"),
            "test cancel",
        )
        .await;
        assert_eq!(out.kind, "response");
        assert!(out.end_stream);
        assert_eq!(out.stream_id, "stream-m1");
        assert_eq!(out.payload["result"], "ok");
    }

    #[tokio::test]
    async fn unknown_capability_becomes_error_frame() {
        let svc = Service::new();
        let out = dispatch_frame(
            &svc,
            &Principal::anonymous(),
            request_frame("missing.capability"),
            "test cancel",
        )
        .await;
        assert_eq!(out.kind, "error");
        assert!(out.end_stream);
        assert_eq!(
            out.error.unwrap().code,
            ErrorCode::UnsupportedCapability
        );
    }

    #[tokio::test]
    async fn control_cancel_records_sticky_cancellation() {
        let svc = Service::new();
        let mut frame = request_frame("observatory.models.infer");
        frame.kind = "control".to_string();
        frame.payload = match json!({"action": "Cancel"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let out = dispatch_frame(&svc, &Principal::anonymous(), frame, "stream control cancel")
            .await;
        assert_eq!(out.kind, "control");
        assert_eq!(out.payload["accepted"], true);
        assert_eq!(out.payload["status"], "cancelled");

        // The frame's own message id is now sticky-cancelled.
        let out = dispatch_frame(
            &svc,
            &Principal::anonymous(),
            request_frame("observatory.models.infer"),
            "stream control cancel",
        )
        .await;
        assert_eq!(out.kind, "error");
        let err = out.error.unwrap();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert!(err.message.contains("stream control cancel"));
    }

    #[tokio::test]
    async fn unsupported_control_action_is_rejected() {
        let svc = Service::new();
        let mut frame = request_frame("observatory.models.infer");
        frame.kind = "control".to_string();
        frame.payload = match json!({"action": "pause"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let out = dispatch_frame(&svc, &Principal::anonymous(), frame, "x").await;
        assert_eq!(out.kind, "error");
        assert!(out.error.unwrap().message.contains("unsupported control"));
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let svc = Service::new();
        let mut frame = request_frame("observatory.models.infer");
        frame.kind = "event".to_string();
        let out = dispatch_frame(&svc, &Principal::anonymous(), frame, "x").await;
        assert_eq!(out.kind, "error");
        assert!(out
            .error
            .unwrap()
            .message
            .contains("frame.kind must be request or control"));
    }

    #[tokio::test]
    async fn tenant_mismatch_is_rejected_before_dispatch() {
        let svc = Service::new();
        let principal = Principal {
            subject: "svc".to_string(),
            tenant_id: "globex".to_string(),
            authenticated: true,
            ..Principal::default()
        };
        let out = dispatch_frame(
            &svc,
            &principal,
            request_frame("observatory.models.infer"),
            "x",
        )
        .await;
        assert_eq!(out.kind, "error");
        assert_eq!(out.error.unwrap().code, ErrorCode::Forbidden);
    }
}
