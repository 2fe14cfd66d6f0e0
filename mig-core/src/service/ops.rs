//! The protocol verbs: hello, discover, invoke, publish, subscribe, cancel,
//! heartbeat.
//!
//! Every verb normalizes the inbound header first, so responses always echo
//! a populated envelope. Invoke is the only async verb; its payload
//! production runs under the request deadline while all bookkeeping happens
//! inside the exclusive critical section.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::envelope::{new_message_id, rfc3339_now, MIG_VERSION};
use crate::error::{ErrorCode, MigError};
use crate::protocol::{
    CancelAck, CancelRequest, DiscoverRequest, DiscoverResponse, EventMessage, HeartbeatAck,
    HeartbeatRequest, HelloRequest, HelloResponse, InvokeRequest, InvokeResponse, PublishAck,
    PublishRequest,
};
use crate::auth::Principal;

use super::{Service, SubscriptionGuard, SUBSCRIBER_CHANNEL_CAPACITY};

impl Service {
    /// Version negotiation. The only supported version is `"0.1"`; an empty
    /// client list is treated as supporting it.
    pub fn hello(&self, mut req: HelloRequest) -> Result<HelloResponse, MigError> {
        let mut head = req.header;
        if let Err(err) = head.normalize() {
            self.record_error(err.code, "hello");
            return Err(err);
        }
        if req.supported_versions.is_empty() {
            req.supported_versions = vec![MIG_VERSION.to_string()];
        }
        if !req
            .supported_versions
            .iter()
            .any(|v| v.trim() == MIG_VERSION)
        {
            self.record_error(ErrorCode::VersionMismatch, "hello");
            return Err(MigError::version_mismatch("no compatible MIG version"));
        }

        let selected_binding = req
            .requested_bindings
            .iter()
            .map(|b| b.trim().to_lowercase())
            .find(|b| matches!(b.as_str(), "grpc" | "nats" | "http"))
            .unwrap_or_else(|| "http".to_string());

        head.add_idg_meta("core");
        Ok(HelloResponse {
            header: head,
            selected_version: MIG_VERSION.to_string(),
            selected_binding,
            enabled_features: req.requested_features,
            server_id: self.server_id().to_string(),
        })
    }

    /// Capability discovery, filtered by substring query and the caller's
    /// scope gate, deterministically sorted by id.
    pub fn discover(
        &self,
        req: DiscoverRequest,
        principal: &Principal,
    ) -> Result<DiscoverResponse, MigError> {
        let mut head = req.header;
        if let Err(err) = head.normalize() {
            self.record_error(err.code, "discover");
            return Err(err);
        }
        head.add_idg_meta("core");

        let state = self.read();
        let capabilities = state
            .capabilities
            .values()
            .filter(|cap| req.query.is_empty() || cap.id.contains(&req.query))
            .filter(|cap| principal.has_any_scope(&cap.auth_scopes))
            .cloned()
            .collect();
        Ok(DiscoverResponse {
            header: head,
            capabilities,
        })
    }

    /// Invoke a capability.
    ///
    /// Checks run in a fixed order: capability lookup, scope gate, sticky
    /// cancellation, idempotency replay, quota. The payload is produced
    /// under the request deadline; success is committed atomically
    /// (idempotency record, counters, audit) under the exclusive lock.
    pub async fn invoke(
        &self,
        capability: &str,
        mut req: InvokeRequest,
        actor: &str,
        principal: &Principal,
    ) -> Result<InvokeResponse, MigError> {
        let mut head = req.header.clone();
        if let Err(err) = head.normalize() {
            self.record_error(err.code, "invoke");
            return Err(err);
        }
        head.add_idg_meta("core");

        let capability = if capability.is_empty() {
            req.capability.clone()
        } else {
            capability.to_string()
        };
        if capability.is_empty() {
            self.record_error(ErrorCode::InvalidRequest, "invoke");
            return Err(MigError::invalid("capability is required"));
        }
        req.capability = capability.clone();

        let idem_key = if head.idempotency_key.is_empty() {
            None
        } else {
            Some(format!(
                "{}:{}:{}",
                head.tenant_id, capability, head.idempotency_key
            ))
        };

        // Pre-flight checks under the shared lock.
        let descriptor = {
            let state = self.read();
            let Some(descriptor) = state.capabilities.get(&capability).cloned() else {
                drop(state);
                self.record_error(ErrorCode::UnsupportedCapability, "invoke");
                return Err(MigError::unsupported_capability("capability not found"));
            };
            if !principal.has_any_scope(&descriptor.auth_scopes) {
                drop(state);
                self.record_error(ErrorCode::Forbidden, "invoke");
                return Err(MigError::forbidden("insufficient capability scope"));
            }
            if let Some(reason) = state.cancelled.get(&head.message_id) {
                let reason = reason.clone();
                drop(state);
                self.record_error(ErrorCode::Timeout, "invoke");
                return Err(MigError::timeout(format!(
                    "invocation cancelled: {reason}"
                )));
            }
            if let Some(key) = &idem_key {
                if let Some(cached) = state.idempotency.get(key) {
                    let mut cached = cached.clone();
                    cached.header = head;
                    return Ok(cached);
                }
            }
            let quota = state.quotas.get(&head.tenant_id).copied();
            let used = state
                .tenant_invocations
                .get(&head.tenant_id)
                .copied()
                .unwrap_or(0);
            if let Some(quota) = quota {
                if used >= quota {
                    drop(state);
                    self.record_error(ErrorCode::RateLimited, "invoke");
                    return Err(MigError::rate_limited("tenant quota exceeded"));
                }
            }
            descriptor
        };

        // Payload production is the dispatcher extension point. The echo
        // stub completes immediately but still runs under the deadline so a
        // real dispatcher inherits interruptibility.
        let deadline = Duration::from_millis(head.deadline_ms.max(0) as u64);
        let payload_req = req.payload.clone();
        let qos = descriptor.qos.delivery_semantics.clone();
        let cap_for_payload = capability.clone();
        let produced = tokio::time::timeout(deadline, async move {
            let mut payload = Map::new();
            payload.insert("result".to_string(), Value::String("ok".to_string()));
            payload.insert("echo".to_string(), Value::Object(payload_req));
            payload.insert("capability".to_string(), Value::String(cap_for_payload));
            payload.insert("delivery_qos".to_string(), Value::String(qos));
            payload
        })
        .await;

        let payload = match produced {
            Ok(payload) => payload,
            Err(_) => {
                self.record_error(ErrorCode::Timeout, "invoke");
                return Err(MigError::timeout("deadline exceeded"));
            }
        };

        let response = InvokeResponse {
            header: head.clone(),
            capability: capability.clone(),
            payload,
            result_schema_uri: descriptor.output_schema_uri.clone(),
        };

        // Commit: idempotency record, usage counters, audit trail.
        {
            let mut state = self.write();
            if let Some(key) = idem_key {
                state.idempotency.insert(key, response.clone());
            }
            *state
                .tenant_invocations
                .entry(head.tenant_id.clone())
                .or_insert(0) += 1;
            *state
                .capability_invocations
                .entry(capability.clone())
                .or_insert(0) += 1;
            let record = crate::protocol::AuditRecord {
                actor: actor.to_string(),
                tenant_id: head.tenant_id.clone(),
                capability,
                outcome: "success".to_string(),
                timestamp: rfc3339_now(),
                message_id: head.message_id.clone(),
            };
            Self::write_audit_locked(&state, &record);
            state.audit.push(record);
        }
        Ok(response)
    }

    /// Publish an event to a namespaced topic. Sequencing, the log append,
    /// and live fan-out all happen inside one critical section, which is
    /// the serialization point for the per-topic ordering guarantee.
    pub fn publish(&self, topic: &str, req: PublishRequest) -> Result<PublishAck, MigError> {
        let mut head = req.header;
        if let Err(err) = head.normalize() {
            self.record_error(err.code, "publish");
            return Err(err);
        }
        head.add_idg_meta("core");

        let topic = if topic.is_empty() {
            req.topic.clone()
        } else {
            topic.to_string()
        };
        if topic.is_empty() {
            self.record_error(ErrorCode::InvalidRequest, "publish");
            return Err(MigError::invalid("topic is required"));
        }
        if !topic.contains('.') {
            self.record_error(ErrorCode::InvalidRequest, "publish");
            return Err(MigError::invalid("topic names must be namespaced"));
        }

        let mut state = self.write();
        let sequence = state.events.get(&topic).map_or(0, Vec::len) as i64 + 1;
        let event = EventMessage {
            header: head.clone(),
            topic: topic.clone(),
            event_id: new_message_id(),
            sequence,
            payload: req.payload,
            published_at: rfc3339_now(),
            replay: false,
        };
        state.events.entry(topic.clone()).or_default().push(event.clone());
        if let Some(subscribers) = state.subscribers.get(&topic) {
            for sender in subscribers.values() {
                // Non-blocking: a full channel drops this event for that
                // slow subscriber only.
                let _ = sender.try_send(event.clone());
            }
        }
        self.mirror_event_to_nats(&event);
        Ok(PublishAck {
            header: head,
            topic,
            event_id: event.event_id,
            sequence,
            accepted: true,
        })
    }

    /// Subscribe to a topic with optional replay from `resume_cursor`.
    ///
    /// The replay snapshot and the live-channel registration happen in the
    /// same critical section: nothing published after the snapshot can be
    /// missed, and nothing in the snapshot is re-delivered live.
    pub fn subscribe(
        self: &Arc<Self>,
        topic: &str,
        resume_cursor: &str,
    ) -> Result<(Vec<EventMessage>, mpsc::Receiver<EventMessage>, SubscriptionGuard), MigError>
    {
        if topic.is_empty() {
            self.record_error(ErrorCode::InvalidRequest, "subscribe");
            return Err(MigError::invalid("topic is required"));
        }
        if !topic.contains('.') {
            self.record_error(ErrorCode::InvalidRequest, "subscribe");
            return Err(MigError::invalid("topic names must be namespaced"));
        }
        let start = if resume_cursor.is_empty() {
            0
        } else {
            match resume_cursor.parse::<i64>() {
                Ok(cursor) if cursor >= 0 => cursor as usize,
                _ => {
                    self.record_error(ErrorCode::InvalidRequest, "subscribe");
                    return Err(MigError::invalid(
                        "resume_cursor must be a non-negative integer",
                    ));
                }
            }
        };

        let mut state = self.write();
        let log = state.events.get(topic).map(Vec::as_slice).unwrap_or(&[]);
        let start = start.min(log.len());
        let replay: Vec<EventMessage> = log[start..]
            .iter()
            .cloned()
            .map(|mut event| {
                event.replay = true;
                event
            })
            .collect();

        let (sender, receiver) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .insert(id, sender);
        drop(state);

        let guard = SubscriptionGuard {
            service: Arc::clone(self),
            topic: topic.to_string(),
            id,
        };
        Ok((replay, receiver, guard))
    }

    /// Record a sticky cancellation for a message id. Always accepted; a
    /// later cancel for the same id overwrites the reason.
    pub fn cancel(&self, req: CancelRequest, message_id: &str) -> Result<CancelAck, MigError> {
        let mut head = req.header;
        if let Err(err) = head.normalize() {
            self.record_error(err.code, "cancel");
            return Err(err);
        }
        head.add_idg_meta("core");

        let message_id = if message_id.is_empty() {
            req.target_message_id.clone()
        } else {
            message_id.to_string()
        };
        if message_id.is_empty() {
            self.record_error(ErrorCode::InvalidRequest, "cancel");
            return Err(MigError::invalid("target message id is required"));
        }
        self.write().cancelled.insert(message_id.clone(), req.reason);
        Ok(CancelAck {
            header: head,
            target_message_id: message_id,
            accepted: true,
            status: "cancelled".to_string(),
        })
    }

    /// Liveness echo. Suggests a 5s interval when the client proposes none
    /// and reports a coarse load factor derived from the audit volume.
    pub fn heartbeat(&self, req: HeartbeatRequest) -> Result<HeartbeatAck, MigError> {
        let mut head = req.header;
        if let Err(err) = head.normalize() {
            self.record_error(err.code, "heartbeat");
            return Err(err);
        }
        head.add_idg_meta("core");

        let interval_ms = if req.interval_ms <= 0 {
            5000
        } else {
            req.interval_ms
        };
        let load_factor = self.read().audit.len() as f64 / 1000.0;
        Ok(HeartbeatAck {
            header: head,
            suggested_interval_ms: interval_ms,
            load_factor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MessageHeader;
    use serde_json::json;

    fn header(tenant: &str) -> MessageHeader {
        MessageHeader {
            tenant_id: tenant.to_string(),
            ..MessageHeader::default()
        }
    }

    fn payload(value: serde_json::Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test payload must be an object"),
        }
    }

    fn invoke_req(tenant: &str) -> InvokeRequest {
        InvokeRequest {
            header: header(tenant),
            payload: payload(json!({"input": "hello"})),
            ..InvokeRequest::default()
        }
    }

    #[test]
    fn hello_selects_version_and_binding() {
        let svc = Service::new();
        let resp = svc
            .hello(HelloRequest {
                header: header("acme"),
                supported_versions: vec!["0.1".to_string()],
                requested_bindings: vec!["http".to_string()],
                requested_features: vec!["events".to_string()],
            })
            .unwrap();
        assert_eq!(resp.selected_version, "0.1");
        assert_eq!(resp.selected_binding, "http");
        assert_eq!(resp.enabled_features, vec!["events".to_string()]);
        assert_eq!(resp.server_id, "migd-core");
        assert_eq!(resp.header.meta["idg.product_tier"], "core");
    }

    #[test]
    fn hello_version_gate() {
        let svc = Service::new();
        let err = svc
            .hello(HelloRequest {
                header: header("acme"),
                supported_versions: vec!["0.2".to_string()],
                ..HelloRequest::default()
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::VersionMismatch);

        // An empty list defaults to the supported version.
        let resp = svc
            .hello(HelloRequest {
                header: header("acme"),
                ..HelloRequest::default()
            })
            .unwrap();
        assert_eq!(resp.selected_version, "0.1");
    }

    #[test]
    fn hello_prefers_first_known_binding() {
        let svc = Service::new();
        let resp = svc
            .hello(HelloRequest {
                header: header("acme"),
                requested_bindings: vec![
                    "quic".to_string(),
                    " GRPC ".to_string(),
                    "http".to_string(),
                ],
                ..HelloRequest::default()
            })
            .unwrap();
        assert_eq!(resp.selected_binding, "grpc");
    }

    #[test]
    fn discover_filters_by_query_and_sorts() {
        let svc = Service::new();
        let principal = Principal::anonymous();
        let resp = svc
            .discover(
                DiscoverRequest {
                    header: header("acme"),
                    query: "models".to_string(),
                    ..DiscoverRequest::default()
                },
                &principal,
            )
            .unwrap();
        assert_eq!(resp.capabilities.len(), 1);
        assert_eq!(resp.capabilities[0].id, "observatory.models.infer");

        let resp = svc
            .discover(
                DiscoverRequest {
                    header: header("acme"),
                    query: "no-such".to_string(),
                    ..DiscoverRequest::default()
                },
                &principal,
            )
            .unwrap();
        assert!(resp.capabilities.is_empty());
    }

    #[test]
    fn discover_applies_scope_gate_for_authenticated_principals() {
        let svc = Service::new();
        let mut principal = Principal {
            subject: "svc".to_string(),
            tenant_id: "acme".to_string(),
            authenticated: true,
            ..Principal::default()
        };
        let resp = svc
            .discover(
                DiscoverRequest {
                    header: header("acme"),
                    ..DiscoverRequest::default()
                },
                &principal,
            )
            .unwrap();
        assert!(resp.capabilities.is_empty());

        principal.scopes.insert("capability:infer".to_string());
        let resp = svc
            .discover(
                DiscoverRequest {
                    header: header("acme"),
                    ..DiscoverRequest::default()
                },
                &principal,
            )
            .unwrap();
        assert_eq!(resp.capabilities.len(), 1);
    }

    #[tokio::test]
    async fn invoke_echoes_payload_with_qos() {
        let svc = Service::new();
        let resp = svc
            .invoke(
                "observatory.models.infer",
                invoke_req("acme"),
                "tester",
                &Principal::anonymous(),
            )
            .await
            .unwrap();
        assert_eq!(resp.payload["result"], "ok");
        assert_eq!(resp.payload["echo"]["input"], "hello");
        assert_eq!(resp.payload["delivery_qos"], "at_least_once");
        assert_eq!(
            resp.result_schema_uri,
            "schema://observatory/models/infer-output/v1"
        );
        assert_eq!(svc.usage().total_invocations, 1);
        assert_eq!(svc.audit_export("acme").len(), 1);
    }

    #[tokio::test]
    async fn invoke_unknown_capability_fails() {
        let svc = Service::new();
        let err = svc
            .invoke(
                "missing.capability",
                invoke_req("acme"),
                "tester",
                &Principal::anonymous(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedCapability);
    }

    #[tokio::test]
    async fn invoke_requires_a_capability_argument_or_field() {
        let svc = Service::new();
        let err = svc
            .invoke("", invoke_req("acme"), "tester", &Principal::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);

        let mut req = invoke_req("acme");
        req.capability = "observatory.models.infer".to_string();
        let resp = svc
            .invoke("", req, "tester", &Principal::anonymous())
            .await
            .unwrap();
        assert_eq!(resp.capability, "observatory.models.infer");
    }

    #[tokio::test]
    async fn invoke_scope_gate_rejects_unscoped_principal() {
        let svc = Service::new();
        let principal = Principal {
            subject: "svc".to_string(),
            tenant_id: "acme".to_string(),
            authenticated: true,
            ..Principal::default()
        };
        let err = svc
            .invoke(
                "observatory.models.infer",
                invoke_req("acme"),
                "svc",
                &principal,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn invoke_idempotency_replays_identical_payload() {
        let svc = Service::new();
        let mut req = invoke_req("acme");
        req.header.idempotency_key = "id-1".to_string();
        let first = svc
            .invoke(
                "observatory.models.infer",
                req.clone(),
                "tester",
                &Principal::anonymous(),
            )
            .await
            .unwrap();

        let mut repeat = invoke_req("acme");
        repeat.header.idempotency_key = "id-1".to_string();
        repeat.payload = payload(json!({"input": "changed"}));
        let second = svc
            .invoke(
                "observatory.models.infer",
                repeat,
                "tester",
                &Principal::anonymous(),
            )
            .await
            .unwrap();

        assert_eq!(first.payload, second.payload);
        // Only the first attempt counts against usage and audit.
        assert_eq!(svc.usage().total_invocations, 1);
        assert_eq!(svc.audit_export("").len(), 1);
    }

    #[tokio::test]
    async fn invoke_quota_boundary() {
        let svc = Service::new();
        svc.set_quota(crate::protocol::QuotaRequest {
            tenant_id: "acme".to_string(),
            max_invocations: 1,
        })
        .unwrap();

        svc.invoke(
            "observatory.models.infer",
            invoke_req("acme"),
            "tester",
            &Principal::anonymous(),
        )
        .await
        .unwrap();

        let err = svc
            .invoke(
                "observatory.models.infer",
                invoke_req("acme"),
                "tester",
                &Principal::anonymous(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimited);
        assert!(err.retryable);

        // Other tenants are unaffected.
        svc.invoke(
            "observatory.models.infer",
            invoke_req("globex"),
            "tester",
            &Principal::anonymous(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn cancellation_is_sticky() {
        let svc = Service::new();
        let ack = svc
            .cancel(
                CancelRequest {
                    header: header("acme"),
                    target_message_id: "m1".to_string(),
                    reason: "client went away".to_string(),
                },
                "",
            )
            .unwrap();
        assert!(ack.accepted);
        assert_eq!(ack.status, "cancelled");

        let mut req = invoke_req("acme");
        req.header.message_id = "m1".to_string();
        let err = svc
            .invoke(
                "observatory.models.infer",
                req,
                "tester",
                &Principal::anonymous(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert!(err.message.contains("client went away"));
    }

    #[test]
    fn cancel_requires_a_target() {
        let svc = Service::new();
        let err = svc
            .cancel(
                CancelRequest {
                    header: header("acme"),
                    ..CancelRequest::default()
                },
                "",
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn publish_assigns_monotonic_sequences() {
        let svc = Service::new();
        for expected in 1..=3 {
            let ack = svc
                .publish(
                    "observatory.inference.completed",
                    PublishRequest {
                        header: header("acme"),
                        payload: payload(json!({"state": "done"})),
                        ..PublishRequest::default()
                    },
                )
                .unwrap();
            assert_eq!(ack.sequence, expected);
            assert!(ack.accepted);
        }
    }

    #[test]
    fn publish_rejects_unnamespaced_topics() {
        let svc = Service::new();
        let err = svc
            .publish(
                "flat",
                PublishRequest {
                    header: header("acme"),
                    ..PublishRequest::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);

        let err = svc
            .publish(
                "",
                PublishRequest {
                    header: header("acme"),
                    ..PublishRequest::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn subscribe_replays_then_streams_live() {
        let svc = Service::new();
        let topic = "observatory.inference.completed";
        svc.publish(
            topic,
            PublishRequest {
                header: header("acme"),
                payload: payload(json!({"state": "done"})),
                ..PublishRequest::default()
            },
        )
        .unwrap();

        let (replay, mut live, _guard) = svc.subscribe(topic, "0").unwrap();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].sequence, 1);
        assert!(replay[0].replay);

        svc.publish(
            topic,
            PublishRequest {
                header: header("acme"),
                payload: payload(json!({"state": "again"})),
                ..PublishRequest::default()
            },
        )
        .unwrap();

        let event = live.recv().await.unwrap();
        assert_eq!(event.sequence, 2);
        assert!(!event.replay);
    }

    #[test]
    fn subscribe_cursor_validation_and_clamping() {
        let svc = Service::new();
        let topic = "observatory.inference.completed";

        let err = svc.subscribe(topic, "-1").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
        let err = svc.subscribe(topic, "nope").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
        let err = svc.subscribe("flat", "0").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);

        // A cursor past the tail clamps to an empty replay.
        let (replay, _live, _guard) = svc.subscribe(topic, "999").unwrap();
        assert!(replay.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_live_channel() {
        let svc = Service::new();
        let topic = "observatory.inference.completed";
        let (_replay, mut live, guard) = svc.subscribe(topic, "").unwrap();
        drop(guard);
        assert!(live.recv().await.is_none());

        // Publishing after unsubscribe reaches nobody and still succeeds.
        svc.publish(
            topic,
            PublishRequest {
                header: header("acme"),
                payload: payload(json!({"state": "late"})),
                ..PublishRequest::default()
            },
        )
        .unwrap();
    }

    #[tokio::test]
    async fn slow_subscriber_drops_instead_of_blocking() {
        let svc = Service::new();
        let topic = "observatory.load.test";
        let (_replay, mut live, _guard) = svc.subscribe(topic, "").unwrap();

        for _ in 0..SUBSCRIBER_CHANNEL_CAPACITY + 8 {
            svc.publish(
                topic,
                PublishRequest {
                    header: header("acme"),
                    payload: payload(json!({})),
                    ..PublishRequest::default()
                },
            )
            .unwrap();
        }

        // The channel only buffered its capacity; the overflow was dropped
        // for this subscriber while the log kept everything.
        let mut received = 0;
        while let Ok(event) = live.try_recv() {
            assert!(!event.replay);
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_CHANNEL_CAPACITY);
        let (replay, _live2, _guard2) = svc.subscribe(topic, "0").unwrap();
        assert_eq!(replay.len(), SUBSCRIBER_CHANNEL_CAPACITY + 8);
    }

    #[test]
    fn heartbeat_defaults_interval_and_reports_load() {
        let svc = Service::new();
        let ack = svc
            .heartbeat(HeartbeatRequest {
                header: header("acme"),
                interval_ms: 0,
            })
            .unwrap();
        assert_eq!(ack.suggested_interval_ms, 5000);
        assert_eq!(ack.load_factor, 0.0);

        let ack = svc
            .heartbeat(HeartbeatRequest {
                header: header("acme"),
                interval_ms: 250,
            })
            .unwrap();
        assert_eq!(ack.suggested_interval_ms, 250);
    }
}
