//! NATS request/reply binding.
//!
//! Subject patterns map straight onto the protocol verbs:
//!
//! - `mig.v0_1.<tenant>.hello`
//! - `mig.v0_1.<tenant>.discover`
//! - `mig.v0_1.<tenant>.invoke.<capability…>`
//! - `mig.v0_1.<tenant>.events.<topic…>`
//! - `mig.v0_1.<tenant>.control.cancel.<message_id…>`
//! - `mig.v0_1.<tenant>.control.heartbeat`
//!
//! The tenant token and any trailing capability/topic/message-id tokens
//! default the matching envelope fields when the body leaves them empty.
//! Requests without a reply inbox are processed and their response dropped.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use mig_core::auth::Principal;
use mig_core::envelope::MessageHeader;
use mig_core::error::{ErrorEnvelope, MigError};
use mig_core::protocol::{
    CancelRequest, DiscoverRequest, HelloRequest, HeartbeatRequest, InvokeRequest, PublishRequest,
};
use mig_core::Service;

#[derive(Debug, Clone, Copy)]
enum Verb {
    Hello,
    Discover,
    Invoke,
    Publish,
    Cancel,
    Heartbeat,
}

const SUBJECTS: [(&str, Verb); 6] = [
    ("mig.v0_1.*.hello", Verb::Hello),
    ("mig.v0_1.*.discover", Verb::Discover),
    ("mig.v0_1.*.invoke.>", Verb::Invoke),
    ("mig.v0_1.*.events.>", Verb::Publish),
    ("mig.v0_1.*.control.cancel.>", Verb::Cancel),
    ("mig.v0_1.*.control.heartbeat", Verb::Heartbeat),
];

/// The running NATS binding: one receive task per subject pattern.
pub struct NatsBinding {
    svc: Arc<Service>,
    tasks: Vec<JoinHandle<()>>,
}

impl NatsBinding {
    /// Subscribe to all verb subjects on the service's NATS connection.
    pub async fn start(svc: Arc<Service>) -> Result<Self, MigError> {
        let Some(client) = svc.nats_client() else {
            return Err(MigError::unavailable("nats connection is not configured"));
        };
        let mut tasks = Vec::with_capacity(SUBJECTS.len());
        for (subject, verb) in SUBJECTS {
            let mut subscription = client.subscribe(subject).await.map_err(|e| {
                MigError::unavailable(format!("subscribe {subject}: {e}"))
            })?;
            let svc = svc.clone();
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(message) = subscription.next().await {
                    handle_message(&svc, &client, verb, message).await;
                }
            }));
        }
        svc.set_nats_binding_active(true);
        info!("NATS request/reply binding enabled");
        Ok(Self { svc, tasks })
    }

    /// Stop the receive tasks and mark the binding inactive.
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.svc.set_nats_binding_active(false);
    }
}

impl Drop for NatsBinding {
    fn drop(&mut self) {
        self.close();
    }
}

async fn handle_message(
    svc: &Arc<Service>,
    client: &async_nats::Client,
    verb: Verb,
    message: async_nats::Message,
) {
    let subject = message.subject.to_string();
    let tenant = subject_token(&subject, 2);
    let principal = |tenant_id: &str| Principal {
        tenant_id: tenant_id.to_string(),
        ..Principal::default()
    };

    match verb {
        Verb::Hello => {
            let Some(mut req) = decode::<HelloRequest>(&message) else {
                respond_decode_error(client, &message, "invalid hello request").await;
                return;
            };
            if req.header.tenant_id.is_empty() {
                req.header.tenant_id = tenant;
            }
            let head = req.header.clone();
            match svc.hello(req) {
                Ok(resp) => respond(client, &message, &resp).await,
                Err(err) => respond_mig_error(client, &message, head, err).await,
            }
        }
        Verb::Discover => {
            let Some(mut req) = decode::<DiscoverRequest>(&message) else {
                respond_decode_error(client, &message, "invalid discover request").await;
                return;
            };
            if req.header.tenant_id.is_empty() {
                req.header.tenant_id = tenant;
            }
            let head = req.header.clone();
            let principal = principal(&head.tenant_id);
            match svc.discover(req, &principal) {
                Ok(resp) => respond(client, &message, &resp).await,
                Err(err) => respond_mig_error(client, &message, head, err).await,
            }
        }
        Verb::Invoke => {
            let capability = joined_tokens(&subject, 4);
            let Some(mut req) = decode::<InvokeRequest>(&message) else {
                respond_decode_error(client, &message, "invalid invoke request").await;
                return;
            };
            if req.header.tenant_id.is_empty() {
                req.header.tenant_id = tenant;
            }
            if req.capability.is_empty() {
                req.capability = capability;
            }
            let head = req.header.clone();
            let capability = req.capability.clone();
            let principal = principal(&head.tenant_id);
            match svc
                .invoke(&capability, req, "nats-client", &principal)
                .await
            {
                Ok(resp) => respond(client, &message, &resp).await,
                Err(err) => respond_mig_error(client, &message, head, err).await,
            }
        }
        Verb::Publish => {
            let topic = joined_tokens(&subject, 4);
            let Some(mut req) = decode::<PublishRequest>(&message) else {
                respond_decode_error(client, &message, "invalid publish request").await;
                return;
            };
            if req.header.tenant_id.is_empty() {
                req.header.tenant_id = tenant;
            }
            if req.topic.is_empty() {
                req.topic = topic;
            }
            let head = req.header.clone();
            let topic = req.topic.clone();
            match svc.publish(&topic, req) {
                Ok(resp) => respond(client, &message, &resp).await,
                Err(err) => respond_mig_error(client, &message, head, err).await,
            }
        }
        Verb::Cancel => {
            let target = joined_tokens(&subject, 5);
            let Some(mut req) = decode::<CancelRequest>(&message) else {
                respond_decode_error(client, &message, "invalid cancel request").await;
                return;
            };
            if req.header.tenant_id.is_empty() {
                req.header.tenant_id = tenant;
            }
            if req.target_message_id.is_empty() {
                req.target_message_id = target;
            }
            let head = req.header.clone();
            let target = req.target_message_id.clone();
            match svc.cancel(req, &target) {
                Ok(resp) => respond(client, &message, &resp).await,
                Err(err) => respond_mig_error(client, &message, head, err).await,
            }
        }
        Verb::Heartbeat => {
            let Some(mut req) = decode::<HeartbeatRequest>(&message) else {
                respond_decode_error(client, &message, "invalid heartbeat request").await;
                return;
            };
            if req.header.tenant_id.is_empty() {
                req.header.tenant_id = tenant;
            }
            let head = req.header.clone();
            match svc.heartbeat(req) {
                Ok(resp) => respond(client, &message, &resp).await,
                Err(err) => respond_mig_error(client, &message, head, err).await,
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(message: &async_nats::Message) -> Option<T> {
    if message.payload.is_empty() {
        return None;
    }
    serde_json::from_slice(&message.payload).ok()
}

async fn respond<T: Serialize>(
    client: &async_nats::Client,
    message: &async_nats::Message,
    payload: &T,
) {
    let Some(reply) = message.reply.clone() else {
        return;
    };
    let Ok(body) = serde_json::to_vec(payload) else {
        return;
    };
    if let Err(error) = client.publish(reply, body.into()).await {
        debug!(%error, "nats reply failed");
    }
}

async fn respond_decode_error(
    client: &async_nats::Client,
    message: &async_nats::Message,
    detail: &str,
) {
    let body = json!({
        "error": {"code": "MIG_INVALID_REQUEST", "message": detail}
    });
    respond(client, message, &body).await;
}

async fn respond_mig_error(
    client: &async_nats::Client,
    message: &async_nats::Message,
    mut header: MessageHeader,
    error: MigError,
) {
    if header.tenant_id.is_empty() {
        header.tenant_id = subject_token(&message.subject.to_string(), 2);
    }
    let envelope = ErrorEnvelope::shaped(header, error);
    respond(client, message, &envelope).await;
}

fn subject_token(subject: &str, index: usize) -> String {
    subject
        .split('.')
        .nth(index)
        .unwrap_or_default()
        .to_string()
}

/// Join all tokens from `start` onward: capabilities and topics may
/// themselves contain dots.
fn joined_tokens(subject: &str, start: usize) -> String {
    subject
        .split('.')
        .skip(start)
        .collect::<Vec<_>>()
        .join(".")
}
