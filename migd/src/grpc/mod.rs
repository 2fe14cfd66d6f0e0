//! gRPC binding: Discovery, Invocation, Events, and Control services over
//! the `mig.v0_1` proto.
//!
//! Credentials arrive in metadata (`authorization`, `x-tenant-id`) and are
//! projected to a [`Principal`] by an interceptor shared across all four
//! services; handlers read the principal back out of request extensions.
//! Engine errors map onto canonical gRPC status codes.

pub mod convert;

pub mod pb {
    tonic::include_proto!("mig.v0_1");
}

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::service::Interceptor;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::info;

use mig_core::auth::{apply_principal_header, principal_from_headers, AuthConfig, AuthError, Principal};
use mig_core::error::{ErrorCode, MigError};
use mig_core::metrics::StreamGauge;
use mig_core::protocol::{
    CancelRequest, ConnectionSnapshot, DiscoverRequest, HelloRequest, HeartbeatRequest,
    InvokeRequest, PublishRequest,
};
use mig_core::service::dispatch_frame;
use mig_core::Service;

use pb::control_server::{Control, ControlServer};
use pb::discovery_server::{Discovery, DiscoveryServer};
use pb::events_server::{Events, EventsServer};
use pb::invocation_server::{Invocation, InvocationServer};

/// Projects a principal from request metadata before any handler runs.
#[derive(Clone)]
pub struct AuthInterceptor {
    auth: AuthConfig,
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let authorization = metadata_value(&request, "authorization");
        let tenant = metadata_value(&request, "x-tenant-id");
        let principal = principal_from_headers(&authorization, &tenant, &self.auth)
            .map_err(status_from_auth)?;
        request.extensions_mut().insert(principal);
        Ok(request)
    }
}

fn metadata_value<T>(request: &Request<T>, key: &str) -> String {
    request
        .metadata()
        .get(key)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn status_from_auth(err: AuthError) -> Status {
    let mig = err.to_mig_error();
    match mig.code {
        ErrorCode::Forbidden => Status::permission_denied(err.to_string()),
        _ => Status::unauthenticated(err.to_string()),
    }
}

fn status_from_mig(err: &MigError) -> Status {
    let message = format!("{}: {}", err.code, err.message);
    match err.code {
        ErrorCode::InvalidRequest => Status::invalid_argument(message),
        ErrorCode::Unauthorized => Status::unauthenticated(message),
        ErrorCode::Forbidden => Status::permission_denied(message),
        ErrorCode::NotFound | ErrorCode::UnsupportedCapability => Status::not_found(message),
        ErrorCode::VersionMismatch => Status::failed_precondition(message),
        ErrorCode::Timeout => Status::deadline_exceeded(message),
        ErrorCode::RateLimited | ErrorCode::Backpressure => Status::resource_exhausted(message),
        ErrorCode::Unavailable => Status::unavailable(message),
        ErrorCode::Internal => Status::internal(message),
    }
}

fn principal_of<T>(request: &Request<T>) -> Principal {
    request
        .extensions()
        .get::<Principal>()
        .cloned()
        .unwrap_or_else(Principal::anonymous)
}

fn remote_addr_of<T>(request: &Request<T>) -> String {
    request
        .remote_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default()
}

fn actor_of(principal: &Principal) -> String {
    if principal.subject.is_empty() {
        "anonymous".to_string()
    } else {
        principal.subject.clone()
    }
}

/// The shared handler behind all four gRPC services.
#[derive(Clone)]
pub struct MigGrpc {
    svc: Arc<Service>,
}

impl MigGrpc {
    pub fn new(svc: Arc<Service>) -> Self {
        Self { svc }
    }
}

#[tonic::async_trait]
impl Discovery for MigGrpc {
    async fn hello(
        &self,
        request: Request<pb::HelloRequest>,
    ) -> Result<Response<pb::HelloResponse>, Status> {
        let principal = principal_of(&request);
        let req = request.into_inner();
        let mut input = HelloRequest {
            header: convert::header_from_proto(req.header),
            supported_versions: req.supported_versions,
            requested_bindings: convert::binding_types_from_proto(&req.requested_bindings),
            requested_features: req.requested_features,
        };
        apply_principal_header(&mut input.header, &principal, None)
            .map_err(|e| status_from_mig(&e))?;
        let out = self.svc.hello(input).map_err(|e| status_from_mig(&e))?;
        Ok(Response::new(pb::HelloResponse {
            header: Some(convert::header_to_proto(&out.header)),
            selected_version: out.selected_version,
            selected_binding: convert::binding_type_to_proto(&out.selected_binding) as i32,
            enabled_features: out.enabled_features,
            server_id: out.server_id,
        }))
    }

    async fn discover(
        &self,
        request: Request<pb::DiscoverRequest>,
    ) -> Result<Response<pb::DiscoverResponse>, Status> {
        let principal = principal_of(&request);
        let req = request.into_inner();
        let mut input = DiscoverRequest {
            header: convert::header_from_proto(req.header),
            query: req.query,
            include_schema_refs: req.include_schema_refs,
            include_qos: req.include_qos,
        };
        apply_principal_header(&mut input.header, &principal, None)
            .map_err(|e| status_from_mig(&e))?;
        let out = self
            .svc
            .discover(input, &principal)
            .map_err(|e| status_from_mig(&e))?;
        Ok(Response::new(pb::DiscoverResponse {
            header: Some(convert::header_to_proto(&out.header)),
            capabilities: out
                .capabilities
                .iter()
                .map(convert::capability_to_proto)
                .collect(),
        }))
    }
}

#[tonic::async_trait]
impl Invocation for MigGrpc {
    async fn invoke(
        &self,
        request: Request<pb::InvokeRequest>,
    ) -> Result<Response<pb::InvokeResponse>, Status> {
        let principal = principal_of(&request);
        let req = request.into_inner();
        let mut input = InvokeRequest {
            header: convert::header_from_proto(req.header),
            capability: req.capability,
            payload: convert::struct_to_map(req.payload),
            stream_preference: convert::stream_preference_from_proto(req.stream_preference),
        };
        apply_principal_header(&mut input.header, &principal, None)
            .map_err(|e| status_from_mig(&e))?;
        let capability = input.capability.clone();
        let actor = actor_of(&principal);
        let out = self
            .svc
            .invoke(&capability, input, &actor, &principal)
            .await
            .map_err(|e| status_from_mig(&e))?;
        Ok(Response::new(pb::InvokeResponse {
            header: Some(convert::header_to_proto(&out.header)),
            capability: out.capability,
            payload: Some(convert::map_to_struct(&out.payload)),
            result_schema_uri: out.result_schema_uri,
        }))
    }

    type StreamInvokeStream = ReceiverStream<Result<pb::StreamFrame, Status>>;

    async fn stream_invoke(
        &self,
        request: Request<Streaming<pb::StreamFrame>>,
    ) -> Result<Response<Self::StreamInvokeStream>, Status> {
        let principal = principal_of(&request);
        let remote_addr = remote_addr_of(&request);
        let mut in_stream = request.into_inner();

        let gauge = StreamGauge::new(self.svc.metrics(), "grpc_bidi");
        let tenant_id = if principal.tenant_id.is_empty() {
            "unknown".to_string()
        } else {
            principal.tenant_id.clone()
        };
        let mut meta = Map::new();
        meta.insert(
            "service".to_string(),
            Value::String("Invocation/StreamInvoke".to_string()),
        );
        let (_id, conn_guard) = self.svc.register_connection(ConnectionSnapshot {
            protocol: "grpc".to_string(),
            kind: "stream_invoke".to_string(),
            tenant_id,
            actor: principal.subject.clone(),
            remote_addr,
            meta,
            ..ConnectionSnapshot::default()
        });

        let svc = self.svc.clone();
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let _session = (gauge, conn_guard);
            loop {
                match in_stream.message().await {
                    Ok(Some(frame)) => {
                        let frame = convert::stream_frame_from_proto(frame);
                        let reply =
                            dispatch_frame(&svc, &principal, frame, "grpc stream control cancel")
                                .await;
                        if tx
                            .send(Ok(convert::stream_frame_to_proto(&reply)))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        return;
                    }
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[tonic::async_trait]
impl Events for MigGrpc {
    async fn publish(
        &self,
        request: Request<pb::PublishRequest>,
    ) -> Result<Response<pb::PublishAck>, Status> {
        let principal = principal_of(&request);
        let req = request.into_inner();
        let mut input = PublishRequest {
            header: convert::header_from_proto(req.header),
            topic: req.topic,
            key: req.key,
            payload: convert::struct_to_map(req.payload),
        };
        apply_principal_header(&mut input.header, &principal, None)
            .map_err(|e| status_from_mig(&e))?;
        let topic = input.topic.clone();
        let out = self
            .svc
            .publish(&topic, input)
            .map_err(|e| status_from_mig(&e))?;
        Ok(Response::new(pb::PublishAck {
            header: Some(convert::header_to_proto(&out.header)),
            topic: out.topic,
            event_id: out.event_id,
            sequence: out.sequence.max(0) as u64,
            accepted: out.accepted,
        }))
    }

    type SubscribeStream = ReceiverStream<Result<pb::EventMessage, Status>>;

    async fn subscribe(
        &self,
        request: Request<pb::SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let principal = principal_of(&request);
        let remote_addr = remote_addr_of(&request);
        let req = request.into_inner();
        let mut head = convert::header_from_proto(req.header);
        apply_principal_header(&mut head, &principal, None).map_err(|e| status_from_mig(&e))?;

        let gauge = StreamGauge::new(self.svc.metrics(), "grpc_events");
        let mut meta = Map::new();
        meta.insert(
            "service".to_string(),
            Value::String("Events/Subscribe".to_string()),
        );
        meta.insert("topic".to_string(), Value::String(req.topic.clone()));
        meta.insert(
            "resume_cursor".to_string(),
            Value::String(req.resume_cursor.clone()),
        );
        let (_id, conn_guard) = self.svc.register_connection(ConnectionSnapshot {
            protocol: "grpc".to_string(),
            kind: "event_subscribe".to_string(),
            tenant_id: head.tenant_id.clone(),
            actor: principal.subject.clone(),
            remote_addr,
            meta,
            ..ConnectionSnapshot::default()
        });

        let (replay, mut live, sub_guard) = self
            .svc
            .subscribe(&req.topic, &req.resume_cursor)
            .map_err(|e| status_from_mig(&e))?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let _session = (gauge, conn_guard, sub_guard);
            for event in &replay {
                if tx.send(Ok(convert::event_to_proto(event))).await.is_err() {
                    return;
                }
            }
            while let Some(event) = live.recv().await {
                if tx.send(Ok(convert::event_to_proto(&event))).await.is_err() {
                    return;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[tonic::async_trait]
impl Control for MigGrpc {
    async fn cancel(
        &self,
        request: Request<pb::CancelRequest>,
    ) -> Result<Response<pb::CancelAck>, Status> {
        let principal = principal_of(&request);
        let req = request.into_inner();
        let mut input = CancelRequest {
            header: convert::header_from_proto(req.header),
            target_message_id: req.target_message_id,
            reason: req.reason,
        };
        apply_principal_header(&mut input.header, &principal, None)
            .map_err(|e| status_from_mig(&e))?;
        let target = input.target_message_id.clone();
        let out = self
            .svc
            .cancel(input, &target)
            .map_err(|e| status_from_mig(&e))?;
        Ok(Response::new(pb::CancelAck {
            header: Some(convert::header_to_proto(&out.header)),
            target_message_id: out.target_message_id,
            accepted: out.accepted,
            status: out.status,
        }))
    }

    async fn heartbeat(
        &self,
        request: Request<pb::HeartbeatRequest>,
    ) -> Result<Response<pb::HeartbeatAck>, Status> {
        let principal = principal_of(&request);
        let req = request.into_inner();
        let mut input = HeartbeatRequest {
            header: convert::header_from_proto(req.header),
            interval_ms: i64::from(req.interval_ms),
        };
        apply_principal_header(&mut input.header, &principal, None)
            .map_err(|e| status_from_mig(&e))?;
        let out = self
            .svc
            .heartbeat(input)
            .map_err(|e| status_from_mig(&e))?;
        Ok(Response::new(pb::HeartbeatAck {
            header: Some(convert::header_to_proto(&out.header)),
            suggested_interval_ms: out.suggested_interval_ms.clamp(0, i64::from(u32::MAX)) as u32,
            load_factor: out.load_factor,
        }))
    }
}

/// Serve all four gRPC services until the shutdown future resolves.
pub async fn serve(
    addr: SocketAddr,
    svc: Arc<Service>,
    auth: AuthConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), tonic::transport::Error> {
    let handler = MigGrpc::new(svc);
    let interceptor = AuthInterceptor { auth };
    info!(%addr, "migd gRPC listening");
    Server::builder()
        .add_service(DiscoveryServer::with_interceptor(
            handler.clone(),
            interceptor.clone(),
        ))
        .add_service(InvocationServer::with_interceptor(
            handler.clone(),
            interceptor.clone(),
        ))
        .add_service(EventsServer::with_interceptor(
            handler.clone(),
            interceptor.clone(),
        ))
        .add_service(ControlServer::with_interceptor(handler, interceptor))
        .serve_with_shutdown(addr, shutdown)
        .await
}
