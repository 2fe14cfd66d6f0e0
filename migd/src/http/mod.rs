//! HTTP/JSON binding: the `/mig/v0.1` protocol routes, the admin, pro, and
//! cloud surfaces, SSE subscription, the WebSocket duplex stream, the
//! embedded console, and the Prometheus exposition endpoint.

pub mod admin;
pub mod middleware;
mod sse;
mod ws;

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, Registry, TextEncoder};

use mig_core::auth::{apply_principal_header, AuthConfig, Principal};
use mig_core::envelope::MessageHeader;
use mig_core::error::{ErrorEnvelope, MigError};
use mig_core::metrics::Metrics;
use mig_core::protocol::{
    CancelRequest, DiscoverRequest, HelloRequest, HeartbeatRequest, InvokeRequest, PublishRequest,
};
use mig_core::Service;

/// Shared state behind every HTTP handler.
pub struct AppState {
    pub svc: Arc<Service>,
    pub auth: AuthConfig,
    pub metrics: Option<Metrics>,
    pub registry: Option<Registry>,
}

/// Build the full HTTP router. Middleware order mirrors the serving stack:
/// request logging wraps metrics, metrics wrap auth, auth wraps the routes.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/mig/v0.1/hello", post(handle_hello))
        .route("/mig/v0.1/discover", post(handle_discover))
        .route("/mig/v0.1/invoke/:capability", post(handle_invoke))
        .route("/mig/v0.1/publish/:topic", post(handle_publish))
        .route("/mig/v0.1/subscribe/:topic", get(sse::handle_subscribe))
        .route("/mig/v0.1/cancel/:message_id", post(handle_cancel))
        .route("/mig/v0.1/heartbeat", post(handle_heartbeat))
        .route("/mig/v0.1/stream", get(ws::handle_stream))
        .route(
            "/admin/v0.1/capabilities",
            post(admin::add_capability).get(admin::list_capabilities),
        )
        .route("/admin/v0.1/schemas", post(admin::add_schema))
        .route(
            "/admin/v0.1/health/conformance",
            get(admin::conformance_health),
        )
        .route("/admin/v0.1/connections", get(admin::connections))
        .route("/pro/v0.1/policies/validate", post(admin::validate_policy))
        .route("/pro/v0.1/quotas", post(admin::set_quota))
        .route("/pro/v0.1/audit/export", get(admin::audit_export))
        .route("/cloud/v0.1/orgs", post(admin::create_org))
        .route("/cloud/v0.1/tenants", post(admin::create_tenant))
        .route("/cloud/v0.1/gateways", post(admin::create_gateway))
        .route("/cloud/v0.1/usage", get(admin::usage))
        .route("/ui", get(crate::ui::console));
    if state.registry.is_some() {
        router = router.route("/metrics", get(handle_metrics));
    }
    router
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::metrics_middleware,
        ))
        .layer(from_fn(middleware::request_log))
        .with_state(state)
}

// ───────────────────────────────────────────────────────────────────────
// Protocol handlers
// ───────────────────────────────────────────────────────────────────────

async fn handle_hello(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    body: Result<Json<HelloRequest>, JsonRejection>,
) -> Response {
    let mut req = match decode(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if let Err(err) = apply_principal_header(&mut req.header, &principal, tenant_header(&headers))
    {
        return mig_error_response(req.header, err);
    }
    let head = req.header.clone();
    match state.svc.hello(req) {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(err) => mig_error_response(head, err),
    }
}

async fn handle_discover(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    body: Result<Json<DiscoverRequest>, JsonRejection>,
) -> Response {
    let mut req = match decode(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if let Err(err) = apply_principal_header(&mut req.header, &principal, tenant_header(&headers))
    {
        return mig_error_response(req.header, err);
    }
    let head = req.header.clone();
    match state.svc.discover(req, &principal) {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(err) => mig_error_response(head, err),
    }
}

async fn handle_invoke(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(capability): Path<String>,
    headers: HeaderMap,
    body: Result<Json<InvokeRequest>, JsonRejection>,
) -> Response {
    let mut req = match decode(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if let Err(err) = apply_principal_header(&mut req.header, &principal, tenant_header(&headers))
    {
        return mig_error_response(req.header, err);
    }
    let head = req.header.clone();
    let actor = actor_from(&principal, &headers);
    match state.svc.invoke(&capability, req, &actor, &principal).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(err) => mig_error_response(head, err),
    }
}

async fn handle_publish(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(topic): Path<String>,
    headers: HeaderMap,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Response {
    let mut req = match decode(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if let Err(err) = apply_principal_header(&mut req.header, &principal, tenant_header(&headers))
    {
        return mig_error_response(req.header, err);
    }
    let head = req.header.clone();
    match state.svc.publish(&topic, req) {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(err) => mig_error_response(head, err),
    }
}

async fn handle_cancel(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(message_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<CancelRequest>, JsonRejection>,
) -> Response {
    let mut req = match decode(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if let Err(err) = apply_principal_header(&mut req.header, &principal, tenant_header(&headers))
    {
        return mig_error_response(req.header, err);
    }
    let head = req.header.clone();
    match state.svc.cancel(req, &message_id) {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(err) => mig_error_response(head, err),
    }
}

async fn handle_heartbeat(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Response {
    let mut req = match decode(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if let Err(err) = apply_principal_header(&mut req.header, &principal, tenant_header(&headers))
    {
        return mig_error_response(req.header, err);
    }
    let head = req.header.clone();
    match state.svc.heartbeat(req) {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(err) => mig_error_response(head, err),
    }
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> Response {
    let Some(registry) = state.registry.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&registry.gather(), &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {error}"),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

// ───────────────────────────────────────────────────────────────────────
// Shared helpers
// ───────────────────────────────────────────────────────────────────────

/// Write a MIG error envelope with the transport status mapped from the
/// error code.
pub(crate) fn mig_error_response(header: MessageHeader, error: MigError) -> Response {
    let status =
        StatusCode::from_u16(error.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorEnvelope::shaped(header, error))).into_response()
}

pub(crate) fn decode<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(mig_error_response(
            MessageHeader::default(),
            MigError::invalid(format!("invalid JSON body: {rejection}")),
        )),
    }
}

pub(crate) fn tenant_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-tenant-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub(crate) fn actor_from(principal: &Principal, headers: &HeaderMap) -> String {
    if !principal.subject.is_empty() {
        return principal.subject.clone();
    }
    headers
        .get("x-actor")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// Tenant attributed to a long-lived session in the connection registry.
pub(crate) fn session_tenant(principal: &Principal, headers: &HeaderMap) -> String {
    if !principal.tenant_id.is_empty() {
        return principal.tenant_id.clone();
    }
    tenant_header(headers).unwrap_or("unknown").to_string()
}
