//! Admin, pro, and cloud HTTP surfaces.
//!
//! These routes manage the registries the protocol verbs read: capability
//! and schema upserts, quota and policy checks, the audit export, the
//! org/tenant/gateway registry, usage counters, and the live connection
//! snapshot. Tenant-scoped pro routes are reconciled against the caller's
//! principal the same way protocol envelopes are.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use mig_core::auth::Principal;
use mig_core::envelope::MessageHeader;
use mig_core::error::{ErrorCode, MigError};
use mig_core::protocol::{
    CapabilityUpsertRequest, Gateway, Org, PolicyValidateRequest, QuotaRequest,
    SchemaUpsertRequest, Tenant,
};
use mig_core::ConnectionFilters;

use super::{mig_error_response, AppState};

pub async fn add_capability(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CapabilityUpsertRequest>, JsonRejection>,
) -> Response {
    let req = match super::decode(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    let descriptor = req.descriptor.clone();
    match state.svc.add_capability(req) {
        Ok(()) => (StatusCode::CREATED, Json(descriptor)).into_response(),
        Err(err) => error_json(err),
    }
}

pub async fn list_capabilities(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({"capabilities": state.svc.list_capabilities()})),
    )
        .into_response()
}

pub async fn add_schema(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SchemaUpsertRequest>, JsonRejection>,
) -> Response {
    let req = match super::decode(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    let uri = req.uri.clone();
    match state.svc.add_schema(req) {
        Ok(()) => (StatusCode::CREATED, Json(json!({"uri": uri}))).into_response(),
        Err(err) => error_json(err),
    }
}

pub async fn conformance_health(State(state): State<Arc<AppState>>) -> Response {
    (StatusCode::OK, Json(state.svc.conformance_health())).into_response()
}

pub async fn connections(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let filters = ConnectionFilters {
        tenant_id: params.get("tenant_id").cloned().unwrap_or_default(),
        kind: params.get("kind").cloned().unwrap_or_default(),
        protocol: params.get("protocol").cloned().unwrap_or_default(),
    };
    (StatusCode::OK, Json(state.svc.connections(filters))).into_response()
}

pub async fn validate_policy(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    body: Result<Json<PolicyValidateRequest>, JsonRejection>,
) -> Response {
    let req = match super::decode(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_tenant_scope(&principal, &req.tenant_id) {
        return resp;
    }
    match state.svc.validate_policy(req) {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(err) => error_json(err),
    }
}

pub async fn set_quota(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    body: Result<Json<QuotaRequest>, JsonRejection>,
) -> Response {
    let req = match super::decode(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_tenant_scope(&principal, &req.tenant_id) {
        return resp;
    }
    match state.svc.set_quota(req) {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(err) => error_json(err),
    }
}

pub async fn audit_export(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let tenant_id = params.get("tenant_id").cloned().unwrap_or_default();
    (
        StatusCode::OK,
        Json(json!({"records": state.svc.audit_export(&tenant_id)})),
    )
        .into_response()
}

pub async fn create_org(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Org>, JsonRejection>,
) -> Response {
    let org = match super::decode(body) {
        Ok(org) => org,
        Err(resp) => return resp,
    };
    match state.svc.create_org(org) {
        Ok(resp) => (StatusCode::CREATED, Json(resp)).into_response(),
        Err(err) => error_json(err),
    }
}

pub async fn create_tenant(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Tenant>, JsonRejection>,
) -> Response {
    let tenant = match super::decode(body) {
        Ok(tenant) => tenant,
        Err(resp) => return resp,
    };
    match state.svc.create_tenant(tenant) {
        Ok(resp) => (StatusCode::CREATED, Json(resp)).into_response(),
        Err(err) => error_json(err),
    }
}

pub async fn create_gateway(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Gateway>, JsonRejection>,
) -> Response {
    let gateway = match super::decode(body) {
        Ok(gateway) => gateway,
        Err(resp) => return resp,
    };
    match state.svc.create_gateway(gateway) {
        Ok(resp) => (StatusCode::CREATED, Json(resp)).into_response(),
        Err(err) => error_json(err),
    }
}

pub async fn usage(State(state): State<Arc<AppState>>) -> Response {
    (StatusCode::OK, Json(state.svc.usage())).into_response()
}

/// Pro routes operate on an explicit tenant; an authenticated principal may
/// only touch its own.
fn check_tenant_scope(principal: &Principal, tenant_id: &str) -> Result<(), Response> {
    if !principal.tenant_id.is_empty() && tenant_id != principal.tenant_id {
        return Err(mig_error_response(
            MessageHeader {
                tenant_id: tenant_id.to_string(),
                ..MessageHeader::default()
            },
            MigError::forbidden("tenant_id does not match authenticated principal"),
        ));
    }
    Ok(())
}

/// Registry errors keep the original compact `{"error": ...}` body; the
/// status still follows the error code.
fn error_json(err: MigError) -> Response {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(json!({"error": err.message}))).into_response()
}
