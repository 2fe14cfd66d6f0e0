//! HTTP middleware: auth projection, request metrics, request logging.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::info;

use mig_core::auth::{principal_from_headers, Principal};
use mig_core::envelope::MessageHeader;

use super::{mig_error_response, AppState};

/// Project a [`Principal`] from the request headers and stash it in the
/// request extensions. The console and the metrics endpoint stay open.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if path.starts_with("/ui") || path == "/metrics" {
        request.extensions_mut().insert(Principal::anonymous());
        return next.run(request).await;
    }

    let authorization = header_value(&request, AUTHORIZATION.as_str());
    let tenant = header_value(&request, "x-tenant-id");
    match principal_from_headers(&authorization, &tenant, &state.auth) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => {
            let header = MessageHeader {
                tenant_id: tenant.trim().to_string(),
                ..MessageHeader::default()
            };
            mig_error_response(header, err.to_mig_error())
        }
    }
}

/// Count and time every routed request, labeled by the route template so
/// path parameters stay out of the label set.
pub async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(metrics) = state.metrics.clone() else {
        return next.run(request).await;
    };
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let start = Instant::now();
    let response = next.run(request).await;
    metrics.observe_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// One line per request, the way the daemon has always logged.
pub async fn request_log(request: Request, next: Next) -> Response {
    info!(method = %request.method(), path = %request.uri().path(), "request");
    next.run(request).await
}

fn header_value(request: &Request, name: &str) -> String {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
