//! End-to-end tests for the HTTP binding: the protocol routes, the admin,
//! pro, and cloud surfaces, and the embedded console, all driven through
//! the router without a live socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use mig_core::auth::AuthConfig;
use mig_core::metrics::Metrics;
use mig_core::Service;
use migd::http::AppState;

fn test_router() -> (Router, Arc<Service>) {
    let svc = Service::new();
    let state = Arc::new(AppState {
        svc: svc.clone(),
        auth: AuthConfig::default(),
        metrics: None,
        registry: None,
    });
    (migd::http::router(state), svc)
}

fn metrics_router() -> Router {
    let svc = Service::new();
    let registry = prometheus::Registry::new();
    let metrics = Metrics::new(&registry).expect("metrics registration");
    svc.set_metrics(metrics.clone());
    let state = Arc::new(AppState {
        svc,
        auth: AuthConfig::default(),
        metrics: Some(metrics),
        registry: Some(registry),
    });
    migd::http::router(state)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collect")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).to_string(),
        ))
    };
    (status, value)
}

async fn post_json(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request build");
    send(router, request).await
}

async fn get(router: &Router, path: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .expect("request build");
    send(router, request).await
}

fn header(tenant: &str) -> Value {
    json!({"tenant_id": tenant})
}

#[tokio::test]
async fn hello_negotiates_version_and_binding() {
    let (router, _svc) = test_router();
    let (status, body) = post_json(
        &router,
        "/mig/v0.1/hello",
        json!({
            "header": header("acme"),
            "supported_versions": ["0.1"],
            "requested_bindings": ["http"],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["selected_version"], "0.1");
    assert_eq!(body["selected_binding"], "http");
    assert_eq!(body["header"]["tenant_id"], "acme");
    assert_eq!(body["header"]["meta"]["idg.product_tier"], "core");
}

#[tokio::test]
async fn hello_rejects_incompatible_versions() {
    let (router, _svc) = test_router();
    let (status, body) = post_json(
        &router,
        "/mig/v0.1/hello",
        json!({
            "header": header("acme"),
            "supported_versions": ["0.2"],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["error"]["code"], "MIG_VERSION_MISMATCH");
}

#[tokio::test]
async fn discover_lists_the_bootstrapped_capability() {
    let (router, _svc) = test_router();
    let (status, body) = post_json(
        &router,
        "/mig/v0.1/discover",
        json!({"header": header("acme")}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let capabilities = body["capabilities"].as_array().expect("capabilities");
    let infer = capabilities
        .iter()
        .find(|cap| cap["id"] == "observatory.models.infer")
        .expect("default capability");
    let modes = infer["modes"].as_array().expect("modes");
    assert!(modes.contains(&json!("unary")));
    assert!(modes.contains(&json!("server_stream")));
}

#[tokio::test]
async fn invoke_is_idempotent_for_repeated_keys() {
    let (router, _svc) = test_router();
    let body = json!({
        "header": {"tenant_id": "acme", "idempotency_key": "id-1"},
        "payload": {"input": "hello"},
    });

    let (status, first) = post_json(
        &router,
        "/mig/v0.1/invoke/observatory.models.infer",
        body.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["payload"]["result"], "ok");

    let (status, second) = post_json(
        &router,
        "/mig/v0.1/invoke/observatory.models.infer",
        body,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["payload"], second["payload"]);
}

#[tokio::test]
async fn quota_limits_return_429() {
    let (router, _svc) = test_router();
    let (status, _body) = post_json(
        &router,
        "/pro/v0.1/quotas",
        json!({"tenant_id": "acme", "max_invocations": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let invoke = json!({"header": header("acme"), "payload": {"input": "hello"}});
    let (status, _body) = post_json(
        &router,
        "/mig/v0.1/invoke/observatory.models.infer",
        invoke.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(
        &router,
        "/mig/v0.1/invoke/observatory.models.infer",
        invoke,
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "MIG_RATE_LIMITED");
    assert_eq!(body["error"]["retryable"], true);
}

#[tokio::test]
async fn cancellation_is_sticky_across_requests() {
    let (router, _svc) = test_router();
    let (status, body) = post_json(
        &router,
        "/mig/v0.1/cancel/m1",
        json!({"header": header("acme"), "reason": "operator request"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = post_json(
        &router,
        "/mig/v0.1/invoke/observatory.models.infer",
        json!({
            "header": {"tenant_id": "acme", "message_id": "m1"},
            "payload": {"input": "hello"},
        }),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["code"], "MIG_TIMEOUT");
}

#[tokio::test]
async fn unknown_capability_is_404() {
    let (router, _svc) = test_router();
    let (status, body) = post_json(
        &router,
        "/mig/v0.1/invoke/missing.capability",
        json!({"header": header("acme"), "payload": {}}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "MIG_UNSUPPORTED_CAPABILITY");
}

#[tokio::test]
async fn tenant_header_populates_the_envelope() {
    let (router, _svc) = test_router();
    let request = Request::builder()
        .method("POST")
        .uri("/mig/v0.1/heartbeat")
        .header("content-type", "application/json")
        .header("x-tenant-id", "acme")
        .body(Body::from(json!({"header": {}}).to_string()))
        .expect("request build");
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["header"]["tenant_id"], "acme");
    assert_eq!(body["suggested_interval_ms"], 5000);
}

#[tokio::test]
async fn missing_tenant_is_an_invalid_request_envelope() {
    let (router, _svc) = test_router();
    let (status, body) =
        post_json(&router, "/mig/v0.1/heartbeat", json!({"header": {}})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "MIG_INVALID_REQUEST");
    assert_eq!(body["header"]["tenant_id"], "unknown");
}

#[tokio::test]
async fn undecodable_body_is_an_invalid_request_envelope() {
    let (router, _svc) = test_router();
    let request = Request::builder()
        .method("POST")
        .uri("/mig/v0.1/hello")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .expect("request build");
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "MIG_INVALID_REQUEST");
}

#[tokio::test]
async fn publish_then_replay_via_service() {
    let (router, svc) = test_router();
    let (status, body) = post_json(
        &router,
        "/mig/v0.1/publish/observatory.inference.completed",
        json!({"header": header("acme"), "payload": {"state": "done"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sequence"], 1);
    assert_eq!(body["accepted"], true);

    let (replay, mut live, _guard) = svc
        .subscribe("observatory.inference.completed", "0")
        .expect("subscribe");
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].sequence, 1);
    assert!(replay[0].replay);

    let (status, _body) = post_json(
        &router,
        "/mig/v0.1/publish/observatory.inference.completed",
        json!({"header": header("acme"), "payload": {"state": "done"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let event = live.recv().await.expect("live event");
    assert_eq!(event.sequence, 2);
    assert!(!event.replay);
}

#[tokio::test]
async fn subscribe_rejects_bad_cursors() {
    let (router, _svc) = test_router();
    let (status, body) = get(
        &router,
        "/mig/v0.1/subscribe/observatory.inference.completed?resume_cursor=-3",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "MIG_INVALID_REQUEST");

    let (status, _body) = get(&router, "/mig/v0.1/subscribe/flat").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_capability_and_schema_upserts() {
    let (router, _svc) = test_router();
    let (status, body) = post_json(
        &router,
        "/admin/v0.1/capabilities",
        json!({
            "descriptor": {
                "id": "billing.reports.generate",
                "version": "2.1.0",
                "modes": ["unary"],
                "input_schema_uri": "schema://billing/report-input/v2",
                "output_schema_uri": "schema://billing/report-output/v2",
                "auth_scopes": [],
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "billing.reports.generate");

    let (status, body) = get(&router, "/admin/v0.1/capabilities").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["capabilities"]
        .as_array()
        .expect("capabilities")
        .iter()
        .filter_map(|cap| cap["id"].as_str())
        .collect();
    assert!(ids.contains(&"billing.reports.generate"));
    assert!(ids.contains(&"observatory.models.infer"));

    let (status, _body) = post_json(
        &router,
        "/admin/v0.1/schemas",
        json!({"uri": "schema://billing/report-input/v2", "schema": {"type": "object"}}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = post_json(&router, "/admin/v0.1/schemas", json!({"uri": ""})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn conformance_health_is_full() {
    let (router, _svc) = test_router();
    let (status, body) = get(&router, "/admin/v0.1/health/conformance").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["core"], true);
    assert_eq!(body["streaming"], true);
    assert_eq!(body["evented"], true);
    assert_eq!(body["full"], true);
}

#[tokio::test]
async fn connections_endpoint_reports_registry_state() {
    let (router, svc) = test_router();
    let (_id, _guard) = svc.register_connection(mig_core::protocol::ConnectionSnapshot {
        protocol: "http".to_string(),
        kind: "ws_stream".to_string(),
        tenant_id: "acme".to_string(),
        ..mig_core::protocol::ConnectionSnapshot::default()
    });
    let (status, body) = get(&router, "/admin/v0.1/connections?tenant_id=acme").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["total"], 1);
    assert_eq!(body["summary"]["by_kind"]["ws_stream"], 1);
    assert_eq!(body["summary"]["nats_binding_active"], false);
    assert_eq!(body["filter_tenant"], "acme");
}

#[tokio::test]
async fn policy_validation_over_http() {
    let (router, _svc) = test_router();
    let (status, body) = post_json(
        &router,
        "/pro/v0.1/policies/validate",
        json!({
            "tenant_id": "acme",
            "capability": "observatory.models.infer",
            "action": "invoke",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    let (status, body) = post_json(
        &router,
        "/pro/v0.1/policies/validate",
        json!({"tenant_id": "acme", "capability": "missing", "action": "invoke"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["reason"], "capability does not exist");
}

#[tokio::test]
async fn audit_export_filters_by_tenant() {
    let (router, _svc) = test_router();
    for tenant in ["acme", "globex"] {
        let (status, _body) = post_json(
            &router,
            "/mig/v0.1/invoke/observatory.models.infer",
            json!({"header": header(tenant), "payload": {"input": "hi"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = get(&router, "/pro/v0.1/audit/export?tenant_id=acme").await;
    assert_eq!(status, StatusCode::OK);
    let records = body["records"].as_array().expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["tenant_id"], "acme");
    assert_eq!(records[0]["outcome"], "success");

    let (status, body) = get(&router, "/pro/v0.1/audit/export").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"].as_array().expect("records").len(), 2);
}

#[tokio::test]
async fn cloud_registry_flow() {
    let (router, _svc) = test_router();
    let (status, org) = post_json(
        &router,
        "/cloud/v0.1/orgs",
        json!({"name": "Invariant Dynamics"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let org_id = org["id"].as_str().expect("org id").to_string();

    let (status, tenant) = post_json(
        &router,
        "/cloud/v0.1/tenants",
        json!({"org_id": org_id, "name": "acme"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let tenant_id = tenant["id"].as_str().expect("tenant id").to_string();

    let (status, body) = post_json(
        &router,
        "/cloud/v0.1/gateways",
        json!({"tenant_id": "tenant-missing", "region": "eu-west-1", "binding": "http"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, gateway) = post_json(
        &router,
        "/cloud/v0.1/gateways",
        json!({"tenant_id": tenant_id, "region": "eu-west-1", "binding": "grpc"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(gateway["id"].as_str().expect("gateway id").starts_with("gw-"));
}

#[tokio::test]
async fn usage_counters_accumulate() {
    let (router, _svc) = test_router();
    for _ in 0..2 {
        let (status, _body) = post_json(
            &router,
            "/mig/v0.1/invoke/observatory.models.infer",
            json!({"header": header("acme"), "payload": {"input": "hi"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = get(&router, "/cloud/v0.1/usage").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_invocations"], 2);
    assert_eq!(body["tenant_invocations"]["acme"], 2);
    assert_eq!(body["capability_invocations"]["observatory.models.infer"], 2);
}

#[tokio::test]
async fn console_is_served_without_auth() {
    let (router, _svc) = test_router();
    let request = Request::builder()
        .method("GET")
        .uri("/ui")
        .body(Body::empty())
        .expect("request build");
    let response = router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/html"));
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let html = String::from_utf8_lossy(&bytes);
    assert!(html.contains("MIG Console"));
}

#[tokio::test]
async fn metrics_endpoint_exposes_request_counters() {
    let router = metrics_router();
    let (status, _body) = post_json(
        &router,
        "/mig/v0.1/hello",
        json!({"header": header("acme"), "supported_versions": ["0.1"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .expect("request build");
    let response = router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("mig_gateway_http_requests_total"));
    assert!(text.contains("/mig/v0.1/hello"));
}
