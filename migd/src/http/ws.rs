//! WebSocket duplex binding: one upgraded connection carries independent
//! [`StreamFrame`] requests, each answered with a terminal frame.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Extension, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::{Map, Value};
use tracing::debug;

use mig_core::auth::Principal;
use mig_core::metrics::StreamGauge;
use mig_core::protocol::{ConnectionSnapshot, StreamFrame};
use mig_core::service::dispatch_frame;

use super::{session_tenant, AppState};

pub(crate) async fn handle_stream(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let tenant_id = session_tenant(&principal, &headers);
    let remote_addr = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    ws.on_upgrade(move |socket| handle_socket(state, principal, tenant_id, remote_addr, socket))
}

async fn handle_socket(
    state: Arc<AppState>,
    principal: Principal,
    tenant_id: String,
    remote_addr: String,
    mut socket: WebSocket,
) {
    let _gauge = StreamGauge::new(state.metrics.clone(), "websocket");
    let mut meta = Map::new();
    meta.insert(
        "path".to_string(),
        Value::String("/mig/v0.1/stream".to_string()),
    );
    let (_id, _conn_guard) = state.svc.register_connection(ConnectionSnapshot {
        protocol: "http".to_string(),
        kind: "ws_stream".to_string(),
        tenant_id,
        actor: principal.subject.clone(),
        remote_addr,
        meta,
        ..ConnectionSnapshot::default()
    });

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(error) => {
                debug!(%error, "websocket receive failed");
                return;
            }
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => return,
            },
            Message::Close(_) => return,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        let frame: StreamFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(%error, "undecodable websocket frame");
                return;
            }
        };

        let reply =
            dispatch_frame(&state.svc, &principal, frame, "websocket control cancel").await;
        let body = match serde_json::to_string(&reply) {
            Ok(body) => body,
            Err(_) => return,
        };
        if socket.send(Message::Text(body)).await.is_err() {
            return;
        }
    }
}
