//! SSE subscription: replay first, then live events until the client
//! disconnects.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Extension, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_stream::wrappers::ReceiverStream;

use mig_core::auth::Principal;
use mig_core::envelope::MessageHeader;
use mig_core::metrics::StreamGauge;
use mig_core::protocol::ConnectionSnapshot;

use super::{mig_error_response, session_tenant, AppState};

#[derive(Debug, Deserialize)]
pub(crate) struct SubscribeQuery {
    #[serde(default)]
    resume_cursor: String,
}

pub(crate) async fn handle_subscribe(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(topic): Path<String>,
    Query(query): Query<SubscribeQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let gauge = StreamGauge::new(state.metrics.clone(), "sse");

    let (replay, live, sub_guard) = match state.svc.subscribe(&topic, &query.resume_cursor) {
        Ok(subscription) => subscription,
        Err(err) => {
            let header = MessageHeader {
                tenant_id: session_tenant(&principal, &headers),
                ..MessageHeader::default()
            };
            return mig_error_response(header, err);
        }
    };

    let mut meta = Map::new();
    meta.insert("topic".to_string(), Value::String(topic.clone()));
    meta.insert(
        "resume_cursor".to_string(),
        Value::String(query.resume_cursor.clone()),
    );
    let (_id, conn_guard) = state.svc.register_connection(ConnectionSnapshot {
        protocol: "http".to_string(),
        kind: "sse_subscribe".to_string(),
        tenant_id: session_tenant(&principal, &headers),
        actor: principal.subject.clone(),
        remote_addr: connect_info
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default(),
        meta,
        ..ConnectionSnapshot::default()
    });

    // Replay then live, in one stream; the guards ride inside the closure
    // so disconnect tears the whole session down.
    let events = stream::iter(replay)
        .chain(ReceiverStream::new(live))
        .map(move |event| {
            let _session = (&gauge, &sub_guard, &conn_guard);
            Ok::<Event, Infallible>(
                Event::default().event("mig-event").data(
                    serde_json::to_string(&event)
                        .unwrap_or_else(|_| "{}".to_string()),
                ),
            )
        });

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}
