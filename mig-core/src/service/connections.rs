//! Live connection registry for long-lived streams and subscriptions.
//!
//! Bindings register SSE, WebSocket, gRPC stream, and subscription sessions
//! here; the admin surface reads filtered snapshots with per-dimension
//! histograms. Registration hands back an RAII guard so sessions are
//! removed no matter how they end.

use std::sync::Arc;

use crate::envelope::{new_message_id, rfc3339_now};
use crate::protocol::{ConnectionSnapshot, ConnectionSummary, ConnectionsResponse};

use super::Service;

#[derive(Debug, Clone, Default)]
pub struct ConnectionFilters {
    pub tenant_id: String,
    pub kind: String,
    pub protocol: String,
}

/// Removes the connection from the registry when dropped.
pub struct ConnectionGuard {
    service: Arc<Service>,
    id: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.service.write().connections.remove(&self.id);
    }
}

impl Service {
    /// Register a long-lived session. Blank ids and start timestamps are
    /// filled in; the returned guard unregisters on drop.
    pub fn register_connection(
        self: &Arc<Self>,
        mut snapshot: ConnectionSnapshot,
    ) -> (String, ConnectionGuard) {
        if snapshot.id.is_empty() {
            snapshot.id = format!("conn-{}", &new_message_id()[..12]);
        }
        if snapshot.started_at.is_empty() {
            snapshot.started_at = rfc3339_now();
        }
        let id = snapshot.id.clone();
        self.write().connections.insert(id.clone(), snapshot);
        (
            id.clone(),
            ConnectionGuard {
                service: Arc::clone(self),
                id,
            },
        )
    }

    /// Filtered snapshot of the registry, newest sessions first, with
    /// per-protocol/kind/tenant histograms.
    pub fn connections(&self, filters: ConnectionFilters) -> ConnectionsResponse {
        let tenant = filters.tenant_id.trim();
        let kind = filters.kind.trim();
        let protocol = filters.protocol.trim();

        let state = self.read();
        let mut summary = ConnectionSummary {
            nats_binding_active: self.nats_binding_active(),
            ..ConnectionSummary::default()
        };
        let mut connections: Vec<ConnectionSnapshot> = Vec::with_capacity(state.connections.len());
        for conn in state.connections.values() {
            if !tenant.is_empty() && conn.tenant_id != tenant {
                continue;
            }
            if !kind.is_empty() && conn.kind != kind {
                continue;
            }
            if !protocol.is_empty() && conn.protocol != protocol {
                continue;
            }
            summary.total += 1;
            if !conn.protocol.is_empty() {
                *summary.by_protocol.entry(conn.protocol.clone()).or_insert(0) += 1;
            }
            if !conn.kind.is_empty() {
                *summary.by_kind.entry(conn.kind.clone()).or_insert(0) += 1;
            }
            if !conn.tenant_id.is_empty() {
                *summary.by_tenant.entry(conn.tenant_id.clone()).or_insert(0) += 1;
            }
            connections.push(conn.clone());
        }
        drop(state);

        connections.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        ConnectionsResponse {
            generated_at: rfc3339_now(),
            summary,
            connections,
            filter_tenant: tenant.to_string(),
            filter_kind: kind.to_string(),
            filter_protocol: protocol.to_string(),
        }
    }
}
