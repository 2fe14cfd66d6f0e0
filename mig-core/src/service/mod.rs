//! The gateway service: single owner of all mutable state.
//!
//! One process-wide reader/writer lock protects every map the protocol
//! verbs touch. Mutations take the exclusive lock; discovery, listing, and
//! usage snapshots take the shared lock. The only work that happens outside
//! the lock is invoke's payload production, which runs under its deadline
//! timer (see [`ops`]).
//!
//! The service also owns the optional NATS mirror connection and the
//! optional append-only audit log file. Both are released by [`Service::close`]
//! during staged shutdown, after the bindings have stopped.

mod connections;
mod frames;
mod ops;

pub use connections::{ConnectionFilters, ConnectionGuard};
pub use frames::dispatch_frame;

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use arc_swap::ArcSwapOption;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use crate::envelope::new_message_id;
use crate::error::{ErrorCode, MigError};
use crate::metrics::Metrics;
use crate::protocol::{
    AuditRecord, CapabilityDescriptor, CapabilityUpsertRequest, ConformanceHealth,
    ConnectionSnapshot, EventMessage, Gateway, InvokeResponse, Org, PolicyValidateRequest,
    PolicyValidateResponse, QoSProfile, QuotaRequest, QuotaResponse, SchemaUpsertRequest, Tenant,
    UsageSnapshot,
};

/// Capacity of each subscriber channel. Publishers never block on a slow
/// subscriber; a full channel drops that event for that subscriber only.
pub(crate) const SUBSCRIBER_CHANNEL_CAPACITY: usize = 32;

/// Removes a subscriber channel from its topic when dropped.
///
/// Dropping the guard drops the only sender for the subscription, so the
/// live channel closes exactly once; the drop itself is the idempotent
/// unsubscribe.
pub struct SubscriptionGuard {
    pub(crate) service: Arc<Service>,
    pub(crate) topic: String,
    pub(crate) id: u64,
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let mut state = self.service.write();
        if let Some(subscribers) = state.subscribers.get_mut(&self.topic) {
            subscribers.remove(&self.id);
            if subscribers.is_empty() {
                state.subscribers.remove(&self.topic);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    pub nats_url: String,
    pub audit_log_path: String,
}

pub(crate) struct CoreState {
    pub(crate) capabilities: BTreeMap<String, CapabilityDescriptor>,
    pub(crate) schemas: HashMap<String, Map<String, Value>>,
    pub(crate) events: HashMap<String, Vec<EventMessage>>,
    pub(crate) subscribers: HashMap<String, HashMap<u64, mpsc::Sender<EventMessage>>>,
    pub(crate) next_subscriber_id: u64,
    pub(crate) idempotency: HashMap<String, InvokeResponse>,
    pub(crate) cancelled: HashMap<String, String>,
    pub(crate) quotas: HashMap<String, i64>,
    pub(crate) audit: Vec<AuditRecord>,
    pub(crate) connections: HashMap<String, ConnectionSnapshot>,
    pub(crate) tenant_invocations: BTreeMap<String, i64>,
    pub(crate) capability_invocations: BTreeMap<String, i64>,
    pub(crate) orgs: HashMap<String, Org>,
    pub(crate) tenants: HashMap<String, Tenant>,
    pub(crate) gateways: HashMap<String, Gateway>,
    pub(crate) audit_file: Option<File>,
}

impl CoreState {
    fn empty() -> Self {
        Self {
            capabilities: BTreeMap::new(),
            schemas: HashMap::new(),
            events: HashMap::new(),
            subscribers: HashMap::new(),
            next_subscriber_id: 0,
            idempotency: HashMap::new(),
            cancelled: HashMap::new(),
            quotas: HashMap::new(),
            audit: Vec::new(),
            connections: HashMap::new(),
            tenant_invocations: BTreeMap::new(),
            capability_invocations: BTreeMap::new(),
            orgs: HashMap::new(),
            tenants: HashMap::new(),
            gateways: HashMap::new(),
            audit_file: None,
        }
    }
}

pub struct Service {
    server_id: String,
    state: RwLock<CoreState>,
    metrics: ArcSwapOption<Metrics>,
    nats: Option<async_nats::Client>,
    nats_binding_active: AtomicBool,
}

impl Service {
    /// In-memory service with no NATS mirror and no audit file.
    pub fn new() -> Arc<Self> {
        let service = Self {
            server_id: "migd-core".to_string(),
            state: RwLock::new(CoreState::empty()),
            metrics: ArcSwapOption::empty(),
            nats: None,
            nats_binding_active: AtomicBool::new(false),
        };
        service.bootstrap_defaults();
        Arc::new(service)
    }

    /// Full service: connects the NATS mirror and opens the audit log when
    /// the options name them.
    pub async fn with_options(opts: ServiceOptions) -> Result<Arc<Self>, MigError> {
        let nats = if opts.nats_url.is_empty() {
            None
        } else {
            let client = async_nats::connect(&opts.nats_url)
                .await
                .map_err(|e| MigError::unavailable(format!("connect nats: {e}")))?;
            tracing::info!(url = %opts.nats_url, "connected NATS mirror");
            Some(client)
        };

        let audit_file = if opts.audit_log_path.is_empty() {
            None
        } else {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&opts.audit_log_path)
                .map_err(|e| MigError::unavailable(format!("open audit log: {e}")))?;
            Some(file)
        };

        let service = Self {
            server_id: "migd-core".to_string(),
            state: RwLock::new(CoreState {
                audit_file,
                ..CoreState::empty()
            }),
            metrics: ArcSwapOption::empty(),
            nats,
            nats_binding_active: AtomicBool::new(false),
        };
        service.bootstrap_defaults();
        Ok(Arc::new(service))
    }

    /// Release owned resources. Bindings must already be stopped; the NATS
    /// client handle itself is dropped with the service.
    pub fn close(&self) {
        self.nats_binding_active.store(false, Ordering::SeqCst);
        let mut state = self.write();
        if let Some(mut file) = state.audit_file.take() {
            let _ = file.flush();
        }
    }

    pub fn set_metrics(&self, metrics: Metrics) {
        self.metrics.store(Some(Arc::new(metrics)));
    }

    pub fn metrics(&self) -> Option<Metrics> {
        self.metrics.load_full().map(|m| (*m).clone())
    }

    pub(crate) fn record_error(&self, code: ErrorCode, operation: &str) {
        if let Some(metrics) = self.metrics.load_full() {
            metrics.record_error(code, operation);
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Whether a NATS request/reply binding is currently serving.
    pub fn nats_binding_active(&self) -> bool {
        self.nats_binding_active.load(Ordering::SeqCst)
    }

    pub fn set_nats_binding_active(&self, active: bool) {
        self.nats_binding_active.store(active, Ordering::SeqCst);
    }

    pub fn nats_client(&self) -> Option<async_nats::Client> {
        self.nats.clone()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, CoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, CoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed the default capability and its schemas so a fresh gateway is
    /// immediately discoverable.
    fn bootstrap_defaults(&self) {
        let mut state = self.write();
        state.capabilities.insert(
            "observatory.models.infer".to_string(),
            CapabilityDescriptor {
                id: "observatory.models.infer".to_string(),
                version: "1.0.0".to_string(),
                modes: vec!["unary".to_string(), "server_stream".to_string()],
                input_schema_uri: "schema://observatory/models/infer-input/v1".to_string(),
                output_schema_uri: "schema://observatory/models/infer-output/v1".to_string(),
                event_topics: vec!["observatory.inference.completed".to_string()],
                auth_scopes: vec!["capability:infer".to_string()],
                qos: QoSProfile {
                    max_payload_bytes: 1024 * 1024,
                    supports_replay: true,
                    delivery_semantics: "at_least_once".to_string(),
                    supports_ordering: true,
                },
            },
        );
        let input_schema = json!({
            "type": "object",
            "properties": {"input": {"type": "string"}},
            "required": ["input"],
        });
        let output_schema = json!({
            "type": "object",
            "properties": {"result": {"type": "string"}},
            "required": ["result"],
        });
        if let (Value::Object(input), Value::Object(output)) = (input_schema, output_schema) {
            state
                .schemas
                .insert("schema://observatory/models/infer-input/v1".to_string(), input);
            state
                .schemas
                .insert("schema://observatory/models/infer-output/v1".to_string(), output);
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Admin surface
    // ───────────────────────────────────────────────────────────────────

    pub fn add_capability(&self, req: CapabilityUpsertRequest) -> Result<(), MigError> {
        if req.descriptor.id.is_empty() || req.descriptor.version.is_empty() {
            return Err(MigError::invalid(
                "descriptor.id and descriptor.version are required",
            ));
        }
        if req.descriptor.input_schema_uri.is_empty() || req.descriptor.output_schema_uri.is_empty()
        {
            return Err(MigError::invalid("schema URIs are required"));
        }
        let mut state = self.write();
        state
            .capabilities
            .insert(req.descriptor.id.clone(), req.descriptor);
        Ok(())
    }

    pub fn list_capabilities(&self) -> Vec<CapabilityDescriptor> {
        self.read().capabilities.values().cloned().collect()
    }

    pub fn add_schema(&self, req: SchemaUpsertRequest) -> Result<(), MigError> {
        if req.uri.is_empty() {
            return Err(MigError::invalid("uri is required"));
        }
        if req.schema.is_empty() {
            return Err(MigError::invalid("schema is required"));
        }
        self.write().schemas.insert(req.uri, req.schema);
        Ok(())
    }

    pub fn conformance_health(&self) -> ConformanceHealth {
        ConformanceHealth {
            core: true,
            streaming: true,
            evented: true,
            full: true,
        }
    }

    pub fn validate_policy(
        &self,
        req: PolicyValidateRequest,
    ) -> Result<PolicyValidateResponse, MigError> {
        if req.tenant_id.is_empty() || req.capability.is_empty() || req.action.is_empty() {
            return Err(MigError::invalid(
                "tenant_id, capability, and action are required",
            ));
        }
        if req.action != "invoke" {
            return Ok(PolicyValidateResponse {
                allowed: false,
                reason: "unsupported action".to_string(),
            });
        }
        let exists = self.read().capabilities.contains_key(&req.capability);
        if !exists {
            return Ok(PolicyValidateResponse {
                allowed: false,
                reason: "capability does not exist".to_string(),
            });
        }
        Ok(PolicyValidateResponse {
            allowed: true,
            reason: String::new(),
        })
    }

    pub fn set_quota(&self, req: QuotaRequest) -> Result<QuotaResponse, MigError> {
        if req.tenant_id.is_empty() {
            return Err(MigError::invalid("tenant_id is required"));
        }
        if req.max_invocations <= 0 {
            return Err(MigError::invalid("max_invocations must be > 0"));
        }
        self.write()
            .quotas
            .insert(req.tenant_id.clone(), req.max_invocations);
        Ok(QuotaResponse {
            tenant_id: req.tenant_id,
            max_invocations: req.max_invocations,
        })
    }

    pub fn audit_export(&self, tenant_id: &str) -> Vec<AuditRecord> {
        let state = self.read();
        if tenant_id.is_empty() {
            return state.audit.clone();
        }
        state
            .audit
            .iter()
            .filter(|record| record.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn create_org(&self, mut org: Org) -> Result<Org, MigError> {
        if org.name.is_empty() {
            return Err(MigError::invalid("name is required"));
        }
        if org.id.is_empty() {
            org.id = format!("org-{}", &new_message_id()[..12]);
        }
        self.write().orgs.insert(org.id.clone(), org.clone());
        Ok(org)
    }

    pub fn create_tenant(&self, mut tenant: Tenant) -> Result<Tenant, MigError> {
        if tenant.name.is_empty() || tenant.org_id.is_empty() {
            return Err(MigError::invalid("name and org_id are required"));
        }
        if tenant.id.is_empty() {
            tenant.id = format!("tenant-{}", &new_message_id()[..12]);
        }
        let mut state = self.write();
        if !state.orgs.contains_key(&tenant.org_id) {
            return Err(MigError::not_found("org not found"));
        }
        state.tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(tenant)
    }

    pub fn create_gateway(&self, mut gateway: Gateway) -> Result<Gateway, MigError> {
        if gateway.tenant_id.is_empty() || gateway.region.is_empty() || gateway.binding.is_empty() {
            return Err(MigError::invalid(
                "tenant_id, region, and binding are required",
            ));
        }
        if gateway.id.is_empty() {
            gateway.id = format!("gw-{}", &new_message_id()[..12]);
        }
        let mut state = self.write();
        if !state.tenants.contains_key(&gateway.tenant_id) {
            return Err(MigError::not_found("tenant not found"));
        }
        state.gateways.insert(gateway.id.clone(), gateway.clone());
        Ok(gateway)
    }

    pub fn usage(&self) -> UsageSnapshot {
        let state = self.read();
        let total: i64 = state.capability_invocations.values().sum();
        UsageSnapshot {
            tenant_invocations: state.tenant_invocations.clone(),
            capability_invocations: state.capability_invocations.clone(),
            total_invocations: total,
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Mirroring and audit plumbing
    // ───────────────────────────────────────────────────────────────────

    /// Best-effort NATS mirror of a stored event. Fired from inside the
    /// publish critical section; the send itself happens on a detached task
    /// so the lock is never held across I/O.
    pub(crate) fn mirror_event_to_nats(&self, event: &EventMessage) {
        let Some(client) = self.nats.clone() else {
            return;
        };
        let subject = format!(
            "mig.v0_1.{}.events.{}",
            sanitize_nats_segment(&event.header.tenant_id),
            sanitize_nats_subject(&event.topic),
        );
        let Ok(body) = serde_json::to_vec(event) else {
            return;
        };
        tokio::spawn(async move {
            if let Err(error) = client.publish(subject.clone(), body.into()).await {
                tracing::debug!(%subject, %error, "event mirror publish dropped");
            }
        });
    }

    /// Append one JSON line to the audit log. Called with the exclusive
    /// lock held; write failures are dropped, the in-memory trail is
    /// authoritative.
    pub(crate) fn write_audit_locked(state: &CoreState, record: &AuditRecord) {
        let Some(file) = state.audit_file.as_ref() else {
            return;
        };
        let Ok(payload) = serde_json::to_vec(record) else {
            return;
        };
        let mut out = file;
        let _ = out.write_all(&payload);
        let _ = out.write_all(b"\n");
    }
}

pub(crate) fn sanitize_nats_subject(value: &str) -> String {
    value.replace(' ', "_").replace('/', ".")
}

pub(crate) fn sanitize_nats_segment(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return "unknown".to_string();
    }
    sanitize_nats_subject(value)
}
