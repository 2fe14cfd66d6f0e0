//! MIG Core — transport-agnostic library for the Model Interface Gateway.
//!
//! This crate holds everything the bindings share: the MIG v0.1 message
//! envelope and error taxonomy, the protocol types, the service state
//! machine (discovery, invocation, publish/subscribe with ordered replay,
//! cancellation, quotas, audit), the auth projection layer, the live
//! connection registry, configuration, and Prometheus metrics.
//!
//! The daemon (`migd`) multiplexes the HTTP/JSON, WebSocket, gRPC, and NATS
//! bindings onto one [`service::Service`] instance so every transport
//! observes identical state and semantics.

pub mod auth;
pub mod config;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod service;

pub use auth::{apply_principal_header, principal_from_headers, AuthConfig, AuthMode, Principal};
pub use config::Config;
pub use envelope::{MessageHeader, MIG_VERSION};
pub use error::{ErrorCode, ErrorEnvelope, MigError};
pub use metrics::Metrics;
pub use service::{
    dispatch_frame, ConnectionFilters, ConnectionGuard, Service, ServiceOptions, SubscriptionGuard,
};
