//! migd — the Model Interface Gateway daemon.
//!
//! Multiplexes four transport bindings onto one `mig_core::Service`:
//!
//! - HTTP/JSON with SSE subscribe and a WebSocket duplex stream ([`http`])
//! - gRPC unary, bidi, and server-streaming services ([`grpc`])
//! - NATS request/reply subjects ([`nats`])
//!
//! plus the embedded console ([`ui`]). All bindings observe identical
//! state; the binaries in this crate only wire configuration, metrics, and
//! shutdown around them.

pub mod grpc;
pub mod http;
pub mod nats;
pub mod ui;
