//! Environment-driven daemon configuration.
//!
//! All knobs come from `MIGD_*` environment variables so the daemon can run
//! unconfigured in development and fully specified in deployment manifests.

use std::env;

use crate::auth::{AuthConfig, AuthMode};
use crate::error::MigError;

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address. A bare `:port` is accepted and bound on all
    /// interfaces.
    pub addr: String,
    /// gRPC listen address; the gRPC binding is disabled when empty.
    pub grpc_addr: String,
    pub auth: AuthConfig,
    /// NATS server URL; the mirror and the NATS binding are disabled when
    /// empty.
    pub nats_url: String,
    pub enable_nats_binding: bool,
    /// Append-only audit log path; in-memory only when empty.
    pub audit_log_path: String,
    pub enable_metrics: bool,
}

impl Config {
    /// Read configuration from the environment.
    ///
    /// # Environment variables
    ///
    /// - `MIGD_ADDR` (default `:8080`)
    /// - `MIGD_GRPC_ADDR`
    /// - `MIGD_NATS_URL`
    /// - `MIGD_ENABLE_NATS_BINDING` (default `true`)
    /// - `MIGD_AUDIT_LOG_PATH`
    /// - `MIGD_ENABLE_METRICS` (default `true`)
    /// - `MIGD_AUTH_MODE` (`none` or `jwt`, default `none`)
    /// - `MIGD_JWT_HS256_SECRET` (required when mode is `jwt`)
    /// - `MIGD_REQUIRE_TENANT_HEADER` (default `false`)
    pub fn from_env() -> Result<Self, MigError> {
        let grpc_addr = env_trimmed("MIGD_GRPC_ADDR");
        let mut cfg = Config {
            addr: normalize_addr(&env_or_default("MIGD_ADDR", ":8080")),
            grpc_addr: if grpc_addr.is_empty() {
                grpc_addr
            } else {
                normalize_addr(&grpc_addr)
            },
            auth: AuthConfig::default(),
            nats_url: env_trimmed("MIGD_NATS_URL"),
            enable_nats_binding: env_bool("MIGD_ENABLE_NATS_BINDING", true),
            audit_log_path: env_trimmed("MIGD_AUDIT_LOG_PATH"),
            enable_metrics: env_bool("MIGD_ENABLE_METRICS", true),
        };

        let mode = env_or_default("MIGD_AUTH_MODE", "none").to_lowercase();
        match mode.as_str() {
            "none" => cfg.auth.mode = AuthMode::None,
            "jwt" => {
                cfg.auth.mode = AuthMode::Jwt;
                cfg.auth.jwt_secret = env_trimmed("MIGD_JWT_HS256_SECRET");
                if cfg.auth.jwt_secret.is_empty() {
                    return Err(MigError::invalid(
                        "MIGD_JWT_HS256_SECRET is required when MIGD_AUTH_MODE=jwt",
                    ));
                }
            }
            other => {
                return Err(MigError::invalid(format!(
                    "unsupported MIGD_AUTH_MODE {other:?}"
                )));
            }
        }
        cfg.auth.require_tenant = env_bool("MIGD_REQUIRE_TENANT_HEADER", false);
        Ok(cfg)
    }
}

/// `:8080` means every interface; `TcpListener` needs an explicit host.
pub fn normalize_addr(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    }
}

fn env_trimmed(key: &str) -> String {
    env::var(key).unwrap_or_default().trim().to_string()
}

fn env_or_default(key: &str, fallback: &str) -> String {
    let value = env_trimmed(key);
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

fn env_bool(key: &str, fallback: bool) -> bool {
    match env_trimmed(key).to_lowercase().as_str() {
        "" => fallback,
        "1" | "t" | "true" => true,
        "0" | "f" | "false" => false,
        _ => fallback,
    }
}
