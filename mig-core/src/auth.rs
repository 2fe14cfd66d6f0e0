//! Auth projection: building a [`Principal`] from transport credentials.
//!
//! Two modes are supported. `none` trusts the transport tenant header (HTTP
//! `X-Tenant-ID`, gRPC metadata `x-tenant-id`, NATS subject token). `jwt`
//! requires an HS256 bearer token whose claims carry the tenant and scopes.
//! The projected principal is reconciled against the envelope `tenant_id`
//! before any operation runs.

use std::collections::BTreeSet;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::envelope::MessageHeader;
use crate::error::MigError;

/// The authenticated caller: subject, tenant, scopes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Principal {
    pub subject: String,
    pub tenant_id: String,
    pub scopes: BTreeSet<String>,
    pub authenticated: bool,
}

impl Principal {
    /// The principal used when no credential is required or presented.
    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
            ..Self::default()
        }
    }

    /// Scope gate: unauthenticated principals pass, empty requirement lists
    /// are open, otherwise any overlap is enough.
    pub fn has_any_scope(&self, required: &[String]) -> bool {
        if !self.authenticated || required.is_empty() {
            return true;
        }
        required.iter().any(|scope| self.scopes.contains(scope))
    }

    /// The principal's scopes in sorted order, for envelope meta.
    pub fn scopes_list(&self) -> Vec<String> {
        self.scopes.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    #[default]
    None,
    Jwt,
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub jwt_secret: String,
    pub require_tenant: bool,
}

/// Credential parse and reconciliation failures at the auth boundary.
///
/// Tenant-related failures surface as `MIG_FORBIDDEN`; credential failures
/// as `MIG_UNAUTHORIZED`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("tenant header is required")]
    TenantHeaderRequired,
    #[error("missing bearer token")]
    MissingBearerToken,
    #[error("invalid bearer token")]
    InvalidBearerToken,
    #[error("token is missing tenant claim")]
    MissingTenantClaim,
    #[error("tenant header does not match token tenant")]
    TenantMismatch,
}

impl AuthError {
    pub fn to_mig_error(&self) -> MigError {
        match self {
            Self::TenantHeaderRequired | Self::MissingTenantClaim | Self::TenantMismatch => {
                MigError::forbidden(self.to_string())
            }
            Self::MissingBearerToken | Self::InvalidBearerToken => {
                MigError::unauthorized(self.to_string())
            }
        }
    }
}

/// Project a [`Principal`] from the transport's credential material.
///
/// `authorization` is the raw `Authorization` header (or gRPC metadata)
/// value; `tenant_header` the raw `X-Tenant-ID` equivalent.
pub fn principal_from_headers(
    authorization: &str,
    tenant_header: &str,
    cfg: &AuthConfig,
) -> Result<Principal, AuthError> {
    let header_tenant = tenant_header.trim();

    match cfg.mode {
        AuthMode::None => {
            if cfg.require_tenant && header_tenant.is_empty() {
                return Err(AuthError::TenantHeaderRequired);
            }
            let mut principal = Principal::anonymous();
            principal.tenant_id = header_tenant.to_string();
            Ok(principal)
        }
        AuthMode::Jwt => {
            let authorization = authorization.trim();
            let token = authorization
                .strip_prefix("Bearer ")
                .ok_or(AuthError::MissingBearerToken)?
                .trim();

            let mut validation = Validation::new(Algorithm::HS256);
            validation.required_spec_claims.clear();
            let claims = jsonwebtoken::decode::<Map<String, Value>>(
                token,
                &DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
                &validation,
            )
            .map_err(|_| AuthError::InvalidBearerToken)?
            .claims;

            let tenant = string_claim(&claims, "tenant_id")
                .or_else(|| string_claim(&claims, "tenant"))
                .ok_or(AuthError::MissingTenantClaim)?;

            if cfg.require_tenant && header_tenant.is_empty() {
                return Err(AuthError::TenantHeaderRequired);
            }
            if !header_tenant.is_empty() && header_tenant != tenant {
                return Err(AuthError::TenantMismatch);
            }

            Ok(Principal {
                subject: string_claim(&claims, "sub").unwrap_or_else(|| "unknown".to_string()),
                tenant_id: tenant,
                scopes: scopes_from_claims(&claims),
                authenticated: true,
            })
        }
    }
}

fn string_claim(claims: &Map<String, Value>, key: &str) -> Option<String> {
    claims
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn scopes_from_claims(claims: &Map<String, Value>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    if let Some(scope) = claims.get("scope").and_then(Value::as_str) {
        out.extend(scope.split_whitespace().map(str::to_string));
    }
    if let Some(Value::Array(scopes)) = claims.get("scopes") {
        out.extend(
            scopes
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string()),
        );
    }
    out
}

/// Write the principal projection into an envelope header and reconcile
/// tenants.
///
/// `fallback_tenant` is the transport tenant header, used only when neither
/// the envelope nor the principal carries one. The `"unknown"` sentinel the
/// HTTP binding substitutes for a missing header is rejected the same way an
/// empty tenant is.
pub fn apply_principal_header(
    header: &mut MessageHeader,
    principal: &Principal,
    fallback_tenant: Option<&str>,
) -> Result<(), MigError> {
    header.meta.insert(
        "idg.principal_subject".to_string(),
        Value::String(principal.subject.clone()),
    );
    header.meta.insert(
        "idg.principal_scopes".to_string(),
        Value::Array(
            principal
                .scopes_list()
                .into_iter()
                .map(Value::String)
                .collect(),
        ),
    );

    if header.tenant_id.is_empty() {
        if !principal.tenant_id.is_empty() {
            header.tenant_id = principal.tenant_id.clone();
        } else if let Some(fallback) = fallback_tenant {
            header.tenant_id = fallback.trim().to_string();
        }
    }
    if !principal.tenant_id.is_empty() && header.tenant_id != principal.tenant_id {
        return Err(MigError::forbidden(
            "tenant_id does not match authenticated principal",
        ));
    }
    if header.tenant_id.is_empty() || header.tenant_id == "unknown" {
        return Err(MigError::invalid("tenant_id is required"));
    }
    Ok(())
}
