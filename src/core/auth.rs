//! Caller authentication and session key derivation.
//!
//! Two ways in: a self-describing bearer token (base64-encoded JSON
//! claims: subject, expiry, scopes, tenant), or the static token from
//! configuration which maps to the configured default principal. Anything
//! else is rejected; a caller that cannot be resolved to a principal
//! never gets a session.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use thiserror::Error;
use tracing::debug;

use super::config::AuthConfig;
use crate::domains::capabilities::Principal;

/// Authentication failures. All of them resolve to an unresolvable
/// session at the adapter; the distinction is for logs.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token is not base64 JSON in the expected shape.
    #[error("Malformed bearer token")]
    Malformed,

    /// The token's expiry is in the past.
    #[error("Bearer token expired at {0}")]
    Expired(i64),
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    tenant: Option<String>,
}

/// Resolve a bearer token to a principal.
pub fn principal_from_bearer(token: &str, config: &AuthConfig) -> Result<Principal, AuthError> {
    // The static operator token short-circuits to the default principal.
    if config.bearer_token.as_deref() == Some(token) {
        debug!("Static bearer token accepted");
        return Ok(default_principal(config));
    }

    let decoded = STANDARD.decode(token).map_err(|_| AuthError::Malformed)?;
    let claims: TokenClaims =
        serde_json::from_slice(&decoded).map_err(|_| AuthError::Malformed)?;

    if let Some(exp) = claims.exp {
        if chrono::Utc::now().timestamp() >= exp {
            return Err(AuthError::Expired(exp));
        }
    }

    let mut principal = Principal::new(claims.sub, claims.scopes);
    if let Some(tenant) = claims.tenant {
        principal = principal.with_tenant(tenant);
    }
    Ok(principal)
}

/// The principal assumed for unauthenticated local callers.
pub fn default_principal(config: &AuthConfig) -> Principal {
    let mut principal = Principal::new(
        config.default_principal.clone(),
        config.default_scopes.clone(),
    );
    if let Some(tenant) = &config.default_tenant {
        principal = principal.with_tenant(tenant.clone());
    }
    principal
}

/// Derive the stable session key for a principal.
///
/// Keyed on identity, not on the transport connection, so a stateless
/// HTTP caller lands in the same session on every request and a stdio
/// client keeps its session across reconnects.
pub fn session_key(principal: &Principal) -> String {
    let mut hasher = DefaultHasher::new();
    principal.id.hash(&mut hasher);
    principal.tenant.hash(&mut hasher);
    format!("sess-{:016x}", hasher.finish())
}
