//! Call context and result types.
//!
//! A `CallContext` is created per invocation from resolved session/auth
//! state and never mutated afterwards; derived contexts are produced with
//! `with_metadata`. A `CallResult` is the normalized outcome envelope the
//! adapter serializes onto the wire.

use std::collections::BTreeMap;

use serde_json::{Value, json};

// ============================================================================
// Principal
// ============================================================================

/// An authenticated caller: an opaque identifier plus granted scopes and an
/// optional default tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Opaque stable identifier (e.g. a user or service account id).
    pub id: String,

    /// Scopes granted to this caller. Capabilities declare a required
    /// scope; the permission filter matches against this list.
    pub scopes: Vec<String>,

    /// Default tenant this caller acts within, if any.
    pub tenant: Option<String>,
}

impl Principal {
    /// Create a principal with the given id and scopes.
    pub fn new(id: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            id: id.into(),
            scopes,
            tenant: None,
        }
    }

    /// Builder: set the default tenant.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Whether this principal holds the given scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

// ============================================================================
// Call Context
// ============================================================================

/// Per-invocation context: caller identity, effective scope/tenant and
/// free-form metadata.
///
/// Immutable once built; `with_metadata` returns a new copy so a base
/// context can be reused concurrently.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// The authenticated caller.
    pub principal: Principal,

    /// Effective tenant/scope for this call. This is the session override
    /// when one is set, otherwise the principal's default tenant.
    pub scope: Option<String>,

    /// The stable session key this call belongs to.
    pub session_key: String,

    /// Free-form metadata (insertion order irrelevant).
    pub metadata: BTreeMap<String, String>,
}

impl CallContext {
    /// Create a context for a principal within a session.
    pub fn new(principal: Principal, session_key: impl Into<String>) -> Self {
        let scope = principal.tenant.clone();
        Self {
            principal,
            scope,
            session_key: session_key.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builder: replace the effective scope (session override).
    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        if scope.is_some() {
            self.scope = scope;
        }
        self
    }

    /// Derive a new context with an additional metadata entry. The
    /// original is left untouched.
    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut derived = self.clone();
        derived.metadata.insert(key.into(), value.into());
        derived
    }

    /// Look up a metadata entry.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

// ============================================================================
// Call Result
// ============================================================================

/// Outcome of a capability invocation.
///
/// Exactly one variant is ever populated; `metadata` is always present
/// (possibly empty) on both.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    /// Successful execution with a structured payload.
    Success {
        data: Value,
        metadata: BTreeMap<String, String>,
    },

    /// Terminal failure with a human-readable message and machine code.
    Failure {
        message: String,
        code: String,
        metadata: BTreeMap<String, String>,
    },
}

impl CallResult {
    /// Create a success result with empty metadata.
    pub fn success(data: Value) -> Self {
        Self::Success {
            data,
            metadata: BTreeMap::new(),
        }
    }

    /// Create a failure result with empty metadata.
    pub fn failure(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            code: code.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Whether this is the success variant.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Add a metadata entry (builder style).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self {
            Self::Success { metadata, .. } | Self::Failure { metadata, .. } => {
                metadata.insert(key.into(), value.into());
            }
        }
        self
    }

    /// Shared metadata accessor.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        match self {
            Self::Success { metadata, .. } | Self::Failure { metadata, .. } => metadata,
        }
    }

    /// Serialize to the normalized wire envelope:
    /// `{ok: true, data, meta}` or `{ok: false, error: {code, message}, meta}`.
    pub fn to_envelope(&self) -> Value {
        match self {
            Self::Success { data, metadata } => json!({
                "ok": true,
                "data": data,
                "meta": metadata,
            }),
            Self::Failure {
                message,
                code,
                metadata,
            } => json!({
                "ok": false,
                "error": { "code": code, "message": message },
                "meta": metadata,
            }),
        }
    }
}
