//! Capability-specific error types.
//!
//! The variants map one-to-one to the error taxonomy the gateway surfaces
//! to clients: validation and permission failures are resolved locally,
//! circuit/transient/permanent failures come out of the resilience pipeline.

use thiserror::Error;

use super::validation::Violation;

/// Errors that can occur while resolving or executing a capability.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// One or more arguments failed validation. Never retried; carries the
    /// full violation list so the caller can correct in one round-trip.
    #[error("Validation failed: {}", format_violations(.0))]
    Validation(Vec<Violation>),

    /// The caller lacks the scope required by the capability. Never retried.
    #[error("Permission denied: capability '{capability}' requires scope '{scope}'")]
    PermissionDenied { capability: String, scope: String },

    /// The requested capability (or a resource named by its arguments)
    /// does not exist. Never retried.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A capability with this name is already registered.
    #[error("Duplicate capability name: {0}")]
    DuplicateName(String),

    /// The downstream dependency is currently isolated by its circuit
    /// breaker. Fails fast; `retry_after_ms` hints when to try again.
    #[error("Circuit open for service '{service}', retry after {retry_after_ms}ms")]
    CircuitOpen { service: String, retry_after_ms: u64 },

    /// Transient execution failure (network/timeout class). Retryable.
    #[error("Transient execution failure: {0}")]
    Transient(String),

    /// Capability-reported business failure. Not retried.
    #[error("Permanent execution failure: {0}")]
    Permanent(String),

    /// The execute stage exceeded its bounded timeout. Treated as
    /// transient for circuit-breaker and retry purposes.
    #[error("Capability execution timed out after {0}ms")]
    Timeout(u64),

    /// An internal error that should not occur under normal operation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CapabilityError {
    /// Create a "not found" error for a capability name.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create a transient execution failure.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a permanent execution failure.
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the resilience pipeline may re-attempt after this failure.
    ///
    /// Only transient/timeout-class failures qualify; validation,
    /// permission, not-found and business failures never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }

    /// Machine-readable code for the wire envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::DuplicateName(_) => "DUPLICATE_NAME",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::Transient(_) => "TRANSIENT_EXECUTION",
            Self::Permanent(_) => "PERMANENT_EXECUTION",
            Self::Timeout(_) => "EXECUTION_TIMEOUT",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CapabilityError::transient("connection reset").is_retryable());
        assert!(CapabilityError::Timeout(5000).is_retryable());
        assert!(!CapabilityError::permanent("no such record").is_retryable());
        assert!(!CapabilityError::not_found("x").is_retryable());
        assert!(
            !CapabilityError::PermissionDenied {
                capability: "a.b.C".to_string(),
                scope: "admin".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(CapabilityError::transient("x").code(), "TRANSIENT_EXECUTION");
        assert_eq!(
            CapabilityError::CircuitOpen {
                service: "db".to_string(),
                retry_after_ms: 100,
            }
            .code(),
            "CIRCUIT_OPEN"
        );
    }
}
