//! Session-specific error types.

use thiserror::Error;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No stable session key could be derived for the caller. Surfaced to
    /// the client instead of silently fabricating a session that could
    /// never be re-addressed on a later stateless request.
    #[error("Unresolvable session: {0}")]
    Unresolvable(String),

    /// An internal error occurred.
    #[error("Internal session error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Create an "unresolvable session" error.
    pub fn unresolvable(msg: impl Into<String>) -> Self {
        Self::Unresolvable(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
