//! Per-session state.
//!
//! A session correlates otherwise-stateless protocol round-trips to
//! per-caller state: the dynamically loaded capability set, an optional
//! scope/tenant override and a sliding last-activity timestamp. The
//! `SessionManager` exclusively owns every `Session`; nothing else
//! mutates one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domains::capabilities::Capability;

/// State for a single session key.
pub struct Session {
    /// Dynamically loaded capabilities, name -> capability. The fixed
    /// discovery set is not stored here; it is implicit in every session.
    pub(super) loaded: BTreeMap<String, Arc<dyn Capability>>,

    /// Scope/tenant override ("acting as tenant X"), replacing the
    /// principal-derived default until cleared or the session ends.
    pub(super) scope_override: Option<String>,

    /// Last activity; any manager operation resets this (sliding window).
    pub(super) last_activity: Instant,
}

impl Session {
    /// A fresh session in the seeded state: nothing loaded, no override.
    pub(super) fn new() -> Self {
        Self {
            loaded: BTreeMap::new(),
            scope_override: None,
            last_activity: Instant::now(),
        }
    }

    /// Reset the sliding activity window.
    pub(super) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time since the last activity.
    pub(super) fn idle(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Whether the sliding window has fully elapsed.
    pub(super) fn is_expired(&self, ttl: Duration) -> bool {
        self.idle() >= ttl
    }

    /// Names of the dynamically loaded capabilities.
    pub fn loaded_names(&self) -> Vec<String> {
        self.loaded.keys().cloned().collect()
    }

    /// The current scope override, if any.
    pub fn scope_override(&self) -> Option<&str> {
        self.scope_override.as_deref()
    }
}

/// Snapshot of session state for the current-context capability.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// The session's stable key.
    pub session_key: String,

    /// Names of dynamically loaded capabilities.
    pub loaded: Vec<String>,

    /// Active scope override, if set.
    pub scope_override: Option<String>,

    /// Time remaining until TTL expiry, assuming no further activity.
    pub expires_in: Duration,
}
