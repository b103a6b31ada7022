//! Session Capability Manager.
//!
//! Tracks, per session key, which capabilities are currently exposed: the
//! fixed discovery set every session starts with, plus the groups loaded
//! on demand through the loader capability. Liveness is a sliding TTL
//! window; any operation on a session resets it. Expired sessions are
//! discarded and a subsequent contact with the same key starts over in
//! the seeded state.
//!
//! The manager exclusively owns all session state. The session map is
//! guarded by a read/write lock and each session by its own mutex, so
//! mutations are atomic per key and cross-session operations never block
//! each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::session::{Session, SessionInfo};
use crate::core::config::SessionConfig;
use crate::domains::capabilities::{Capability, CapabilityError, CapabilityRegistry, Principal, permission};

/// Manages per-session capability state.
pub struct SessionManager {
    /// Session key -> session. Per-key mutexes keep mutations atomic
    /// without serializing unrelated sessions.
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,

    /// Source of loadable capabilities.
    registry: Arc<CapabilityRegistry>,

    /// The fixed discovery set, installed once at startup after the
    /// discovery capabilities (which reference this manager) are built.
    discovery: OnceLock<Vec<Arc<dyn Capability>>>,

    /// Sliding liveness window.
    ttl: Duration,

    /// Warn the client when a call arrives within this much of expiry.
    warning_threshold: Duration,
}

impl SessionManager {
    /// Create a session manager over the given registry.
    pub fn new(config: SessionConfig, registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            registry,
            discovery: OnceLock::new(),
            ttl: Duration::from_secs(config.ttl_secs),
            warning_threshold: Duration::from_secs(config.expiry_warning_secs),
        }
    }

    /// Install the fixed discovery set. Called once during startup wiring;
    /// later calls are ignored.
    pub fn install_discovery_set(&self, capabilities: Vec<Arc<dyn Capability>>) {
        if self.discovery.set(capabilities).is_err() {
            warn!("Discovery set already installed; ignoring replacement");
        }
    }

    /// The fixed discovery set (empty until installed).
    pub fn discovery_set(&self) -> &[Arc<dyn Capability>] {
        self.discovery.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Get the live session for a key, creating or re-seeding as needed.
    fn entry(&self, session_key: &str) -> Arc<Mutex<Session>> {
        {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            if let Some(session) = sessions.get(session_key) {
                let expired = session
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .is_expired(self.ttl);
                if !expired {
                    return session.clone();
                }
            }
        }

        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        // Re-check under the write lock; another task may have re-seeded.
        if let Some(session) = sessions.get(session_key) {
            let expired = session
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_expired(self.ttl);
            if !expired {
                return session.clone();
            }
            info!("Session {} expired; starting over seeded", session_key);
        } else {
            debug!("Seeding new session: {}", session_key);
        }

        let fresh = Arc::new(Mutex::new(Session::new()));
        sessions.insert(session_key.to_string(), fresh.clone());
        fresh
    }

    /// The session's current effective capability set: the fixed discovery
    /// set plus everything dynamically loaded, as a flat list.
    pub fn effective_capabilities(&self, session_key: &str) -> Vec<Arc<dyn Capability>> {
        let entry = self.entry(session_key);
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());
        session.touch();

        let mut capabilities: Vec<Arc<dyn Capability>> = self.discovery_set().to_vec();
        capabilities.extend(session.loaded.values().cloned());
        capabilities
    }

    /// Find a capability currently exposed to the session, by name.
    pub fn find_exposed(&self, session_key: &str, name: &str) -> Option<Arc<dyn Capability>> {
        self.effective_capabilities(session_key)
            .into_iter()
            .find(|c| c.descriptor().name == name)
    }

    /// Load every registry capability whose name is prefixed by `group`
    /// and visible to `principal` into the session. Returns exactly the
    /// newly added names; loading the same group again yields an empty
    /// set, and an unknown group is not an error.
    pub fn load_group(
        &self,
        session_key: &str,
        group: &str,
        principal: &Principal,
    ) -> Result<Vec<String>, CapabilityError> {
        let candidates = self.registry.all()?;
        let visible = permission::filter(&candidates, principal);

        let entry = self.entry(session_key);
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());
        session.touch();

        let mut added = Vec::new();
        for capability in visible {
            let name = capability.descriptor().name.clone();
            if !matches_group(&name, group) {
                continue;
            }
            if session.loaded.contains_key(&name) {
                continue;
            }
            session.loaded.insert(name.clone(), capability);
            added.push(name);
        }

        if !added.is_empty() {
            info!(
                "Session {}: loaded {} capabilities from group '{}'",
                session_key,
                added.len(),
                group
            );
        }
        Ok(added)
    }

    /// Set or clear the session's scope/tenant override.
    pub fn set_scope_override(&self, session_key: &str, scope: Option<String>) {
        let entry = self.entry(session_key);
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());
        session.touch();
        match &scope {
            Some(scope) => info!("Session {}: scope override set to '{}'", session_key, scope),
            None => debug!("Session {}: scope override cleared", session_key),
        }
        session.scope_override = scope;
    }

    /// The session's current scope override.
    pub fn scope_override(&self, session_key: &str) -> Option<String> {
        let entry = self.entry(session_key);
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());
        session.touch();
        session.scope_override.clone()
    }

    /// Snapshot of the session's state.
    pub fn session_info(&self, session_key: &str) -> SessionInfo {
        let entry = self.entry(session_key);
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());
        session.touch();
        SessionInfo {
            session_key: session_key.to_string(),
            loaded: session.loaded_names(),
            scope_override: session.scope_override.clone(),
            expires_in: self.ttl,
        }
    }

    /// If the session is alive but within the warning threshold of the
    /// window end, the remaining time. Evaluated against idle time at the
    /// moment the call arrives; does not reset the window itself.
    pub fn expiry_warning(&self, session_key: &str) -> Option<Duration> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let session = sessions.get(session_key)?;
        let session = session.lock().unwrap_or_else(|e| e.into_inner());

        let idle = session.idle();
        if idle >= self.ttl {
            return None;
        }
        let remaining = self.ttl - idle;
        (remaining <= self.warning_threshold).then_some(remaining)
    }

    /// Explicit teardown on disconnect.
    pub fn end_session(&self, session_key: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions.remove(session_key).is_some() {
            info!("Session {} ended", session_key);
        }
    }

    /// Drop every session whose sliding window has elapsed. Returns how
    /// many were purged.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, session| {
            !session
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_expired(self.ttl)
        });
        let purged = before - sessions.len();
        if purged > 0 {
            info!("Purged {} expired sessions", purged);
        }
        purged
    }

    /// Number of live sessions (testing and introspection).
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Name matches when it equals the group or sits under it as a dotted
/// prefix, so `teams` matches `teams.member.ADD` but not `teamsters.x.Y`.
fn matches_group(name: &str, group: &str) -> bool {
    name == group || (name.starts_with(group) && name[group.len()..].starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RegistryConfig;
    use crate::domains::capabilities::{CallContext, CapabilityDescriptor};
    use async_trait::async_trait;
    use rmcp::model::JsonObject;
    use serde_json::Value;

    struct StubCapability {
        descriptor: CapabilityDescriptor,
    }

    #[async_trait]
    impl Capability for StubCapability {
        fn descriptor(&self) -> &CapabilityDescriptor {
            &self.descriptor
        }

        async fn execute(
            &self,
            _args: &JsonObject,
            _ctx: &CallContext,
        ) -> Result<Value, CapabilityError> {
            Ok(Value::Null)
        }
    }

    fn stub(name: &str, scope: &str) -> Arc<dyn Capability> {
        Arc::new(StubCapability {
            descriptor: CapabilityDescriptor::new(name, "stub").with_scope(scope),
        })
    }

    fn manager_with(ttl_secs: u64, warning_secs: u64) -> SessionManager {
        let registry = Arc::new(CapabilityRegistry::new(RegistryConfig::default(), || {
            vec![
                stub("teams.team.LIST", "teams.read"),
                stub("teams.member.ADD", "teams.write"),
                stub("checkins.entry.LIST", "checkins.read"),
                stub("admin.tenant.PURGE", "admin"),
            ]
        }));
        let manager = SessionManager::new(
            SessionConfig {
                ttl_secs,
                expiry_warning_secs: warning_secs,
            },
            registry,
        );
        manager.install_discovery_set(vec![stub("platform.groups.LOAD", "ignored")]);
        manager
    }

    fn reader() -> Principal {
        Principal::new(
            "u1",
            vec!["teams.read".to_string(), "teams.write".to_string()],
        )
    }

    #[test]
    fn test_fresh_session_exposes_only_discovery_set() {
        let manager = manager_with(600, 60);
        let names: Vec<_> = manager
            .effective_capabilities("s1")
            .iter()
            .map(|c| c.descriptor().name.clone())
            .collect();
        assert_eq!(names, vec!["platform.groups.LOAD"]);
    }

    #[test]
    fn test_load_group_is_idempotent() {
        let manager = manager_with(600, 60);
        let principal = reader();

        let first = manager.load_group("s1", "teams", &principal).unwrap();
        assert_eq!(first.len(), 2);

        let second = manager.load_group("s1", "teams", &principal).unwrap();
        assert!(second.is_empty());

        // Both loaded capabilities plus the discovery set are exposed.
        assert_eq!(manager.effective_capabilities("s1").len(), 3);
    }

    #[test]
    fn test_unknown_group_yields_empty_not_error() {
        let manager = manager_with(600, 60);
        let added = manager.load_group("s1", "payroll", &reader()).unwrap();
        assert!(added.is_empty());
    }

    #[test]
    fn test_group_prefix_does_not_match_sibling_names() {
        assert!(matches_group("teams.member.ADD", "teams"));
        assert!(matches_group("teams.member.ADD", "teams.member"));
        assert!(!matches_group("teamsters.x.Y", "teams"));
        assert!(matches_group("teams", "teams"));
    }

    #[test]
    fn test_permission_filter_applies_on_load() {
        let manager = manager_with(600, 60);
        let unscoped = Principal::new("u2", vec!["teams.read".to_string()]);

        let added = manager.load_group("s1", "admin", &unscoped).unwrap();
        assert!(added.is_empty());

        // Even explicitly requesting the group never exposes it.
        let names: Vec<_> = manager
            .effective_capabilities("s1")
            .iter()
            .map(|c| c.descriptor().name.clone())
            .collect();
        assert!(!names.contains(&"admin.tenant.PURGE".to_string()));
    }

    #[test]
    fn test_scope_override_set_and_clear() {
        let manager = manager_with(600, 60);
        assert!(manager.scope_override("s1").is_none());

        manager.set_scope_override("s1", Some("tenant-9".to_string()));
        assert_eq!(manager.scope_override("s1").as_deref(), Some("tenant-9"));

        manager.set_scope_override("s1", None);
        assert!(manager.scope_override("s1").is_none());
    }

    #[test]
    fn test_expired_session_starts_over_seeded() {
        // Zero TTL: every access finds the previous session expired.
        let manager = manager_with(0, 0);
        let added = manager.load_group("s1", "teams", &reader()).unwrap();
        assert_eq!(added.len(), 2);

        let names: Vec<_> = manager
            .effective_capabilities("s1")
            .iter()
            .map(|c| c.descriptor().name.clone())
            .collect();
        assert_eq!(names, vec!["platform.groups.LOAD"]);
    }

    #[test]
    fn test_expiry_warning_inside_threshold() {
        // Warning threshold covers the whole window, so any live session
        // reports a warning.
        let manager = manager_with(600, 600);
        manager.effective_capabilities("s1");
        let remaining = manager.expiry_warning("s1").unwrap();
        assert!(remaining <= Duration::from_secs(600));

        // A narrow threshold on a fresh session stays quiet.
        let quiet = manager_with(600, 5);
        quiet.effective_capabilities("s2");
        assert!(quiet.expiry_warning("s2").is_none());
    }

    #[test]
    fn test_purge_and_end_session() {
        let manager = manager_with(0, 0);
        manager.effective_capabilities("s1");
        manager.effective_capabilities("s2");
        assert_eq!(manager.session_count(), 2);
        assert_eq!(manager.purge_expired(), 2);
        assert_eq!(manager.session_count(), 0);

        let live = manager_with(600, 60);
        live.effective_capabilities("s3");
        live.end_session("s3");
        assert_eq!(live.session_count(), 0);
    }

    #[test]
    fn test_sessions_are_independent() {
        let manager = manager_with(600, 60);
        manager.load_group("s1", "teams", &reader()).unwrap();

        let other: Vec<_> = manager
            .effective_capabilities("s2")
            .iter()
            .map(|c| c.descriptor().name.clone())
            .collect();
        assert_eq!(other, vec!["platform.groups.LOAD"]);
    }
}
