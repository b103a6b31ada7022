//! Capability Registry - process-wide catalog of registered capabilities.
//!
//! The registry is populated lazily on first use by a manifest function
//! (the explicit registration step executed in lieu of any runtime
//! scanning) and cached for a configurable TTL. Lookups afterwards are
//! read-mostly: a shared read lock over an immutable catalog snapshot.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::capability::Capability;
use super::error::CapabilityError;
use crate::core::config::RegistryConfig;

/// The manifest: builds every registrable capability. Runs at most once
/// per cache window.
pub type ManifestFn = dyn Fn() -> Vec<Arc<dyn Capability>> + Send + Sync;

/// Loaded catalog snapshot: insertion-ordered list plus name index.
struct Catalog {
    ordered: Vec<Arc<dyn Capability>>,
    by_name: HashMap<String, Arc<dyn Capability>>,
    loaded_at: Instant,
}

impl Catalog {
    fn empty() -> Self {
        Self {
            ordered: Vec::new(),
            by_name: HashMap::new(),
            loaded_at: Instant::now(),
        }
    }

    fn insert(&mut self, capability: Arc<dyn Capability>) -> Result<(), CapabilityError> {
        let name = capability.descriptor().name.clone();
        if self.by_name.contains_key(&name) {
            return Err(CapabilityError::DuplicateName(name));
        }
        self.by_name.insert(name, capability.clone());
        self.ordered.push(capability);
        Ok(())
    }
}

/// Process-wide capability catalog.
pub struct CapabilityRegistry {
    catalog: RwLock<Option<Catalog>>,
    manifest: Box<ManifestFn>,
    cache_enabled: bool,
    cache_ttl: Duration,
}

impl CapabilityRegistry {
    /// Create a registry backed by the given manifest function.
    pub fn new<F>(config: RegistryConfig, manifest: F) -> Self
    where
        F: Fn() -> Vec<Arc<dyn Capability>> + Send + Sync + 'static,
    {
        Self {
            catalog: RwLock::new(None),
            manifest: Box::new(manifest),
            cache_enabled: config.cache_enabled,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
        }
    }

    /// Ensure the catalog is populated and within its cache window.
    pub fn ensure_loaded(&self) -> Result<(), CapabilityError> {
        if self.is_fresh() {
            return Ok(());
        }

        // Build outside the lock; the manifest can be arbitrarily slow.
        let capabilities = (self.manifest)();

        let mut catalog = Catalog::empty();
        for capability in capabilities {
            catalog.insert(capability)?;
        }
        info!("Capability registry loaded: {} capabilities", catalog.ordered.len());

        let mut guard = self
            .catalog
            .write()
            .map_err(|_| CapabilityError::internal("registry lock poisoned"))?;
        // A concurrent loader may have won the race; last write is
        // equivalent since the manifest is deterministic.
        *guard = Some(catalog);
        Ok(())
    }

    fn is_fresh(&self) -> bool {
        let guard = match self.catalog.read() {
            Ok(g) => g,
            Err(_) => return false,
        };
        match guard.as_ref() {
            Some(catalog) => self.cache_enabled && catalog.loaded_at.elapsed() < self.cache_ttl,
            None => false,
        }
    }

    /// Register a single capability. Fails if the name already exists.
    pub fn register(&self, capability: Arc<dyn Capability>) -> Result<(), CapabilityError> {
        self.ensure_loaded()?;
        let mut guard = self
            .catalog
            .write()
            .map_err(|_| CapabilityError::internal("registry lock poisoned"))?;
        let catalog = guard.get_or_insert_with(Catalog::empty);
        debug!("Registering capability: {}", capability.descriptor().name);
        catalog.insert(capability)
    }

    /// Look up a capability by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Capability>, CapabilityError> {
        self.ensure_loaded()?;
        let guard = self
            .catalog
            .read()
            .map_err(|_| CapabilityError::internal("registry lock poisoned"))?;
        guard
            .as_ref()
            .and_then(|c| c.by_name.get(name).cloned())
            .ok_or_else(|| CapabilityError::not_found(name))
    }

    /// All registered capabilities in registration order.
    pub fn all(&self) -> Result<Vec<Arc<dyn Capability>>, CapabilityError> {
        self.ensure_loaded()?;
        let guard = self
            .catalog
            .read()
            .map_err(|_| CapabilityError::internal("registry lock poisoned"))?;
        Ok(guard.as_ref().map(|c| c.ordered.clone()).unwrap_or_default())
    }

    /// Distinct capability groups in first-registration order.
    pub fn groups(&self) -> Result<Vec<String>, CapabilityError> {
        let mut groups: Vec<String> = Vec::new();
        for capability in self.all()? {
            let group = capability.descriptor().group().to_string();
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::capabilities::capability::CapabilityDescriptor;
    use crate::domains::capabilities::context::CallContext;
    use async_trait::async_trait;
    use rmcp::model::JsonObject;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    fn stub(name: &str) -> Arc<dyn Capability> {
        Arc::new(StubCapability {
            descriptor: CapabilityDescriptor::new(name, "stub").with_scope("test"),
        })
    }

    fn test_registry(names: &'static [&'static str]) -> CapabilityRegistry {
        CapabilityRegistry::new(RegistryConfig::default(), move || {
            names.iter().map(|n| stub(n)).collect()
        })
    }

    #[test]
    fn test_get_and_not_found() {
        let registry = test_registry(&["teams.team.LIST", "checkins.entry.LIST"]);

        assert!(registry.get("teams.team.LIST").is_ok());
        assert!(matches!(
            registry.get("nope"),
            Err(CapabilityError::NotFound(_))
        ));
    }

    #[test]
    fn test_all_preserves_registration_order() {
        let registry = test_registry(&["b.x.ONE", "a.y.TWO", "c.z.THREE"]);
        let names: Vec<_> = registry
            .all()
            .unwrap()
            .iter()
            .map(|c| c.descriptor().name.clone())
            .collect();
        assert_eq!(names, vec!["b.x.ONE", "a.y.TWO", "c.z.THREE"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = test_registry(&["teams.team.LIST"]);
        let err = registry.register(stub("teams.team.LIST")).unwrap_err();
        assert!(matches!(err, CapabilityError::DuplicateName(_)));
    }

    #[test]
    fn test_duplicate_in_manifest_fails_load() {
        let registry = test_registry(&["dup.a.B", "dup.a.B"]);
        assert!(matches!(
            registry.ensure_loaded(),
            Err(CapabilityError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_manifest_runs_once_within_cache_window() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let registry = CapabilityRegistry::new(RegistryConfig::default(), || {
            CALLS.fetch_add(1, Ordering::SeqCst);
            vec![stub("g.r.V")]
        });

        registry.ensure_loaded().unwrap();
        registry.ensure_loaded().unwrap();
        let _ = registry.all().unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let registry = test_registry(&["teams.team.LIST", "checkins.entry.LIST", "teams.member.ADD"]);
        assert_eq!(registry.groups().unwrap(), vec!["teams", "checkins"]);
    }
}
