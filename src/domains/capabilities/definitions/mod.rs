//! Concrete capability definitions, one file per group.
//!
//! `manifest` is the explicit registration step: it constructs the shared
//! in-memory stores, wires each group's capabilities over them and hands
//! the flat list to the registry. `discovery_set` builds the five fixed
//! platform capabilities; they live outside the registry and are installed
//! directly into the session manager.

use std::sync::Arc;

use super::{Capability, CapabilityRegistry};
use crate::domains::sessions::SessionManager;

pub mod admin;
pub mod checkins;
pub mod communications;
pub mod discovery;
pub mod teams;

/// Build the manifest function passed to the registry.
///
/// The shared stores are constructed once, here; the returned closure
/// only re-wires capabilities over them, so a registry cache refresh
/// keeps every mutation made through earlier generations.
pub fn manifest() -> impl Fn() -> Vec<Arc<dyn Capability>> + Send + Sync {
    let directory = Arc::new(teams::TeamDirectory::with_demo_data());
    let checkin_log = Arc::new(checkins::CheckinLog::new());
    let outbox = Arc::new(communications::Outbox::new());

    move || {
        let mut capabilities = teams::capabilities(directory.clone());
        capabilities.extend(checkins::capabilities(checkin_log.clone()));
        capabilities.extend(communications::capabilities(outbox.clone()));
        capabilities.extend(admin::capabilities(directory.clone(), checkin_log.clone()));
        capabilities
    }
}

/// Build the fixed discovery set over the live manager and registry.
pub fn discovery_set(
    manager: Arc<SessionManager>,
    registry: Arc<CapabilityRegistry>,
) -> Vec<Arc<dyn Capability>> {
    discovery::discovery_set(manager, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::capabilities::{CallContext, Principal};
    use rmcp::model::JsonObject;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_manifest_names_are_unique_and_namespaced() {
        let capabilities = manifest()();
        let mut seen = HashSet::new();
        for capability in &capabilities {
            let descriptor = capability.descriptor();
            assert!(seen.insert(descriptor.name.clone()), "duplicate {}", descriptor.name);
            assert_eq!(descriptor.name.split('.').count(), 3, "{}", descriptor.name);
            assert!(descriptor.required_scope.is_some(), "{} has no scope", descriptor.name);
        }
        assert_eq!(capabilities.len(), 10);
    }

    #[tokio::test]
    async fn test_reloaded_manifest_keeps_store_mutations() {
        let build = manifest();
        let ctx = CallContext::new(
            Principal::new("u1", vec!["teams.read".to_string(), "teams.write".to_string()])
                .with_tenant("acme"),
            "s1",
        );

        let find = |caps: &[Arc<dyn Capability>], name: &str| {
            caps.iter()
                .find(|c| c.descriptor().name == name)
                .cloned()
                .unwrap()
        };

        let gen1 = build();
        let mut args = JsonObject::new();
        args.insert("team_id".to_string(), json!("t-support"));
        args.insert("member".to_string(), json!("ada"));
        find(&gen1, "teams.member.ADD")
            .execute(&args, &ctx)
            .await
            .unwrap();

        // A second generation (registry cache refresh) sees the mutation.
        let gen2 = build();
        let mut args = JsonObject::new();
        args.insert("team_id".to_string(), json!("t-support"));
        let team = find(&gen2, "teams.team.GET")
            .execute(&args, &ctx)
            .await
            .unwrap();
        assert_eq!(team["members"], json!(["linus", "ada"]));
    }
}
