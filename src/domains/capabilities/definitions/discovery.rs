//! The fixed discovery set.
//!
//! Five platform capabilities exposed to every session from the moment it
//! is seeded, never filtered by scope and never unloaded. They are the
//! protocol surface through which a client inspects its identity, browses
//! the capability groups it may load, adjusts its effective scope and
//! expands its session with `platform.groups.LOAD`.
//!
//! These capabilities are deliberately kept out of the registry: the
//! permission filter is fail-closed for everything registered, while the
//! discovery set must stay reachable even for a caller with no scopes at
//! all (otherwise no session could ever load anything).

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::JsonObject;
use serde_json::{Value, json};

use crate::domains::capabilities::{
    Capability, CapabilityDescriptor, CapabilityError, CapabilityRegistry, CallContext, FieldKind,
    FieldSpec, ParamSpec, permission,
};
use crate::domains::sessions::SessionManager;

/// Build the discovery set. Installed into the session manager once at
/// startup wiring.
pub fn discovery_set(
    manager: Arc<SessionManager>,
    registry: Arc<CapabilityRegistry>,
) -> Vec<Arc<dyn Capability>> {
    vec![
        Arc::new(WhoAmI::new(manager.clone())),
        Arc::new(ListGroups::new(manager.clone(), registry)),
        Arc::new(GetContext::new()),
        Arc::new(SetScope::new(manager.clone())),
        Arc::new(LoadGroup::new(manager)),
    ]
}

// ============================================================================
// platform.session.WHOAMI
// ============================================================================

/// Reports the caller's identity and the state of their session.
struct WhoAmI {
    descriptor: CapabilityDescriptor,
    manager: Arc<SessionManager>,
}

impl WhoAmI {
    fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "platform.session.WHOAMI",
                "Describe the authenticated caller and the current session state",
            )
            .idempotent(),
            manager,
        }
    }
}

#[async_trait]
impl Capability for WhoAmI {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError> {
        let info = self.manager.session_info(&ctx.session_key);
        Ok(json!({
            "principal": {
                "id": ctx.principal.id,
                "scopes": ctx.principal.scopes,
                "tenant": ctx.principal.tenant,
            },
            "session": {
                "key": info.session_key,
                "loaded": info.loaded,
                "scope_override": info.scope_override,
                "expires_in_secs": info.expires_in.as_secs(),
            },
        }))
    }
}

// ============================================================================
// platform.groups.LIST
// ============================================================================

/// Lists the capability groups the caller may load, with per-group counts
/// and whether the group is already present in the session.
struct ListGroups {
    descriptor: CapabilityDescriptor,
    manager: Arc<SessionManager>,
    registry: Arc<CapabilityRegistry>,
}

impl ListGroups {
    fn new(manager: Arc<SessionManager>, registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "platform.groups.LIST",
                "List the capability groups available to this caller",
            )
            .idempotent(),
            manager,
            registry,
        }
    }
}

#[async_trait]
impl Capability for ListGroups {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError> {
        let visible = permission::filter(&self.registry.all()?, &ctx.principal);
        let loaded = self.manager.session_info(&ctx.session_key).loaded;

        // Groups in first-seen registration order, with counts.
        let mut groups: Vec<(String, usize, bool)> = Vec::new();
        for capability in &visible {
            let descriptor = capability.descriptor();
            let group = descriptor.group().to_string();
            let in_session = loaded.contains(&descriptor.name);
            match groups.iter_mut().find(|(name, ..)| *name == group) {
                Some((_, count, any_loaded)) => {
                    *count += 1;
                    *any_loaded |= in_session;
                }
                None => groups.push((group, 1, in_session)),
            }
        }

        Ok(json!({
            "groups": groups
                .into_iter()
                .map(|(name, capabilities, loaded)| json!({
                    "name": name,
                    "capabilities": capabilities,
                    "loaded": loaded,
                }))
                .collect::<Vec<_>>(),
        }))
    }
}

// ============================================================================
// platform.context.GET
// ============================================================================

/// Reports the effective scope for the current call.
struct GetContext {
    descriptor: CapabilityDescriptor,
}

impl GetContext {
    fn new() -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "platform.context.GET",
                "Show the effective scope applied to calls in this session",
            )
            .idempotent(),
        }
    }
}

#[async_trait]
impl Capability for GetContext {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError> {
        // The context already carries the override-or-default resolution.
        Ok(json!({ "scope": ctx.scope }))
    }
}

// ============================================================================
// platform.context.SET_SCOPE
// ============================================================================

/// Sets or clears the session's scope override. Calling without a scope
/// argument clears the override back to the principal's default tenant.
struct SetScope {
    descriptor: CapabilityDescriptor,
    manager: Arc<SessionManager>,
}

impl SetScope {
    fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "platform.context.SET_SCOPE",
                "Override the session scope; omit the argument to clear the override",
            )
            .with_params(ParamSpec::empty().field(FieldSpec::optional(
                "scope",
                "Scope to apply to subsequent calls in this session",
                FieldKind::string_bounded(1, 80),
            )))
            .idempotent(),
            manager,
        }
    }
}

#[async_trait]
impl Capability for SetScope {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError> {
        let scope = args
            .get("scope")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.manager.set_scope_override(&ctx.session_key, scope.clone());
        Ok(json!({ "scope": scope }))
    }
}

// ============================================================================
// platform.groups.LOAD
// ============================================================================

/// Expands the session with every capability in the named group that the
/// caller's scopes allow. Loading an already-loaded or unknown group is a
/// successful no-op; the `list_changed` flag tells the adapter whether to
/// emit a tool-list-changed notification.
struct LoadGroup {
    descriptor: CapabilityDescriptor,
    manager: Arc<SessionManager>,
}

impl LoadGroup {
    fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "platform.groups.LOAD",
                "Load a capability group into this session",
            )
            .with_params(ParamSpec::empty().field(FieldSpec::required(
                "group",
                "Group name as reported by platform.groups.LIST",
                FieldKind::string_bounded(1, 80),
            )))
            .idempotent(),
            manager,
        }
    }
}

#[async_trait]
impl Capability for LoadGroup {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError> {
        let group = args
            .get("group")
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError::internal("validated arguments missing 'group'"))?;

        let added = self
            .manager
            .load_group(&ctx.session_key, group, &ctx.principal)?;

        Ok(json!({
            "group": group,
            "added": added,
            "list_changed": !added.is_empty(),
        }))
    }
}
