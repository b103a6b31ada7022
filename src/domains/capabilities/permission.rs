//! Permission filtering.
//!
//! A pure function of the principal's granted scopes and each capability's
//! declared required scope. Capabilities without a scope declaration are
//! denied, not allowed: the filter fails closed so a forgotten annotation
//! can never expose a capability. The fixed discovery set is the only
//! exemption and never passes through this filter.

use std::sync::Arc;

use super::capability::Capability;
use super::context::Principal;

/// Whether the principal may see and call this capability.
pub fn is_allowed(capability: &dyn Capability, principal: &Principal) -> bool {
    match &capability.descriptor().required_scope {
        Some(scope) => principal.has_scope(scope),
        // Fail closed: no scope declaration means no access.
        None => false,
    }
}

/// Narrow a set of capabilities to those the principal may use.
pub fn filter(
    capabilities: &[Arc<dyn Capability>],
    principal: &Principal,
) -> Vec<Arc<dyn Capability>> {
    capabilities
        .iter()
        .filter(|c| is_allowed(c.as_ref(), principal))
        .cloned()
        .collect()
}
