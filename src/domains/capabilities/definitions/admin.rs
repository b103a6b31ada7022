//! Administrative capabilities.
//!
//! Gated behind the coarse `admin` scope. EXPORT dumps the demo stores,
//! PURGE drops everything a tenant owns across them.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::JsonObject;
use serde_json::{Value, json};

use super::checkins::CheckinLog;
use super::teams::{TeamDirectory, require_str};
use crate::domains::capabilities::{
    Capability, CapabilityDescriptor, CapabilityError, CallContext, FieldKind, FieldSpec, ParamSpec,
};

/// The group's capabilities over the shared stores.
pub fn capabilities(
    directory: Arc<TeamDirectory>,
    checkins: Arc<CheckinLog>,
) -> Vec<Arc<dyn Capability>> {
    vec![
        Arc::new(ExportDirectory::new(directory.clone())),
        Arc::new(PurgeTenant::new(directory, checkins)),
    ]
}

// ============================================================================
// admin.directory.EXPORT
// ============================================================================

struct ExportDirectory {
    descriptor: CapabilityDescriptor,
    directory: Arc<TeamDirectory>,
}

impl ExportDirectory {
    fn new(directory: Arc<TeamDirectory>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "admin.directory.EXPORT",
                "Dump the full team directory across all tenants",
            )
            .with_scope("admin")
            .with_service("directory-db")
            .idempotent(),
            directory,
        }
    }
}

#[async_trait]
impl Capability for ExportDirectory {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _args: &JsonObject, _ctx: &CallContext) -> Result<Value, CapabilityError> {
        let teams: Vec<Value> = self
            .directory
            .snapshot()
            .iter()
            .map(|team| {
                json!({
                    "id": team.id,
                    "name": team.name,
                    "tenant": team.tenant,
                    "members": team.members,
                })
            })
            .collect();
        Ok(json!({ "teams": teams }))
    }
}

// ============================================================================
// admin.tenant.PURGE
// ============================================================================

struct PurgeTenant {
    descriptor: CapabilityDescriptor,
    directory: Arc<TeamDirectory>,
    checkins: Arc<CheckinLog>,
}

impl PurgeTenant {
    fn new(directory: Arc<TeamDirectory>, checkins: Arc<CheckinLog>) -> Self {
        Self {
            // Purging twice leaves the same end state, so repeats are safe.
            descriptor: CapabilityDescriptor::new(
                "admin.tenant.PURGE",
                "Delete every record a tenant owns",
            )
            .with_params(ParamSpec::empty().field(FieldSpec::required(
                "tenant",
                "Tenant to purge",
                FieldKind::string_bounded(1, 80),
            )))
            .with_scope("admin")
            .with_service("directory-db")
            .idempotent(),
            directory,
            checkins,
        }
    }
}

#[async_trait]
impl Capability for PurgeTenant {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: &JsonObject, _ctx: &CallContext) -> Result<Value, CapabilityError> {
        let tenant = require_str(args, "tenant")?;
        let teams = self.directory.purge_tenant(tenant);
        let checkins = self.checkins.purge_tenant(tenant);
        Ok(json!({
            "tenant": tenant,
            "teams_removed": teams,
            "checkins_removed": checkins,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::capabilities::Principal;

    fn ctx() -> CallContext {
        CallContext::new(Principal::new("root", vec!["admin".to_string()]), "s1")
    }

    #[tokio::test]
    async fn test_export_spans_tenants() {
        let caps = capabilities(
            Arc::new(TeamDirectory::with_demo_data()),
            Arc::new(CheckinLog::new()),
        );

        let data = caps[0].execute(&JsonObject::new(), &ctx()).await.unwrap();
        let teams = data["teams"].as_array().unwrap();
        assert_eq!(teams.len(), 3);
    }

    #[tokio::test]
    async fn test_purge_is_repeatable() {
        let directory = Arc::new(TeamDirectory::with_demo_data());
        let caps = capabilities(directory.clone(), Arc::new(CheckinLog::new()));

        let mut args = JsonObject::new();
        args.insert("tenant".to_string(), json!("acme"));

        let first = caps[1].execute(&args, &ctx()).await.unwrap();
        assert_eq!(first["teams_removed"], json!(2));

        let second = caps[1].execute(&args, &ctx()).await.unwrap();
        assert_eq!(second["teams_removed"], json!(0));
        assert_eq!(directory.snapshot().len(), 1);
    }
}
