//! The capability abstraction.
//!
//! A capability is an immutable descriptor (name, description, parameter
//! schema, policy metadata) plus an executable behavior. Concrete
//! capabilities live in `definitions/` (one file per group) and are
//! registered through the manifest at startup; nothing is discovered by
//! reflection.

use async_trait::async_trait;
use rmcp::model::{JsonObject, Tool};
use serde_json::Value;

use super::context::CallContext;
use super::error::CapabilityError;
use super::schema::{ParamSpec, input_schema};

// ============================================================================
// Descriptor
// ============================================================================

/// Immutable description of a capability. Built once at registration time.
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    /// Unique namespaced name, `group.resource.VERB`
    /// (e.g. `teams.member.ADD`).
    pub name: String,

    /// Description shown to clients.
    pub description: String,

    /// Parameter schema used for validation and wire conversion.
    pub params: ParamSpec,

    /// Scope the caller must hold. `None` means the capability carries no
    /// scope declaration and is denied by the permission filter
    /// (fail-closed); only the fixed discovery set is exempt.
    pub required_scope: Option<String>,

    /// Name of the downstream dependency this capability talks to. The
    /// circuit breaker isolates failures per service, not globally.
    pub service: String,

    /// Whether repeated execution with the same arguments is safe. The
    /// pipeline refuses to retry non-idempotent capabilities unless the
    /// call carries an idempotency key.
    pub idempotent: bool,
}

impl CapabilityDescriptor {
    /// Create a descriptor with the given name and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: ParamSpec::empty(),
            required_scope: None,
            service: "internal".to_string(),
            idempotent: false,
        }
    }

    /// Builder: set the parameter schema.
    pub fn with_params(mut self, params: ParamSpec) -> Self {
        self.params = params;
        self
    }

    /// Builder: declare the required scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.required_scope = Some(scope.into());
        self
    }

    /// Builder: declare the downstream service name.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Builder: mark the capability as safely repeatable.
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// The capability group: the leading segment of the namespaced name.
    pub fn group(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }
}

// ============================================================================
// Capability Trait
// ============================================================================

/// An executable capability.
///
/// `execute` receives arguments already normalized by the validation stage
/// and returns the structured success payload; failures are classified by
/// the implementation into the transient/permanent taxonomy so the
/// resilience pipeline can decide whether to retry.
#[async_trait]
pub trait Capability: Send + Sync {
    /// The immutable descriptor for this capability.
    fn descriptor(&self) -> &CapabilityDescriptor;

    /// Execute with validated arguments and a resolved call context.
    async fn execute(&self, args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError>;
}

/// Convert a capability's descriptor into the MCP `Tool` model.
pub fn to_tool(capability: &dyn Capability) -> Tool {
    let descriptor = capability.descriptor();
    Tool {
        name: descriptor.name.clone().into(),
        description: Some(descriptor.description.clone().into()),
        input_schema: input_schema(&descriptor.params),
        annotations: None,
        output_schema: None,
        icons: None,
        meta: None,
        title: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::capabilities::schema::{FieldKind, FieldSpec};

    struct EchoCapability {
        descriptor: CapabilityDescriptor,
    }

    #[async_trait]
    impl Capability for EchoCapability {
        fn descriptor(&self) -> &CapabilityDescriptor {
            &self.descriptor
        }

        async fn execute(
            &self,
            args: &JsonObject,
            _ctx: &CallContext,
        ) -> Result<Value, CapabilityError> {
            Ok(Value::Object(args.clone()))
        }
    }

    #[test]
    fn test_group_derivation() {
        let descriptor = CapabilityDescriptor::new("teams.member.ADD", "Add a member");
        assert_eq!(descriptor.group(), "teams");

        let flat = CapabilityDescriptor::new("plain", "No namespace");
        assert_eq!(flat.group(), "plain");
    }

    #[test]
    fn test_to_tool_carries_schema() {
        let capability = EchoCapability {
            descriptor: CapabilityDescriptor::new("demo.echo.RUN", "Echo the arguments")
                .with_scope("demo.read")
                .with_params(ParamSpec::empty().field(FieldSpec::required(
                    "text",
                    "Text to echo",
                    FieldKind::string(),
                ))),
        };

        let tool = to_tool(&capability);
        assert_eq!(tool.name.as_ref(), "demo.echo.RUN");
        assert!(tool.input_schema.contains_key("properties"));
    }

    #[test]
    fn test_descriptor_defaults_fail_closed() {
        let descriptor = CapabilityDescriptor::new("x.y.Z", "desc");
        assert!(descriptor.required_scope.is_none());
        assert!(!descriptor.idempotent);
    }
}
