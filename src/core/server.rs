//! MCP server implementation and lifecycle management.
//!
//! The `GatewayServer` is the protocol adapter: it resolves callers to
//! principals and session keys, exposes each session's effective
//! capability set as MCP tools and routes `tools/call` through the
//! validation, permission and resilience stages. Every response body is
//! the normalized envelope (`{ok, data|error, meta}`) serialized as text
//! content, so clients see one shape regardless of outcome.
//!
//! ## Capability Architecture
//!
//! Capabilities are defined in `domains/capabilities/definitions/` with
//! one file per group and registered through the manifest. The adapter
//! never knows concrete capabilities; adding one does NOT require
//! modifying this file.

use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler, model::*, service::RequestContext,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::auth;
use super::config::Config;
use crate::domains::capabilities::{
    CallContext, CallResult, CapabilityRegistry, Principal, definitions, permission, to_tool,
    validate,
};
use crate::domains::resilience::{ResiliencePipeline, RetryPolicy};
#[cfg(feature = "http")]
use crate::domains::sessions::SessionError;
use crate::domains::sessions::SessionManager;

/// Reserved argument carrying the caller's idempotency key. Stripped
/// before validation so capability schemas never see it.
const IDEMPOTENCY_KEY_ARG: &str = "_idempotency_key";

/// The main MCP server handler.
///
/// Implements the `ServerHandler` trait from rmcp and coordinates the
/// registry, session manager and resilience pipeline.
#[derive(Clone)]
pub struct GatewayServer {
    /// Server configuration.
    config: Arc<Config>,

    /// Process-wide capability catalog.
    registry: Arc<CapabilityRegistry>,

    /// Per-session capability state.
    sessions: Arc<SessionManager>,

    /// Execution pipeline (idempotency, breakers, timeout, retry).
    pipeline: Arc<ResiliencePipeline>,
}

impl GatewayServer {
    /// Create a new gateway server with the given configuration.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let registry = Arc::new(CapabilityRegistry::new(
            config.registry.clone(),
            definitions::manifest(),
        ));
        let sessions = Arc::new(SessionManager::new(config.session.clone(), registry.clone()));
        sessions.install_discovery_set(definitions::discovery_set(
            sessions.clone(),
            registry.clone(),
        ));

        let pipeline = Arc::new(ResiliencePipeline::new(
            config.circuit_breaker.clone(),
            RetryPolicy::from_settings(&config.retry),
            Duration::from_secs(config.idempotency.record_ttl_secs),
            Duration::from_millis(config.execution.timeout_ms),
        ));

        Self {
            config,
            registry,
            sessions,
            pipeline,
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.server.name
    }

    /// Get the server version.
    pub fn version(&self) -> &str {
        &self.config.server.version
    }

    /// Get the server configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Get the session manager (for the background sweeper).
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Get the resilience pipeline (for the background sweeper).
    pub fn pipeline(&self) -> &Arc<ResiliencePipeline> {
        &self.pipeline
    }

    // ========================================================================
    // Caller Resolution
    // ========================================================================

    /// The caller assumed for connection-oriented transports with no
    /// per-request credentials (stdio, tcp).
    pub fn local_caller(&self) -> (Principal, String) {
        let principal = auth::default_principal(&self.config.auth);
        let key = auth::session_key(&principal);
        (principal, key)
    }

    /// Resolve an HTTP caller from request headers.
    ///
    /// A bearer token wins; without one an explicit session header pins
    /// the key for the default principal. Neither means the session is
    /// unresolvable and the request is rejected, never silently given a
    /// fresh throwaway session.
    #[cfg(feature = "http")]
    pub fn resolve_http_caller(
        &self,
        bearer: Option<&str>,
        session_header: Option<&str>,
    ) -> Result<(Principal, String), SessionError> {
        if let Some(token) = bearer {
            let principal = auth::principal_from_bearer(token, &self.config.auth).map_err(|e| {
                warn!("Bearer token rejected: {}", e);
                SessionError::unresolvable(e.to_string())
            })?;
            let key = auth::session_key(&principal);
            return Ok((principal, key));
        }

        if let Some(session) = session_header {
            let principal = auth::default_principal(&self.config.auth);
            return Ok((principal, format!("sess-{}", session)));
        }

        Err(SessionError::unresolvable(
            "no bearer token or session header on the request",
        ))
    }

    // ========================================================================
    // Protocol Operations
    // ========================================================================

    /// The session's effective capability set as MCP tools, with
    /// constraint-enriched schemas.
    pub fn tools_for(&self, session_key: &str) -> Vec<Tool> {
        self.sessions
            .effective_capabilities(session_key)
            .iter()
            .map(|c| to_tool(c.as_ref()))
            .collect()
    }

    /// Route one capability call through validation, permission and the
    /// resilience pipeline.
    ///
    /// Returns the call result plus whether the session's tool list
    /// changed (the adapter then signals `listChanged`).
    pub async fn dispatch(
        &self,
        principal: &Principal,
        session_key: &str,
        name: &str,
        mut arguments: JsonObject,
    ) -> (CallResult, bool) {
        // Evaluated before any touch resets the sliding window.
        let expiry_warning = self.sessions.expiry_warning(session_key);

        let result = self
            .dispatch_inner(principal, session_key, name, &mut arguments)
            .await;

        let list_changed = matches!(
            &result,
            CallResult::Success { data, .. } if data.get("list_changed") == Some(&serde_json::Value::Bool(true))
        );

        let result = match expiry_warning {
            Some(remaining) => result.with_metadata(
                "session_expiry_warning_secs",
                remaining.as_secs().to_string(),
            ),
            None => result,
        };

        (result, list_changed)
    }

    async fn dispatch_inner(
        &self,
        principal: &Principal,
        session_key: &str,
        name: &str,
        arguments: &mut JsonObject,
    ) -> CallResult {
        let Some(capability) = self.sessions.find_exposed(session_key, name) else {
            return CallResult::failure(
                format!("capability '{}' is not available in this session", name),
                "NOT_FOUND",
            );
        };
        let descriptor = capability.descriptor().clone();

        // The discovery set is exempt from the fail-closed filter; every
        // registered capability must pass it.
        let is_discovery = self
            .sessions
            .discovery_set()
            .iter()
            .any(|c| c.descriptor().name == descriptor.name);
        if !is_discovery && !permission::is_allowed(capability.as_ref(), principal) {
            warn!(
                "Principal '{}' denied on '{}' (requires {:?})",
                principal.id, descriptor.name, descriptor.required_scope
            );
            return CallResult::failure(
                format!("caller lacks the scope required by '{}'", descriptor.name),
                "PERMISSION_DENIED",
            );
        }

        // The idempotency key rides alongside the business arguments and
        // is stripped before validation.
        let idempotency_key = arguments
            .remove(IDEMPOTENCY_KEY_ARG)
            .and_then(|v| v.as_str().map(str::to_string));

        let validated = match validate(&descriptor.params, arguments) {
            Ok(validated) => validated,
            Err(violations) => {
                let message = violations
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                return CallResult::failure(message, "VALIDATION_ERROR")
                    .with_metadata("violations", violations.len().to_string());
            }
        };

        let ctx = CallContext::new(principal.clone(), session_key)
            .with_scope(self.sessions.scope_override(session_key));

        self.pipeline
            .invoke(&capability, &validated, &ctx, idempotency_key.as_deref())
            .await
    }
}

impl ServerHandler for GatewayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Tool discovery gateway. Start with platform.session.WHOAMI and \
                 platform.groups.LIST, then platform.groups.LOAD to expand the \
                 session with the capability groups you need."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    #[instrument(skip(self, _context))]
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let (_, session_key) = self.local_caller();
        let tools = self.tools_for(&session_key);
        info!("Listing {} tools for session {}", tools.len(), session_key);
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
            meta: None,
        })
    }

    #[instrument(skip(self, context, request), fields(tool = %request.name))]
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let (principal, session_key) = self.local_caller();
        let arguments = request.arguments.clone().unwrap_or_default();

        let (result, list_changed) = self
            .dispatch(&principal, &session_key, &request.name, arguments)
            .await;

        if list_changed {
            // Best effort: a lost notification only delays rediscovery.
            if let Err(e) = context.peer.notify_tool_list_changed().await {
                warn!("Failed to notify tool list change: {}", e);
            }
        }

        let envelope = result.to_envelope().to_string();
        Ok(if result.is_success() {
            CallToolResult::success(vec![Content::text(envelope)])
        } else {
            CallToolResult::error(vec![Content::text(envelope)])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server() -> GatewayServer {
        GatewayServer::new(Config::default())
    }

    fn args(pairs: &[(&str, serde_json::Value)]) -> JsonObject {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_fresh_session_lists_discovery_set_only() {
        let server = server();
        let (_, key) = server.local_caller();
        let names: Vec<_> = server
            .tools_for(&key)
            .iter()
            .map(|t| t.name.to_string())
            .collect();

        assert_eq!(names.len(), 5);
        assert!(names.contains(&"platform.groups.LOAD".to_string()));
        assert!(!names.iter().any(|n| n.starts_with("teams.")));
    }

    #[tokio::test]
    async fn test_load_group_expands_tool_list_and_signals() {
        let server = server();
        let (principal, key) = server.local_caller();

        let (result, list_changed) = server
            .dispatch(&principal, &key, "platform.groups.LOAD", args(&[("group", json!("teams"))]))
            .await;
        assert!(result.is_success());
        assert!(list_changed);
        assert_eq!(server.tools_for(&key).len(), 9);

        // Loading again changes nothing and does not signal.
        let (_, again) = server
            .dispatch(&principal, &key, "platform.groups.LOAD", args(&[("group", json!("teams"))]))
            .await;
        assert!(!again);
    }

    #[tokio::test]
    async fn test_unloaded_capability_is_not_found() {
        let server = server();
        let (principal, key) = server.local_caller();

        let (result, _) = server
            .dispatch(&principal, &key, "teams.team.LIST", JsonObject::new())
            .await;
        match result {
            CallResult::Failure { code, .. } => assert_eq!(code, "NOT_FOUND"),
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_validation_failure_reports_all_violations() {
        let server = server();
        let (principal, key) = server.local_caller();
        server
            .dispatch(&principal, &key, "platform.groups.LOAD", args(&[("group", json!("checkins"))]))
            .await;

        // Missing team_id and an out-of-enum mood: both reported at once.
        let (result, _) = server
            .dispatch(
                &principal,
                &key,
                "checkins.entry.SUBMIT",
                args(&[("mood", json!("ecstatic"))]),
            )
            .await;
        match result {
            CallResult::Failure { code, metadata, .. } => {
                assert_eq!(code, "VALIDATION_ERROR");
                assert_eq!(metadata.get("violations").map(String::as_str), Some("2"));
            }
            _ => panic!("expected validation failure"),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_call_through_pipeline() {
        let server = server();
        let (principal, key) = server.local_caller();
        server
            .dispatch(&principal, &key, "platform.groups.LOAD", args(&[("group", json!("teams"))]))
            .await;

        let (result, _) = server
            .dispatch(&principal, &key, "teams.team.LIST", JsonObject::new())
            .await;
        assert!(result.is_success());
        assert_eq!(result.metadata().get("attempts").map(String::as_str), Some("1"));
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_caller_without_credentials_is_unresolvable() {
        let server = server();
        assert!(server.resolve_http_caller(None, None).is_err());
        assert!(server.resolve_http_caller(None, Some("abc")).is_ok());
    }
}
