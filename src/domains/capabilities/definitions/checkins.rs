//! Check-in capabilities.
//!
//! Daily mood check-ins recorded against a team. Submission requires
//! `checkins.write`, reading back requires `checkins.read`; the group's
//! downstream service is `checkins-db`.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::JsonObject;
use serde_json::{Value, json};

use super::teams::require_str;
use crate::domains::capabilities::{
    Capability, CapabilityDescriptor, CapabilityError, CallContext, FieldKind, FieldSpec, ParamSpec,
};

const SERVICE: &str = "checkins-db";

#[derive(Debug, Clone)]
struct CheckinEntry {
    id: u64,
    team_id: String,
    author: String,
    mood: String,
    note: Option<String>,
    tenant: Option<String>,
}

/// In-memory check-in log shared by the group's capabilities.
pub struct CheckinLog {
    entries: RwLock<Vec<CheckinEntry>>,
    next_id: AtomicU64,
}

impl CheckinLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Remove every entry recorded under a tenant.
    pub fn purge_tenant(&self, tenant: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|entry| entry.tenant.as_deref() != Some(tenant));
        before - entries.len()
    }

    /// Total number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for CheckinLog {
    fn default() -> Self {
        Self::new()
    }
}

/// The group's capabilities over a shared log.
pub fn capabilities(log: Arc<CheckinLog>) -> Vec<Arc<dyn Capability>> {
    vec![
        Arc::new(SubmitCheckin::new(log.clone())),
        Arc::new(ListCheckins::new(log)),
    ]
}

fn entry_json(entry: &CheckinEntry) -> Value {
    json!({
        "id": entry.id,
        "team_id": entry.team_id,
        "author": entry.author,
        "mood": entry.mood,
        "note": entry.note,
    })
}

// ============================================================================
// checkins.entry.SUBMIT
// ============================================================================

struct SubmitCheckin {
    descriptor: CapabilityDescriptor,
    log: Arc<CheckinLog>,
}

impl SubmitCheckin {
    fn new(log: Arc<CheckinLog>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "checkins.entry.SUBMIT",
                "Record a mood check-in for a team",
            )
            .with_params(
                ParamSpec::empty()
                    .field(FieldSpec::required(
                        "team_id",
                        "Team the check-in belongs to",
                        FieldKind::string_bounded(1, 64),
                    ))
                    .field(FieldSpec::required(
                        "mood",
                        "How things are going",
                        FieldKind::string_enum(&["great", "good", "okay", "low"]),
                    ))
                    .field(FieldSpec::optional(
                        "note",
                        "Free-form note",
                        FieldKind::string_bounded(1, 500),
                    )),
            )
            .with_scope("checkins.write")
            .with_service(SERVICE),
            log,
        }
    }
}

#[async_trait]
impl Capability for SubmitCheckin {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError> {
        let entry = CheckinEntry {
            id: self.log.next_id.fetch_add(1, Ordering::SeqCst),
            team_id: require_str(args, "team_id")?.to_string(),
            author: ctx.principal.id.clone(),
            mood: require_str(args, "mood")?.to_string(),
            note: args.get("note").and_then(Value::as_str).map(str::to_string),
            tenant: ctx.scope.clone(),
        };

        let payload = entry_json(&entry);
        self.log
            .entries
            .write()
            .map_err(|_| CapabilityError::internal("check-in log lock poisoned"))?
            .push(entry);
        Ok(payload)
    }
}

// ============================================================================
// checkins.entry.LIST
// ============================================================================

struct ListCheckins {
    descriptor: CapabilityDescriptor,
    log: Arc<CheckinLog>,
}

impl ListCheckins {
    fn new(log: Arc<CheckinLog>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "checkins.entry.LIST",
                "List recent check-ins, newest first",
            )
            .with_params(
                ParamSpec::empty()
                    .field(FieldSpec::optional(
                        "team_id",
                        "Only entries for this team",
                        FieldKind::string_bounded(1, 64),
                    ))
                    .field(
                        FieldSpec::required(
                            "limit",
                            "Maximum entries to return",
                            FieldKind::integer_range(1, 100),
                        )
                        .with_default(json!(25)),
                    ),
            )
            .with_scope("checkins.read")
            .with_service(SERVICE)
            .idempotent(),
            log,
        }
    }
}

#[async_trait]
impl Capability for ListCheckins {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError> {
        let team_id = args.get("team_id").and_then(Value::as_str);
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(25) as usize;

        let entries = self
            .log
            .entries
            .read()
            .map_err(|_| CapabilityError::internal("check-in log lock poisoned"))?;

        let listed: Vec<Value> = entries
            .iter()
            .rev()
            .filter(|entry| ctx.scope.is_none() || entry.tenant == ctx.scope)
            .filter(|entry| team_id.is_none_or(|t| entry.team_id == t))
            .take(limit)
            .map(entry_json)
            .collect();

        Ok(json!({ "entries": listed }))
    }
}
