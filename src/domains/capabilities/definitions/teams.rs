//! Team directory capabilities.
//!
//! Backed by an in-memory directory seeded with demo data. Read
//! capabilities require `teams.read`, mutations require `teams.write`;
//! all of them declare `directory-db` as their downstream service so the
//! circuit breaker isolates directory failures from the other groups.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rmcp::model::JsonObject;
use serde_json::{Value, json};

use crate::domains::capabilities::{
    Capability, CapabilityDescriptor, CapabilityError, CallContext, FieldKind, FieldSpec, ParamSpec,
};

const SERVICE: &str = "directory-db";

/// A team record.
#[derive(Debug, Clone)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub tenant: String,
    pub members: Vec<String>,
}

/// In-memory team directory shared by the group's capabilities.
pub struct TeamDirectory {
    teams: RwLock<Vec<Team>>,
}

impl TeamDirectory {
    /// A directory seeded with demo teams across two tenants.
    pub fn with_demo_data() -> Self {
        Self {
            teams: RwLock::new(vec![
                Team {
                    id: "t-platform".to_string(),
                    name: "Platform".to_string(),
                    tenant: "acme".to_string(),
                    members: vec!["ada".to_string(), "grace".to_string()],
                },
                Team {
                    id: "t-support".to_string(),
                    name: "Support".to_string(),
                    tenant: "acme".to_string(),
                    members: vec!["linus".to_string()],
                },
                Team {
                    id: "t-research".to_string(),
                    name: "Research".to_string(),
                    tenant: "globex".to_string(),
                    members: vec!["alan".to_string(), "barbara".to_string()],
                },
            ]),
        }
    }

    fn visible<'a>(teams: &'a [Team], scope: Option<&str>) -> impl Iterator<Item = &'a Team> {
        teams
            .iter()
            .filter(move |team| scope.is_none_or(|s| team.tenant == s))
    }

    /// Remove every team belonging to a tenant. Returns how many went.
    pub fn purge_tenant(&self, tenant: &str) -> usize {
        let mut teams = self.teams.write().unwrap_or_else(|e| e.into_inner());
        let before = teams.len();
        teams.retain(|team| team.tenant != tenant);
        before - teams.len()
    }

    /// Snapshot of every team (admin export).
    pub fn snapshot(&self) -> Vec<Team> {
        self.teams
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// The group's capabilities over a shared directory.
pub fn capabilities(directory: Arc<TeamDirectory>) -> Vec<Arc<dyn Capability>> {
    vec![
        Arc::new(ListTeams::new(directory.clone())),
        Arc::new(GetTeam::new(directory.clone())),
        Arc::new(AddMember::new(directory.clone())),
        Arc::new(RemoveMember::new(directory)),
    ]
}

fn team_json(team: &Team) -> Value {
    json!({
        "id": team.id,
        "name": team.name,
        "tenant": team.tenant,
        "members": team.members,
    })
}

// ============================================================================
// teams.team.LIST
// ============================================================================

struct ListTeams {
    descriptor: CapabilityDescriptor,
    directory: Arc<TeamDirectory>,
}

impl ListTeams {
    fn new(directory: Arc<TeamDirectory>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "teams.team.LIST",
                "List the teams visible in the current scope",
            )
            .with_scope("teams.read")
            .with_service(SERVICE)
            .idempotent(),
            directory,
        }
    }
}

#[async_trait]
impl Capability for ListTeams {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError> {
        let teams = self
            .directory
            .teams
            .read()
            .map_err(|_| CapabilityError::internal("directory lock poisoned"))?;

        let listed: Vec<Value> = TeamDirectory::visible(&teams, ctx.scope.as_deref())
            .map(|team| {
                json!({
                    "id": team.id,
                    "name": team.name,
                    "members": team.members.len(),
                })
            })
            .collect();

        Ok(json!({ "teams": listed }))
    }
}

// ============================================================================
// teams.team.GET
// ============================================================================

struct GetTeam {
    descriptor: CapabilityDescriptor,
    directory: Arc<TeamDirectory>,
}

impl GetTeam {
    fn new(directory: Arc<TeamDirectory>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new("teams.team.GET", "Fetch one team by id")
                .with_params(ParamSpec::empty().field(FieldSpec::required(
                    "team_id",
                    "Team identifier",
                    FieldKind::string_bounded(1, 64),
                )))
                .with_scope("teams.read")
                .with_service(SERVICE)
                .idempotent(),
            directory,
        }
    }
}

#[async_trait]
impl Capability for GetTeam {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError> {
        let team_id = require_str(args, "team_id")?;
        let teams = self
            .directory
            .teams
            .read()
            .map_err(|_| CapabilityError::internal("directory lock poisoned"))?;

        TeamDirectory::visible(&teams, ctx.scope.as_deref())
            .find(|team| team.id == team_id)
            .map(team_json)
            .ok_or_else(|| CapabilityError::not_found(format!("team '{}'", team_id)))
    }
}

// ============================================================================
// teams.member.ADD
// ============================================================================

struct AddMember {
    descriptor: CapabilityDescriptor,
    directory: Arc<TeamDirectory>,
}

impl AddMember {
    fn new(directory: Arc<TeamDirectory>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new("teams.member.ADD", "Add a member to a team")
                .with_params(
                    ParamSpec::empty()
                        .field(FieldSpec::required(
                            "team_id",
                            "Team identifier",
                            FieldKind::string_bounded(1, 64),
                        ))
                        .field(FieldSpec::required(
                            "member",
                            "Member handle to add",
                            FieldKind::string_bounded(1, 80),
                        )),
                )
                .with_scope("teams.write")
                .with_service(SERVICE),
            directory,
        }
    }
}

#[async_trait]
impl Capability for AddMember {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError> {
        let team_id = require_str(args, "team_id")?;
        let member = require_str(args, "member")?;

        let mut teams = self
            .directory
            .teams
            .write()
            .map_err(|_| CapabilityError::internal("directory lock poisoned"))?;

        let scope = ctx.scope.clone();
        let team = teams
            .iter_mut()
            .filter(|team| scope.as_deref().is_none_or(|s| team.tenant == s))
            .find(|team| team.id == team_id)
            .ok_or_else(|| CapabilityError::not_found(format!("team '{}'", team_id)))?;

        if team.members.iter().any(|m| m == member) {
            return Err(CapabilityError::permanent(format!(
                "'{}' is already a member of team '{}'",
                member, team_id
            )));
        }

        team.members.push(member.to_string());
        Ok(team_json(team))
    }
}

// ============================================================================
// teams.member.REMOVE
// ============================================================================

struct RemoveMember {
    descriptor: CapabilityDescriptor,
    directory: Arc<TeamDirectory>,
}

impl RemoveMember {
    fn new(directory: Arc<TeamDirectory>) -> Self {
        Self {
            // Removing an absent member is a no-op, so repeats are safe.
            descriptor: CapabilityDescriptor::new(
                "teams.member.REMOVE",
                "Remove a member from a team",
            )
            .with_params(
                ParamSpec::empty()
                    .field(FieldSpec::required(
                        "team_id",
                        "Team identifier",
                        FieldKind::string_bounded(1, 64),
                    ))
                    .field(FieldSpec::required(
                        "member",
                        "Member handle to remove",
                        FieldKind::string_bounded(1, 80),
                    )),
            )
            .with_scope("teams.write")
            .with_service(SERVICE)
            .idempotent(),
            directory,
        }
    }
}

#[async_trait]
impl Capability for RemoveMember {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: &JsonObject, ctx: &CallContext) -> Result<Value, CapabilityError> {
        let team_id = require_str(args, "team_id")?;
        let member = require_str(args, "member")?;

        let mut teams = self
            .directory
            .teams
            .write()
            .map_err(|_| CapabilityError::internal("directory lock poisoned"))?;

        let scope = ctx.scope.clone();
        let team = teams
            .iter_mut()
            .filter(|team| scope.as_deref().is_none_or(|s| team.tenant == s))
            .find(|team| team.id == team_id)
            .ok_or_else(|| CapabilityError::not_found(format!("team '{}'", team_id)))?;

        team.members.retain(|m| m != member);
        Ok(team_json(team))
    }
}

/// Fetch a string argument the validation stage guarantees is present.
pub(super) fn require_str<'a>(args: &'a JsonObject, name: &str) -> Result<&'a str, CapabilityError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| CapabilityError::internal(format!("validated arguments missing '{}'", name)))
}
