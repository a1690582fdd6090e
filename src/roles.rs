//! Roles, actors and the identity collaborator
use super::deal::{ActorId, Deal};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Opens deals on behalf of the sales team.
    SalesManager,
    Salesman,
    /// Decides on deals waiting for approval and may abort any open deal.
    Approver,
    /// Provisions client accounts and issues client credentials.
    AccountAdministrator,
    // The roles below are never handed out by the identity provider. They
    // are derived per deal from its assignment.
    AssignedSalesman,
    FirstReviewer,
    SecondReviewer,
}

impl Role {
    pub fn is_contextual(self) -> bool {
        matches!(
            self,
            Role::AssignedSalesman | Role::FirstReviewer | Role::SecondReviewer
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Parses role names as the identity provider spells them.
impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.replace(['_', '-', ' '], "").to_ascii_lowercase();
        match key.as_str() {
            "salesmanager" => Ok(Role::SalesManager),
            "salesman" | "sales" => Ok(Role::Salesman),
            "approver" | "superadmin" => Ok(Role::Approver),
            "accountadministrator" | "accountadmin" | "admin" => Ok(Role::AccountAdministrator),
            _ => Err(anyhow::anyhow!("unknown role {s:?}")),
        }
    }
}

pub type RoleSet = BTreeSet<Role>;

/// The caller of a command, with the global roles the identity provider reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub roles: RoleSet,
}

impl Actor {
    pub fn new(id: ActorId, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            id,
            roles: roles.into_iter().filter(|r| !r.is_contextual()).collect(),
        }
    }

    /// Global roles plus whatever the deal's assignment grants this actor.
    pub fn roles_for(&self, deal: &Deal) -> RoleSet {
        let mut roles = self.roles.clone();
        let assignment = &deal.assignment;
        if assignment.salesman_id == self.id {
            roles.insert(Role::AssignedSalesman);
        }
        if assignment.first_reviewer_id == self.id {
            roles.insert(Role::FirstReviewer);
        }
        if assignment.second_reviewer_id.as_ref() == Some(&self.id) {
            roles.insert(Role::SecondReviewer);
        }
        roles
    }
}

/// Identity collaborator, asked once per incoming command.
pub trait RoleProvider: Send + Sync {
    fn roles_of(&self, actor: &ActorId) -> anyhow::Result<RoleSet>;
}

/// Role provider backed by a map, for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticRoleProvider {
    roles: RwLock<HashMap<ActorId, RoleSet>>,
}

impl StaticRoleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add global roles for `actor`. Contextual roles are ignored.
    pub fn grant(&self, actor: impl Into<ActorId>, roles: impl IntoIterator<Item = Role>) {
        let actor = actor.into();
        match self.roles.write() {
            Ok(mut map) => map
                .entry(actor)
                .or_default()
                .extend(roles.into_iter().filter(|r| !r.is_contextual())),
            Err(_) => warn!(%actor, "role map lock poisoned, grant dropped"),
        }
    }
}

impl RoleProvider for StaticRoleProvider {
    fn roles_of(&self, actor: &ActorId) -> anyhow::Result<RoleSet> {
        let map = self
            .roles
            .read()
            .map_err(|_| anyhow::anyhow!("role map lock poisoned"))?;
        Ok(map.get(actor).cloned().unwrap_or_default())
    }
}
