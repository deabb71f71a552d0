//! Authorization gate and per-operation policy table
//!
//! The gate is pure: it inspects an already resolved grant set and never
//! touches storage. Each façade operation is paired with its requirement in
//! a [`Policy`] table and checked before the operation is entered.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{PermissionType, Scope};
use crate::error::{GrantError, Result};
use crate::resolver::ResolvedGrantSet;

/// A privilege an operation demands of its caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Required {
    pub scope: Scope,
    #[serde(rename = "type")]
    pub permission_type: PermissionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

impl Required {
    pub fn new(scope: Scope, permission_type: PermissionType) -> Self {
        Required { scope, permission_type, target_id: None }
    }

    pub fn on(scope: Scope, permission_type: PermissionType, target_id: impl Into<String>) -> Self {
        Required { scope, permission_type, target_id: Some(target_id.into()) }
    }
}

impl fmt::Display for Required {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target_id {
            Some(t) => write!(f, "{} on {} {}", self.permission_type, self.scope, t),
            None => write!(f, "{} on {}", self.permission_type, self.scope),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allow(self) -> bool {
        self == Decision::Allow
    }
}

/// First grant in canonical order whose scope matches and whose target is
/// either the required one or absent decides; no match denies.
pub fn check(resolved: &ResolvedGrantSet, required: &Required) -> Decision {
    let found = resolved
        .iter()
        .find(|g| g.applies_to(required.scope, required.target_id.as_deref()));
    match found {
        Some(g) if g.rank() >= required.permission_type.rank() => Decision::Allow,
        _ => Decision::Deny,
    }
}

/// `check`, turning a Deny into `AuthorizationDenied`.
pub fn enforce(resolved: &ResolvedGrantSet, required: &Required) -> Result<()> {
    match check(resolved, required) {
        Decision::Allow => Ok(()),
        Decision::Deny => {
            tracing::warn!(caller = %resolved.user_id, %required, "authorization denied");
            Err(GrantError::AuthorizationDenied {
                caller: resolved.user_id.clone(),
                required: required.to_string(),
            })
        }
    }
}

/// Façade operations subject to policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    GetOwnGrants,
    GetEffectiveGrants,
    UpdateGroupGrants,
    AssignMembers,
    CreateGroup,
    RenameGroup,
    GetGroup,
    ListGroups,
    DeleteGroup,
    CreateUser,
    GetUser,
    ListUsers,
    UpdateUserGrants,
    DeleteUser,
}

impl Operation {
    pub const ALL: [Operation; 14] = [
        Operation::GetOwnGrants,
        Operation::GetEffectiveGrants,
        Operation::UpdateGroupGrants,
        Operation::AssignMembers,
        Operation::CreateGroup,
        Operation::RenameGroup,
        Operation::GetGroup,
        Operation::ListGroups,
        Operation::DeleteGroup,
        Operation::CreateUser,
        Operation::GetUser,
        Operation::ListUsers,
        Operation::UpdateUserGrants,
        Operation::DeleteUser,
    ];
}

/// Required privilege for every operation, fixed at construction.
/// An operation mapped to `None` is open to every caller.
#[derive(Debug, Clone)]
pub struct Policy {
    table: HashMap<Operation, Option<Required>>,
}

impl Policy {
    /// Override one entry
    pub fn with(mut self, op: Operation, required: Required) -> Self {
        self.table.insert(op, Some(required));
        self
    }

    /// Let any caller through `op` without a grant check.
    pub fn open(mut self, op: Operation) -> Self {
        self.table.insert(op, None);
        self
    }

    pub fn required(&self, op: Operation) -> Option<&Required> {
        self.table.get(&op).and_then(Option::as_ref)
    }
}

impl Default for Policy {
    fn default() -> Self {
        let admin = Required::new(Scope::Server, PermissionType::Admin);
        let listing = Required::new(Scope::Server, PermissionType::None);
        let table = Operation::ALL
            .iter()
            .map(|&op| match op {
                Operation::GetOwnGrants => (op, None),
                Operation::ListGroups | Operation::ListUsers => (op, Some(listing.clone())),
                _ => (op, Some(admin.clone())),
            })
            .collect();
        Policy { table }
    }
}
