//! Users, groups and their views

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::constants::{GROUP_KIND, USER_KIND};
use crate::error::{err, Result};
use crate::grant::AuthorizationGrant;
use crate::repo::Entity;

/// Generate a random entity id (16 bytes, hex encoded)
pub fn new_id() -> Result<String> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes).map_err(err)?;
    Ok(bytes.iter().map(|b| format!("{:02x}", b)).collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    /// A user belongs to at most one group.
    #[serde(default)]
    pub group_id: Option<String>,
    /// Grants attached to the user itself, always `inherited = false`.
    #[serde(default)]
    pub direct_grants: Vec<AuthorizationGrant>,
    #[serde(default)]
    pub version: u64,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        User {
            id: id.into(),
            name: name.into(),
            group_id: None,
            direct_grants: Vec::new(),
            version: 0,
        }
    }

    pub fn with_grants(mut self, grants: Vec<AuthorizationGrant>) -> Self {
        self.direct_grants = grants.into_iter().map(|g| g.inherited(false)).collect();
        self
    }

    pub fn in_group(&self, group_id: &str) -> bool {
        self.group_id.as_deref() == Some(group_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub member_user_ids: BTreeSet<String>,
    /// Grants propagated to every member, always `inherited = true`.
    #[serde(default)]
    pub own_grants: Vec<AuthorizationGrant>,
    #[serde(default)]
    pub version: u64,
}

impl UserGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        UserGroup {
            id: id.into(),
            name: name.into(),
            member_user_ids: BTreeSet::new(),
            own_grants: Vec::new(),
            version: 0,
        }
    }

    pub fn has_member(&self, user_id: &str) -> bool {
        self.member_user_ids.contains(user_id)
    }
}

impl Entity for User {
    const KIND: &'static str = USER_KIND;
    fn id(&self) -> &str { &self.id }
    fn version(&self) -> u64 { self.version }
    fn set_version(&mut self, version: u64) { self.version = version; }
}

impl Entity for UserGroup {
    const KIND: &'static str = GROUP_KIND;
    fn id(&self) -> &str { &self.id }
    fn version(&self) -> u64 { self.version }
    fn set_version(&mut self, version: u64) { self.version = version; }
}

/// A group together with its member records, as returned by group listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGroupView {
    pub id: String,
    pub name: String,
    pub member_user_ids: BTreeSet<String>,
    pub permissions: Vec<AuthorizationGrant>,
    pub users: Vec<User>,
}

impl UserGroupView {
    pub fn new(group: UserGroup, users: Vec<User>) -> Self {
        UserGroupView {
            id: group.id,
            name: group.name,
            member_user_ids: group.member_user_ids,
            permissions: group.own_grants,
            users,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{PermissionType, Scope};

    #[test]
    fn test_new_id_is_hex_and_unique() {
        let a = new_id().unwrap();
        let b = new_id().unwrap();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_user_direct_grants_are_not_inherited() {
        let g = AuthorizationGrant::new(Scope::Server, PermissionType::View).inherited(true);
        let u = User::new("u1", "alice").with_grants(vec![g]);
        assert!(u.direct_grants.iter().all(|g| !g.inherited));
    }
}
