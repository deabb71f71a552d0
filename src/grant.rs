//! Grant value types
//!
//! A grant is identified by `(scope, target_id)`; `permission_type` and
//! `inherited` only matter when two grants with the same identity collide.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{PermissionType, Scope};
use crate::error::{GrantError, Result};

/// Identity used for deduplication.
pub type IdentityKey = (Scope, Option<String>);

/// A scoped, typed privilege. `target_id == None` applies to every resource
/// of the scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationGrant {
    pub scope: Scope,
    #[serde(rename = "type")]
    pub permission_type: PermissionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default)]
    pub inherited: bool,
}

impl AuthorizationGrant {
    /// Scope-wide direct grant
    pub fn new(scope: Scope, permission_type: PermissionType) -> Self {
        AuthorizationGrant { scope, permission_type, target_id: None, inherited: false }
    }

    /// Grant limited to one resource of the scope
    pub fn on(scope: Scope, permission_type: PermissionType, target_id: impl Into<String>) -> Self {
        AuthorizationGrant {
            scope,
            permission_type,
            target_id: Some(target_id.into()),
            inherited: false,
        }
    }

    pub fn inherited(mut self, inherited: bool) -> Self {
        self.inherited = inherited;
        self
    }

    #[inline]
    pub fn identity_key(&self) -> IdentityKey {
        (self.scope, self.target_id.clone())
    }

    #[inline]
    pub fn rank(&self) -> u8 {
        self.permission_type.rank()
    }

    #[inline]
    pub fn is_scope_wide(&self) -> bool {
        self.target_id.is_none()
    }

    /// True if this grant governs `target` within `scope`.
    #[inline]
    pub fn applies_to(&self, scope: Scope, target: Option<&str>) -> bool {
        self.scope == scope
            && match self.target_id.as_deref() {
                None => true,
                Some(t) => target == Some(t),
            }
    }
}

impl fmt::Display for AuthorizationGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target_id {
            Some(t) => write!(f, "{}:{}@{}", self.scope, self.permission_type, t),
            None => write!(f, "{}:{}", self.scope, self.permission_type),
        }
    }
}

/// Untyped grant as submitted over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRecord {
    pub scope: String,
    #[serde(rename = "type")]
    pub permission_type: String,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub inherited: bool,
}

impl GrantRecord {
    pub fn new(scope: &str, permission_type: &str, target_id: Option<&str>) -> Self {
        GrantRecord {
            scope: scope.to_string(),
            permission_type: permission_type.to_string(),
            target_id: target_id.map(str::to_string),
            inherited: false,
        }
    }

    /// Validate names and normalize an empty target to scope-wide.
    pub fn parse(&self) -> Result<AuthorizationGrant> {
        let scope = Scope::from_name(&self.scope)
            .ok_or_else(|| GrantError::validation(format!("unknown scope '{}'", self.scope)))?;
        let permission_type = PermissionType::from_name(&self.permission_type).ok_or_else(|| {
            GrantError::validation(format!("unknown permission type '{}'", self.permission_type))
        })?;
        let target_id = self
            .target_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        Ok(AuthorizationGrant { scope, permission_type, target_id, inherited: self.inherited })
    }
}

impl From<&AuthorizationGrant> for GrantRecord {
    fn from(g: &AuthorizationGrant) -> Self {
        GrantRecord {
            scope: g.scope.name().to_string(),
            permission_type: g.permission_type.name().to_string(),
            target_id: g.target_id.clone(),
            inherited: g.inherited,
        }
    }
}

/// Parse a full submitted list, failing on the first malformed record.
pub fn parse_records(records: &[GrantRecord]) -> Result<Vec<AuthorizationGrant>> {
    records.iter().map(GrantRecord::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_type_and_inheritance() {
        let a = AuthorizationGrant::new(Scope::Server, PermissionType::View);
        let b = AuthorizationGrant::new(Scope::Server, PermissionType::Admin).inherited(true);
        assert_eq!(a.identity_key(), b.identity_key());

        let c = AuthorizationGrant::on(Scope::Pipeline, PermissionType::View, "build");
        let d = AuthorizationGrant::on(Scope::Pipeline, PermissionType::View, "deploy");
        assert_ne!(c.identity_key(), d.identity_key());
    }

    #[test]
    fn test_applies_to() {
        let wide = AuthorizationGrant::new(Scope::Pipeline, PermissionType::View);
        let narrow = AuthorizationGrant::on(Scope::Pipeline, PermissionType::Admin, "build");
        assert!(wide.applies_to(Scope::Pipeline, Some("anything")));
        assert!(wide.applies_to(Scope::Pipeline, None));
        assert!(!wide.applies_to(Scope::Server, None));
        assert!(narrow.applies_to(Scope::Pipeline, Some("build")));
        assert!(!narrow.applies_to(Scope::Pipeline, Some("deploy")));
        assert!(!narrow.applies_to(Scope::Pipeline, None));
    }

    #[test]
    fn test_parse_rejects_unknown_names() {
        assert!(matches!(
            GrantRecord::new("GALAXY", "ADMIN", None).parse(),
            Err(GrantError::Validation(_))
        ));
        assert!(matches!(
            GrantRecord::new("SERVER", "OWNER", None).parse(),
            Err(GrantError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_normalizes_empty_target() {
        let g = GrantRecord::new("PIPELINE", "VIEW", Some("  ")).parse().unwrap();
        assert!(g.is_scope_wide());
    }

    #[test]
    fn test_wire_shape() {
        let g = AuthorizationGrant::on(Scope::PipelineGroup, PermissionType::Operate, "g1").inherited(true);
        let json = serde_json::to_value(&g).unwrap();
        assert_eq!(json["scope"], "PIPELINE_GROUP");
        assert_eq!(json["type"], "OPERATE");
        assert_eq!(json["targetId"], "g1");
        assert_eq!(json["inherited"], true);

        let rec: GrantRecord = serde_json::from_value(json).unwrap();
        assert_eq!(rec.parse().unwrap(), g);
    }
}
