//! Scopes, permission types and system defaults

use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource domain a grant applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    Server,
    PipelineGroup,
    Pipeline,
    Environment,
}

/// Privilege level within a scope. Declaration order is the privilege rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionType {
    None,
    View,
    Operate,
    Admin,
}

// Name mappings
const SCOPES: &[(&str, Scope)] = &[
    ("SERVER", Scope::Server),
    ("PIPELINE_GROUP", Scope::PipelineGroup),
    ("PIPELINE", Scope::Pipeline),
    ("ENVIRONMENT", Scope::Environment),
];

const TYPES: &[(&str, PermissionType)] = &[
    ("NONE", PermissionType::None),
    ("VIEW", PermissionType::View),
    ("OPERATE", PermissionType::Operate),
    ("ADMIN", PermissionType::Admin),
];

impl Scope {
    /// Look up a scope by its wire name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Scope> {
        SCOPES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, s)| *s)
    }

    pub fn name(self) -> &'static str {
        SCOPES
            .iter()
            .find(|(_, s)| *s == self)
            .map(|(n, _)| *n)
            .unwrap_or("UNKNOWN")
    }
}

impl PermissionType {
    /// Look up a permission type by its wire name (case-insensitive)
    pub fn from_name(name: &str) -> Option<PermissionType> {
        TYPES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, t)| *t)
    }

    pub fn name(self) -> &'static str {
        TYPES
            .iter()
            .find(|(_, t)| *t == self)
            .map(|(n, _)| *n)
            .unwrap_or("UNKNOWN")
    }

    /// Integer privilege rank: NONE < VIEW < OPERATE < ADMIN
    #[inline]
    pub fn rank(self) -> u8 {
        match self {
            PermissionType::None => 0,
            PermissionType::View => 1,
            PermissionType::Operate => 2,
            PermissionType::Admin => 3,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Entity kinds, used in error messages, lock keys and LMDB database names
pub const USER_KIND: &str = "user";
pub const GROUP_KIND: &str = "group";

// Defaults
pub const DEFAULT_DB_PATH: &str = "./data/grantward.mdb";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;
pub const DEFAULT_LOCK_ATTEMPTS: usize = 8;
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;
