//! Grantward - grant resolution and group membership for a CI/CD server
//!
//! Users carry direct grants and belong to at most one group whose grants
//! they inherit. [`PermissionService`] is the entry point: it resolves a
//! user's effective grants, gates every operation through a [`Policy`], and
//! keeps group membership and the grant cache consistent under concurrent
//! writers.

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod constants;
pub mod db;
pub mod entity;
pub mod error;
pub mod gate;
pub mod grant;
pub mod locks;
pub mod reconciler;
pub mod repo;
pub mod resolver;
pub mod result;
pub mod service;

pub use cache::{GrantCache, InvalidationBatch};
pub use config::Config;
pub use constants::{PermissionType, Scope};
pub use db::{LmdbRepository, Store};
pub use entity::{User, UserGroup, UserGroupView};
pub use error::{ErrorKind, GrantError, Result};
pub use gate::{check, Decision, Operation, Policy, Required};
pub use grant::{AuthorizationGrant, GrantRecord};
pub use locks::EntityLocks;
pub use reconciler::{Membership, MembershipPlan, MembershipReconciler};
pub use repo::{Entity, MemoryRepository, Repository};
pub use resolver::{canonical_order, dedupe, resolve, ResolvedGrantSet};
pub use result::{ServiceResult, Status};
pub use service::PermissionService;
