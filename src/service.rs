//! Permission service: the operations the rest of the server calls
//!
//! Every operation checks its caller against the policy table before doing
//! anything else. Mutations take exclusive access to all entities they will
//! write, persist, and invalidate the grant cache for every affected user
//! while still holding that access.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cache::{GrantCache, InvalidationBatch};
use crate::config::Config;
use crate::constants::{GROUP_KIND, USER_KIND};
use crate::db::Store;
use crate::entity::{new_id, User, UserGroup, UserGroupView};
use crate::error::{GrantError, Result};
use crate::gate::{self, Decision, Operation, Policy, Required};
use crate::grant::{parse_records, AuthorizationGrant, GrantRecord};
use crate::locks::{group_key, user_key, EntityLocks};
use crate::reconciler::{Membership, MembershipReconciler};
use crate::repo::Repository;
use crate::resolver::{self, ResolvedGrantSet};

const BOOTSTRAP_KEY: &str = "bootstrap";

#[inline]
fn name_key(kind: &str, name: &str) -> String {
    format!("name/{}/{}", kind, name)
}

fn valid_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GrantError::validation("name cannot be empty"));
    }
    Ok(name.to_string())
}

/// Parse submitted grants, force their origin flag, dedupe and order them.
fn prepare_grants(records: &[GrantRecord], inherited: bool) -> Result<Vec<AuthorizationGrant>> {
    let grants = parse_records(records)?.into_iter().map(|g| g.inherited(inherited)).collect();
    Ok(resolver::normalize(grants))
}

pub struct PermissionService {
    users: Arc<dyn Repository<User>>,
    groups: Arc<dyn Repository<UserGroup>>,
    cache: Arc<GrantCache>,
    locks: EntityLocks,
    policy: Policy,
}

impl PermissionService {
    pub fn new(
        users: Arc<dyn Repository<User>>,
        groups: Arc<dyn Repository<UserGroup>>,
        cache: Arc<GrantCache>,
    ) -> Self {
        PermissionService { users, groups, cache, locks: EntityLocks::new(), policy: Policy::default() }
    }

    /// Service over an LMDB store, sized by `config`
    pub fn open(store: &Store, config: &Config) -> Self {
        PermissionService {
            users: Arc::new(store.users()),
            groups: Arc::new(store.groups()),
            cache: Arc::new(GrantCache::with_capacity(config.cache_capacity)),
            locks: EntityLocks::with_attempts(config.lock_attempts),
            policy: Policy::default(),
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cache(&self) -> &GrantCache {
        &self.cache
    }

    fn reconciler(&self) -> MembershipReconciler<'_> {
        MembershipReconciler::new(self.users.as_ref(), self.groups.as_ref())
    }

    // ========================================================================
    // Resolution and checks
    // ========================================================================

    fn resolve_user(&self, user_id: &str) -> Result<Arc<ResolvedGrantSet>> {
        self.cache.get_or_resolve(user_id, || {
            let user = self.users.get(user_id)?;
            let group = match user.group_id.as_deref() {
                Some(gid) => {
                    let g = self.groups.find(gid)?;
                    if g.is_none() {
                        tracing::warn!(user = user_id, group = gid, "user references a missing group");
                    }
                    g
                }
                None => None,
            };
            Ok(resolver::resolve(&user, group.as_ref()))
        })
    }

    /// Caller's resolved grants. An unknown caller holds nothing.
    fn caller_grants(&self, caller: &str) -> Result<Arc<ResolvedGrantSet>> {
        match self.resolve_user(caller) {
            Err(GrantError::NotFound { .. }) => {
                Ok(Arc::new(ResolvedGrantSet { user_id: caller.to_string(), grants: Vec::new() }))
            }
            r => r,
        }
    }

    /// Check `caller` against the policy entry for `op`. Open entries pass
    /// without resolving the caller.
    fn authorize(&self, caller: &str, op: Operation) -> Result<()> {
        let Some(required) = self.policy.required(op) else {
            return Ok(());
        };
        gate::enforce(&*self.caller_grants(caller)?, required).map_err(|e| {
            tracing::debug!(caller, ?op, "operation refused");
            e
        })
    }

    /// Evaluate `required` against the caller without failing on Deny.
    pub fn decide(&self, caller: &str, required: &Required) -> Result<Decision> {
        Ok(gate::check(&*self.caller_grants(caller)?, required))
    }

    /// Guard for other services: `AuthorizationDenied` unless the caller
    /// holds `required`.
    pub fn check(&self, caller: &str, required: &Required) -> Result<()> {
        gate::enforce(&*self.caller_grants(caller)?, required)
    }

    /// Reading one's own grants is governed by `GetOwnGrants`, anyone
    /// else's by `GetEffectiveGrants`.
    pub fn get_effective_grants(&self, caller: &str, user_id: &str) -> Result<Arc<ResolvedGrantSet>> {
        let op = if caller == user_id { Operation::GetOwnGrants } else { Operation::GetEffectiveGrants };
        self.authorize(caller, op)?;
        self.resolve_user(user_id)
    }

    // ========================================================================
    // Group grants and membership
    // ========================================================================

    /// Replace a group's grants wholesale. Grants are marked inherited,
    /// deduped and canonically ordered before storing. Every user resolving
    /// through the group, listed or merely pointing at it, is invalidated
    /// once the group is persisted (or the save failed).
    pub fn update_group_grants(&self, caller: &str, group_id: &str, grants: &[GrantRecord]) -> Result<UserGroup> {
        self.authorize(caller, Operation::UpdateGroupGrants)?;
        let grants = prepare_grants(grants, true)?;

        let _lock = self.locks.acquire(BTreeSet::from([group_key(group_id)]));
        let group = self.groups.get(group_id)?;
        if group.own_grants == grants {
            tracing::debug!(group = group_id, "group grants unchanged");
            return Ok(group);
        }

        let mut touched = InvalidationBatch::new(&self.cache);
        touched.extend(group.member_user_ids.iter().cloned());
        touched.extend(self.reconciler().attached(group_id)?);
        let n = grants.len();
        let saved = self.groups.save(UserGroup { own_grants: grants, ..group })?;
        tracing::info!(group = group_id, grants = n, members = touched.len(), "group grants updated");
        Ok(saved)
    }

    /// Set a group's members to exactly `user_ids`.
    pub fn assign_members(&self, caller: &str, group_id: &str, user_ids: &[String]) -> Result<UserGroup> {
        self.authorize(caller, Operation::AssignMembers)?;
        let requested: BTreeSet<String> = user_ids.iter().cloned().collect();
        self.reconcile(group_id, |_| Ok(requested.clone()))
    }

    /// Add one user to a group, moving it out of any previous group.
    pub fn assign_user_to_group(&self, caller: &str, user_id: &str, group_id: &str) -> Result<UserGroup> {
        self.authorize(caller, Operation::AssignMembers)?;
        self.reconcile(group_id, |current| {
            if current.consistent(user_id) {
                return Err(GrantError::validation(format!("user {} already assigned to group {}", user_id, group_id)));
            }
            let mut next = current.listed.clone();
            next.insert(user_id.to_string());
            Ok(next)
        })
    }

    /// Remove a user from whatever group it belongs to.
    pub fn unassign_user_from_group(&self, caller: &str, user_id: &str) -> Result<UserGroup> {
        self.authorize(caller, Operation::AssignMembers)?;
        let user = self.users.get(user_id)?;
        let group_id = user
            .group_id
            .ok_or_else(|| GrantError::validation(format!("user {} is not assigned to a group", user_id)))?;
        self.reconcile(&group_id, |current| {
            if !current.contains(user_id) {
                return Err(GrantError::validation(format!("user {} already unassigned from group {}", user_id, group_id)));
            }
            let mut next = current.listed.clone();
            next.remove(user_id);
            Ok(next)
        })
    }

    /// Lock everything the reconciliation will touch, then reconcile the
    /// group to `requested_from(current membership)`.
    fn reconcile<F>(&self, group_id: &str, requested_from: F) -> Result<UserGroup>
    where
        F: Fn(&Membership) -> Result<BTreeSet<String>>,
    {
        let rec = self.reconciler();
        let _lock = self.locks.acquire_stable(GROUP_KIND, group_id, || {
            let group = self.groups.get(group_id)?;
            let current = rec.membership(&group)?;
            rec.lock_keys(&group, &current, &requested_from(&current)?)
        })?;
        let group = self.groups.get(group_id)?;
        let current = rec.membership(&group)?;
        let requested = requested_from(&current)?;
        let mut touched = InvalidationBatch::new(&self.cache);
        rec.apply(group, &current, &requested, &mut touched)
    }

    // ========================================================================
    // Group lifecycle
    // ========================================================================

    pub fn create_group(&self, caller: &str, name: &str) -> Result<UserGroup> {
        self.authorize(caller, Operation::CreateGroup)?;
        let name = valid_name(name)?;
        let _lock = self.locks.acquire(BTreeSet::from([name_key(GROUP_KIND, &name)]));
        self.ensure_group_name_free(&name, None)?;
        let group = self.groups.save(UserGroup::new(new_id()?, name))?;
        tracing::info!(group = %group.id, name = %group.name, "group created");
        Ok(group)
    }

    pub fn rename_group(&self, caller: &str, group_id: &str, name: &str) -> Result<UserGroup> {
        self.authorize(caller, Operation::RenameGroup)?;
        let name = valid_name(name)?;
        let _lock = self.locks.acquire(BTreeSet::from([group_key(group_id), name_key(GROUP_KIND, &name)]));
        let group = self.groups.get(group_id)?;
        self.ensure_group_name_free(&name, Some(group_id))?;
        self.groups.save(UserGroup { name, ..group })
    }

    fn ensure_group_name_free(&self, name: &str, except: Option<&str>) -> Result<()> {
        let taken = self
            .groups
            .get_all()?
            .iter()
            .any(|g| g.name == name && Some(g.id.as_str()) != except);
        if taken {
            return Err(GrantError::validation(format!("group name '{}' already exists", name)));
        }
        Ok(())
    }

    pub fn get_group(&self, caller: &str, group_id: &str) -> Result<UserGroup> {
        self.authorize(caller, Operation::GetGroup)?;
        self.groups.get(group_id)
    }

    /// Every group with its member records
    pub fn list_groups(&self, caller: &str) -> Result<Vec<UserGroupView>> {
        self.authorize(caller, Operation::ListGroups)?;
        let mut views = Vec::new();
        for group in self.groups.get_all()? {
            let mut users = Vec::with_capacity(group.member_user_ids.len());
            for id in &group.member_user_ids {
                match self.users.find(id)? {
                    Some(u) => users.push(u),
                    None => tracing::warn!(group = %group.id, user = %id, "skipping dangling member"),
                }
            }
            views.push(UserGroupView::new(group, users));
        }
        Ok(views)
    }

    /// Delete a group after clearing every member's reference to it.
    pub fn delete_group(&self, caller: &str, group_id: &str) -> Result<()> {
        self.authorize(caller, Operation::DeleteGroup)?;
        let rec = self.reconciler();
        let _lock = self.locks.acquire_stable(GROUP_KIND, group_id, || rec.release_keys(group_id))?;
        let mut touched = InvalidationBatch::new(&self.cache);
        let group = rec.release_all(group_id, &mut touched)?;
        self.groups.delete(group_id)?;
        tracing::info!(group = group_id, members = group.member_user_ids.len(), "group deleted");
        Ok(())
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Create the first administrator. Fails once any user exists.
    pub fn bootstrap(&self, name: &str) -> Result<User> {
        let name = valid_name(name)?;
        let _lock = self.locks.acquire(BTreeSet::from([BOOTSTRAP_KEY.to_string()]));
        crate::bootstrap::bootstrap(self.users.as_ref(), &name)
    }

    pub fn create_user(&self, caller: &str, name: &str) -> Result<User> {
        self.authorize(caller, Operation::CreateUser)?;
        let name = valid_name(name)?;
        let _lock = self.locks.acquire(BTreeSet::from([name_key(USER_KIND, &name)]));
        if self.users.get_all()?.iter().any(|u| u.name == name) {
            return Err(GrantError::validation(format!("user name '{}' already exists", name)));
        }
        let user = self.users.save(User::new(new_id()?, name))?;
        tracing::info!(user = %user.id, name = %user.name, "user created");
        Ok(user)
    }

    pub fn get_user(&self, caller: &str, user_id: &str) -> Result<User> {
        self.authorize(caller, Operation::GetUser)?;
        self.users.get(user_id)
    }

    pub fn list_users(&self, caller: &str) -> Result<Vec<User>> {
        self.authorize(caller, Operation::ListUsers)?;
        self.users.get_all()
    }

    /// Replace a user's direct grants wholesale.
    pub fn update_user_grants(&self, caller: &str, user_id: &str, grants: &[GrantRecord]) -> Result<User> {
        self.authorize(caller, Operation::UpdateUserGrants)?;
        let grants = prepare_grants(grants, false)?;

        let _lock = self.locks.acquire(BTreeSet::from([user_key(user_id)]));
        let user = self.users.get(user_id)?;
        if user.direct_grants == grants {
            return Ok(user);
        }
        let mut touched = InvalidationBatch::new(&self.cache);
        touched.add(user_id);
        let saved = self.users.save(User { direct_grants: grants, ..user })?;
        tracing::info!(user = user_id, grants = saved.direct_grants.len(), "direct grants updated");
        Ok(saved)
    }

    /// Delete a user, removing it from its group first.
    pub fn delete_user(&self, caller: &str, user_id: &str) -> Result<()> {
        self.authorize(caller, Operation::DeleteUser)?;
        let _lock = self.locks.acquire_stable(USER_KIND, user_id, || {
            let user = self.users.get(user_id)?;
            let mut keys = BTreeSet::from([user_key(user_id)]);
            keys.extend(user.group_id.as_deref().map(group_key));
            Ok(keys)
        })?;
        let user = self.users.get(user_id)?;
        let mut touched = InvalidationBatch::new(&self.cache);
        touched.add(user_id);
        if let Some(gid) = user.group_id.as_deref() {
            if let Some(group) = self.groups.find(gid)? {
                let mut members = group.member_user_ids.clone();
                if members.remove(user_id) {
                    self.groups.save(UserGroup { member_user_ids: members, ..group })?;
                }
            }
        }
        self.users.delete(user_id)?;
        touched.forget(user_id);
        tracing::info!(user = user_id, "user deleted");
        Ok(())
    }
}
