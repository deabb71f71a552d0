//! Group membership reconciliation
//!
//! Moves a group from its stored member set to a requested one with the
//! fewest writes, keeping `user.group_id == g.id <=> g.member_user_ids ∋ user.id`.
//! Every collection is read as a snapshot and replaced whole; nothing read
//! from the repository is mutated in place and written back elsewhere.

use std::collections::{BTreeMap, BTreeSet};

use crate::cache::InvalidationBatch;
use crate::entity::{User, UserGroup};
use crate::error::Result;
use crate::locks::{group_key, user_key};
use crate::repo::Repository;

/// Symmetric difference between current and requested membership.
/// Computed by [`MembershipPlan::repair`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipPlan {
    /// requested users not yet consistently in the group
    pub to_add: BTreeSet<String>,
    /// anyone on either side of the relation who was not requested
    pub to_remove: BTreeSet<String>,
}

impl MembershipPlan {
    /// Plan against both sides of the relation. A requested user counts as
    /// present only if the group lists it and it points back at the group;
    /// anyone on either side who was not requested is removed.
    pub fn repair(membership: &Membership, requested: &BTreeSet<String>) -> Self {
        MembershipPlan {
            to_add: requested.iter().filter(|id| !membership.consistent(id)).cloned().collect(),
            to_remove: membership.all().difference(requested).cloned().collect(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Users whose group reference changes
    pub fn affected(&self) -> impl Iterator<Item = &String> {
        self.to_add.iter().chain(self.to_remove.iter())
    }
}

/// A group's membership seen from both sides: the ids it lists and the
/// users whose `group_id` names it. The two agree unless an earlier
/// reconciliation failed midway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    pub listed: BTreeSet<String>,
    pub attached: BTreeSet<String>,
}

impl Membership {
    pub fn all(&self) -> BTreeSet<String> {
        self.listed.union(&self.attached).cloned().collect()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.listed.contains(user_id) || self.attached.contains(user_id)
    }

    pub fn consistent(&self, user_id: &str) -> bool {
        self.listed.contains(user_id) && self.attached.contains(user_id)
    }
}

pub struct MembershipReconciler<'a> {
    users: &'a dyn Repository<User>,
    groups: &'a dyn Repository<UserGroup>,
}

impl<'a> MembershipReconciler<'a> {
    pub fn new(users: &'a dyn Repository<User>, groups: &'a dyn Repository<UserGroup>) -> Self {
        MembershipReconciler { users, groups }
    }

    /// Users whose `group_id` names `group_id`, listed or not.
    pub fn attached(&self, group_id: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .users
            .get_all()?
            .into_iter()
            .filter(|u| u.in_group(group_id))
            .map(|u| u.id)
            .collect())
    }

    pub fn membership(&self, group: &UserGroup) -> Result<Membership> {
        Ok(Membership { listed: group.member_user_ids.clone(), attached: self.attached(&group.id)? })
    }

    /// Entities a reconciliation of `group` to `requested` would write: the
    /// group, every current and requested member, and each requested user's
    /// current other group.
    pub fn lock_keys(
        &self,
        group: &UserGroup,
        membership: &Membership,
        requested: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        keys.insert(group_key(&group.id));
        for id in membership.all().iter().chain(requested.iter()) {
            keys.insert(user_key(id));
        }
        for id in requested.iter().filter(|id| !membership.attached.contains(*id)) {
            if let Some(old) = self.users.find(id)?.and_then(|u| u.group_id) {
                if old != group.id {
                    keys.insert(group_key(&old));
                }
            }
        }
        Ok(keys)
    }

    /// Entities touched when a group is deleted: the group and everyone on
    /// either side of its membership.
    pub fn release_keys(&self, group_id: &str) -> Result<BTreeSet<String>> {
        let group = self.groups.get(group_id)?;
        let mut keys: BTreeSet<String> = self.membership(&group)?.all().iter().map(|id| user_key(id)).collect();
        keys.insert(group_key(group_id));
        Ok(keys)
    }

    /// Reconcile `group_id` to exactly `requested`.
    pub fn assign_members(
        &self,
        group_id: &str,
        requested: &BTreeSet<String>,
        touched: &mut InvalidationBatch<'_>,
    ) -> Result<UserGroup> {
        let group = self.groups.get(group_id)?;
        let membership = self.membership(&group)?;
        self.apply(group, &membership, requested, touched)
    }

    /// Reconcile a freshly read `group` and its `membership` to `requested`.
    ///
    /// Unknown requested users fail with `NotFound` before anything is
    /// written. Users are written before the group, so a mid-way failure
    /// leaves the group's list untouched and a resubmitted request sees the
    /// disagreement and finishes the job. A request matching a consistent
    /// membership writes nothing. Every affected user is registered in
    /// `touched`, also on error.
    pub fn apply(
        &self,
        group: UserGroup,
        membership: &Membership,
        requested: &BTreeSet<String>,
        touched: &mut InvalidationBatch<'_>,
    ) -> Result<UserGroup> {
        let group_id = group.id.clone();
        let plan = MembershipPlan::repair(membership, requested);
        if plan.is_noop() {
            tracing::debug!(group = %group_id, "membership unchanged");
            return Ok(group);
        }

        let mut joining = Vec::with_capacity(plan.to_add.len());
        for id in &plan.to_add {
            joining.push(self.users.get(id)?);
        }
        let mut leaving = Vec::with_capacity(plan.to_remove.len());
        for id in &plan.to_remove {
            match self.users.find(id)? {
                Some(u) => leaving.push(u),
                None => tracing::warn!(group = %group_id, user = %id, "dropping dangling member id"),
            }
        }

        touched.extend(plan.affected().cloned());

        // Detach joiners from their previous groups, one save per old group
        let mut displaced: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for u in &joining {
            if let Some(old) = u.group_id.as_deref().filter(|old| *old != group_id.as_str()) {
                displaced.entry(old.to_string()).or_default().insert(u.id.clone());
            }
        }
        for (old_id, ids) in &displaced {
            match self.groups.find(old_id)? {
                Some(old) if old.member_user_ids.iter().any(|m| ids.contains(m)) => {
                    let members = old.member_user_ids.difference(ids).cloned().collect();
                    self.groups.save(UserGroup { member_user_ids: members, ..old })?;
                    tracing::debug!(group = %old_id, moved = ids.len(), "detached members from previous group");
                }
                Some(_) => {}
                None => tracing::warn!(group = %old_id, "previous group missing, nothing to detach"),
            }
        }

        for u in joining {
            if !u.in_group(&group_id) {
                self.users.save(User { group_id: Some(group_id.clone()), ..u })?;
            }
        }
        for u in leaving {
            if u.in_group(&group_id) {
                self.users.save(User { group_id: None, ..u })?;
            } else {
                tracing::warn!(group = %group_id, user = %u.id, "departing member referenced another group");
            }
        }

        let updated = if group.member_user_ids == *requested {
            group
        } else {
            self.groups.save(UserGroup { member_user_ids: requested.clone(), ..group })?
        };

        tracing::info!(
            group = %group_id,
            added = plan.to_add.len(),
            removed = plan.to_remove.len(),
            displaced = displaced.len(),
            "membership reconciled"
        );
        Ok(updated)
    }

    /// Clear the group reference of everyone on either side of the
    /// membership of `group_id`. Used before deleting the group itself.
    pub fn release_all(&self, group_id: &str, touched: &mut InvalidationBatch<'_>) -> Result<UserGroup> {
        let group = self.groups.get(group_id)?;
        let everyone = self.membership(&group)?.all();
        touched.extend(everyone.iter().cloned());
        for id in &everyone {
            match self.users.find(id)? {
                Some(u) if u.in_group(group_id) => {
                    self.users.save(User { group_id: None, ..u })?;
                }
                Some(_) => tracing::warn!(group = group_id, user = %id, "member referenced another group"),
                None => tracing::warn!(group = group_id, user = %id, "dangling member id"),
            }
        }
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn both(ids: &[&str]) -> Membership {
        Membership { listed: set(ids), attached: set(ids) }
    }

    #[test]
    fn test_plan_is_symmetric_difference() {
        let plan = MembershipPlan::repair(&both(&["a", "b", "c"]), &set(&["b", "c", "d"]));
        assert_eq!(plan.to_add, set(&["d"]));
        assert_eq!(plan.to_remove, set(&["a"]));
        assert_eq!(plan.affected().count(), 2);
    }

    #[test]
    fn test_repair_plan_sees_both_sides() {
        let m = Membership { listed: set(&["a", "b"]), attached: set(&["b", "c"]) };
        // a is listed but points elsewhere, c points here but is unlisted
        let plan = MembershipPlan::repair(&m, &set(&["a", "b"]));
        assert_eq!(plan.to_add, set(&["a"]));
        assert_eq!(plan.to_remove, set(&["c"]));

        let consistent = Membership { listed: set(&["a"]), attached: set(&["a"]) };
        assert!(MembershipPlan::repair(&consistent, &set(&["a"])).is_noop());
    }

    #[test]
    fn test_plan_noop() {
        assert!(MembershipPlan::repair(&both(&["a"]), &set(&["a"])).is_noop());
        assert!(MembershipPlan::repair(&both(&[]), &set(&[])).is_noop());
    }
}
