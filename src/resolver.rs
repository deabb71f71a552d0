//! Grant resolution: dedupe, canonical ordering and per-user resolution
//!
//! `resolve` feeds direct grants before inherited ones, so on a rank tie for
//! the same `(scope, target)` the direct grant is the first occurrence and
//! wins. A higher-ranked grant always wins regardless of origin.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entity::{User, UserGroup};
use crate::error::Result;
use crate::grant::{parse_records, AuthorizationGrant, GrantRecord, IdentityKey};

/// Keep one grant per identity key: the highest rank, first occurrence on ties.
/// Output keeps the position of each key's first appearance.
pub fn dedupe_grants<I>(grants: I) -> Vec<AuthorizationGrant>
where
    I: IntoIterator<Item = AuthorizationGrant>,
{
    let mut out: Vec<AuthorizationGrant> = Vec::new();
    let mut slots: HashMap<IdentityKey, usize> = HashMap::new();
    for g in grants {
        match slots.get(&g.identity_key()) {
            Some(&i) => {
                if g.rank() > out[i].rank() {
                    out[i] = g;
                }
            }
            None => {
                slots.insert(g.identity_key(), out.len());
                out.push(g);
            }
        }
    }
    out
}

/// Validate submitted records, then dedupe them.
pub fn dedupe(records: &[GrantRecord]) -> Result<Vec<AuthorizationGrant>> {
    Ok(dedupe_grants(parse_records(records)?))
}

/// Targeted grants first, then descending rank; scope and target break the
/// remaining ties so any permutation of the same set orders identically.
pub fn canonical_order(mut grants: Vec<AuthorizationGrant>) -> Vec<AuthorizationGrant> {
    grants.sort_by(|a, b| {
        (a.is_scope_wide(), Reverse(a.rank()), a.scope, &a.target_id, a.inherited).cmp(&(
            b.is_scope_wide(),
            Reverse(b.rank()),
            b.scope,
            &b.target_id,
            b.inherited,
        ))
    });
    grants
}

/// Dedupe then order. What gets stored on a group or user.
pub fn normalize(grants: Vec<AuthorizationGrant>) -> Vec<AuthorizationGrant> {
    canonical_order(dedupe_grants(grants))
}

/// Deduplicated, canonically ordered effective grants of one user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedGrantSet {
    pub user_id: String,
    pub grants: Vec<AuthorizationGrant>,
}

impl ResolvedGrantSet {
    pub fn iter(&self) -> std::slice::Iter<'_, AuthorizationGrant> {
        self.grants.iter()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

/// Resolve a user's effective grants from its direct grants and its group's.
pub fn resolve(user: &User, group: Option<&UserGroup>) -> ResolvedGrantSet {
    let direct = user.direct_grants.iter().cloned().map(|g| g.inherited(false));
    let inherited = group
        .into_iter()
        .flat_map(|g| g.own_grants.iter().cloned())
        .map(|g| g.inherited(true));
    ResolvedGrantSet {
        user_id: user.id.clone(),
        grants: canonical_order(dedupe_grants(direct.chain(inherited))),
    }
}
