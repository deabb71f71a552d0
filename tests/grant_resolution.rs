//! Grant model, resolver and gate tests
//!
//! These are pure: no repository, no cache.

use grantward::resolver::{dedupe_grants, normalize};
use grantward::{
    canonical_order, check, dedupe, resolve, AuthorizationGrant, Decision, GrantError, GrantRecord,
    PermissionType, Required, Scope, User, UserGroup,
};

use grantward::PermissionType::{Admin, None as Nothing, Operate, View};

fn g(scope: Scope, t: PermissionType) -> AuthorizationGrant {
    AuthorizationGrant::new(scope, t)
}

fn on(scope: Scope, t: PermissionType, target: &str) -> AuthorizationGrant {
    AuthorizationGrant::on(scope, t, target)
}

// ============================================================================
// dedupe
// ============================================================================

#[test]
fn test_dedupe_keeps_max_rank_per_key() {
    let input = vec![
        g(Scope::Server, View),
        on(Scope::Pipeline, Operate, "p1"),
        g(Scope::Server, Admin),
        on(Scope::Pipeline, View, "p1"),
        g(Scope::Server, Nothing),
        on(Scope::Pipeline, Admin, "p2"),
    ];
    let out = dedupe_grants(input);
    assert_eq!(out.len(), 3);
    assert_eq!(out[0], g(Scope::Server, Admin));
    assert_eq!(out[1], on(Scope::Pipeline, Operate, "p1"));
    assert_eq!(out[2], on(Scope::Pipeline, Admin, "p2"));
}

#[test]
fn test_dedupe_tie_keeps_first_occurrence() {
    let out = dedupe_grants(vec![
        g(Scope::Environment, Operate).inherited(true),
        g(Scope::Environment, Operate),
    ]);
    assert_eq!(out.len(), 1);
    assert!(out[0].inherited);
}

#[test]
fn test_dedupe_one_entry_per_identity_key() {
    // every (scope, target) pair appears with every type
    let scopes = [Scope::Server, Scope::PipelineGroup, Scope::Pipeline, Scope::Environment];
    let types = [Nothing, View, Operate, Admin];
    let targets = [None, Some("a"), Some("b")];
    let mut input = Vec::new();
    for (i, &s) in scopes.iter().enumerate() {
        for t in targets {
            for k in 0..types.len() {
                // rotate so the max is not always last
                let ty = types[(k + i) % types.len()];
                input.push(match t {
                    Some(t) => on(s, ty, t),
                    None => g(s, ty),
                });
            }
        }
    }
    let out = dedupe_grants(input);
    assert_eq!(out.len(), scopes.len() * targets.len());
    assert!(out.iter().all(|g| g.permission_type == Admin));
    let mut keys: Vec<_> = out.iter().map(|g| g.identity_key()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), out.len());
}

#[test]
fn test_dedupe_rejects_malformed_records() {
    let records = vec![
        GrantRecord::new("SERVER", "ADMIN", None),
        GrantRecord::new("CLUSTER", "ADMIN", None),
    ];
    assert!(matches!(dedupe(&records), Err(GrantError::Validation(_))));

    let records = vec![GrantRecord::new("PIPELINE", "SUPERUSER", Some("p1"))];
    assert!(matches!(dedupe(&records), Err(GrantError::Validation(_))));
}

#[test]
fn test_dedupe_records_normalizes_blank_target() {
    let records = vec![
        GrantRecord::new("pipeline", "view", Some("")),
        GrantRecord::new("PIPELINE", "OPERATE", None),
    ];
    let out = dedupe(&records).unwrap();
    assert_eq!(out, vec![g(Scope::Pipeline, Operate)]);
}

// ============================================================================
// canonical_order
// ============================================================================

#[test]
fn test_targeted_before_scope_wide() {
    let out = canonical_order(vec![
        g(Scope::Pipeline, Admin),
        on(Scope::Pipeline, View, "p1"),
    ]);
    assert_eq!(out[0], on(Scope::Pipeline, View, "p1"));
    assert_eq!(out[1], g(Scope::Pipeline, Admin));
}

#[test]
fn test_descending_rank_within_specificity() {
    let out = canonical_order(vec![
        g(Scope::Server, View),
        g(Scope::Environment, Admin),
        g(Scope::Pipeline, Operate),
    ]);
    let ranks: Vec<u8> = out.iter().map(|g| g.rank()).collect();
    assert_eq!(ranks, vec![3, 2, 1]);
}

#[test]
fn test_canonical_order_is_deterministic() {
    let base = vec![
        g(Scope::Server, View),
        on(Scope::Pipeline, View, "b"),
        on(Scope::Pipeline, View, "a"),
        g(Scope::Environment, View),
        on(Scope::Environment, Admin, "prod"),
    ];
    let expected = canonical_order(base.clone());
    for shift in 0..base.len() {
        let mut rotated = base.clone();
        rotated.rotate_left(shift);
        assert_eq!(canonical_order(rotated.clone()), expected);
        rotated.reverse();
        assert_eq!(canonical_order(rotated), expected);
    }
}

// ============================================================================
// resolve
// ============================================================================

#[test]
fn test_direct_beats_inherited_on_tie() {
    let user = User::new("u", "alice").with_grants(vec![g(Scope::Server, View)]);
    let mut group = UserGroup::new("g", "devs");
    group.own_grants = vec![g(Scope::Server, View).inherited(true)];

    let resolved = resolve(&user, Some(&group));
    assert_eq!(resolved.grants, vec![g(Scope::Server, View)]);
    assert!(!resolved.grants[0].inherited);
}

#[test]
fn test_higher_inherited_grant_wins() {
    let user = User::new("u", "alice").with_grants(vec![g(Scope::Server, View)]);
    let mut group = UserGroup::new("g", "ops");
    group.own_grants = vec![g(Scope::Server, Admin).inherited(true)];

    let resolved = resolve(&user, Some(&group));
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved.grants[0].permission_type, Admin);
    assert!(resolved.grants[0].inherited);
}

#[test]
fn test_resolve_marks_origin() {
    // stored flags are not trusted; origin decides
    let mut user = User::new("u", "alice");
    user.direct_grants = vec![on(Scope::Pipeline, Operate, "p1").inherited(true)];
    let mut group = UserGroup::new("g", "ops");
    group.own_grants = vec![g(Scope::Environment, View)];

    let resolved = resolve(&user, Some(&group));
    assert_eq!(resolved.user_id, "u");
    assert_eq!(
        resolved.grants,
        vec![
            on(Scope::Pipeline, Operate, "p1"),
            g(Scope::Environment, View).inherited(true),
        ]
    );
}

#[test]
fn test_resolve_without_group() {
    let user = User::new("u", "alice");
    assert!(resolve(&user, None).is_empty());
}

#[test]
fn test_normalize_matches_resolve_for_direct_only() {
    let grants = vec![g(Scope::Server, View), on(Scope::Pipeline, Admin, "p"), g(Scope::Server, Operate)];
    let user = User::new("u", "alice").with_grants(grants.clone());
    assert_eq!(resolve(&user, None).grants, normalize(grants));
}

// ============================================================================
// check
// ============================================================================

fn resolved_with(grants: Vec<AuthorizationGrant>) -> grantward::ResolvedGrantSet {
    resolve(&User::new("u", "alice").with_grants(grants), None)
}

#[test]
fn test_check_first_applicable_grant_decides() {
    let set = resolved_with(vec![g(Scope::Pipeline, Admin), on(Scope::Pipeline, View, "p1")]);

    // targeted VIEW on p1 is consulted first and is too weak
    assert_eq!(check(&set, &Required::on(Scope::Pipeline, Admin, "p1")), Decision::Deny);
    assert_eq!(check(&set, &Required::on(Scope::Pipeline, View, "p1")), Decision::Allow);
    // other targets fall through to the scope-wide grant
    assert_eq!(check(&set, &Required::on(Scope::Pipeline, Admin, "p2")), Decision::Allow);
    // a scope-wide requirement ignores targeted grants
    assert_eq!(check(&set, &Required::new(Scope::Pipeline, Operate)), Decision::Allow);
}

#[test]
fn test_check_scope_must_match() {
    let set = resolved_with(vec![g(Scope::Server, Admin)]);
    assert_eq!(check(&set, &Required::new(Scope::Server, Admin)), Decision::Allow);
    assert_eq!(check(&set, &Required::new(Scope::Environment, View)), Decision::Deny);
}

#[test]
fn test_check_rank_comparison() {
    let set = resolved_with(vec![g(Scope::Environment, Operate)]);
    assert!(check(&set, &Required::new(Scope::Environment, Nothing)).is_allow());
    assert!(check(&set, &Required::new(Scope::Environment, View)).is_allow());
    assert!(check(&set, &Required::new(Scope::Environment, Operate)).is_allow());
    assert!(!check(&set, &Required::new(Scope::Environment, Admin)).is_allow());
}

#[test]
fn test_wire_record_shape() {
    let grant = on(Scope::PipelineGroup, Operate, "pg1").inherited(true);
    let v = serde_json::to_value(&grant).unwrap();
    assert_eq!(v["scope"], "PIPELINE_GROUP");
    assert_eq!(v["type"], "OPERATE");
    assert_eq!(v["targetId"], "pg1");
    assert_eq!(v["inherited"], true);

    let back: AuthorizationGrant = serde_json::from_value(v).unwrap();
    assert_eq!(back, grant);
}
