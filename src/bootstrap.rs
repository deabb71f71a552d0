//! Bootstrap and first-administrator initialization

use crate::constants::{PermissionType, Scope};
use crate::entity::{new_id, User};
use crate::error::{GrantError, Result};
use crate::grant::AuthorizationGrant;
use crate::repo::Repository;

/// Bootstrapped once any user exists
pub fn is_bootstrapped(users: &dyn Repository<User>) -> Result<bool> {
    Ok(!users.get_all()?.is_empty())
}

/// Create the first user with SERVER/ADMIN. Callers serialize concurrent
/// bootstraps themselves.
pub fn bootstrap(users: &dyn Repository<User>, name: &str) -> Result<User> {
    if is_bootstrapped(users)? {
        return Err(GrantError::validation("already bootstrapped"));
    }
    let admin = User::new(new_id()?, name)
        .with_grants(vec![AuthorizationGrant::new(Scope::Server, PermissionType::Admin)]);
    let admin = users.save(admin)?;
    tracing::info!(user = %admin.id, name, "bootstrapped first administrator");
    Ok(admin)
}
