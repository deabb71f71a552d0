//! Persistence abstraction
//!
//! The repository is the sole source of truth for users and groups. Saves are
//! optimistic: the submitted entity carries the version it was read at, and a
//! mismatch with the stored version is reported as a conflict rather than
//! silently overwritten.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{GrantError, Result};

/// A persisted record with a string id and an optimistic version counter.
pub trait Entity: Clone + Send + Sync + 'static {
    const KIND: &'static str;
    fn id(&self) -> &str;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

/// CRUD access to one entity kind.
pub trait Repository<E: Entity>: Send + Sync {
    /// Fetch by id, `NotFound` if absent
    fn get(&self, id: &str) -> Result<E>;
    /// All stored entities, ordered by id
    fn get_all(&self) -> Result<Vec<E>>;
    /// Store `entity` if its version matches the stored one (0 when new).
    /// Returns the entity with its new version.
    fn save(&self, entity: E) -> Result<E>;
    /// Remove by id, `NotFound` if absent
    fn delete(&self, id: &str) -> Result<()>;

    /// Fetch by id, `None` if absent
    fn find(&self, id: &str) -> Result<Option<E>> {
        match self.get(id) {
            Ok(e) => Ok(Some(e)),
            Err(GrantError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Version check shared by every repository implementation.
pub(crate) fn next_version<E: Entity>(entity: &E, stored: Option<u64>) -> Result<u64> {
    match stored {
        Some(v) if v == entity.version() => Ok(v + 1),
        None if entity.version() == 0 => Ok(1),
        _ => Err(GrantError::conflict(E::KIND, entity.id())),
    }
}

/// In-process repository backed by a `BTreeMap`.
pub struct MemoryRepository<E: Entity> {
    rows: RwLock<BTreeMap<String, E>>,
}

impl<E: Entity> MemoryRepository<E> {
    pub fn new() -> Self {
        MemoryRepository { rows: RwLock::new(BTreeMap::new()) }
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Entity> Default for MemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Repository<E> for MemoryRepository<E> {
    fn get(&self, id: &str) -> Result<E> {
        self.rows
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| GrantError::not_found(E::KIND, id))
    }

    fn get_all(&self) -> Result<Vec<E>> {
        Ok(self.rows.read().unwrap_or_else(|p| p.into_inner()).values().cloned().collect())
    }

    fn save(&self, mut entity: E) -> Result<E> {
        let mut rows = self.rows.write().unwrap_or_else(|p| p.into_inner());
        let version = next_version(&entity, rows.get(entity.id()).map(Entity::version))?;
        entity.set_version(version);
        rows.insert(entity.id().to_string(), entity.clone());
        Ok(entity)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.rows
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GrantError::not_found(E::KIND, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::User;

    #[test]
    fn test_save_bumps_version() {
        let repo = MemoryRepository::<User>::new();
        let saved = repo.save(User::new("u1", "alice")).unwrap();
        assert_eq!(saved.version, 1);
        let saved = repo.save(saved).unwrap();
        assert_eq!(saved.version, 2);
        assert_eq!(repo.get("u1").unwrap().version, 2);
    }

    #[test]
    fn test_stale_save_conflicts() {
        let repo = MemoryRepository::<User>::new();
        let first = repo.save(User::new("u1", "alice")).unwrap();
        repo.save(first.clone()).unwrap();
        assert!(matches!(repo.save(first), Err(GrantError::Conflict { .. })));
        // Re-creating an existing id is also a conflict
        assert!(matches!(repo.save(User::new("u1", "bob")), Err(GrantError::Conflict { .. })));
    }

    #[test]
    fn test_missing_entities() {
        let repo = MemoryRepository::<User>::new();
        assert!(matches!(repo.get("nope"), Err(GrantError::NotFound { .. })));
        assert!(matches!(repo.delete("nope"), Err(GrantError::NotFound { .. })));
        assert_eq!(repo.find("nope").unwrap(), None);
    }
}
