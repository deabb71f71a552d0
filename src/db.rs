//! LMDB-backed repositories
//!
//! Layout (one environment, three named databases):
//! - `users`    : user id  -> User (JSON)
//! - `groups`   : group id -> UserGroup (JSON)
//! - `versions` : kind/id  -> version (u64, big endian)
//!
//! Every save and delete runs in a single write transaction with the version
//! check inside it, so two writers racing on the same entity cannot both win.

use std::path::Path;

use byteorder::BigEndian;
use heed::types::{SerdeJson, Str, U64};
use heed::{Database, Env, EnvOpenOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::constants::DEFAULT_MAP_SIZE;
use crate::entity::{User, UserGroup};
use crate::error::{err, GrantError, Result};
use crate::repo::{next_version, Entity, Repository};

pub type VersionDb = Database<Str, U64<BigEndian>>;
pub type BodyDb<E> = Database<Str, SerdeJson<E>>;

#[inline]
fn version_key(kind: &str, id: &str) -> String {
    format!("{}/{}", kind, id)
}

/// Opened LMDB environment with all database handles
pub struct Store {
    env: Env,
    users: BodyDb<User>,
    groups: BodyDb<UserGroup>,
    versions: VersionDb,
}

impl Store {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    pub fn open_with_map_size(path: impl AsRef<Path>, map_size: usize) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(err)?;
        // SAFETY: LMDB requires no other processes access this path concurrently during open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(3)
                .open(path)
                .map_err(err)?
        };
        let mut tx = env.write_txn().map_err(err)?;
        let users = env.create_database(&mut tx, Some("users")).map_err(err)?;
        let groups = env.create_database(&mut tx, Some("groups")).map_err(err)?;
        let versions = env.create_database(&mut tx, Some("versions")).map_err(err)?;
        tx.commit().map_err(err)?;
        tracing::debug!(path = %path.display(), "opened grant store");
        Ok(Store { env, users, groups, versions })
    }

    pub fn users(&self) -> LmdbRepository<User> {
        LmdbRepository { env: self.env.clone(), bodies: self.users, versions: self.versions }
    }

    pub fn groups(&self) -> LmdbRepository<UserGroup> {
        LmdbRepository { env: self.env.clone(), bodies: self.groups, versions: self.versions }
    }

    /// Clear all databases (for testing)
    pub fn clear_all(&self) -> Result<()> {
        let mut tx = self.env.write_txn().map_err(err)?;
        self.users.clear(&mut tx).map_err(err)?;
        self.groups.clear(&mut tx).map_err(err)?;
        self.versions.clear(&mut tx).map_err(err)?;
        tx.commit().map_err(err)
    }
}

/// Repository for one entity kind inside a [`Store`]
pub struct LmdbRepository<E: 'static> {
    env: Env,
    bodies: BodyDb<E>,
    versions: VersionDb,
}

impl<E> Repository<E> for LmdbRepository<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    fn get(&self, id: &str) -> Result<E> {
        let tx = self.env.read_txn().map_err(err)?;
        self.bodies
            .get(&tx, id)
            .map_err(err)?
            .ok_or_else(|| GrantError::not_found(E::KIND, id))
    }

    fn get_all(&self) -> Result<Vec<E>> {
        let tx = self.env.read_txn().map_err(err)?;
        let mut r = Vec::new();
        for item in self.bodies.iter(&tx).map_err(err)? {
            let (_, e) = item.map_err(err)?;
            r.push(e);
        }
        Ok(r)
    }

    fn save(&self, mut entity: E) -> Result<E> {
        let mut tx = self.env.write_txn().map_err(err)?;
        let vkey = version_key(E::KIND, entity.id());
        let stored = self.versions.get(&tx, &vkey).map_err(err)?;
        let version = next_version(&entity, stored)?;
        entity.set_version(version);
        self.bodies.put(&mut tx, entity.id(), &entity).map_err(err)?;
        self.versions.put(&mut tx, &vkey, &version).map_err(err)?;
        tx.commit().map_err(err)?;
        Ok(entity)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self.env.write_txn().map_err(err)?;
        if !self.bodies.delete(&mut tx, id).map_err(err)? {
            return Err(GrantError::not_found(E::KIND, id));
        }
        self.versions.delete(&mut tx, &version_key(E::KIND, id)).map_err(err)?;
        tx.commit().map_err(err)
    }
}
