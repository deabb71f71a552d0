//! Exclusive access to sets of entities
//!
//! A caller names every entity it will read-modify-write and acquires them
//! all at once; acquisition never holds a partial set, so two writers with
//! overlapping sets cannot deadlock.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Condvar, Mutex};

use crate::constants::{DEFAULT_LOCK_ATTEMPTS, GROUP_KIND, USER_KIND};
use crate::error::{GrantError, Result};

#[inline]
pub fn group_key(id: &str) -> String {
    format!("{}/{}", GROUP_KIND, id)
}

#[inline]
pub fn user_key(id: &str) -> String {
    format!("{}/{}", USER_KIND, id)
}

pub struct EntityLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
    attempts: usize,
}

/// Releases its keys on drop.
pub struct EntityLockGuard<'a> {
    locks: &'a EntityLocks,
    keys: BTreeSet<String>,
}

impl EntityLockGuard<'_> {
    pub fn covers(&self, keys: &BTreeSet<String>) -> bool {
        keys.is_subset(&self.keys)
    }

    pub fn keys(&self) -> &BTreeSet<String> {
        &self.keys
    }
}

impl Drop for EntityLockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(|p| p.into_inner());
        for k in &self.keys {
            held.remove(k);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::with_attempts(DEFAULT_LOCK_ATTEMPTS)
    }

    /// `attempts` bounds how often `acquire_stable` may widen its key set.
    pub fn with_attempts(attempts: usize) -> Self {
        EntityLocks { held: Mutex::new(HashSet::new()), released: Condvar::new(), attempts: attempts.max(1) }
    }

    /// Block until no key in `keys` is held, then hold all of them.
    pub fn acquire(&self, keys: BTreeSet<String>) -> EntityLockGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        while keys.iter().any(|k| held.contains(k)) {
            held = self.released.wait(held).unwrap_or_else(|p| p.into_inner());
        }
        held.extend(keys.iter().cloned());
        EntityLockGuard { locks: self, keys }
    }

    /// Acquire the keys reported by `keys_of`, which reads current state.
    /// After locking, `keys_of` runs again; if the set grew (state moved
    /// between the read and the lock) the lock is released and retaken over
    /// the union. Gives up with `Conflict` after the configured attempts.
    pub fn acquire_stable<F>(&self, what: &'static str, id: &str, mut keys_of: F) -> Result<EntityLockGuard<'_>>
    where
        F: FnMut() -> Result<BTreeSet<String>>,
    {
        let mut wanted = keys_of()?;
        for _ in 0..self.attempts {
            let guard = self.acquire(wanted.clone());
            let now = keys_of()?;
            if guard.covers(&now) {
                return Ok(guard);
            }
            drop(guard);
            tracing::debug!(kind = what, id, "lock set changed while acquiring, widening");
            wanted.extend(now);
        }
        Err(GrantError::conflict(what, id))
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Default for EntityLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn keys(ks: &[&str]) -> BTreeSet<String> {
        ks.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_guard_releases() {
        let locks = EntityLocks::new();
        {
            let _g = locks.acquire(keys(&["group/a", "user/1"]));
            assert_eq!(locks.held_count(), 2);
        }
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn test_overlapping_sets_serialize() {
        let locks = Arc::new(EntityLocks::new());
        let counter = Arc::new(Mutex::new(Vec::new()));
        let g = locks.acquire(keys(&["group/a"]));

        let (l2, c2) = (Arc::clone(&locks), Arc::clone(&counter));
        let h = thread::spawn(move || {
            let _g = l2.acquire(keys(&["group/a", "user/9"]));
            c2.lock().unwrap().push("second");
        });

        thread::sleep(Duration::from_millis(50));
        counter.lock().unwrap().push("first");
        drop(g);
        h.join().unwrap();
        assert_eq!(*counter.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_acquire_stable_widens() {
        let locks = EntityLocks::new();
        let mut calls = 0;
        let g = locks
            .acquire_stable("group", "a", || {
                calls += 1;
                Ok(if calls == 1 { keys(&["group/a"]) } else { keys(&["group/a", "group/b"]) })
            })
            .unwrap();
        assert!(g.keys().contains("group/b"));
    }

    #[test]
    fn test_acquire_stable_gives_up() {
        let locks = EntityLocks::with_attempts(2);
        let mut n = 0;
        let r = locks.acquire_stable("group", "a", || {
            n += 1;
            Ok(keys(&[format!("user/{}", n).as_str()]))
        });
        assert!(matches!(r, Err(GrantError::Conflict { .. })));
        assert_eq!(locks.held_count(), 0);
    }
}
