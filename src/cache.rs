//! Per-user memo of resolved grants
//!
//! Each user has a monotonically increasing stamp. Invalidation bumps the
//! stamp and drops the entry while holding the stamp's shard lock; population
//! takes the same lock and only stores a value computed under the current
//! stamp. A resolution that raced an invalidation is therefore returned to
//! its caller but never cached.
//!
//! Forgetting a deleted user drops its stamp; `floor` stays above every
//! stamp ever dropped, so a recreated id never reuses an older stamp.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::constants::DEFAULT_CACHE_CAPACITY;
use crate::error::Result;
use crate::resolver::ResolvedGrantSet;

struct Cached {
    resolved: Arc<ResolvedGrantSet>,
    stamp: u64,
}

pub struct GrantCache {
    entries: DashMap<String, Cached>,
    stamps: DashMap<String, u64>,
    floor: AtomicU64,
    capacity: usize,
}

impl GrantCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// `capacity` bounds the number of memoized users; 0 disables caching.
    pub fn with_capacity(capacity: usize) -> Self {
        GrantCache { entries: DashMap::new(), stamps: DashMap::new(), floor: AtomicU64::new(0), capacity }
    }

    /// Current version stamp of a user
    pub fn stamp(&self, user_id: &str) -> u64 {
        match self.stamps.get(user_id) {
            Some(s) => *s,
            None => self.floor.load(Ordering::SeqCst),
        }
    }

    /// Number of users with a tracked stamp
    pub fn tracked(&self) -> usize {
        self.stamps.len()
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<ResolvedGrantSet>> {
        self.entries.get(user_id).map(|e| Arc::clone(&e.resolved))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the memoized set, or compute, store and return it.
    pub fn get_or_resolve<F>(&self, user_id: &str, compute: F) -> Result<Arc<ResolvedGrantSet>>
    where
        F: FnOnce() -> Result<ResolvedGrantSet>,
    {
        if let Some(hit) = self.get(user_id) {
            tracing::trace!(user = user_id, "grant cache hit");
            return Ok(hit);
        }
        let observed = self.stamp(user_id);
        let resolved = Arc::new(compute()?);
        tracing::debug!(user = user_id, stamp = observed, grants = resolved.len(), "grant cache miss");
        self.populate(user_id, observed, Arc::clone(&resolved));
        Ok(resolved)
    }

    /// Store `resolved` if the user's stamp is still `observed`.
    /// Returns whether the value was stored.
    pub fn populate(&self, user_id: &str, observed: u64, resolved: Arc<ResolvedGrantSet>) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let stamp = self.stamps.entry(user_id.to_string()).or_insert_with(|| self.floor.load(Ordering::SeqCst));
        if *stamp != observed {
            tracing::debug!(user = user_id, observed, current = *stamp, "discarding stale resolution");
            return false;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(user_id) {
            self.evict_one();
        }
        self.entries.insert(user_id.to_string(), Cached { resolved, stamp: *stamp });
        true
    }

    /// Drop a user's entry and advance its stamp.
    pub fn invalidate(&self, user_id: &str) {
        let mut stamp = self.stamps.entry(user_id.to_string()).or_insert_with(|| self.floor.load(Ordering::SeqCst));
        *stamp += 1;
        self.entries.remove(user_id);
    }

    /// Invalidate a user that no longer exists and stop tracking it.
    pub fn forget(&self, user_id: &str) {
        self.invalidate(user_id);
        if let Some(stamp) = self.stamps.get(user_id) {
            // raise the floor while the shard is held so no populate slips in
            self.floor.fetch_max(*stamp + 1, Ordering::SeqCst);
        }
        self.stamps.remove(user_id);
        self.entries.remove(user_id);
    }

    pub fn invalidate_all<'a, I>(&self, user_ids: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut n = 0usize;
        for id in user_ids {
            self.invalidate(id);
            n += 1;
        }
        tracing::debug!(users = n, "invalidated grant cache entries");
    }

    /// True if the cached value for a user was computed under its current stamp.
    pub fn is_fresh(&self, user_id: &str) -> bool {
        // entries guard must be released before touching stamps (lock order)
        let cached = self.entries.get(user_id).map(|e| e.stamp);
        cached == Some(self.stamp(user_id))
    }

    fn evict_one(&self) {
        let victim = self.entries.iter().next().map(|e| e.key().clone());
        if let Some(id) = victim {
            self.entries.remove(&id);
        }
    }
}

impl Default for GrantCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects user ids touched by a mutation and invalidates them on drop,
/// whether the mutation returned normally, failed midway or unwound.
pub struct InvalidationBatch<'a> {
    cache: &'a GrantCache,
    users: BTreeSet<String>,
    forgotten: BTreeSet<String>,
}

impl<'a> InvalidationBatch<'a> {
    pub fn new(cache: &'a GrantCache) -> Self {
        InvalidationBatch { cache, users: BTreeSet::new(), forgotten: BTreeSet::new() }
    }

    pub fn add(&mut self, user_id: impl Into<String>) {
        self.users.insert(user_id.into());
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, ids: I) {
        self.users.extend(ids);
    }

    /// The user was deleted: forget it instead of only invalidating.
    pub fn forget(&mut self, user_id: &str) {
        self.users.remove(user_id);
        self.forgotten.insert(user_id.to_string());
    }

    pub fn len(&self) -> usize {
        self.users.len() + self.forgotten.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.forgotten.is_empty()
    }
}

impl Drop for InvalidationBatch<'_> {
    fn drop(&mut self) {
        if !self.users.is_empty() {
            self.cache.invalidate_all(self.users.iter());
        }
        for id in &self.forgotten {
            self.cache.forget(id);
        }
    }
}
