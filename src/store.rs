//! In-memory credential table.
//!
//! One `RwLock` guards the whole table: identity → versions (ascending), plus
//! an optional secondary index from a derived lookup key (the API-key hash) to
//! `(identity, version)`. Readers run concurrently; every mutation is
//! exclusive. Nothing inside the lock performs I/O.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// `now + ttl`, saturating at the largest representable instant.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A record the store can hold.
pub trait CredentialRecord: Clone + Send + Sync + 'static {
    fn identity(&self) -> &str;
    fn version(&self) -> u32;
    fn is_active(&self) -> bool;
    fn expires_at(&self) -> DateTime<Utc>;

    /// Secondary index key. Must not change while the record is stored.
    fn lookup_key(&self) -> Option<&str> {
        None
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// Whether a sweep at `now` removes this record.
    fn is_sweepable(&self, now: DateTime<Utc>) -> bool {
        self.is_expired(now) && !self.is_active()
    }
}

struct Table<R> {
    entries: HashMap<String, Vec<R>>,
    index: HashMap<String, (String, u32)>,
}

impl<R: CredentialRecord> Table<R> {
    fn index_record(&mut self, rec: &R) {
        if let Some(key) = rec.lookup_key() {
            self.index
                .insert(key.to_string(), (rec.identity().to_string(), rec.version()));
        }
    }

    fn unindex_record(&mut self, rec: &R) {
        if let Some(key) = rec.lookup_key() {
            self.index.remove(key);
        }
    }
}

pub struct CredentialStore<R> {
    inner: RwLock<Table<R>>,
}

impl<R: CredentialRecord> Default for CredentialStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CredentialRecord> CredentialStore<R> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Table {
                entries: HashMap::new(),
                index: HashMap::new(),
            }),
        }
    }

    // Poisoning is ignored: no mutation below leaves a partially written record.
    fn read(&self) -> RwLockReadGuard<'_, Table<R>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table<R>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite the record at its `(identity, version)`.
    pub fn put(&self, record: R) {
        let mut table = self.write();
        let identity = record.identity().to_string();
        let version = record.version();

        let previous = table.entries.get_mut(&identity).and_then(|versions| {
            versions
                .iter()
                .position(|r| r.version() == version)
                .map(|pos| versions.remove(pos))
        });
        if let Some(old) = previous {
            table.unindex_record(&old);
        }

        table.index_record(&record);
        let versions = table.entries.entry(identity).or_default();
        let pos = versions.partition_point(|r| r.version() < version);
        versions.insert(pos, record);
    }

    /// Latest active version.
    pub fn get(&self, identity: &str) -> Option<R> {
        self.read()
            .entries
            .get(identity)
            .and_then(|versions| versions.iter().rev().find(|r| r.is_active()).cloned())
    }

    /// Highest version regardless of state.
    pub fn latest(&self, identity: &str) -> Option<R> {
        self.read()
            .entries
            .get(identity)
            .and_then(|versions| versions.last().cloned())
    }

    pub fn get_version(&self, identity: &str, version: u32) -> Option<R> {
        self.read().entries.get(identity).and_then(|versions| {
            versions
                .iter()
                .find(|r| r.version() == version)
                .cloned()
        })
    }

    /// All versions, oldest first. Empty when the identity is unknown.
    pub fn all_versions(&self, identity: &str) -> Vec<R> {
        self.read()
            .entries
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    /// Resolve a record through the secondary index.
    pub fn find_by_lookup_key(&self, key: &str) -> Option<R> {
        let table = self.read();
        let (identity, version) = table.index.get(key)?;
        table
            .entries
            .get(identity)
            .and_then(|versions| versions.iter().find(|r| r.version() == *version))
            .cloned()
    }

    /// Latest version of every identity.
    pub fn latest_per_identity(&self) -> Vec<R> {
        self.read()
            .entries
            .values()
            .filter_map(|versions| versions.last().cloned())
            .collect()
    }

    /// Run `f` over the identity's versions under the write lock. Records left
    /// in the vector are re-sorted and re-indexed; an emptied vector removes the
    /// identity. Returns `None` when the identity is unknown.
    pub fn update<T>(&self, identity: &str, f: impl FnOnce(&mut Vec<R>) -> T) -> Option<T> {
        let mut table = self.write();
        let versions = table.entries.remove(identity)?;
        Some(Self::apply(&mut table, identity, versions, f))
    }

    /// Like [`update`](Self::update), starting from an empty vector when the
    /// identity is unknown.
    pub fn upsert<T>(&self, identity: &str, f: impl FnOnce(&mut Vec<R>) -> T) -> T {
        let mut table = self.write();
        let versions = table.entries.remove(identity).unwrap_or_default();
        Self::apply(&mut table, identity, versions, f)
    }

    fn apply<T>(
        table: &mut Table<R>,
        identity: &str,
        mut versions: Vec<R>,
        f: impl FnOnce(&mut Vec<R>) -> T,
    ) -> T {
        for rec in &versions {
            table.unindex_record(rec);
        }

        let out = f(&mut versions);

        versions.sort_by_key(|r| r.version());
        for rec in &versions {
            table.index_record(rec);
        }
        if !versions.is_empty() {
            table.entries.insert(identity.to_string(), versions);
        }
        out
    }

    /// Remove every version. Returns how many were removed.
    pub fn delete(&self, identity: &str) -> usize {
        let mut table = self.write();
        match table.entries.remove(identity) {
            Some(versions) => {
                for rec in &versions {
                    table.unindex_record(rec);
                }
                versions.len()
            }
            None => 0,
        }
    }

    pub fn delete_version(&self, identity: &str, version: u32) -> bool {
        self.update(identity, |versions| {
            let before = versions.len();
            versions.retain(|r| r.version() != version);
            versions.len() < before
        })
        .unwrap_or(false)
    }

    /// Remove every record for which [`CredentialRecord::is_sweepable`] holds.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut table = self.write();
        let mut dropped_keys: Vec<String> = Vec::new();
        let mut removed = 0usize;

        table.entries.retain(|_, versions| {
            versions.retain(|r| {
                if r.is_sweepable(now) {
                    if let Some(key) = r.lookup_key() {
                        dropped_keys.push(key.to_string());
                    }
                    removed += 1;
                    false
                } else {
                    true
                }
            });
            !versions.is_empty()
        });
        for key in dropped_keys {
            table.index.remove(&key);
        }
        removed
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records across all identities.
    pub fn record_count(&self) -> usize {
        self.read().entries.values().map(Vec::len).sum()
    }
}
