//! In-memory entry store for one category
//!
//! A `Store` is a plain map of key to timestamped entry plus a dirty bit that
//! tells the persistence layer whether anything changed since the last save.
//! Staleness is judged against the category's TTL; stale entries are kept (not
//! evicted) so best-effort readers can still see them.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Utc};

use super::category::CacheCategory;

/// One cached value with the time its fetch completed.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    /// The cached value
    pub value: V,
    /// When the upstream fetch that produced this value completed
    pub fetched_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    /// Whether this entry is past its category's TTL at `now`.
    pub fn is_stale(&self, category: CacheCategory, now: DateTime<Utc>) -> bool {
        now > self.fetched_at + category.ttl()
    }
}

/// Per-category map of key to entry, with a "dirty since last save" bit.
///
/// Singleton categories use `()` as the key type; everything else keys by a
/// structured value.
#[derive(Debug)]
pub struct Store<K, V> {
    category: CacheCategory,
    entries: HashMap<K, CacheEntry<V>>,
    dirty: bool,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash,
{
    pub fn new(category: CacheCategory) -> Self {
        Self {
            category,
            entries: HashMap::new(),
            dirty: false,
        }
    }

    pub fn category(&self) -> CacheCategory {
        self.category
    }

    /// Returns the entry for `key` if present and still fresh at `now`.
    /// No side effects.
    pub fn get(&self, key: &K, now: DateTime<Utc>) -> Option<&CacheEntry<V>> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_stale(self.category, now))
    }

    /// Returns the entry for `key` regardless of staleness, for best-effort
    /// reads that must not suspend on the network.
    pub fn get_ignoring_staleness(&self, key: &K) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    /// Replaces the entry for `key` and marks the category dirty.
    /// Entries are created only at fetch completion, so `now` is the fetch
    /// completion time.
    pub fn put(&mut self, key: K, value: V, now: DateTime<Utc>) {
        self.entries.insert(key, CacheEntry { value, fetched_at: now });
        self.dirty = true;
    }

    /// Bulk variant of [`Store::put`], stamping every entry with the same
    /// fetch completion time. Used by index gathers and cascade population.
    pub fn put_many(&mut self, entries: impl IntoIterator<Item = (K, V)>, now: DateTime<Utc>) {
        for (key, value) in entries {
            self.entries.insert(key, CacheEntry { value, fetched_at: now });
        }
        self.dirty = true;
    }

    /// Drops all entries and marks the category dirty.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty = true;
    }

    /// Inserts an entry restored from disk without touching the dirty bit.
    pub fn restore(&mut self, key: K, value: V, fetched_at: DateTime<Utc>) {
        self.entries.insert(key, CacheEntry { value, fetched_at });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &CacheEntry<V>)> {
        self.entries.iter()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
