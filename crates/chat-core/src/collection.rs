//! Ordered keyed container with a cached value snapshot
//!
//! Lookups go through the ordered map. Iteration-heavy callers use [`Collection::values`],
//! which builds an `Arc<[V]>` snapshot on first use and reuses it until the next
//! mutation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Ordered map plus lazily rebuilt value snapshot
pub struct Collection<K, V> {
    entries: BTreeMap<K, V>,
    snapshot: OnceLock<Arc<[V]>>,
}

impl<K: Ord, V: Clone> Collection<K, V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            snapshot: OnceLock::new(),
        }
    }

    /// Insert a value, returning the previous one for the key
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.snapshot = OnceLock::new();
        self.entries.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.snapshot = OnceLock::new();
        }
        removed
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in ascending order
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Entries in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// Values in key order, shared until the next insert or remove
    pub fn values(&self) -> Arc<[V]> {
        self.snapshot
            .get_or_init(|| self.entries.values().cloned().collect())
            .clone()
    }

    /// First value matching the predicate, in key order
    pub fn find<F>(&self, mut predicate: F) -> Option<&V>
    where
        F: FnMut(&V) -> bool,
    {
        self.entries.values().find(|v| predicate(v))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.snapshot = OnceLock::new();
    }
}

impl<K: Ord, V: Clone> Default for Collection<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V: Clone> FromIterator<(K, V)> for Collection<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            snapshot: OnceLock::new(),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Collection<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}
