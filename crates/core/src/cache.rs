//! Bounded FIFO cache and the lazy content resolver seam.
//!
//! Eviction is strictly insertion-ordered: the oldest inserted key goes
//! first when the cache is full, and updating an existing key does not move
//! it. No TTL; invalidation is explicit through the owning store.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

use crate::error::Result;
use crate::node::ContentRef;

/// Default capacity of the store-level content cache.
pub const CONTENT_CACHE_CAPACITY: usize = 1024;

/// Default capacity of the table projection's rendered-file cache.
pub const RENDER_CACHE_CAPACITY: usize = 2048;

// ---------------------------------------------------------------------------
// Resolver seam
// ---------------------------------------------------------------------------

/// User-supplied function producing the rendered bytes behind a
/// content-reference. Invoked with no store lock held.
pub trait ContentResolver: Send + Sync {
    fn resolve(&self, cref: &ContentRef) -> Result<Vec<u8>>;
}

impl<F> ContentResolver for F
where
    F: Fn(&ContentRef) -> Result<Vec<u8>> + Send + Sync,
{
    fn resolve(&self, cref: &ContentRef) -> Result<Vec<u8>> {
        self(cref)
    }
}

// ---------------------------------------------------------------------------
// FIFO cache
// ---------------------------------------------------------------------------

/// Fixed-capacity map with first-in-first-out eviction.
pub struct FifoCache<K: Eq + Hash + Clone, V> {
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> FifoCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        FifoCache { capacity, map: HashMap::with_capacity(capacity), order: VecDeque::new() }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Insert a value. A fresh key evicts the oldest entry once the cache is
    /// full; an existing key is updated in place without touching the
    /// eviction order.
    pub fn insert(&mut self, key: K, value: V) {
        match self.map.entry(key.clone()) {
            Entry::Occupied(mut e) => {
                e.insert(value);
            }
            Entry::Vacant(e) => {
                e.insert(value);
                self.order.push_back(key);
                if self.order.len() > self.capacity {
                    if let Some(oldest) = self.order.pop_front() {
                        self.map.remove(&oldest);
                    }
                }
            }
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.map.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Shared rendered-content value; cheap to hand out to concurrent readers.
pub type CachedBytes = Arc<Vec<u8>>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_eviction_order() {
        let mut cache = FifoCache::new(3);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        assert_eq!(cache.len(), 3);

        // "d" evicts the oldest insert ("a").
        cache.insert("d", 4);
        assert!(cache.get(&"a").is_none());
        assert!(cache.get(&"b").is_some());

        // Re-inserting "a" evicts "b" next.
        cache.insert("a", 5);
        assert!(cache.get(&"b").is_none());
        assert!(cache.get(&"c").is_some());
    }

    #[test]
    fn test_update_in_place_keeps_order() {
        let mut cache = FifoCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Updating "a" must not make it the newest entry.
        cache.insert("a", 10);
        cache.insert("c", 3);
        assert!(cache.get(&"a").is_none(), "a was still oldest and must be evicted");
        assert_eq!(cache.get(&"b"), Some(&2));
        assert_eq!(cache.get(&"c"), Some(&3));
    }

    #[test]
    fn test_remove() {
        let mut cache = FifoCache::new(2);
        cache.insert("a", 1);
        assert_eq!(cache.remove(&"a"), Some(1));
        assert!(cache.is_empty());
        assert_eq!(cache.remove(&"a"), None);
    }

    /// The resolver-call pattern of scenario S6: capacity 3, reads
    /// A B C D A E A, resolver fired for A B C D A E.
    #[test]
    fn test_s6_resolution_sequence() {
        let mut cache: FifoCache<&str, u32> = FifoCache::new(3);
        let mut fetches = Vec::new();
        let mut read = |cache: &mut FifoCache<&str, u32>, fetches: &mut Vec<&'static str>, k: &'static str| {
            if cache.get(&k).is_none() {
                fetches.push(k);
                cache.insert(k, 0);
            }
        };
        for key in ["A", "B", "C", "D", "A", "E", "A"] {
            read(&mut cache, &mut fetches, key);
        }
        assert_eq!(fetches, vec!["A", "B", "C", "D", "A", "E"]);
    }
}
