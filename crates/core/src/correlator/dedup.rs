//! Bounded memory of already delivered event identifiers.

use std::collections::{HashSet, VecDeque};

/// Default number of identifiers remembered.
pub const DEFAULT_DEDUP_CAPACITY: usize = 4096;

/// Set of recently delivered event identifiers.
///
/// Once full, the oldest identifier is forgotten first. The window only has
/// to cover the gap between the "created" and "updated" notifications of a
/// single message.
#[derive(Debug)]
pub struct DedupCache {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_DEDUP_CAPACITY)
    }
}

impl DedupCache {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Record an identifier. Returns false if it was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.seen.contains(&id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.clone());
        self.seen.insert(id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_contains() {
        let mut cache = DedupCache::default();
        assert!(cache.insert("https://cdn/a.png"));
        assert!(cache.contains("https://cdn/a.png"));
        assert!(!cache.insert("https://cdn/a.png"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut cache = DedupCache::with_capacity(2);
        cache.insert("a");
        cache.insert("b");
        cache.insert("c");
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut cache = DedupCache::with_capacity(0);
        cache.insert("a");
        assert!(cache.contains("a"));
    }
}
