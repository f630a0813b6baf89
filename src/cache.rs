//! Fingerprint-validated caching.
//!
//! An entry is only served while the fingerprint it was stored under equals
//! the most recently observed one. The fingerprint is derived from the
//! per-kind totals a job reports, so any change in a reported total makes
//! every entry stale at once.

use crate::model::ResultCounts;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::debug;

/// Cheap summary of a job's result counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint {
    pub matches: usize,
    pub bo_only: usize,
    pub partner_only: usize,
    pub mismatches: usize,
}

/// Fingerprint of the reported counts.
///
/// Content edits that leave every count unchanged keep the same fingerprint;
/// those must go through an explicit invalidation.
pub fn compute_fingerprint(counts: &ResultCounts) -> Fingerprint {
    Fingerprint {
        matches: counts.matches,
        bo_only: counts.bo_only,
        partner_only: counts.partner_only,
        mismatches: counts.mismatches,
    }
}

#[derive(Debug)]
struct Entry<V> {
    fingerprint: Fingerprint,
    value: V,
}

#[derive(Debug)]
pub struct FingerprintedCache<K, V> {
    current: Fingerprint,
    entries: HashMap<K, Entry<V>>,
    hits: u64,
    misses: u64,
}

impl<K, V> Default for FingerprintedCache<K, V> {
    fn default() -> Self {
        Self {
            current: Fingerprint::default(),
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }
}

impl<K: Eq + Hash + std::fmt::Debug, V> FingerprintedCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest fingerprint. Returns whether it changed.
    ///
    /// Stale entries are dropped eagerly.
    pub fn observe(&mut self, fingerprint: Fingerprint) -> bool {
        if fingerprint == self.current {
            return false;
        }
        self.current = fingerprint;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.fingerprint == fingerprint);
        debug!(
            dropped = before - self.entries.len(),
            "fingerprint changed, stale cache entries dropped"
        );
        true
    }

    pub fn current(&self) -> Fingerprint {
        self.current
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        let current = self.current;
        match self.entries.get(key) {
            Some(entry) if entry.fingerprint == current => {
                self.hits += 1;
                Some(&entry.value)
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store `value` under `fingerprint`.
    ///
    /// A value computed under an outdated fingerprint is not stored.
    pub fn put(&mut self, key: K, fingerprint: Fingerprint, value: V) -> bool {
        if fingerprint != self.current {
            debug!(?key, "discarding value computed under a stale fingerprint");
            return false;
        }
        self.entries.insert(key, Entry { fingerprint, value });
        true
    }

    pub fn invalidate(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(matches: usize) -> ResultCounts {
        ResultCounts {
            matches,
            bo_only: 2,
            partner_only: 3,
            mismatches: 0,
        }
    }

    #[test]
    fn hit_requires_matching_fingerprint() {
        let mut cache = FingerprintedCache::new();
        let fp = compute_fingerprint(&counts(5));
        cache.observe(fp);
        assert!(cache.put("matches", fp, 1));
        assert_eq!(cache.get(&"matches"), Some(&1));

        assert!(cache.observe(compute_fingerprint(&counts(6))));
        assert_eq!(cache.get(&"matches"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn same_counts_same_fingerprint() {
        assert_eq!(compute_fingerprint(&counts(5)), compute_fingerprint(&counts(5)));
        let mut cache: FingerprintedCache<u8, ()> = FingerprintedCache::new();
        cache.observe(compute_fingerprint(&counts(5)));
        assert!(!cache.observe(compute_fingerprint(&counts(5))));
    }

    #[test]
    fn stale_put_is_rejected() {
        let mut cache = FingerprintedCache::new();
        cache.observe(compute_fingerprint(&counts(1)));
        assert!(!cache.put(7u8, compute_fingerprint(&counts(2)), "x"));
        assert_eq!(cache.get(&7), None);
    }

    #[test]
    fn explicit_invalidation() {
        let mut cache = FingerprintedCache::new();
        let fp = Fingerprint::default();
        cache.put(1u8, fp, "a");
        cache.put(2u8, fp, "b");
        assert!(cache.invalidate(&1));
        assert!(!cache.invalidate(&1));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
