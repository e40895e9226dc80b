//! Memoized `du` results.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use tracing::trace;

use inodb_core::{IndexConfig, PathId};
use inodb_store::Inventory;

use crate::error::QueryError;
use crate::filter::FindFilter;
use crate::find::{DuTotals, du};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DuKey {
    roots: Vec<PathId>,
    filter: FindFilter,
    generation: u64,
}

/// Bounded least-recently-used cache in front of [`du`].
///
/// Keys are the sorted, deduplicated roots, the normalized filter and the
/// inventory generation, so any completed scan invalidates older results.
#[derive(Debug)]
pub struct DuCache {
    capacity: usize,
    entries: Mutex<IndexMap<DuKey, DuTotals>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DuCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(IndexMap::with_capacity(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(config.du_cache_capacity)
    }

    /// Cached [`du`].
    pub fn du(
        &self,
        inventory: &Inventory,
        roots: &[PathId],
        filter: &FindFilter,
    ) -> Result<DuTotals, QueryError> {
        let mut roots = roots.to_vec();
        roots.sort_unstable();
        roots.dedup();
        let key = DuKey {
            roots,
            filter: filter.normalized(),
            generation: inventory.generation(),
        };

        if let Some(totals) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(roots = ?key.roots, "du cache hit");
            return Ok(totals);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let totals = du(inventory, &key.roots, &key.filter)?;
        self.store(key, totals);
        Ok(totals)
    }

    fn lookup(&self, key: &DuKey) -> Option<DuTotals> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let index = entries.get_index_of(key)?;
        let last = entries.len() - 1;
        entries.move_index(index, last);
        entries.get_index(last).map(|(_, totals)| *totals)
    }

    fn store(&self, key: DuKey, totals: DuTotals) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        while entries.len() >= self.capacity {
            entries.shift_remove_index(0);
        }
        entries.insert(key, totals);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(root: i64) -> DuKey {
        DuKey {
            roots: vec![PathId(root)],
            filter: FindFilter::default(),
            generation: 0,
        }
    }

    fn totals(inodes: u64) -> DuTotals {
        DuTotals {
            size: 0.0,
            inodes,
        }
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = DuCache::new(2);
        cache.store(key(1), totals(1));
        cache.store(key(2), totals(2));
        assert_eq!(cache.lookup(&key(1)), Some(totals(1)));

        cache.store(key(3), totals(3));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(&key(2)), None);
        assert_eq!(cache.lookup(&key(1)), Some(totals(1)));
        assert_eq!(cache.lookup(&key(3)), Some(totals(3)));
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = DuCache::new(0);
        cache.store(key(1), totals(1));
        assert!(cache.is_empty());
    }
}
