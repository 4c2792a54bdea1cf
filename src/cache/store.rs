//! The process-wide, bounded LRU mapping [`BlockKey`] to [`CacheEntry`].

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use super::entry::{CacheEntry, EntryState};
use super::key::BlockKey;

/// A snapshot of one resident entry, for the operator introspection channel.
#[derive(Debug, Clone)]
pub struct ResidentEntry {
    /// The block this entry caches.
    pub key: BlockKey,
    /// The origin file this block was read from.
    pub path: std::path::PathBuf,
    /// Current readiness.
    pub state: EntryState,
    /// Buffer length, if `Ready`.
    pub buffer_len: Option<usize>,
}

/// Process-wide bounded LRU cache of file blocks.
///
/// All structural mutation (insert, evict, recency bump) happens under a
/// single short-held mutex. Callers that have already obtained a
/// `Arc<CacheEntry>` via [`BlockCache::get`] read and await it without
/// touching the cache's lock again.
#[derive(Debug)]
pub struct BlockCache {
    inner: Mutex<LruCache<BlockKey, Arc<CacheEntry>>>,
}

impl BlockCache {
    /// Creates a cache bounded to `capacity` resident entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; callers that want caching disabled
    /// should not construct a `BlockCache` at all (see
    /// [`crate::fs::FileSystemFacade`]).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("BlockCache capacity must be nonzero");
        Self { inner: Mutex::new(LruCache::new(capacity)) }
    }

    /// Returns whether `key` is currently resident, without affecting LRU
    /// recency. Cheap fast-path check used before committing to the
    /// fill-singleton protocol in [`BlockCache::get_or_insert_pending`].
    pub fn contains(&self, key: &BlockKey) -> bool {
        self.inner.lock().contains(key)
    }

    /// Fetches a resident entry, promoting it to most-recently-used.
    pub fn get(&self, key: &BlockKey) -> Option<Arc<CacheEntry>> {
        self.inner.lock().get(key).cloned()
    }

    /// Inserts `entry` under `key`, evicting the least-recently-used entry
    /// first if the cache is at capacity. If `key` was already present, the
    /// prior entry is replaced and dropped.
    pub fn add(&self, key: BlockKey, entry: Arc<CacheEntry>) {
        if let Some((evicted_key, _)) = self.inner.lock().push(key, entry) {
            if evicted_key != key {
                tracing::debug!(
                    file_identity = evicted_key.file_identity,
                    block_index = evicted_key.block_index,
                    "evicted cache entry"
                );
            }
        }
    }

    /// Atomically ensures a `Pending` entry is resident for `key`.
    ///
    /// Implements the double-checked half of the fill-singleton protocol:
    /// callers should first try the lock-free [`BlockCache::contains`] to
    /// avoid contending on the common case where the block is already
    /// resident, then fall back to this method, which re-tests and inserts
    /// under one held lock. Returns the entry and whether this call is the
    /// one that created it — the caller owning `true` is responsible for
    /// dispatching the fill. `path` is only used if this call creates the
    /// entry; it is not compared against an existing entry's path.
    pub fn get_or_insert_pending(&self, key: BlockKey, path: std::path::PathBuf) -> (Arc<CacheEntry>, bool) {
        let mut guard = self.inner.lock();
        if let Some(existing) = guard.get(&key) {
            return (existing.clone(), false);
        }
        let entry = Arc::new(CacheEntry::pending(path));
        guard.push(key, entry.clone());
        (entry, true)
    }

    /// Number of currently resident entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// All resident keys, most-recently-used first.
    pub fn keys(&self) -> Vec<BlockKey> {
        self.inner.lock().iter().map(|(k, _)| *k).collect()
    }

    /// A snapshot of every resident entry, for the operator debug hook (see
    /// [`crate::introspection`]). Not on the hot path.
    pub fn snapshot(&self) -> Vec<ResidentEntry> {
        self.inner
            .lock()
            .iter()
            .map(|(key, entry)| ResidentEntry {
                key: *key,
                path: entry.path().to_path_buf(),
                state: entry.state(),
                buffer_len: entry.buffer_len(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn key(file: u64, block: u64) -> BlockKey {
        BlockKey::new(file, block)
    }

    fn pending_entry() -> CacheEntry {
        CacheEntry::pending(std::path::PathBuf::from("f.bin"))
    }

    #[test]
    fn add_then_get_bumps_recency_and_contains_does_not() {
        let cache = BlockCache::new(2);
        let entry = Arc::new(pending_entry());
        entry.complete(Arc::from(vec![1].into_boxed_slice()));
        cache.add(key(1, 0), entry);

        assert!(cache.contains(&key(1, 0)));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key(1, 0)).is_some());
    }

    #[test]
    fn eviction_respects_capacity_and_lru_order() {
        let cache = BlockCache::new(2);
        let mk = |n: u8| {
            let entry = Arc::new(pending_entry());
            entry.complete(Arc::from(vec![n].into_boxed_slice()));
            entry
        };

        cache.add(key(1, 0), mk(1));
        cache.add(key(2, 0), mk(2));
        assert_eq!(cache.len(), 2);

        // Touch key(1,0) so it becomes most-recently-used.
        assert!(cache.get(&key(1, 0)).is_some());

        // Inserting a third entry must evict key(2,0), the LRU one.
        cache.add(key(3, 0), mk(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&key(1, 0)));
        assert!(!cache.contains(&key(2, 0)));
        assert!(cache.contains(&key(3, 0)));
    }

    #[test]
    fn get_or_insert_pending_dispatches_exactly_once() {
        let cache = BlockCache::new(4);
        let k = key(9, 0);
        let path = std::path::PathBuf::from("f.bin");

        let (first, created_first) = cache.get_or_insert_pending(k, path.clone());
        assert!(created_first);

        let (second, created_second) = cache.get_or_insert_pending(k, path);
        assert!(!created_second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn replacing_an_existing_key_drops_the_prior_entry() {
        let cache = BlockCache::new(2);
        let mk = |n: u8| {
            let entry = Arc::new(pending_entry());
            entry.complete(Arc::from(vec![n].into_boxed_slice()));
            entry
        };

        cache.add(key(1, 0), mk(1));
        cache.add(key(1, 0), mk(2));
        assert_eq!(cache.len(), 1);
        let current = cache.get(&key(1, 0)).unwrap();
        assert_eq!(current.buffer_len(), Some(1));
    }

    #[test]
    fn snapshot_carries_the_origin_path() {
        let cache = BlockCache::new(4);
        let (entry, created) = cache.get_or_insert_pending(key(1, 0), PathBuf::from("dir/file.bin"));
        assert!(created);
        entry.complete(Arc::from(vec![1, 2, 3].into_boxed_slice()));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].path, PathBuf::from("dir/file.bin"));
    }
}
