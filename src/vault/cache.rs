//! Path→DirID cache: a concurrent map shortcutting directory resolution.
//!
//! Entries are monotonic per key once inserted: a path resolves to the same
//! `DirId` until explicitly invalidated (on removal, or on a stale-read
//! retry in the resolver). `DashMap` gives per-key atomic get/set/remove
//! without a single global lock, since the cache read path is hot.

use dashmap::DashMap;

use super::path::DirId;

/// Thread-safe path→DirID cache, owned by the vault for its lifetime.
#[derive(Debug, Default)]
pub struct VaultCache {
    entries: DashMap<String, DirId>,
}

impl VaultCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the cached `DirId` for a cleaned path.
    #[inline]
    pub fn get(&self, path: &str) -> Option<DirId> {
        self.entries.get(path).map(|v| v.clone())
    }

    /// Record that `path` resolves to `dir_id`.
    #[inline]
    pub fn insert(&self, path: &str, dir_id: DirId) {
        self.entries.insert(path.to_string(), dir_id);
    }

    /// Invalidate a single entry, e.g. after `Rmdir` or a stale-read retry.
    #[inline]
    pub fn invalidate(&self, path: &str) {
        self.entries.remove(path);
    }

    /// Current cache statistics, for diagnostics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
        }
    }

    #[cfg(test)]
    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let cache = VaultCache::new();
        assert_eq!(cache.get("docs"), None);
        cache.insert("docs", DirId::new("dir-1"));
        assert_eq!(cache.get("docs"), Some(DirId::new("dir-1")));
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = VaultCache::new();
        cache.insert("docs", DirId::new("dir-1"));
        cache.invalidate("docs");
        assert_eq!(cache.get("docs"), None);
    }

    #[test]
    fn distinct_paths_are_independent() {
        let cache = VaultCache::new();
        cache.insert("a", DirId::new("dir-a"));
        cache.insert("b", DirId::new("dir-b"));
        assert_eq!(cache.get("a"), Some(DirId::new("dir-a")));
        assert_eq!(cache.get("b"), Some(DirId::new("dir-b")));
    }

    #[test]
    fn concurrent_inserts_are_consistent() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(VaultCache::new());
        let mut handles = vec![];
        for i in 0..10 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                cache.insert(&format!("path{i}"), DirId::new(format!("dir-{i}")));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.stats().entries, 10);
    }
}
