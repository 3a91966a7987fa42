//! Path→mutex map enforcing at-most-one concurrent `Mkdir` per logical path.
//!
//! A single global lock would serialise unrelated directory creations
//! across the whole vault; this map-of-mutexes idiom only contends when two
//! callers race to create the *same* path.

use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;

/// Owns one mutex per path that has ever been locked. Entries are never
/// removed: correctness does not depend on pruning (see `DESIGN.md`), only
/// long-term memory use would motivate it.
#[derive(Debug, Default)]
pub struct PathLockMap {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PathLockMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the mutex for `path`, creating it on first use. Blocks until
    /// acquired; held across all filesystem and crypto work for that path.
    pub fn lock(&self, path: &str) -> PathLockGuard {
        let mutex = self
            .locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        PathLockGuard::new(mutex)
    }

    #[must_use]
    pub fn tracked_paths(&self) -> usize {
        self.locks.len()
    }
}

/// RAII guard holding a path's lock; releases it on drop.
pub struct PathLockGuard {
    mutex: Arc<Mutex<()>>,
}

impl PathLockGuard {
    fn new(mutex: Arc<Mutex<()>>) -> Self {
        Self { mutex }
    }

    /// Run `f` while holding this path's lock.
    pub fn held<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard: MutexGuard<'_, ()> = match self.mutex.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn same_path_serialises_concurrent_work() {
        let map = Arc::new(PathLockMap::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..8 {
            let map = Arc::clone(&map);
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                let guard = map.lock("x");
                guard.held(|| {
                    let before = counter.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(before, 0, "lock should exclude concurrent holders");
                    std::thread::yield_now();
                    counter.fetch_sub(1, Ordering::SeqCst);
                });
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn distinct_paths_get_distinct_mutexes() {
        let map = PathLockMap::new();
        map.lock("a");
        map.lock("b");
        assert_eq!(map.tracked_paths(), 2);
    }

    #[test]
    fn repeated_lock_of_same_path_reuses_mutex() {
        let map = PathLockMap::new();
        map.lock("a");
        map.lock("a");
        assert_eq!(map.tracked_paths(), 1);
    }
}
