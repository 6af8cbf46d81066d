//! Append-Only In-Memory Cache
//!
//! String-keyed store whose entries are written once and never replaced or
//! evicted. It backs the derivation caches, where every value is a pure
//! function of its key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Write-once keyed cache, safe to share between threads
pub struct Cache<T> {
    data: RwLock<HashMap<String, T>>,
    /// Per-key locks for computations in flight
    pending: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<T: Clone> Cache<T> {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        // Entries are immutable once inserted, so a poisoned lock still holds
        // consistent data.
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(key).cloned()
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// Callers racing on the same key wait on a per-key lock, so the work is
    /// done once. `compute` runs with no map lock held: readers and misses on
    /// other keys proceed meanwhile. A failed computation stores nothing.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &str,
        compute: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let key_lock = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(pending.entry(key.to_string()).or_default())
        };
        let _computing = key_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let result = match self.get(key) {
            Some(value) => Ok(value),
            None => {
                let result = compute();
                if let Ok(value) = &result {
                    let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
                    data.insert(key.to_string(), value.clone());
                }
                result
            }
        };
        self.forget_pending(key, &key_lock);
        result
    }

    /// Drop the per-key lock unless a later caller already replaced it
    fn forget_pending(&self, key: &str, key_lock: &Arc<Mutex<()>>) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.get(key).is_some_and(|current| Arc::ptr_eq(current, key_lock)) {
            pending.remove(key);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for Cache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_cache_basic() {
        let cache: Cache<String> = Cache::new();

        let value: Result<_, ()> = cache.get_or_try_insert_with("key1", || Ok("value1".to_string()));
        assert_eq!(value, Ok("value1".to_string()));
        assert_eq!(cache.get("key1"), Some("value1".to_string()));
        assert_eq!(cache.get("key2"), None);
    }

    #[test]
    fn test_cache_computes_once() {
        let cache: Cache<u32> = Cache::new();
        let calls = Cell::new(0);

        for _ in 0..3 {
            let value: Result<_, ()> = cache.get_or_try_insert_with("k", || {
                calls.set(calls.get() + 1);
                Ok(7)
            });
            assert_eq!(value, Ok(7));
        }
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_failure_stores_nothing() {
        let cache: Cache<u32> = Cache::new();

        let value = cache.get_or_try_insert_with("k", || Err("boom"));
        assert_eq!(value, Err("boom"));
        assert!(!cache.contains("k"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_slow_computation_does_not_block_other_keys() {
        let cache: Arc<Cache<u32>> = Arc::new(Cache::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let slow = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get_or_try_insert_with("slow", || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok::<_, ()>(1)
                })
            })
        };

        started_rx.recv().unwrap();
        assert_eq!(cache.get_or_try_insert_with("fast", || Ok::<_, ()>(2)), Ok(2));
        assert_eq!(cache.get("fast"), Some(2));
        assert_eq!(cache.get("slow"), None);

        release_tx.send(()).unwrap();
        assert_eq!(slow.join().unwrap(), Ok(1));
        assert_eq!(cache.get("slow"), Some(1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_racing_callers_share_one_computation() {
        let cache: Arc<Cache<u32>> = Arc::new(Cache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    cache.get_or_try_insert_with("k", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(20));
                        Ok::<_, ()>(9)
                    })
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(9));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.pending.lock().unwrap().is_empty());
    }
}
