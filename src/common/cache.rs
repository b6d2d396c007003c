//! Reference-counted cache.
//!
//! Unlike an LRU buffer pool, eviction here is driven by the callers: a
//! resource is loaded on its first `acquire`, every further `acquire` bumps its
//! reference count, and it is written back to its source and evicted only when
//! `release` drops the count to zero. Callers therefore always know whether a
//! resource is still resident when they ask for it to be flushed.

use crate::error::{Error, Result};
use log::warn;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::Arc;

/// Where cached values come from and go back to.
pub trait CacheSource: Send + Sync {
    type Value: Send + Sync;

    /// Load the value for `key`. Called at most once per residency.
    fn fetch(&self, key: u64) -> Result<Self::Value>;

    /// Write `value` back when it leaves the cache.
    fn write_back(&self, value: &Self::Value) -> Result<()>;
}

struct Slot<V> {
    value: Arc<V>,
    refs: usize,
}

struct CacheState<V> {
    resident: HashMap<u64, Slot<V>>,
    /// Keys whose fetch is in flight.
    loading: HashSet<u64>,
}

pub struct RefCountCache<S: CacheSource> {
    source: S,
    /// Maximum number of resident + loading keys, 0 for unbounded.
    capacity: usize,
    state: Mutex<CacheState<S::Value>>,
    loaded: Condvar,
}

impl<S: CacheSource> RefCountCache<S> {
    pub fn new(source: S, capacity: usize) -> Self {
        Self {
            source,
            capacity,
            state: Mutex::new(CacheState {
                resident: HashMap::new(),
                loading: HashSet::new(),
            }),
            loaded: Condvar::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Take a reference to `key`, loading it from the source if needed.
    pub fn acquire(&self, key: u64) -> Result<Arc<S::Value>> {
        let mut state = self.state.lock();
        loop {
            if state.loading.contains(&key) {
                self.loaded.wait(&mut state);
                continue;
            }

            if let Some(slot) = state.resident.get_mut(&key) {
                slot.refs += 1;
                return Ok(Arc::clone(&slot.value));
            }

            if self.capacity > 0 && state.resident.len() + state.loading.len() >= self.capacity {
                return Err(Error::CacheFull);
            }
            state.loading.insert(key);
            break;
        }
        drop(state);

        let fetched = self.source.fetch(key);

        let mut state = self.state.lock();
        state.loading.remove(&key);
        self.loaded.notify_all();

        let value = Arc::new(fetched?);
        state.resident.insert(
            key,
            Slot {
                value: Arc::clone(&value),
                refs: 1,
            },
        );
        Ok(value)
    }

    /// Like [`acquire`](Self::acquire), wrapped in a handle that releases itself.
    pub fn get(self: &Arc<Self>, key: u64) -> Result<CacheRef<S>> {
        let value = self.acquire(key)?;
        Ok(CacheRef {
            cache: Arc::clone(self),
            key,
            value,
            released: false,
        })
    }

    /// Drop one reference to `key`; the last one writes the value back.
    ///
    /// Releasing a key that is not resident (e.g. after `close`) does nothing.
    pub fn release(&self, key: u64) -> Result<()> {
        let mut state = self.state.lock();
        let Some(slot) = state.resident.get_mut(&key) else {
            return Ok(());
        };
        slot.refs -= 1;
        if slot.refs > 0 {
            return Ok(());
        }
        if let Some(slot) = state.resident.remove(&key) {
            self.source.write_back(&slot.value)?;
        }
        Ok(())
    }

    /// Write back every resident value regardless of its reference count.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let mut first_error = None;
        for (key, slot) in state.resident.drain() {
            if let Err(e) = self.source.write_back(&slot.value) {
                warn!("write back of key {:#x} failed on close: {}", key, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Current reference count of `key`, if resident.
    pub fn ref_count(&self, key: u64) -> Option<usize> {
        self.state.lock().resident.get(&key).map(|slot| slot.refs)
    }

    pub fn resident_count(&self) -> usize {
        self.state.lock().resident.len()
    }
}

/// A counted reference into a [`RefCountCache`].
pub struct CacheRef<S: CacheSource> {
    cache: Arc<RefCountCache<S>>,
    key: u64,
    value: Arc<S::Value>,
    released: bool,
}

impl<S: CacheSource> CacheRef<S> {
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn value(&self) -> &Arc<S::Value> {
        &self.value
    }

    /// Give the reference back, reporting write-back failures.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.cache.release(self.key)
    }
}

impl<S: CacheSource> Deref for CacheRef<S> {
    type Target = S::Value;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<S: CacheSource> Drop for CacheRef<S> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.cache.release(self.key) {
                warn!("release of key {:#x} failed: {}", self.key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSource {
        fetches: AtomicUsize,
        write_backs: AtomicUsize,
        delay: Option<Duration>,
        fail_key: Option<u64>,
    }

    impl CacheSource for CountingSource {
        type Value = u64;

        fn fetch(&self, key: u64) -> Result<u64> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            if self.fail_key == Some(key) {
                return Err(Error::MissingRecord(key));
            }
            Ok(key * 10)
        }

        fn write_back(&self, _value: &u64) -> Result<()> {
            self.write_backs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_acquire_and_release() -> anyhow::Result<()> {
        let cache = RefCountCache::new(CountingSource::default(), 0);

        assert_eq!(*cache.acquire(7)?, 70);
        assert_eq!(*cache.acquire(7)?, 70);
        assert_eq!(cache.ref_count(7), Some(2));
        assert_eq!(cache.source().fetches.load(Ordering::SeqCst), 1);

        cache.release(7)?;
        assert_eq!(cache.ref_count(7), Some(1));
        assert_eq!(cache.source().write_backs.load(Ordering::SeqCst), 0);

        cache.release(7)?;
        assert_eq!(cache.ref_count(7), None);
        assert_eq!(cache.source().write_backs.load(Ordering::SeqCst), 1);

        // Releasing an evicted key is a no-op.
        cache.release(7)?;
        assert_eq!(cache.source().write_backs.load(Ordering::SeqCst), 1);

        Ok(())
    }

    #[test]
    fn test_concurrent_get_fetches_once() {
        let source = CountingSource {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let cache = Arc::new(RefCountCache::new(source, 0));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    *cache.acquire(3).unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 30);
        }
        assert_eq!(cache.ref_count(3), Some(2));
        assert_eq!(cache.source().fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_capacity() -> anyhow::Result<()> {
        let cache = RefCountCache::new(CountingSource::default(), 2);

        cache.acquire(1)?;
        cache.acquire(2)?;
        // Re-acquiring a resident key does not need a free slot.
        cache.acquire(1)?;
        assert!(matches!(cache.acquire(3), Err(Error::CacheFull)));

        cache.release(2)?;
        assert_eq!(*cache.acquire(3)?, 30);

        Ok(())
    }

    #[test]
    fn test_failed_fetch_frees_slot() -> anyhow::Result<()> {
        let source = CountingSource {
            fail_key: Some(9),
            ..Default::default()
        };
        let cache = RefCountCache::new(source, 1);

        assert!(matches!(cache.acquire(9), Err(Error::MissingRecord(9))));
        assert_eq!(cache.resident_count(), 0);
        assert_eq!(*cache.acquire(1)?, 10);

        Ok(())
    }

    #[test]
    fn test_cache_ref_releases_on_drop() -> anyhow::Result<()> {
        let cache = Arc::new(RefCountCache::new(CountingSource::default(), 0));

        let first = cache.get(5)?;
        let second = cache.get(5)?;
        assert_eq!(*first, 50);
        assert_eq!(cache.ref_count(5), Some(2));

        drop(first);
        assert_eq!(cache.ref_count(5), Some(1));

        second.release()?;
        assert_eq!(cache.ref_count(5), None);
        assert_eq!(cache.source().write_backs.load(Ordering::SeqCst), 1);

        Ok(())
    }

    #[test]
    fn test_close_writes_back_everything() -> anyhow::Result<()> {
        let cache = RefCountCache::new(CountingSource::default(), 0);

        cache.acquire(1)?;
        cache.acquire(1)?;
        cache.acquire(2)?;
        cache.close()?;

        assert_eq!(cache.resident_count(), 0);
        assert_eq!(cache.source().write_backs.load(Ordering::SeqCst), 2);

        Ok(())
    }
}
