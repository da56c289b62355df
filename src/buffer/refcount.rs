//! Reference-counted resource cache.
//!
//! Unlike an LRU cache, nothing is ever evicted behind a holder's back:
//! a resource leaves the cache only once every `get` has been matched by
//! a `release`. When all slots are referenced, `get` fails with
//! [`StorageError::CacheFull`] instead of evicting.
//!
//! At most one caller fetches a given key from the backing source at a
//! time; concurrent callers for the same key wait on a condition variable
//! until the fetch settles and then re-check the cache.

use crate::error::{Result, StorageError};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Backing source of a [`RefCountCache`].
pub trait CacheSource: Send + Sync {
    /// Resource type handed out by the cache
    type Item: Send + Sync;

    /// Load the resource for `key` on a cache miss
    fn fetch(&self, key: u64) -> Result<Arc<Self::Item>>;

    /// Write back or clean up a resource whose last reference was released
    fn write_back(&self, item: &Self::Item) -> Result<()>;
}

struct CacheEntry<T> {
    item: Arc<T>,
    refs: usize,
}

struct CacheState<T> {
    entries: HashMap<u64, CacheEntry<T>>,
    /// Keys currently being fetched from the source
    fetching: HashSet<u64>,
    /// Resident entries plus reserved in-flight fetches
    count: usize,
}

/// Generic keyed cache with reference counting
pub struct RefCountCache<S: CacheSource> {
    source: S,
    state: Mutex<CacheState<S::Item>>,
    fetched: Condvar,
    /// Maximum number of resident resources; 0 means unbounded
    capacity: usize,
}

impl<S: CacheSource> RefCountCache<S> {
    /// Create a cache over `source` holding at most `capacity` resources
    pub fn new(source: S, capacity: usize) -> Self {
        Self {
            source,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                fetching: HashSet::new(),
                count: 0,
            }),
            fetched: Condvar::new(),
            capacity,
        }
    }

    /// The backing source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Maximum number of resident resources (0 = unbounded)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get a resource, fetching it on a miss. Every successful call must
    /// be paired with a [`release`](Self::release).
    pub fn get(&self, key: u64) -> Result<Arc<S::Item>> {
        {
            let mut state = self.state.lock();
            loop {
                if state.fetching.contains(&key) {
                    self.fetched.wait(&mut state);
                    continue;
                }

                if let Some(entry) = state.entries.get_mut(&key) {
                    entry.refs += 1;
                    return Ok(Arc::clone(&entry.item));
                }

                if self.capacity > 0 && state.count >= self.capacity {
                    return Err(StorageError::CacheFull);
                }

                state.count += 1;
                state.fetching.insert(key);
                break;
            }
        }

        let fetched = self.source.fetch(key);

        let mut state = self.state.lock();
        state.fetching.remove(&key);
        let result = match fetched {
            Ok(item) => {
                state.entries.insert(
                    key,
                    CacheEntry {
                        item: Arc::clone(&item),
                        refs: 1,
                    },
                );
                Ok(item)
            }
            Err(e) => {
                state.count -= 1;
                Err(e)
            }
        };
        drop(state);
        self.fetched.notify_all();
        result
    }

    /// Drop one reference; the last release writes the resource back and
    /// frees its slot.
    pub fn release(&self, key: u64) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.entries.get_mut(&key).ok_or_else(|| {
            StorageError::invalid_operation(format!("release of unreferenced cache key {}", key))
        })?;

        entry.refs -= 1;
        if entry.refs > 0 {
            return Ok(());
        }

        let entry = state
            .entries
            .remove(&key)
            .ok_or_else(|| StorageError::invalid_operation("cache entry vanished"))?;
        state.count -= 1;
        // Written back under the lock so a concurrent miss cannot read
        // stale bytes from the source before the write lands.
        self.source.write_back(&entry.item)
    }

    /// Force-release every resident resource, writing each one back.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let mut first_err = None;
        for (_, entry) in state.entries.drain() {
            if let Err(e) = self.source.write_back(&entry.item) {
                first_err.get_or_insert(e);
            }
        }
        state.count = state.fetching.len();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Number of resident resources
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether no resource is resident
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outstanding references on `key`, if resident
    pub fn ref_count(&self, key: u64) -> Option<usize> {
        self.state.lock().entries.get(&key).map(|e| e.refs)
    }
}
