//! Free space index.
//!
//! Tracks approximate free bytes per record page in coarse buckets so an
//! inserter can quickly find some page with room. A page handed out by
//! [`select`](FreeSpaceIndex::select) leaves the index until its user
//! puts it back with [`add`](FreeSpaceIndex::add), so two inserters never
//! write into the same page at once.

use crate::types::{PageId, PAGE_SIZE};
use parking_lot::Mutex;

/// Number of buckets the free space range is split into
const INTERVALS: usize = 40;

/// Width of one bucket in bytes
const THRESHOLD: usize = PAGE_SIZE / INTERVALS;

/// A page and its free bytes at registration time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    /// The page
    pub page_id: PageId,
    /// Free bytes when the page was registered
    pub free_space: usize,
}

/// Bucketed index of pages by free space
#[derive(Debug)]
pub struct FreeSpaceIndex {
    buckets: Mutex<Vec<Vec<PageInfo>>>,
}

impl FreeSpaceIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![Vec::new(); INTERVALS + 1]),
        }
    }

    /// Register a page with `free_space` bytes available
    pub fn add(&self, page_id: PageId, free_space: usize) {
        let bucket = (free_space / THRESHOLD).min(INTERVALS);
        self.buckets.lock()[bucket].push(PageInfo {
            page_id,
            free_space,
        });
    }

    /// Take some page with at least `min_space` free bytes out of the index
    pub fn select(&self, min_space: usize) -> Option<PageInfo> {
        let mut bucket = (min_space / THRESHOLD).min(INTERVALS);

        let mut buckets = self.buckets.lock();
        while bucket <= INTERVALS {
            // The first bucket may also hold pages just below `min_space`
            let slot = &mut buckets[bucket];
            if let Some(pos) = slot.iter().rposition(|p| p.free_space >= min_space) {
                return Some(slot.swap_remove(pos));
            }
            bucket += 1;
        }
        None
    }

    /// Number of registered pages
    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(Vec::len).sum()
    }

    /// Whether no page is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FreeSpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}
