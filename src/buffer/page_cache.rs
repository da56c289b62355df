//! Page cache.
//!
//! Pages are cached in a [`RefCountCache`] keyed by page number. A miss
//! reads the page from the [`DiskManager`]; the last release writes a
//! dirty page back before the slot is freed.

use crate::buffer::refcount::{CacheSource, RefCountCache};
use crate::error::{Result, StorageError};
use crate::page::Page;
use crate::storage::{DiskManager, DiskManagerImpl};
use crate::types::PageId;
use std::path::Path;
use std::sync::Arc;

/// Smallest page cache the engine runs with
pub const MIN_CACHE_PAGES: usize = 10;

/// Loads pages from and writes them back to the page file
pub struct PageSource {
    disk: Arc<dyn DiskManager>,
}

impl PageSource {
    fn write_through(&self, page: &Page) -> Result<()> {
        // Holding the read lock keeps writers from slipping in between the
        // write and clearing the dirty flag.
        let buf = page.read();
        self.disk.write_page(page.page_id(), buf.as_bytes())?;
        page.set_dirty(false);
        Ok(())
    }
}

impl CacheSource for PageSource {
    type Item = Page;

    fn fetch(&self, key: u64) -> Result<Arc<Page>> {
        let page_id = PageId::new(key as u32);
        let buf = self.disk.read_page(page_id)?;
        Ok(Arc::new(Page::new(page_id, buf)))
    }

    fn write_back(&self, page: &Page) -> Result<()> {
        if page.is_dirty() {
            self.write_through(page)?;
        }
        Ok(())
    }
}

/// File-backed cache of pages
pub struct PageCache {
    cache: RefCountCache<PageSource>,
}

impl PageCache {
    /// Create a page cache over `disk` holding at most `capacity` pages
    pub fn new(disk: Arc<dyn DiskManager>, capacity: usize) -> Result<Self> {
        if capacity < MIN_CACHE_PAGES {
            return Err(StorageError::CacheTooSmall {
                pages: capacity,
                min: MIN_CACHE_PAGES,
            });
        }

        Ok(Self {
            cache: RefCountCache::new(PageSource { disk }, capacity),
        })
    }

    /// Create a new page file at `path`
    pub fn create(path: &Path, capacity: usize, sync_on_write: bool) -> Result<Self> {
        let disk = Arc::new(DiskManagerImpl::create(path, sync_on_write)?);
        Self::new(disk, capacity)
    }

    /// Open the existing page file at `path`
    pub fn open(path: &Path, capacity: usize, sync_on_write: bool) -> Result<Self> {
        let disk = Arc::new(DiskManagerImpl::open(path, sync_on_write)?);
        Self::new(disk, capacity)
    }

    fn disk(&self) -> &dyn DiskManager {
        self.cache.source().disk.as_ref()
    }

    /// Allocate the next page, written through with `init` as its bytes
    pub fn new_page(&self, init: &[u8]) -> Result<PageId> {
        self.disk().allocate_page(init)
    }

    /// Pin a page; pair with [`release`](Self::release)
    pub fn get_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        self.cache.get(page_id.value() as u64)
    }

    /// Unpin a page
    pub fn release(&self, page: &Page) -> Result<()> {
        self.cache.release(page.page_id().value() as u64)
    }

    /// Write a page to the file whether or not it is dirty
    pub fn flush_page(&self, page: &Page) -> Result<()> {
        self.cache.source().write_through(page)
    }

    /// Discard every page past `max_page`
    pub fn truncate(&self, max_page: u32) -> Result<()> {
        self.disk().truncate(max_page)
    }

    /// Number of pages in the file
    pub fn page_count(&self) -> u32 {
        self.disk().page_count()
    }

    /// Number of pages currently pinned in memory
    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    /// Maximum number of pages held in memory
    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// Write back every resident page and sync the file
    pub fn close(&self) -> Result<()> {
        self.cache.close()?;
        self.disk().sync()
    }
}
