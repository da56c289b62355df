//! Page layer: fixed-size page buffers and their in-page layouts.
//!
//! - [`Page`]: a cached page with a dirty flag
//! - [`data_page`]: record pages, `[free_space_offset:2][records...]`
//! - [`first_page`]: the reserved page 1 carrying the crash marker

pub mod data_page;
pub mod first_page;

use crate::types::{PageId, PAGE_SIZE};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, Ordering};

/// A raw page buffer
#[derive(Clone)]
pub struct PageBuf {
    data: [u8; PAGE_SIZE],
}

impl PageBuf {
    /// Create a new zeroed page buffer
    pub fn new() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
        }
    }

    /// Create a page buffer from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; PAGE_SIZE];
        let len = bytes.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    /// Get a reference to the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the raw bytes
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Default for PageBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl std::ops::DerefMut for PageBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl AsRef<[u8]> for PageBuf {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// A page held by the page cache.
///
/// The dirty flag is raised by every [`write`](Page::write) and cleared
/// only by the cache once the bytes have reached the file.
pub struct Page {
    page_id: PageId,
    data: RwLock<PageBuf>,
    dirty: AtomicBool,
}

impl Page {
    /// Wrap page bytes read from (or about to be written to) the file
    pub fn new(page_id: PageId, data: PageBuf) -> Self {
        Self {
            page_id,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    /// Get the page number
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Shared access to the page bytes
    pub fn read(&self) -> RwLockReadGuard<'_, PageBuf> {
        self.data.read()
    }

    /// Exclusive access to the page bytes; marks the page dirty
    pub fn write(&self) -> RwLockWriteGuard<'_, PageBuf> {
        let guard = self.data.write();
        self.dirty.store(true, Ordering::Release);
        guard
    }

    /// Whether the in-memory bytes differ from the last write-back
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Set or clear the dirty flag
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }
}
