//! Disk manager implementation.
//!
//! The disk manager is responsible for reading and writing pages to the
//! page file. It abstracts the file I/O operations behind a trait
//! so that the rest of the system can be tested with mock implementations.
//!
//! The page file is a plain concatenation of `PAGE_SIZE` pages; page `n`
//! lives at byte offset `(n - 1) * PAGE_SIZE`. All file access goes
//! through a single lock, so page I/O is never concurrent within a file.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::types::{PageId, PAGE_SIZE};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Trait for disk I/O operations
///
/// This abstraction allows swapping the storage backend or mocking for tests.
pub trait DiskManager: Send + Sync {
    /// Read a page from disk
    fn read_page(&self, page_id: PageId) -> Result<PageBuf>;

    /// Write a page to disk
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Reserve the next page number and write its initial bytes through
    fn allocate_page(&self, data: &[u8]) -> Result<PageId>;

    /// Number of pages in the file
    fn page_count(&self) -> u32;

    /// Cut the file down to `max_page` pages and reset the page counter
    fn truncate(&self, max_page: u32) -> Result<()>;

    /// Sync all data to disk
    fn sync(&self) -> Result<()>;
}

/// File-based disk manager implementation
pub struct DiskManagerImpl {
    /// The page file
    file: Mutex<File>,
    /// Number of pages in the file
    page_count: Mutex<u32>,
    /// Whether to sync on each write
    sync_on_write: bool,
}

impl DiskManagerImpl {
    /// Create a new, empty page file. Fails if the file already exists.
    pub fn create(path: &Path, sync_on_write: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            page_count: Mutex::new(0),
            sync_on_write,
        })
    }

    /// Open an existing page file
    pub fn open(path: &Path, sync_on_write: bool) -> Result<Self> {
        if !path.exists() {
            return Err(StorageError::invalid_db(format!(
                "page file {} does not exist",
                path.display()
            )));
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            warn!(
                len,
                page_size = PAGE_SIZE,
                "page file ends in a partial page"
            );
        }
        let page_count = (len / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file: Mutex::new(file),
            page_count: Mutex::new(page_count),
            sync_on_write,
        })
    }

    fn write_at(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let offset = page_id.file_offset(PAGE_SIZE);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        if self.sync_on_write {
            file.sync_data()?;
        }

        Ok(())
    }
}

impl DiskManager for DiskManagerImpl {
    fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        if !page_id.is_valid() || page_id.value() > self.page_count() {
            return Err(StorageError::PageNotFound(page_id));
        }

        let offset = page_id.file_offset(PAGE_SIZE);
        let mut buf = PageBuf::new();

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf.as_bytes_mut())?;

        Ok(buf)
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(StorageError::invalid_operation("page numbers start at 1"));
        }

        if data.len() != PAGE_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "page data must be {} bytes, got {}",
                PAGE_SIZE,
                data.len()
            )));
        }

        self.write_at(page_id, data)
    }

    fn allocate_page(&self, data: &[u8]) -> Result<PageId> {
        let page_id = {
            let mut count = self.page_count.lock();
            *count += 1;
            PageId::new(*count)
        };

        // New pages are durable the moment they exist
        let buf = PageBuf::from_bytes(data);
        let offset = page_id.file_offset(PAGE_SIZE);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf.as_bytes())?;
        file.sync_data()?;

        debug!(page = page_id.value(), "disk.allocate_page");
        Ok(page_id)
    }

    fn page_count(&self) -> u32 {
        *self.page_count.lock()
    }

    fn truncate(&self, max_page: u32) -> Result<()> {
        let mut count = self.page_count.lock();
        let file = self.file.lock();
        file.set_len(max_page as u64 * PAGE_SIZE as u64)?;
        file.sync_all()?;
        *count = max_page;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }
}
