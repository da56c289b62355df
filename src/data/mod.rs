//! Data manager: raw records over logged pages.
//!
//! The data manager owns the page cache, the write-ahead log and the free
//! space index. It hands out [`DataItem`]s through a reference-counted
//! record cache keyed by [`Uid`], and enforces the logging discipline:
//! every insert and update is appended to the log before the page bytes
//! change.

pub mod item;

pub use item::DataItem;

use crate::buffer::{CacheSource, PageCache, RefCountCache};
use crate::error::{Result, StorageError};
use crate::page::{data_page, first_page, Page};
use crate::recovery;
use crate::storage::{FreeSpaceIndex, PageInfo};
use crate::txn::TransactionManager;
use crate::types::{PageId, Uid, Xid};
use crate::wal::{LogRecord, Logger};
use std::sync::Arc;
use tracing::{debug, info};

/// Page allocation attempts before an insert gives up
const MAX_ALLOC_ATTEMPTS: usize = 5;

/// Loads records by UID; a record keeps its page pinned while cached
struct ItemSource {
    pages: Arc<PageCache>,
}

impl CacheSource for ItemSource {
    type Item = DataItem;

    fn fetch(&self, key: u64) -> Result<Arc<DataItem>> {
        let uid = Uid::from_raw(key);
        let page = match self.pages.get_page(uid.page_id()) {
            Ok(page) => page,
            Err(StorageError::PageNotFound(_)) => return Err(StorageError::RecordNotFound(uid)),
            Err(e) => return Err(e),
        };

        match DataItem::parse(Arc::clone(&page), uid) {
            Ok(item) => Ok(Arc::new(item)),
            Err(e) => {
                self.pages.release(&page)?;
                Err(e)
            }
        }
    }

    fn write_back(&self, item: &DataItem) -> Result<()> {
        self.pages.release(item.page())
    }
}

/// Record storage with write-ahead logging
pub struct DataManager {
    pages: Arc<PageCache>,
    log: Logger,
    index: FreeSpaceIndex,
    items: RefCountCache<ItemSource>,
    /// Page 1, pinned for the lifetime of the manager
    first_page: Arc<Page>,
}

impl DataManager {
    fn with_parts(pages: Arc<PageCache>, log: Logger, first_page: Arc<Page>) -> Self {
        Self {
            items: RefCountCache::new(
                ItemSource {
                    pages: Arc::clone(&pages),
                },
                0,
            ),
            pages,
            log,
            index: FreeSpaceIndex::new(),
            first_page,
        }
    }

    /// Initialise a fresh page file and log
    pub fn create(pages: PageCache, log: Logger) -> Result<Self> {
        let pages = Arc::new(pages);
        let page_id = pages.new_page(&first_page::init_raw())?;
        if page_id != PageId::FIRST {
            return Err(StorageError::invalid_db(format!(
                "new page file already holds {} pages",
                page_id.value() - 1
            )));
        }

        let first = pages.get_page(PageId::FIRST)?;
        pages.flush_page(&first)?;
        Ok(Self::with_parts(pages, log, first))
    }

    /// Open an existing page file and log, recovering after a crash
    pub fn open(pages: PageCache, log: Logger, tm: &dyn TransactionManager) -> Result<Self> {
        let pages = Arc::new(pages);
        let first = pages.get_page(PageId::FIRST).map_err(|e| match e {
            StorageError::PageNotFound(_) => StorageError::invalid_db("page file has no first page"),
            other => other,
        })?;

        if !first_page::check(&first) {
            info!("dm.unclean_shutdown");
            recovery::recover(tm, &log, &pages)?;
        }

        let dm = Self::with_parts(pages, log, first);
        dm.fill_index()?;

        first_page::set_open(&dm.first_page);
        dm.pages.flush_page(&dm.first_page)?;
        Ok(dm)
    }

    /// Register every record page's free space
    fn fill_index(&self) -> Result<()> {
        for n in 2..=self.pages.page_count() {
            let page = self.pages.get_page(PageId::new(n))?;
            let free = data_page::free_space(&page.read());
            self.index.add(page.page_id(), free);
            self.pages.release(&page)?;
        }
        debug!(pages = self.index.len(), "dm.index_filled");
        Ok(())
    }

    /// Pin the record at `uid`; `None` if it was invalidated.
    ///
    /// A returned item must be handed back through [`release`](Self::release).
    pub fn read(&self, uid: Uid) -> Result<Option<Arc<DataItem>>> {
        let item = self.items.get(uid.raw())?;
        if !item.is_valid() {
            self.release(&item)?;
            return Ok(None);
        }
        Ok(Some(item))
    }

    /// Store `data` as a new record and return its location
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        self.insert_with(xid, data, |need| self.index.select(need))
    }

    /// Insert, taking candidate pages from `select`
    fn insert_with(
        &self,
        xid: Xid,
        data: &[u8],
        select: impl Fn(usize) -> Option<PageInfo>,
    ) -> Result<Uid> {
        let raw = item::wrap_raw(data);
        if raw.len() > data_page::MAX_FREE_SPACE {
            return Err(StorageError::DataTooLarge {
                size: data.len(),
                max: data_page::MAX_FREE_SPACE - item::ITEM_HEADER_LEN,
            });
        }

        let mut selected = None;
        for _ in 0..MAX_ALLOC_ATTEMPTS {
            if let Some(info) = select(raw.len()) {
                selected = Some(info);
                break;
            }
            let page_id = self.pages.new_page(&data_page::init_raw())?;
            self.index.add(page_id, data_page::MAX_FREE_SPACE);
        }
        let info = selected.ok_or(StorageError::DatabaseBusy)?;

        let page = match self.pages.get_page(info.page_id) {
            Ok(page) => page,
            Err(e) => {
                self.index.add(info.page_id, info.free_space);
                return Err(e);
            }
        };

        let result = self.insert_into(&page, xid, &raw);
        let free = data_page::free_space(&page.read());
        self.index.add(info.page_id, free);
        self.pages.release(&page)?;
        result
    }

    fn insert_into(&self, page: &Page, xid: Xid, raw: &[u8]) -> Result<Uid> {
        let mut buf = page.write();
        let offset = data_page::free_space_offset(&buf);
        let record = LogRecord::Insert {
            xid,
            page_id: page.page_id(),
            offset,
            raw: raw.to_vec(),
        };
        self.log.append(&record.encode())?;

        let offset = data_page::insert(&mut buf, raw);
        Ok(Uid::new(page.page_id(), offset))
    }

    /// Modify a record in place under its exclusive latch.
    ///
    /// `f` edits a copy of the record data; the before and after images
    /// are logged, then the after image is written into the page.
    pub fn update(&self, xid: Xid, item: &DataItem, f: impl FnOnce(&mut [u8])) -> Result<()> {
        let _latch = item.lock();
        let old_raw = item.raw();
        let mut new_raw = old_raw.clone();
        f(&mut new_raw[DataItem::data_offset()..]);

        let record = LogRecord::Update {
            xid,
            uid: item.uid(),
            old_raw,
            new_raw: new_raw.clone(),
        };
        self.log.append(&record.encode())?;

        item.write_raw(&new_raw);
        Ok(())
    }

    /// Unpin a record obtained from [`read`](Self::read)
    pub fn release(&self, item: &DataItem) -> Result<()> {
        self.items.release(item.uid().raw())
    }

    /// Number of pages in the page file
    pub fn page_count(&self) -> u32 {
        self.pages.page_count()
    }

    /// Number of pages pinned in memory
    pub fn cached_pages(&self) -> usize {
        self.pages.cached_pages()
    }

    /// Flush everything and mark the shutdown as clean
    pub fn close(&self) -> Result<()> {
        self.items.close()?;
        self.log.close()?;

        first_page::set_closed(&self.first_page);
        self.pages.release(&self.first_page)?;
        self.pages.close()
    }
}
