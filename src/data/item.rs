//! Raw records ("data items") stored inside record pages.
//!
//! Layout:
//! ```text
//! Offset  Size  Description
//! 0       1     Valid flag (0 = valid, 1 = invalidated)
//! 1       2     Data length
//! 3       n     Data
//! ```
//! A record is never moved or shrunk once written; updates rewrite it in
//! place with an image of the same length.

use crate::error::{Result, StorageError};
use crate::page::{data_page, Page};
use crate::types::{PageId, Uid, PAGE_SIZE};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::sync::Arc;

const OF_VALID: usize = 0;
const OF_SIZE: usize = 1;
const OF_DATA: usize = 3;

const FLAG_VALID: u8 = 0;
const FLAG_INVALID: u8 = 1;

/// Bytes a record adds around its data
pub const ITEM_HEADER_LEN: usize = OF_DATA;

/// Build the raw bytes of a new, valid record
pub fn wrap_raw(data: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(OF_DATA + data.len());
    raw.push(FLAG_VALID);
    raw.extend_from_slice(&(data.len() as u16).to_be_bytes());
    raw.extend_from_slice(data);
    raw
}

/// Flag raw record bytes as invalidated
pub fn set_raw_invalid(raw: &mut [u8]) {
    raw[OF_VALID] = FLAG_INVALID;
}

/// Whether raw record bytes carry the valid flag
pub fn is_raw_valid(raw: &[u8]) -> bool {
    raw[OF_VALID] == FLAG_VALID
}

/// A record pinned in memory together with its page.
///
/// Reads share the record latch; an update holds it exclusively for the
/// whole log-then-write sequence (see `DataManager::update`).
pub struct DataItem {
    uid: Uid,
    page: Arc<Page>,
    /// Start of the raw record within the page
    offset: usize,
    /// Length of the raw record
    len: usize,
    latch: RwLock<()>,
}

impl DataItem {
    /// Locate the record at `uid` inside its (already pinned) page
    pub(crate) fn parse(page: Arc<Page>, uid: Uid) -> Result<Self> {
        let offset = uid.offset() as usize;
        let len = {
            let buf = page.read();
            let used = data_page::free_space_offset(&buf) as usize;
            if page.page_id() == PageId::FIRST
                || offset < 2
                || offset + OF_DATA > used.min(PAGE_SIZE)
            {
                return Err(StorageError::RecordNotFound(uid));
            }
            let size = u16::from_be_bytes([buf[offset + OF_SIZE], buf[offset + OF_SIZE + 1]]);
            let len = OF_DATA + size as usize;
            if offset + len > used.min(PAGE_SIZE) {
                return Err(StorageError::RecordNotFound(uid));
            }
            len
        };

        Ok(Self {
            uid,
            page,
            offset,
            len,
            latch: RwLock::new(()),
        })
    }

    /// Location of the record
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// The page holding the record
    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    /// Whether the record has not been invalidated
    pub fn is_valid(&self) -> bool {
        let _latch = self.latch.read();
        is_raw_valid(&self.page.read()[self.offset..])
    }

    /// Run `f` over the record data under the shared latch
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let _latch = self.latch.read();
        let buf = self.page.read();
        f(&buf[self.offset + OF_DATA..self.offset + self.len])
    }

    /// Copy of the record data
    pub fn data(&self) -> Vec<u8> {
        self.with_data(|data| data.to_vec())
    }

    /// Take the record latch exclusively
    pub(crate) fn lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.latch.write()
    }

    /// Copy of the whole raw record; caller holds the latch
    pub(crate) fn raw(&self) -> Vec<u8> {
        self.page.read()[self.offset..self.offset + self.len].to_vec()
    }

    /// Overwrite the whole raw record; caller holds the latch
    pub(crate) fn write_raw(&self, raw: &[u8]) {
        self.page.write()[self.offset..self.offset + self.len].copy_from_slice(raw);
    }

    /// Offset of the data within the raw record
    pub(crate) fn data_offset() -> usize {
        OF_DATA
    }
}
