//! Version entries.
//!
//! Layout of the record data under a version:
//! ```text
//! Offset  Size  Description
//! 0       8     XMIN: transaction that created the version
//! 8       8     XMAX: transaction that deleted it, 0 if none
//! 16      n     User data
//! ```

use crate::data::{DataItem, DataManager};
use crate::error::{Result, StorageError};
use crate::types::{Uid, Xid};
use std::sync::Arc;

const OF_XMIN: usize = 0;
const OF_XMAX: usize = 8;
const OF_DATA: usize = 16;

/// Record data for a new version created by `xid`
pub fn wrap_entry_raw(xid: Xid, data: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(OF_DATA + data.len());
    raw.extend_from_slice(&xid.to_be_bytes());
    raw.extend_from_slice(&0u64.to_be_bytes());
    raw.extend_from_slice(data);
    raw
}

fn read_xid(data: &[u8], offset: usize) -> Xid {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    Xid::from_be_bytes(bytes)
}

/// One version of a logical record
pub struct Entry {
    item: Arc<DataItem>,
}

impl Entry {
    /// Interpret a pinned record as a version entry
    pub(crate) fn new(item: Arc<DataItem>) -> Result<Self> {
        let len = item.with_data(|data| data.len());
        if len < OF_DATA {
            return Err(StorageError::corruption(format!(
                "record {} is {} bytes, shorter than a version header",
                item.uid(),
                len
            )));
        }
        Ok(Self { item })
    }

    pub fn uid(&self) -> Uid {
        self.item.uid()
    }

    pub(crate) fn item(&self) -> &DataItem {
        &self.item
    }

    /// Creating transaction
    pub fn xmin(&self) -> Xid {
        self.item.with_data(|data| read_xid(data, OF_XMIN))
    }

    /// Deleting transaction, 0 while the version is current
    pub fn xmax(&self) -> Xid {
        self.item.with_data(|data| read_xid(data, OF_XMAX))
    }

    /// Copy of the user data
    pub fn data(&self) -> Vec<u8> {
        self.item.with_data(|data| data[OF_DATA..].to_vec())
    }

    /// Record `xid` as the deleter, logged like any other update
    pub fn set_xmax(&self, dm: &DataManager, xid: Xid) -> Result<()> {
        dm.update(xid, &self.item, |data| {
            data[OF_XMAX..OF_XMAX + 8].copy_from_slice(&xid.to_be_bytes());
        })
    }
}
