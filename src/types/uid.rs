//! Universal record identifier.

use crate::error::StorageError;
use crate::types::PageId;
use std::fmt;
use std::str::FromStr;

/// Location of a record: page number in bits 32..64, in-page offset in
/// bits 0..16. Bits 16..32 are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(u64);

impl Uid {
    /// Build a UID from a page and an offset within it
    pub const fn new(page_id: PageId, offset: u16) -> Self {
        Self(((page_id.value() as u64) << 32) | offset as u64)
    }

    /// Reinterpret a raw 64-bit handle
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit handle
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Page holding the record
    pub const fn page_id(self) -> PageId {
        PageId::new((self.0 >> 32) as u32)
    }

    /// Byte offset of the record inside its page
    pub const fn offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_id(), self.offset())
    }
}

/// Parses either the `page:offset` form printed by `Display` or a raw handle
impl FromStr for Uid {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StorageError::invalid_operation(format!("invalid record id {:?}", s));
        match s.split_once(':') {
            Some((page, offset)) => {
                let page = page.parse::<u32>().map_err(|_| invalid())?;
                let offset = offset.parse::<u16>().map_err(|_| invalid())?;
                Ok(Self::new(PageId::new(page), offset))
            }
            None => s.parse::<u64>().map(Self).map_err(|_| invalid()),
        }
    }
}

impl From<u64> for Uid {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<Uid> for u64 {
    fn from(uid: Uid) -> Self {
        uid.0
    }
}
