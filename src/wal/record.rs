//! Log record encoding.
//!
//! Two record kinds, told apart by the leading type byte:
//! ```text
//! Insert: [0] [xid:8] [page:4] [offset:2] [raw...]
//! Update: [1] [xid:8] [uid:8]  [old_raw...] [new_raw...]
//! ```
//! The old and new images of an update always have the same length.

use crate::error::{Result, StorageError};
use crate::types::{PageId, Uid, Xid};

const TYPE_INSERT: u8 = 0;
const TYPE_UPDATE: u8 = 1;

const OF_XID: usize = 1;
const OF_INSERT_PAGE: usize = OF_XID + 8;
const OF_INSERT_OFFSET: usize = OF_INSERT_PAGE + 4;
const OF_INSERT_RAW: usize = OF_INSERT_OFFSET + 2;
const OF_UPDATE_UID: usize = OF_XID + 8;
const OF_UPDATE_RAW: usize = OF_UPDATE_UID + 8;

/// A parsed log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A raw record was written at `offset` of `page_id`
    Insert {
        xid: Xid,
        page_id: PageId,
        offset: u16,
        raw: Vec<u8>,
    },
    /// The raw record at `uid` changed from `old_raw` to `new_raw`
    Update {
        xid: Xid,
        uid: Uid,
        old_raw: Vec<u8>,
        new_raw: Vec<u8>,
    },
}

impl LogRecord {
    /// Transaction that produced the record
    pub fn xid(&self) -> Xid {
        match self {
            Self::Insert { xid, .. } | Self::Update { xid, .. } => *xid,
        }
    }

    /// Page the record touches
    pub fn page_id(&self) -> PageId {
        match self {
            Self::Insert { page_id, .. } => *page_id,
            Self::Update { uid, .. } => uid.page_id(),
        }
    }

    /// Serialize into log bytes
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Insert {
                xid,
                page_id,
                offset,
                raw,
            } => {
                let mut buf = Vec::with_capacity(OF_INSERT_RAW + raw.len());
                buf.push(TYPE_INSERT);
                buf.extend_from_slice(&xid.to_be_bytes());
                buf.extend_from_slice(&page_id.value().to_be_bytes());
                buf.extend_from_slice(&offset.to_be_bytes());
                buf.extend_from_slice(raw);
                buf
            }
            Self::Update {
                xid,
                uid,
                old_raw,
                new_raw,
            } => {
                let mut buf = Vec::with_capacity(OF_UPDATE_RAW + old_raw.len() * 2);
                buf.push(TYPE_UPDATE);
                buf.extend_from_slice(&xid.to_be_bytes());
                buf.extend_from_slice(&uid.raw().to_be_bytes());
                buf.extend_from_slice(old_raw);
                buf.extend_from_slice(new_raw);
                buf
            }
        }
    }

    /// Parse log bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let kind = *bytes
            .first()
            .ok_or_else(|| StorageError::corruption("empty log record"))?;

        match kind {
            TYPE_INSERT => {
                if bytes.len() < OF_INSERT_RAW {
                    return Err(StorageError::corruption("insert log record too short"));
                }
                Ok(Self::Insert {
                    xid: read_u64(&bytes[OF_XID..OF_INSERT_PAGE]),
                    page_id: PageId::new(u32::from_be_bytes([
                        bytes[OF_INSERT_PAGE],
                        bytes[OF_INSERT_PAGE + 1],
                        bytes[OF_INSERT_PAGE + 2],
                        bytes[OF_INSERT_PAGE + 3],
                    ])),
                    offset: u16::from_be_bytes([bytes[OF_INSERT_OFFSET], bytes[OF_INSERT_OFFSET + 1]]),
                    raw: bytes[OF_INSERT_RAW..].to_vec(),
                })
            }
            TYPE_UPDATE => {
                if bytes.len() < OF_UPDATE_RAW || (bytes.len() - OF_UPDATE_RAW) % 2 != 0 {
                    return Err(StorageError::corruption("malformed update log record"));
                }
                let half = (bytes.len() - OF_UPDATE_RAW) / 2;
                let images = &bytes[OF_UPDATE_RAW..];
                Ok(Self::Update {
                    xid: read_u64(&bytes[OF_XID..OF_UPDATE_UID]),
                    uid: Uid::from_raw(read_u64(&bytes[OF_UPDATE_UID..OF_UPDATE_RAW])),
                    old_raw: images[..half].to_vec(),
                    new_raw: images[half..].to_vec(),
                })
            }
            other => Err(StorageError::corruption(format!(
                "unknown log record type {}",
                other
            ))),
        }
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}
