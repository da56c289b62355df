//! File-backed transaction status store.
//!
//! Layout:
//! ```text
//! Offset       Size  Description
//! 0            8     Number of transactions ever started (xid counter)
//! 8 + xid - 1  1     Status of transaction `xid`
//! ```
//! The super transaction (xid 0) has no status byte.

use crate::error::{Result, StorageError};
use crate::txn::TransactionManager;
use crate::types::{Xid, SUPER_XID};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// Size of the xid counter header
const HEADER_LEN: u64 = 8;

const STATUS_ACTIVE: u8 = 0;
const STATUS_COMMITTED: u8 = 1;
const STATUS_ABORTED: u8 = 2;

struct StatusFile {
    file: File,
    xid_counter: u64,
}

impl StatusFile {
    fn position(xid: Xid) -> u64 {
        HEADER_LEN + (xid - 1)
    }

    fn write_status(&mut self, xid: Xid, status: u8) -> Result<()> {
        self.file.seek(SeekFrom::Start(Self::position(xid)))?;
        self.file.write_all(&[status])?;
        self.file.sync_data()?;
        Ok(())
    }

    fn read_status(&mut self, xid: Xid) -> Result<u8> {
        if xid > self.xid_counter {
            return Err(StorageError::UnknownTransaction(xid));
        }
        let mut buf = [0u8; 1];
        self.file.seek(SeekFrom::Start(Self::position(xid)))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn write_counter(&mut self, counter: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&counter.to_be_bytes())?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Transaction manager persisting one status byte per transaction
pub struct TransactionManagerImpl {
    inner: Mutex<StatusFile>,
}

impl TransactionManagerImpl {
    /// Create an empty status file. Fails if the file already exists.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let mut status = StatusFile {
            file,
            xid_counter: 0,
        };
        status.write_counter(0)?;

        Ok(Self {
            inner: Mutex::new(status),
        })
    }

    /// Open an existing status file, checking its length against the counter
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StorageError::invalid_db(format!(
                "transaction file {} does not exist",
                path.display()
            )));
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN {
            return Err(StorageError::invalid_db("transaction file shorter than its header"));
        }

        let mut header = [0u8; HEADER_LEN as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let xid_counter = u64::from_be_bytes(header);

        if HEADER_LEN + xid_counter != len {
            return Err(StorageError::invalid_db(format!(
                "transaction file holds {} bytes but counter is {}",
                len, xid_counter
            )));
        }

        Ok(Self {
            inner: Mutex::new(StatusFile { file, xid_counter }),
        })
    }

    fn set_status(&self, xid: Xid, status: u8) -> Result<()> {
        if xid == SUPER_XID {
            return Err(StorageError::invalid_operation(
                "the super transaction never ends",
            ));
        }

        let mut inner = self.inner.lock();
        // Terminal states are final; only an active transaction may move
        match inner.read_status(xid)? {
            STATUS_ACTIVE => inner.write_status(xid, status),
            current if current == status => Ok(()),
            _ => Err(StorageError::invalid_operation(format!(
                "transaction {} has already ended",
                xid
            ))),
        }
    }

    fn check_status(&self, xid: Xid, status: u8) -> Result<bool> {
        Ok(self.inner.lock().read_status(xid)? == status)
    }
}

impl TransactionManager for TransactionManagerImpl {
    fn begin(&self) -> Result<Xid> {
        let mut inner = self.inner.lock();
        let xid = inner.xid_counter + 1;
        inner.write_status(xid, STATUS_ACTIVE)?;
        inner.write_counter(xid)?;
        inner.xid_counter = xid;

        debug!(xid, "txn.begin");
        Ok(xid)
    }

    fn commit(&self, xid: Xid) -> Result<()> {
        self.set_status(xid, STATUS_COMMITTED)
    }

    fn abort(&self, xid: Xid) -> Result<()> {
        self.set_status(xid, STATUS_ABORTED)
    }

    fn is_active(&self, xid: Xid) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        self.check_status(xid, STATUS_ACTIVE)
    }

    fn is_committed(&self, xid: Xid) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(true);
        }
        self.check_status(xid, STATUS_COMMITTED)
    }

    fn is_aborted(&self, xid: Xid) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        self.check_status(xid, STATUS_ABORTED)
    }

    fn last_xid(&self) -> Xid {
        self.inner.lock().xid_counter
    }
}
