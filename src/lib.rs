//! # MVCC Storage Engine
//!
//! An embedded, page-oriented record store with write-ahead logging, crash
//! recovery and multi-version concurrency control.
//!
//! ## Architecture
//!
//! The engine is built bottom-up from modular components:
//!
//! - **Buffer** (`buffer`): Reference-counted cache and the page cache on top of it
//! - **Storage** (`storage`): Page file I/O and the free space index
//! - **Page** (`page`): Page buffers, record page layout and the crash marker page
//! - **WAL** (`wal`): Checksummed, append-only log of physical changes
//! - **Transactions** (`txn`): Durable per-transaction status
//! - **Recovery** (`recovery`): Redo/undo pass run after an unclean shutdown
//! - **Data** (`data`): Logged record insert/update over the page cache
//! - **MVCC** (`mvcc`): Versioned records, visibility and write intents
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mvcc_storage::{Config, Db, IsolationLevel, SUPER_XID};
//!
//! let db = Db::create(Config::new("my_database"))?;
//!
//! let xid = db.begin(IsolationLevel::ReadCommitted)?;
//! let uid = db.insert(xid, b"hello")?;
//! db.commit(xid)?;
//!
//! assert_eq!(db.read(SUPER_XID, uid)?, Some(b"hello".to_vec()));
//! db.close()?;
//! ```

pub mod buffer;
pub mod data;
pub mod error;
pub mod mvcc;
pub mod page;
pub mod recovery;
pub mod storage;
pub mod txn;
pub mod types;
pub mod wal;

pub use error::{ConflictKind, Result, StorageError};
pub use types::{IsolationLevel, PageId, Uid, Xid, PAGE_SIZE, SUPER_XID};

// Re-export main public API
pub use buffer::{PageCache, MIN_CACHE_PAGES};
pub use data::DataManager;
pub use mvcc::VersionManager;
pub use recovery::RecoveryStats;
pub use txn::{TransactionManager, TransactionManagerImpl};
pub use wal::Logger;

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Database configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base path; the database lives in `<path>.db`, `<path>.log` and `<path>.xid`
    pub path: PathBuf,
    /// Page cache size in number of pages (default: 1000)
    pub page_cache_pages: usize,
    /// Whether to sync page write-backs immediately (default: true)
    pub sync_on_write: bool,
}

impl Config {
    /// Create a new configuration with default settings
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            page_cache_pages: 1000,
            sync_on_write: true,
        }
    }

    /// Set page cache size
    pub fn page_cache_pages(mut self, pages: usize) -> Self {
        self.page_cache_pages = pages;
        self
    }

    /// Enable or disable syncing page write-backs
    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }

    fn file(&self, extension: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".");
        name.push(extension);
        PathBuf::from(name)
    }

    /// Page file
    pub fn db_path(&self) -> PathBuf {
        self.file("db")
    }

    /// Write-ahead log
    pub fn log_path(&self) -> PathBuf {
        self.file("log")
    }

    /// Transaction status file
    pub fn xid_path(&self) -> PathBuf {
        self.file("xid")
    }

    fn check(&self) -> Result<()> {
        if self.page_cache_pages < MIN_CACHE_PAGES {
            return Err(StorageError::CacheTooSmall {
                pages: self.page_cache_pages,
                min: MIN_CACHE_PAGES,
            });
        }
        Ok(())
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStats {
    /// Total number of pages in the page file
    pub page_count: u32,
    /// Pages currently held in memory
    pub cached_pages: usize,
    /// Running user transactions
    pub active_transactions: usize,
    /// Highest transaction id handed out
    pub last_xid: Xid,
}

/// Main database handle providing transactional record storage
///
/// This is the primary public interface for the storage engine. Records
/// are addressed by the [`Uid`] returned from [`insert`](Db::insert);
/// every operation runs inside a transaction from [`begin`](Db::begin),
/// or the always-committed [`SUPER_XID`] for plain reads.
pub struct Db {
    tm: Arc<TransactionManagerImpl>,
    dm: Arc<DataManager>,
    vm: VersionManager,
}

impl Db {
    /// Create a new database. Fails if any of its files already exist.
    pub fn create(config: Config) -> Result<Self> {
        config.check()?;
        for path in [config.db_path(), config.log_path(), config.xid_path()] {
            ensure_absent(&path)?;
        }

        let tm = Arc::new(TransactionManagerImpl::create(&config.xid_path())?);
        let pages = PageCache::create(
            &config.db_path(),
            config.page_cache_pages,
            config.sync_on_write,
        )?;
        let log = Logger::create(&config.log_path())?;
        let dm = Arc::new(DataManager::create(pages, log)?);

        info!(path = %config.path.display(), "db.create");
        Ok(Self::assemble(tm, dm))
    }

    /// Open an existing database, recovering it if it was not closed cleanly
    pub fn open(config: Config) -> Result<Self> {
        config.check()?;

        let tm = Arc::new(TransactionManagerImpl::open(&config.xid_path())?);
        let pages = PageCache::open(
            &config.db_path(),
            config.page_cache_pages,
            config.sync_on_write,
        )?;
        let log = Logger::open(&config.log_path())?;
        let dm = Arc::new(DataManager::open(pages, log, tm.as_ref())?);

        info!(path = %config.path.display(), "db.open");
        Ok(Self::assemble(tm, dm))
    }

    fn assemble(tm: Arc<TransactionManagerImpl>, dm: Arc<DataManager>) -> Self {
        let vm = VersionManager::new(tm.clone(), dm.clone());
        Self { tm, dm, vm }
    }

    /// Start a transaction
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        self.vm.begin(level)
    }

    /// Read a record as seen by `xid`
    ///
    /// Returns `None` if the record does not exist or is not visible.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        self.vm.read(xid, uid)
    }

    /// Insert a record and return its identifier
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        self.vm.insert(xid, data)
    }

    /// Delete a record
    ///
    /// Returns `true` if a visible record was deleted.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        self.vm.delete(xid, uid)
    }

    /// Commit a transaction
    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.vm.commit(xid)
    }

    /// Abort a transaction
    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.vm.abort(xid)
    }

    /// Get statistics about the database
    pub fn stats(&self) -> DbStats {
        DbStats {
            page_count: self.dm.page_count(),
            cached_pages: self.dm.cached_pages(),
            active_transactions: self.vm.active_transactions(),
            last_xid: self.tm.last_xid(),
        }
    }

    /// Flush everything and mark the shutdown as clean
    pub fn close(self) -> Result<()> {
        self.vm.close()?;
        self.dm.close()?;
        info!("db.close");
        Ok(())
    }
}

fn ensure_absent(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(StorageError::invalid_db(format!(
            "{} already exists",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::tempdir;

    use IsolationLevel::{ReadCommitted, RepeatableRead};

    fn config(dir: &Path) -> Config {
        Config::new(dir.join("test"))
            .page_cache_pages(MIN_CACHE_PAGES)
            .sync_on_write(false)
    }

    #[test]
    fn test_basic_operations() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Db::create(config(dir.path()))?;

        let t1 = db.begin(ReadCommitted)?;
        let uid = db.insert(t1, b"value1")?;
        assert_eq!(db.read(t1, uid)?, Some(b"value1".to_vec()));
        db.commit(t1)?;

        assert_eq!(db.read(SUPER_XID, uid)?, Some(b"value1".to_vec()));

        let t2 = db.begin(ReadCommitted)?;
        assert!(db.delete(t2, uid)?);
        assert!(!db.delete(t2, uid)?);
        db.commit(t2)?;
        assert_eq!(db.read(SUPER_XID, uid)?, None);

        db.close()
    }

    #[test]
    fn test_file_layout() -> Result<()> {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        Db::create(cfg.clone())?.close()?;

        assert!(dir.path().join("test.db").exists());
        assert!(dir.path().join("test.log").exists());
        assert!(dir.path().join("test.xid").exists());

        // Creating over an existing database is refused
        assert!(matches!(
            Db::create(cfg),
            Err(StorageError::InvalidDatabaseFile(_))
        ));
        Ok(())
    }

    #[test]
    fn test_open_missing_database() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Db::open(config(dir.path())),
            Err(StorageError::InvalidDatabaseFile(_))
        ));
    }

    #[test]
    fn test_cache_too_small() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path()).page_cache_pages(MIN_CACHE_PAGES - 1);
        assert!(matches!(
            Db::create(cfg),
            Err(StorageError::CacheTooSmall { .. })
        ));
        // Nothing was left behind
        assert!(!dir.path().join("test.xid").exists());
    }

    #[test]
    fn test_reopen_after_close() -> Result<()> {
        let dir = tempdir().unwrap();

        let (kept, gone) = {
            let db = Db::create(config(dir.path()))?;
            let t1 = db.begin(ReadCommitted)?;
            let kept = db.insert(t1, b"kept")?;
            let gone = db.insert(t1, b"gone")?;
            db.commit(t1)?;

            let t2 = db.begin(ReadCommitted)?;
            db.delete(t2, gone)?;
            db.commit(t2)?;
            db.close()?;
            (kept, gone)
        };

        let db = Db::open(config(dir.path()))?;
        assert_eq!(db.read(SUPER_XID, kept)?, Some(b"kept".to_vec()));
        assert_eq!(db.read(SUPER_XID, gone)?, None);

        // Transaction ids keep counting up
        let t3 = db.begin(ReadCommitted)?;
        assert_eq!(t3, 3);
        db.abort(t3)?;
        db.close()
    }

    #[test]
    fn test_crash_recovery() -> Result<()> {
        let dir = tempdir().unwrap();

        let (committed, in_flight, deleted) = {
            let db = Db::create(config(dir.path()))?;
            let t1 = db.begin(ReadCommitted)?;
            let committed = db.insert(t1, b"committed")?;
            let deleted = db.insert(t1, b"survives")?;
            db.commit(t1)?;

            let t2 = db.begin(ReadCommitted)?;
            let in_flight = db.insert(t2, b"in flight")?;
            assert!(db.delete(t2, deleted)?);

            // Dropped without close: the crash marker stays open
            drop(db);
            (committed, in_flight, deleted)
        };

        let db = Db::open(config(dir.path()))?;
        assert_eq!(db.read(SUPER_XID, committed)?, Some(b"committed".to_vec()));
        assert_eq!(db.read(SUPER_XID, in_flight)?, None);
        assert_eq!(db.read(SUPER_XID, deleted)?, Some(b"survives".to_vec()));

        // The interrupted transaction was rolled back for good
        assert!(db.tm.is_aborted(2)?);
        db.close()?;

        // Recovered state is stable across another open
        let db = Db::open(config(dir.path()))?;
        assert_eq!(db.read(SUPER_XID, committed)?, Some(b"committed".to_vec()));
        assert_eq!(db.read(SUPER_XID, in_flight)?, None);
        db.close()
    }

    #[test]
    fn test_repeatable_read_scenario() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Db::create(config(dir.path()))?;

        let t1 = db.begin(RepeatableRead)?;
        let t2 = db.begin(RepeatableRead)?;
        let r = db.insert(t1, b"R")?;
        assert_eq!(db.read(t2, r)?, None);
        db.commit(t1)?;
        assert_eq!(db.read(t2, r)?, None);
        db.commit(t2)?;

        // Begun after the commit, so it sees the record
        let t3 = db.begin(RepeatableRead)?;
        assert_eq!(db.read(t3, r)?, Some(b"R".to_vec()));
        db.commit(t3)?;
        db.close()
    }

    #[test]
    fn test_version_skip_scenario() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Db::create(config(dir.path()))?;

        let t0 = db.begin(ReadCommitted)?;
        let v0 = db.insert(t0, b"v0")?;
        db.commit(t0)?;

        let t1 = db.begin(RepeatableRead)?;
        let t2 = db.begin(RepeatableRead)?;
        assert_eq!(db.read(t1, v0)?, Some(b"v0".to_vec()));
        assert_eq!(db.read(t2, v0)?, Some(b"v0".to_vec()));

        assert!(db.delete(t1, v0)?);
        let v1 = db.insert(t1, b"v1")?;
        db.commit(t1)?;

        let err = db.delete(t2, v0).unwrap_err();
        assert!(err.is_conflict());
        db.abort(t2)?;

        assert_eq!(db.read(SUPER_XID, v0)?, None);
        assert_eq!(db.read(SUPER_XID, v1)?, Some(b"v1".to_vec()));
        db.close()
    }

    #[test]
    fn test_concurrent_transactions() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Arc::new(Db::create(config(dir.path()))?);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let db = Arc::clone(&db);
                thread::spawn(move || -> Result<Vec<(Uid, Vec<u8>)>> {
                    let mut written = Vec::new();
                    for i in 0..20 {
                        let xid = db.begin(ReadCommitted)?;
                        let data = format!("thread {} row {}", t, i).into_bytes();
                        let uid = db.insert(xid, &data)?;
                        db.commit(xid)?;
                        written.push((uid, data));
                    }
                    Ok(written)
                })
            })
            .collect();

        for handle in handles {
            for (uid, data) in handle.join().unwrap()? {
                assert_eq!(db.read(SUPER_XID, uid)?, Some(data));
            }
        }

        let stats = db.stats();
        assert_eq!(stats.active_transactions, 0);
        assert_eq!(stats.last_xid, 80);
        Ok(())
    }

    #[test]
    fn test_stats() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Db::create(config(dir.path()))?;

        let t1 = db.begin(ReadCommitted)?;
        db.insert(t1, b"x")?;

        let stats = db.stats();
        assert_eq!(stats.page_count, 2);
        assert_eq!(stats.cached_pages, 1);
        assert_eq!(stats.active_transactions, 1);
        assert_eq!(stats.last_xid, 1);

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"pageCount\":2"));
        assert!(json.contains("\"activeTransactions\":1"));
        Ok(())
    }
}
