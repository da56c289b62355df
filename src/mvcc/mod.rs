//! Multi-version concurrency control.
//!
//! The version manager sits on top of the data manager. Every logical
//! record is a single version entry tagged with its creating (XMIN) and
//! deleting (XMAX) transaction; whether a transaction sees it is decided
//! by [`visibility`] against the transaction status store.
//!
//! Deletes take a per-record write intent from the [`LockTable`]. A
//! writer that would deadlock, or that would skip over a version it
//! cannot see under repeatable read, is aborted by the engine and keeps
//! failing with [`StorageError::ConcurrentUpdate`] until its owner
//! acknowledges with `abort`.

pub mod entry;
pub mod lock_table;
pub mod transaction;
pub mod visibility;

pub use entry::Entry;
pub use lock_table::LockTable;
pub use transaction::Transaction;

use crate::buffer::{CacheSource, RefCountCache};
use crate::data::DataManager;
use crate::error::{ConflictKind, Result, StorageError};
use crate::txn::TransactionManager;
use crate::types::{IsolationLevel, Uid, Xid, SUPER_XID};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Loads version entries through the data manager
struct EntrySource {
    dm: Arc<DataManager>,
}

impl CacheSource for EntrySource {
    type Item = Entry;

    fn fetch(&self, key: u64) -> Result<Arc<Entry>> {
        let uid = Uid::from_raw(key);
        let item = self.dm.read(uid)?.ok_or(StorageError::RecordNotFound(uid))?;
        match Entry::new(Arc::clone(&item)) {
            Ok(entry) => Ok(Arc::new(entry)),
            Err(e) => {
                self.dm.release(&item)?;
                Err(e)
            }
        }
    }

    fn write_back(&self, entry: &Entry) -> Result<()> {
        self.dm.release(entry.item())
    }
}

type SharedTransaction = Arc<Mutex<Transaction>>;

/// Transactional access to versioned records
pub struct VersionManager {
    tm: Arc<dyn TransactionManager>,
    dm: Arc<DataManager>,
    entries: RefCountCache<EntrySource>,
    active: Mutex<HashMap<Xid, SharedTransaction>>,
    locks: LockTable,
}

fn check_err(t: &Transaction) -> Result<()> {
    match t.err {
        Some(kind) => Err(StorageError::ConcurrentUpdate(kind)),
        None => Ok(()),
    }
}

impl VersionManager {
    /// Build a version manager over `dm`, answering visibility from `tm`.
    ///
    /// The super transaction is registered from the start.
    pub fn new(tm: Arc<dyn TransactionManager>, dm: Arc<DataManager>) -> Self {
        let mut active = HashMap::new();
        active.insert(
            SUPER_XID,
            Arc::new(Mutex::new(Transaction::new(
                SUPER_XID,
                IsolationLevel::ReadCommitted,
                [],
            ))),
        );

        Self {
            tm,
            entries: RefCountCache::new(
                EntrySource {
                    dm: Arc::clone(&dm),
                },
                0,
            ),
            dm,
            active: Mutex::new(active),
            locks: LockTable::new(),
        }
    }

    fn transaction(&self, xid: Xid) -> Result<SharedTransaction> {
        self.active
            .lock()
            .get(&xid)
            .cloned()
            .ok_or(StorageError::UnknownTransaction(xid))
    }

    /// Pin the entry at `uid`; `None` if no live record is there
    fn get_entry(&self, uid: Uid) -> Result<Option<Arc<Entry>>> {
        match self.entries.get(uid.raw()) {
            Ok(entry) => Ok(Some(entry)),
            Err(StorageError::RecordNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn release_entry(&self, entry: &Entry) -> Result<()> {
        self.entries.release(entry.uid().raw())
    }

    /// Start a transaction
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        let mut active = self.active.lock();
        let xid = self.tm.begin()?;
        let t = Transaction::new(xid, level, active.keys().copied());
        active.insert(xid, Arc::new(Mutex::new(t)));

        debug!(xid, level = level.level(), "vm.begin");
        Ok(xid)
    }

    /// Data of the record at `uid` if `xid` can see it
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let t = self.transaction(xid)?;
        let t = t.lock();
        check_err(&t)?;

        let Some(entry) = self.get_entry(uid)? else {
            return Ok(None);
        };
        let visible = visibility::is_visible(self.tm.as_ref(), &t, &entry);
        let data = visible.map(|v| v.then(|| entry.data()));
        self.release_entry(&entry)?;
        data
    }

    /// Store `data` as a new record created by `xid`
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let t = self.transaction(xid)?;
        check_err(&t.lock())?;

        let raw = entry::wrap_entry_raw(xid, data);
        self.dm.insert(xid, &raw)
    }

    /// Delete the record at `uid` on behalf of `xid`.
    ///
    /// Returns `false` if there was nothing visible to delete. Blocks
    /// while another transaction holds the record's write intent.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        let t = self.transaction(xid)?;
        check_err(&t.lock())?;

        let Some(entry) = self.get_entry(uid)? else {
            return Ok(false);
        };
        let deleted = self.delete_entry(&t, &entry);
        self.release_entry(&entry)?;
        deleted
    }

    fn delete_entry(&self, t: &Mutex<Transaction>, entry: &Entry) -> Result<bool> {
        let xid = {
            let t = t.lock();
            if !visibility::is_visible(self.tm.as_ref(), &t, entry)? {
                return Ok(false);
            }
            t.xid
        };

        let waiter = match self.locks.add(xid, entry.uid()) {
            Ok(waiter) => waiter,
            Err(StorageError::ConcurrentUpdate(kind)) => {
                warn!(xid, uid = %entry.uid(), "vm.deadlock");
                self.auto_abort(xid, kind)?;
                return Err(StorageError::ConcurrentUpdate(kind));
            }
            Err(e) => return Err(e),
        };
        if let Some(waiter) = waiter {
            waiter.wait();
        }

        let skip = {
            let t = t.lock();
            if entry.xmax() == xid {
                return Ok(false);
            }
            if visibility::is_version_skip(self.tm.as_ref(), &t, entry)? {
                true
            } else if !visibility::is_visible(self.tm.as_ref(), &t, entry)? {
                return Ok(false);
            } else {
                false
            }
        };
        if skip {
            warn!(xid, uid = %entry.uid(), xmax = entry.xmax(), "vm.version_skip");
            self.auto_abort(xid, ConflictKind::VersionSkip)?;
            return Err(StorageError::ConcurrentUpdate(ConflictKind::VersionSkip));
        }

        entry.set_xmax(&self.dm, xid)?;
        Ok(true)
    }

    /// Commit `xid`; fails if the engine already aborted it
    pub fn commit(&self, xid: Xid) -> Result<()> {
        if xid == SUPER_XID {
            return Err(StorageError::invalid_operation(
                "the super transaction cannot commit",
            ));
        }

        let t = self.transaction(xid)?;
        check_err(&t.lock())?;

        // Durable before any waiter re-examines the records
        self.tm.commit(xid)?;
        self.active.lock().remove(&xid);
        self.locks.remove(xid);
        debug!(xid, "vm.commit");
        Ok(())
    }

    /// Abort `xid`, or acknowledge an abort the engine already did
    pub fn abort(&self, xid: Xid) -> Result<()> {
        if xid == SUPER_XID {
            return Err(StorageError::invalid_operation(
                "the super transaction cannot abort",
            ));
        }

        let t = self
            .active
            .lock()
            .remove(&xid)
            .ok_or(StorageError::UnknownTransaction(xid))?;
        if !t.lock().auto_aborted {
            self.tm.abort(xid)?;
        }
        self.locks.remove(xid);
        debug!(xid, "vm.abort");
        Ok(())
    }

    /// Roll `xid` back on the engine's initiative; it stays registered
    /// so its owner sees the conflict on the next call.
    fn auto_abort(&self, xid: Xid, kind: ConflictKind) -> Result<()> {
        let t = self.transaction(xid)?;
        {
            let mut t = t.lock();
            t.err = Some(kind);
            if t.auto_aborted {
                return Ok(());
            }
        }

        // Left unset on failure so `abort` retries the status write
        self.tm.abort(xid)?;
        t.lock().auto_aborted = true;
        self.locks.remove(xid);
        Ok(())
    }

    /// Number of running user transactions
    pub fn active_transactions(&self) -> usize {
        self.active.lock().len() - 1
    }

    /// Release every cached entry
    pub fn close(&self) -> Result<()> {
        self.entries.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PageCache;
    use crate::txn::TransactionManagerImpl;
    use crate::types::PageId;
    use crate::wal::Logger;
    use std::io;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    use IsolationLevel::{ReadCommitted, RepeatableRead};

    /// Block until `xid` is queued on `uid`'s write intent
    fn wait_until_queued(vm: &VersionManager, xid: Xid, uid: Uid) {
        while vm.locks.waiting_for(xid) != Some(uid) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn create(dir: &Path) -> Result<VersionManager> {
        let tm = Arc::new(TransactionManagerImpl::create(&dir.join("test.xid"))?);
        create_with(dir, tm)
    }

    fn create_with(dir: &Path, tm: Arc<dyn TransactionManager>) -> Result<VersionManager> {
        let pages = PageCache::create(&dir.join("test.db"), 32, false)?;
        let log = Logger::create(&dir.join("test.log"))?;
        let dm = Arc::new(DataManager::create(pages, log)?);
        Ok(VersionManager::new(tm, dm))
    }

    /// Status store whose `abort` can be made to fail
    struct FailingAbort {
        inner: TransactionManagerImpl,
        fail: AtomicBool,
    }

    impl TransactionManager for FailingAbort {
        fn begin(&self) -> Result<Xid> {
            self.inner.begin()
        }

        fn commit(&self, xid: Xid) -> Result<()> {
            self.inner.commit(xid)
        }

        fn abort(&self, xid: Xid) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "status file unavailable",
                )));
            }
            self.inner.abort(xid)
        }

        fn is_active(&self, xid: Xid) -> Result<bool> {
            self.inner.is_active(xid)
        }

        fn is_committed(&self, xid: Xid) -> Result<bool> {
            self.inner.is_committed(xid)
        }

        fn is_aborted(&self, xid: Xid) -> Result<bool> {
            self.inner.is_aborted(xid)
        }

        fn last_xid(&self) -> Xid {
            self.inner.last_xid()
        }
    }

    #[test]
    fn test_committed_insert_visible_to_super() -> Result<()> {
        let dir = tempdir().unwrap();
        let vm = create(dir.path())?;

        let t1 = vm.begin(ReadCommitted)?;
        let uid = vm.insert(t1, br#"{"a":1}"#)?;
        assert_eq!(vm.read(SUPER_XID, uid)?, None);

        vm.commit(t1)?;
        assert_eq!(vm.read(SUPER_XID, uid)?, Some(br#"{"a":1}"#.to_vec()));
        Ok(())
    }

    #[test]
    fn test_repeatable_read_hides_later_commit() -> Result<()> {
        let dir = tempdir().unwrap();
        let vm = create(dir.path())?;

        let t1 = vm.begin(RepeatableRead)?;
        let t2 = vm.begin(RepeatableRead)?;
        let uid = vm.insert(t1, b"R")?;
        assert_eq!(vm.read(t1, uid)?, Some(b"R".to_vec()));
        assert_eq!(vm.read(t2, uid)?, None);

        vm.commit(t1)?;
        assert_eq!(vm.read(t2, uid)?, None);

        // A read-committed reader sees it right away
        let t3 = vm.begin(ReadCommitted)?;
        assert_eq!(vm.read(t3, uid)?, Some(b"R".to_vec()));
        Ok(())
    }

    #[test]
    fn test_delete_and_abort() -> Result<()> {
        let dir = tempdir().unwrap();
        let vm = create(dir.path())?;

        let t0 = vm.begin(ReadCommitted)?;
        let uid = vm.insert(t0, b"row")?;
        vm.commit(t0)?;

        let t1 = vm.begin(ReadCommitted)?;
        assert!(vm.delete(t1, uid)?);
        assert_eq!(vm.read(t1, uid)?, None);
        // Deleting twice finds nothing
        assert!(!vm.delete(t1, uid)?);
        vm.abort(t1)?;

        // The aborted delete leaves the record in place
        let t2 = vm.begin(ReadCommitted)?;
        assert_eq!(vm.read(t2, uid)?, Some(b"row".to_vec()));
        assert!(vm.delete(t2, uid)?);
        vm.commit(t2)?;
        assert_eq!(vm.read(SUPER_XID, uid)?, None);
        Ok(())
    }

    #[test]
    fn test_version_skip_aborts_writer() -> Result<()> {
        let dir = tempdir().unwrap();
        let vm = create(dir.path())?;

        let t0 = vm.begin(ReadCommitted)?;
        let uid = vm.insert(t0, b"v0")?;
        vm.commit(t0)?;

        let t1 = vm.begin(RepeatableRead)?;
        let t2 = vm.begin(RepeatableRead)?;
        assert_eq!(vm.read(t1, uid)?, Some(b"v0".to_vec()));
        assert_eq!(vm.read(t2, uid)?, Some(b"v0".to_vec()));

        assert!(vm.delete(t1, uid)?);
        vm.insert(t1, b"v1")?;
        vm.commit(t1)?;

        assert!(matches!(
            vm.delete(t2, uid),
            Err(StorageError::ConcurrentUpdate(ConflictKind::VersionSkip))
        ));
        // Every later call reports the conflict until acknowledged
        assert!(matches!(
            vm.insert(t2, b"v2"),
            Err(StorageError::ConcurrentUpdate(_))
        ));
        assert!(vm.commit(t2).is_err());
        vm.abort(t2)?;
        assert!(matches!(
            vm.read(t2, uid),
            Err(StorageError::UnknownTransaction(_))
        ));
        Ok(())
    }

    #[test]
    fn test_failed_auto_abort_finished_by_abort() -> Result<()> {
        let dir = tempdir().unwrap();
        let tm = Arc::new(FailingAbort {
            inner: TransactionManagerImpl::create(&dir.path().join("test.xid"))?,
            fail: AtomicBool::new(false),
        });
        let vm = create_with(dir.path(), tm.clone())?;

        let t0 = vm.begin(ReadCommitted)?;
        let uid = vm.insert(t0, b"v0")?;
        vm.commit(t0)?;

        let t1 = vm.begin(RepeatableRead)?;
        let t2 = vm.begin(RepeatableRead)?;
        assert!(vm.delete(t1, uid)?);
        vm.commit(t1)?;

        // t2 takes the intent, then its abort cannot be written
        tm.fail.store(true, Ordering::SeqCst);
        assert!(matches!(vm.delete(t2, uid), Err(StorageError::Io(_))));
        assert!(matches!(
            vm.insert(t2, b"v1"),
            Err(StorageError::ConcurrentUpdate(ConflictKind::VersionSkip))
        ));
        assert_eq!(vm.locks.holder(uid), Some(t2));
        assert!(tm.is_active(t2)?);

        tm.fail.store(false, Ordering::SeqCst);
        vm.abort(t2)?;
        assert!(tm.is_aborted(t2)?);
        assert_eq!(vm.locks.holder(uid), None);
        assert_eq!(vm.active_transactions(), 0);
        Ok(())
    }

    #[test]
    fn test_read_committed_delete_after_commit() -> Result<()> {
        let dir = tempdir().unwrap();
        let vm = create(dir.path())?;

        let t0 = vm.begin(ReadCommitted)?;
        let uid = vm.insert(t0, b"row")?;
        vm.commit(t0)?;

        let t1 = vm.begin(ReadCommitted)?;
        let t2 = vm.begin(ReadCommitted)?;
        assert!(vm.delete(t1, uid)?);
        vm.commit(t1)?;

        // Read committed never skips; the row is simply gone
        assert!(!vm.delete(t2, uid)?);
        vm.commit(t2)?;
        Ok(())
    }

    #[test]
    fn test_concurrent_delete_one_winner() -> Result<()> {
        let dir = tempdir().unwrap();
        let vm = Arc::new(create(dir.path())?);

        let t0 = vm.begin(ReadCommitted)?;
        let uid = vm.insert(t0, b"contested")?;
        vm.commit(t0)?;

        let t1 = vm.begin(ReadCommitted)?;
        let t2 = vm.begin(ReadCommitted)?;
        assert!(vm.delete(t1, uid)?);

        let (tx, rx) = mpsc::channel();
        let handle = {
            let vm = Arc::clone(&vm);
            thread::spawn(move || {
                let deleted = vm.delete(t2, uid);
                tx.send(()).unwrap();
                deleted
            })
        };

        // t2 is parked on t1's write intent
        wait_until_queued(&vm, t2, uid);
        assert!(rx.try_recv().is_err());
        vm.commit(t1)?;

        assert!(!handle.join().unwrap()?);
        vm.commit(t2)?;
        Ok(())
    }

    #[test]
    fn test_waiter_proceeds_after_holder_aborts() -> Result<()> {
        let dir = tempdir().unwrap();
        let vm = Arc::new(create(dir.path())?);

        let t0 = vm.begin(ReadCommitted)?;
        let uid = vm.insert(t0, b"contested")?;
        vm.commit(t0)?;

        let t1 = vm.begin(ReadCommitted)?;
        let t2 = vm.begin(ReadCommitted)?;
        assert!(vm.delete(t1, uid)?);

        let handle = {
            let vm = Arc::clone(&vm);
            thread::spawn(move || vm.delete(t2, uid))
        };
        wait_until_queued(&vm, t2, uid);
        vm.abort(t1)?;

        assert!(handle.join().unwrap()?);
        vm.commit(t2)?;
        assert_eq!(vm.read(SUPER_XID, uid)?, None);
        Ok(())
    }

    #[test]
    fn test_deadlock_victim_is_requester() -> Result<()> {
        let dir = tempdir().unwrap();
        let vm = Arc::new(create(dir.path())?);

        let t0 = vm.begin(ReadCommitted)?;
        let a = vm.insert(t0, b"a")?;
        let b = vm.insert(t0, b"b")?;
        vm.commit(t0)?;

        let t1 = vm.begin(ReadCommitted)?;
        let t2 = vm.begin(ReadCommitted)?;
        assert!(vm.delete(t1, a)?);
        assert!(vm.delete(t2, b)?);

        let handle = {
            let vm = Arc::clone(&vm);
            thread::spawn(move || vm.delete(t1, b))
        };
        wait_until_queued(&vm, t1, b);

        assert!(matches!(
            vm.delete(t2, a),
            Err(StorageError::ConcurrentUpdate(ConflictKind::Deadlock))
        ));
        // t2's intents went away with it, so t1 takes over b
        assert!(handle.join().unwrap()?);
        vm.abort(t2)?;
        vm.commit(t1)?;

        assert_eq!(vm.read(SUPER_XID, a)?, None);
        assert_eq!(vm.read(SUPER_XID, b)?, None);
        Ok(())
    }

    #[test]
    fn test_unknown_and_super_transactions() -> Result<()> {
        let dir = tempdir().unwrap();
        let vm = create(dir.path())?;

        assert!(matches!(
            vm.insert(42, b"x"),
            Err(StorageError::UnknownTransaction(42))
        ));
        assert!(matches!(
            vm.commit(SUPER_XID),
            Err(StorageError::InvalidOperation(_))
        ));
        assert!(matches!(
            vm.abort(SUPER_XID),
            Err(StorageError::InvalidOperation(_))
        ));

        let t1 = vm.begin(ReadCommitted)?;
        assert_eq!(vm.active_transactions(), 1);
        vm.commit(t1)?;
        assert_eq!(vm.active_transactions(), 0);
        assert!(matches!(
            vm.commit(t1),
            Err(StorageError::UnknownTransaction(_))
        ));
        Ok(())
    }

    #[test]
    fn test_read_missing_record() -> Result<()> {
        let dir = tempdir().unwrap();
        let vm = create(dir.path())?;
        let t1 = vm.begin(ReadCommitted)?;
        vm.insert(t1, b"x")?;

        let missing = Uid::new(PageId::new(7), 2);
        assert_eq!(vm.read(t1, missing)?, None);
        assert!(!vm.delete(t1, missing)?);
        Ok(())
    }
}
