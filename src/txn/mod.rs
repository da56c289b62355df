//! Transaction status store.
//!
//! Every transaction id owns one durable status byte. Visibility of every
//! version, and the redo/undo decision during recovery, is answered from
//! here.

mod manager;

pub use manager::TransactionManagerImpl;

use crate::error::Result;
use crate::types::Xid;

/// Durable per-transaction state
pub trait TransactionManager: Send + Sync {
    /// Start a transaction and return its id once its state is durable
    fn begin(&self) -> Result<Xid>;

    /// Mark a transaction committed
    fn commit(&self, xid: Xid) -> Result<()>;

    /// Mark a transaction aborted
    fn abort(&self, xid: Xid) -> Result<()>;

    /// Whether the transaction is still running
    fn is_active(&self, xid: Xid) -> Result<bool>;

    /// Whether the transaction committed
    fn is_committed(&self, xid: Xid) -> Result<bool>;

    /// Whether the transaction aborted
    fn is_aborted(&self, xid: Xid) -> Result<bool>;

    /// Highest transaction id handed out so far
    fn last_xid(&self) -> Xid;
}
