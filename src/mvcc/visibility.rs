//! Version visibility rules.
//!
//! Visibility is decided purely from transaction status, so an aborted
//! deleter leaves no trace: an XMAX naming an aborted transaction counts
//! as unset.

use crate::error::Result;
use crate::mvcc::entry::Entry;
use crate::mvcc::transaction::Transaction;
use crate::txn::TransactionManager;
use crate::types::{IsolationLevel, Xid};

/// Whether `t` may see the version described by `xmin`/`xmax`
pub fn is_visible_version(
    tm: &dyn TransactionManager,
    t: &Transaction,
    xmin: Xid,
    xmax: Xid,
) -> Result<bool> {
    if xmin == t.xid && xmax == 0 {
        return Ok(true);
    }

    match t.level {
        IsolationLevel::ReadCommitted => read_committed(tm, t, xmin, xmax),
        IsolationLevel::RepeatableRead => repeatable_read(tm, t, xmin, xmax),
    }
}

fn read_committed(tm: &dyn TransactionManager, t: &Transaction, xmin: Xid, xmax: Xid) -> Result<bool> {
    if !tm.is_committed(xmin)? {
        return Ok(false);
    }
    if xmax == 0 {
        return Ok(true);
    }
    Ok(xmax != t.xid && !tm.is_committed(xmax)?)
}

fn repeatable_read(tm: &dyn TransactionManager, t: &Transaction, xmin: Xid, xmax: Xid) -> Result<bool> {
    if !tm.is_committed(xmin)? || xmin >= t.xid || t.in_snapshot(xmin) {
        return Ok(false);
    }
    if xmax == 0 {
        return Ok(true);
    }
    if xmax == t.xid {
        return Ok(false);
    }
    Ok(!tm.is_committed(xmax)? || xmax > t.xid || t.in_snapshot(xmax))
}

/// Whether `t` deleting a version with this `xmax` would skip over a
/// committed version it cannot see. Read committed never skips.
pub fn is_version_skip_of(tm: &dyn TransactionManager, t: &Transaction, xmax: Xid) -> Result<bool> {
    if t.level == IsolationLevel::ReadCommitted {
        return Ok(false);
    }
    Ok(tm.is_committed(xmax)? && (xmax > t.xid || t.in_snapshot(xmax)))
}

pub fn is_visible(tm: &dyn TransactionManager, t: &Transaction, e: &Entry) -> Result<bool> {
    is_visible_version(tm, t, e.xmin(), e.xmax())
}

pub fn is_version_skip(tm: &dyn TransactionManager, t: &Transaction, e: &Entry) -> Result<bool> {
    is_version_skip_of(tm, t, e.xmax())
}
