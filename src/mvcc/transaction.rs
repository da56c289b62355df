//! Per-transaction runtime state.

use crate::error::ConflictKind;
use crate::types::{IsolationLevel, Xid, SUPER_XID};
use std::collections::HashSet;

/// A running transaction as seen by the version manager
#[derive(Debug, Clone)]
pub struct Transaction {
    pub xid: Xid,
    pub level: IsolationLevel,
    /// Transactions active when this one began (repeatable read only)
    snapshot: HashSet<Xid>,
    /// Set when the engine killed the transaction
    pub err: Option<ConflictKind>,
    /// Whether the engine already rolled the transaction back
    pub auto_aborted: bool,
}

impl Transaction {
    /// A new transaction that began while `active` were running
    pub fn new(xid: Xid, level: IsolationLevel, active: impl IntoIterator<Item = Xid>) -> Self {
        let snapshot = if level.uses_snapshot() {
            active.into_iter().filter(|&x| x != SUPER_XID).collect()
        } else {
            HashSet::new()
        };

        Self {
            xid,
            level,
            snapshot,
            err: None,
            auto_aborted: false,
        }
    }

    /// Whether `xid` was running when this transaction began
    pub fn in_snapshot(&self, xid: Xid) -> bool {
        xid != SUPER_XID && self.snapshot.contains(&xid)
    }
}
