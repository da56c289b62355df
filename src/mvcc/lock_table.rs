//! Record write intents and deadlock detection.
//!
//! Each record has at most one transaction holding its write intent.
//! Other writers queue up in arrival order and block on a [`Waiter`]
//! until the holder finishes. A transaction waits for at most one record
//! at a time, so the wait-for graph is a set of chains; a request that
//! would bend its chain back to the requester is refused.

use crate::error::{ConflictKind, Result, StorageError};
use crate::types::{Uid, Xid};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Ticket a blocked transaction waits on
#[derive(Debug, Default)]
pub struct Waiter {
    granted: Mutex<bool>,
    cond: Condvar,
}

impl Waiter {
    /// Block until the write intent is handed over
    pub fn wait(&self) {
        let mut granted = self.granted.lock();
        while !*granted {
            self.cond.wait(&mut granted);
        }
    }

    fn grant(&self) {
        *self.granted.lock() = true;
        self.cond.notify_all();
    }
}

#[derive(Default)]
struct LockState {
    /// Records whose intent each transaction holds
    held: HashMap<Xid, Vec<Uid>>,
    /// Holder of each record's intent
    holder: HashMap<Uid, Xid>,
    /// Transactions queued on each record
    queue: HashMap<Uid, VecDeque<Xid>>,
    /// Record each blocked transaction waits for
    waiting_for: HashMap<Xid, Uid>,
    /// Ticket of each blocked transaction
    waiters: HashMap<Xid, Arc<Waiter>>,
}

impl LockState {
    /// Whether the chain of waits starting at `xid` leads back to it
    fn closes_cycle(&self, xid: Xid) -> bool {
        let mut seen = HashSet::new();
        let mut current = xid;
        while let Some(uid) = self.waiting_for.get(&current) {
            let Some(&next) = self.holder.get(uid) else {
                return false;
            };
            if next == xid {
                return true;
            }
            if !seen.insert(next) {
                return false;
            }
            current = next;
        }
        false
    }

    /// Hand `uid` to the first transaction still waiting for it
    fn pass_on(&mut self, uid: Uid) {
        self.holder.remove(&uid);
        let Some(queue) = self.queue.get_mut(&uid) else {
            return;
        };

        while let Some(next) = queue.pop_front() {
            if let Some(waiter) = self.waiters.remove(&next) {
                self.holder.insert(uid, next);
                self.held.entry(next).or_default().push(uid);
                self.waiting_for.remove(&next);
                waiter.grant();
                break;
            }
        }

        if queue.is_empty() {
            self.queue.remove(&uid);
        }
    }
}

/// Write intents of all running transactions
#[derive(Default)]
pub struct LockTable {
    state: Mutex<LockState>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the write intent on `uid` for `xid`.
    ///
    /// `None` means the intent is held now; `Some` means the caller must
    /// [`wait`](Waiter::wait) on the ticket first. Fails with a deadlock
    /// conflict, leaving nothing queued, if waiting would never end.
    pub fn add(&self, xid: Xid, uid: Uid) -> Result<Option<Arc<Waiter>>> {
        let mut state = self.state.lock();

        if state.held.get(&xid).is_some_and(|uids| uids.contains(&uid)) {
            return Ok(None);
        }
        if !state.holder.contains_key(&uid) {
            state.holder.insert(uid, xid);
            state.held.entry(xid).or_default().push(uid);
            return Ok(None);
        }

        state.waiting_for.insert(xid, uid);
        if state.closes_cycle(xid) {
            state.waiting_for.remove(&xid);
            return Err(StorageError::ConcurrentUpdate(ConflictKind::Deadlock));
        }

        let waiter = Arc::new(Waiter::default());
        state.queue.entry(uid).or_default().push_back(xid);
        state.waiters.insert(xid, Arc::clone(&waiter));
        Ok(Some(waiter))
    }

    /// Drop every intent `xid` holds, waking the next waiter of each
    pub fn remove(&self, xid: Xid) {
        let mut state = self.state.lock();
        for uid in state.held.remove(&xid).unwrap_or_default() {
            state.pass_on(uid);
        }
        state.waiting_for.remove(&xid);
        state.waiters.remove(&xid);
    }

    /// Current holder of `uid`'s intent
    pub fn holder(&self, uid: Uid) -> Option<Xid> {
        self.state.lock().holder.get(&uid).copied()
    }

    /// Record `xid` is queued on, if it is blocked
    pub fn waiting_for(&self, xid: Xid) -> Option<Uid> {
        self.state.lock().waiting_for.get(&xid).copied()
    }
}
