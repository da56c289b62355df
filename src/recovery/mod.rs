//! Crash recovery.
//!
//! Runs when page 1 shows an unclean shutdown, before the data manager
//! serves anything:
//!
//! 1. Scan the log for the highest page it mentions and truncate the page
//!    file to it.
//! 2. Redo, in log order, every record whose transaction finished.
//! 3. Undo, newest first, every record of a transaction that was still
//!    running, then mark that transaction aborted.
//!
//! Redo writes the logged after image; undo writes the before image of an
//! update and flags an inserted record invalid.

use crate::buffer::PageCache;
use crate::data::item;
use crate::error::Result;
use crate::page::data_page;
use crate::txn::TransactionManager;
use crate::types::Xid;
use crate::wal::{LogRecord, Logger};
use std::collections::BTreeMap;
use tracing::info;

/// What a recovery pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Page count the file was truncated to
    pub max_page: u32,
    /// Records re-applied
    pub redone: usize,
    /// Records rolled back
    pub undone: usize,
    /// Transactions marked aborted
    pub aborted: usize,
}

/// Read every record in the log, front to back
fn read_log(log: &Logger) -> Result<Vec<LogRecord>> {
    let mut records = Vec::new();
    log.rewind();
    while let Some(bytes) = log.next_record()? {
        records.push(LogRecord::decode(&bytes)?);
    }
    Ok(records)
}

/// Bring the page file back to a state holding exactly the effects of
/// finished transactions.
pub fn recover(tm: &dyn TransactionManager, log: &Logger, pages: &PageCache) -> Result<RecoveryStats> {
    info!("recovery.start");
    let records = read_log(log)?;

    let max_page = records
        .iter()
        .map(|r| r.page_id().value())
        .max()
        .unwrap_or(0)
        .max(1);
    pages.truncate(max_page)?;
    info!(max_page, records = records.len(), "recovery.truncate");

    let mut stats = RecoveryStats {
        max_page,
        ..Default::default()
    };

    let mut in_flight: BTreeMap<Xid, Vec<&LogRecord>> = BTreeMap::new();
    for record in &records {
        if tm.is_active(record.xid())? {
            in_flight.entry(record.xid()).or_default().push(record);
        } else {
            apply(pages, record, Direction::Redo)?;
            stats.redone += 1;
        }
    }
    info!(redone = stats.redone, "recovery.redo");

    for (xid, records) in &in_flight {
        for record in records.iter().rev() {
            apply(pages, record, Direction::Undo)?;
            stats.undone += 1;
        }
        tm.abort(*xid)?;
    }
    stats.aborted = in_flight.len();

    // Transactions that never wrote anything are still marked active
    for xid in 1..=tm.last_xid() {
        if !in_flight.contains_key(&xid) && tm.is_active(xid)? {
            tm.abort(xid)?;
            stats.aborted += 1;
        }
    }
    info!(
        undone = stats.undone,
        aborted = stats.aborted,
        "recovery.undo"
    );

    Ok(stats)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Redo,
    Undo,
}

fn apply(pages: &PageCache, record: &LogRecord, direction: Direction) -> Result<()> {
    let page = pages.get_page(record.page_id())?;
    {
        let mut buf = page.write();
        match (record, direction) {
            (LogRecord::Insert { offset, raw, .. }, Direction::Redo) => {
                data_page::recover_insert(&mut buf, raw, *offset);
            }
            (LogRecord::Insert { offset, raw, .. }, Direction::Undo) => {
                let mut raw = raw.clone();
                item::set_raw_invalid(&mut raw);
                data_page::recover_insert(&mut buf, &raw, *offset);
            }
            (LogRecord::Update { uid, new_raw, .. }, Direction::Redo) => {
                data_page::recover_update(&mut buf, new_raw, uid.offset());
            }
            (LogRecord::Update { uid, old_raw, .. }, Direction::Undo) => {
                data_page::recover_update(&mut buf, old_raw, uid.offset());
            }
        }
    }
    pages.release(&page)
}
