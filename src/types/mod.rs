//! Common types used throughout the storage engine.

mod page_id;
mod uid;

pub use page_id::PageId;
pub use uid::Uid;

use serde::{Deserialize, Serialize};

/// Page size in bytes (8KB)
pub const PAGE_SIZE: usize = 8192;

/// Transaction identifier
pub type Xid = u64;

/// The super transaction: always committed, never active.
///
/// Work done outside any user transaction runs under this id.
pub const SUPER_XID: Xid = 0;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IsolationLevel {
    /// Sees every version committed before each read
    ReadCommitted,
    /// Sees only versions committed before the transaction began
    RepeatableRead,
}

impl IsolationLevel {
    /// Numeric level: 0 for read-committed, 1 for repeatable-read
    pub fn level(self) -> u8 {
        match self {
            Self::ReadCommitted => 0,
            Self::RepeatableRead => 1,
        }
    }

    /// Whether transactions at this level capture a snapshot at begin
    pub fn uses_snapshot(self) -> bool {
        matches!(self, Self::RepeatableRead)
    }
}

impl Default for IsolationLevel {
    fn default() -> Self {
        Self::ReadCommitted
    }
}

impl From<u8> for IsolationLevel {
    fn from(level: u8) -> Self {
        if level == 0 {
            Self::ReadCommitted
        } else {
            Self::RepeatableRead
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_from_number() {
        assert_eq!(IsolationLevel::from(0), IsolationLevel::ReadCommitted);
        assert_eq!(IsolationLevel::from(1), IsolationLevel::RepeatableRead);
        assert_eq!(IsolationLevel::from(7), IsolationLevel::RepeatableRead);
        assert_eq!(IsolationLevel::RepeatableRead.level(), 1);
        assert!(!IsolationLevel::ReadCommitted.uses_snapshot());
    }

    #[test]
    fn test_isolation_level_serde() {
        let json = serde_json::to_string(&IsolationLevel::RepeatableRead).unwrap();
        assert_eq!(json, "\"repeatableRead\"");
        let level: IsolationLevel = serde_json::from_str("\"readCommitted\"").unwrap();
        assert_eq!(level, IsolationLevel::ReadCommitted);
    }
}
