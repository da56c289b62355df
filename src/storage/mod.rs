//! Storage layer: disk I/O and free space tracking.
//!
//! This module provides abstractions for reading and writing pages to disk
//! and for finding pages with room for new records.

mod disk_manager;
mod free_space;

pub use disk_manager::{DiskManager, DiskManagerImpl};
pub use free_space::{FreeSpaceIndex, PageInfo};
