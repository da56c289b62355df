//! Record page layout.
//!
//! ```text
//! Offset  Size  Description
//! 0       2     Free space offset (first unused byte)
//! 2       ...   Records, appended back to back
//! ```
//!
//! Records are never moved or physically removed, so the free space
//! offset only grows.

use crate::page::PageBuf;
use crate::types::PAGE_SIZE;

/// Offset of the free space pointer
const OF_FREE: usize = 0;

/// Offset of the first record
const OF_DATA: usize = 2;

/// Usable bytes in an empty record page
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - OF_DATA;

/// Bytes of a freshly allocated record page
pub fn init_raw() -> PageBuf {
    let mut buf = PageBuf::new();
    set_free_space_offset(&mut buf, OF_DATA as u16);
    buf
}

/// First unused byte of the page
pub fn free_space_offset(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[OF_FREE], buf[OF_FREE + 1]])
}

fn set_free_space_offset(buf: &mut [u8], offset: u16) {
    buf[OF_FREE..OF_FREE + 2].copy_from_slice(&offset.to_be_bytes());
}

/// Remaining free bytes
pub fn free_space(buf: &[u8]) -> usize {
    PAGE_SIZE.saturating_sub(free_space_offset(buf) as usize)
}

/// Append `raw` at the free space offset and return where it landed.
///
/// The caller has already checked that the record fits.
pub fn insert(buf: &mut [u8], raw: &[u8]) -> u16 {
    let offset = free_space_offset(buf);
    let start = offset as usize;
    buf[start..start + raw.len()].copy_from_slice(raw);
    set_free_space_offset(buf, offset + raw.len() as u16);
    offset
}

/// Re-apply a logged insert at its original offset
pub fn recover_insert(buf: &mut [u8], raw: &[u8], offset: u16) {
    let start = offset as usize;
    buf[start..start + raw.len()].copy_from_slice(raw);

    let end = offset + raw.len() as u16;
    if free_space_offset(buf) < end {
        set_free_space_offset(buf, end);
    }
}

/// Overwrite a record with a logged image
pub fn recover_update(buf: &mut [u8], raw: &[u8], offset: u16) {
    let start = offset as usize;
    buf[start..start + raw.len()].copy_from_slice(raw);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_page() {
        let buf = init_raw();
        assert_eq!(free_space_offset(&buf), 2);
        assert_eq!(free_space(&buf), MAX_FREE_SPACE);
    }

    #[test]
    fn test_insert_appends() {
        let mut buf = init_raw();
        assert_eq!(insert(&mut buf, b"hello"), 2);
        assert_eq!(insert(&mut buf, b"world"), 7);
        assert_eq!(&buf[2..12], b"helloworld");
        assert_eq!(free_space(&buf), MAX_FREE_SPACE - 10);
    }

    #[test]
    fn test_recover_insert_advances_offset() {
        let mut buf = init_raw();
        recover_insert(&mut buf, b"abc", 20);
        assert_eq!(free_space_offset(&buf), 23);
        assert_eq!(&buf[20..23], b"abc");

        // An earlier offset never moves the pointer backwards
        recover_insert(&mut buf, b"xy", 2);
        assert_eq!(free_space_offset(&buf), 23);
    }

    #[test]
    fn test_recover_insert_on_zeroed_page() {
        let mut buf = PageBuf::new();
        recover_insert(&mut buf, b"abc", 2);
        assert_eq!(free_space_offset(&buf), 5);
    }

    #[test]
    fn test_recover_update_keeps_offset() {
        let mut buf = init_raw();
        insert(&mut buf, b"aaaa");
        recover_update(&mut buf, b"bb", 3);
        assert_eq!(&buf[2..6], b"abba");
        assert_eq!(free_space_offset(&buf), 6);
    }
}
