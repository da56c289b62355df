//! Reserved first page.
//!
//! Page 1 carries a crash marker. Every open writes fresh random bytes at
//! [`OF_VC`]; a clean close copies them to the following 8 bytes. If the
//! two regions differ on open, the previous run did not shut down cleanly.

use crate::page::{Page, PageBuf};
use rand::Rng;

/// Offset of the open marker
const OF_VC: usize = 100;

/// Length of each marker
const LEN_VC: usize = 8;

/// Bytes of a freshly created first page
pub fn init_raw() -> PageBuf {
    let mut buf = PageBuf::new();
    write_open_marker(&mut buf);
    buf
}

fn write_open_marker(buf: &mut [u8]) {
    rand::thread_rng().fill(&mut buf[OF_VC..OF_VC + LEN_VC]);
}

/// Stamp a new open marker
pub fn set_open(page: &Page) {
    write_open_marker(&mut page.write());
}

/// Record a clean shutdown
pub fn set_closed(page: &Page) {
    let mut buf = page.write();
    buf.copy_within(OF_VC..OF_VC + LEN_VC, OF_VC + LEN_VC);
}

/// Whether the last shutdown was clean
pub fn check(page: &Page) -> bool {
    let buf = page.read();
    buf[OF_VC..OF_VC + LEN_VC] == buf[OF_VC + LEN_VC..OF_VC + 2 * LEN_VC]
}
