//! Write-ahead log.
//!
//! Every physical insert or update is appended here, and made durable,
//! before the page it touches may reach the page file. The log is only
//! ever appended to; recovery reads it front to back.

mod log_file;
mod record;

pub use log_file::Logger;
pub use record::LogRecord;
