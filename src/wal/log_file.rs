//! Log file framing.
//!
//! Layout:
//! ```text
//! Offset  Size  Description
//! 0       4     Running CRC32 over the data of every record (xchecksum)
//! 4       ...   Records
//!
//! Record:
//! 0       4     Data length
//! 4       4     CRC32 of the data
//! 8       n     Data
//! ```
//!
//! An append writes and syncs the record, then rewrites and syncs the
//! header checksum. A crash between the two leaves a record the header
//! does not cover; opening the log cuts it off together with any torn
//! bytes after the last covered record.

use crate::error::{Result, StorageError};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// Size of the file header
const HEADER_LEN: u64 = 4;

/// Size of a record's length + checksum prefix
const FRAME_PREFIX_LEN: u64 = 8;

struct LogInner {
    file: File,
    /// Read cursor for `next_record`
    position: u64,
    /// End of the last complete record
    file_size: u64,
    /// Running checksum covering every record
    xchecksum: u32,
}

/// Append-only, checksummed log file
pub struct Logger {
    inner: Mutex<LogInner>,
}

fn chain_checksum(seed: u32, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(seed);
    hasher.update(data);
    hasher.finalize()
}

/// Read the record starting at `pos`, or `None` if it is torn or past `end`
fn read_frame(file: &mut File, pos: u64, end: u64) -> Result<Option<Vec<u8>>> {
    if pos + FRAME_PREFIX_LEN > end {
        return Ok(None);
    }

    let mut prefix = [0u8; FRAME_PREFIX_LEN as usize];
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(&mut prefix)?;
    let size = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as u64;
    let checksum = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);

    if pos + FRAME_PREFIX_LEN + size > end {
        return Ok(None);
    }

    let mut data = vec![0u8; size as usize];
    file.read_exact(&mut data)?;
    if crc32fast::hash(&data) != checksum {
        return Ok(None);
    }

    Ok(Some(data))
}

impl Logger {
    /// Create an empty log file. Fails if the file already exists.
    pub fn create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        file.write_all(&0u32.to_be_bytes())?;
        file.sync_all()?;

        Ok(Self {
            inner: Mutex::new(LogInner {
                file,
                position: HEADER_LEN,
                file_size: HEADER_LEN,
                xchecksum: 0,
            }),
        })
    }

    /// Open an existing log file, dropping any uncovered or torn tail
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StorageError::invalid_db(format!(
                "log file {} does not exist",
                path.display()
            )));
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN {
            return Err(StorageError::invalid_db("log file shorter than its header"));
        }

        let mut header = [0u8; HEADER_LEN as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let stored = u32::from_be_bytes(header);

        // Last record boundary whose running checksum matches the header
        let mut pos = HEADER_LEN;
        let mut running = 0u32;
        let mut covered_end = if stored == 0 { Some(pos) } else { None };
        while let Some(data) = read_frame(&mut file, pos, len)? {
            running = chain_checksum(running, &data);
            pos += FRAME_PREFIX_LEN + data.len() as u64;
            if running == stored {
                covered_end = Some(pos);
            }
        }

        let end = covered_end
            .ok_or_else(|| StorageError::corruption("log checksum does not match its records"))?;
        if end < len {
            debug!(from = len, to = end, "wal.truncate_tail");
            file.set_len(end)?;
            file.sync_all()?;
        }

        Ok(Self {
            inner: Mutex::new(LogInner {
                file,
                position: HEADER_LEN,
                file_size: end,
                xchecksum: stored,
            }),
        })
    }

    /// Append a record and make it durable
    pub fn append(&self, data: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN as usize + data.len());
        frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
        frame.extend_from_slice(&crc32fast::hash(data).to_be_bytes());
        frame.extend_from_slice(data);

        let mut inner = self.inner.lock();
        let end = inner.file_size;
        inner.file.seek(SeekFrom::Start(end))?;
        inner.file.write_all(&frame)?;
        inner.file.sync_data()?;

        let xchecksum = chain_checksum(inner.xchecksum, data);
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&xchecksum.to_be_bytes())?;
        inner.file.sync_data()?;

        inner.xchecksum = xchecksum;
        inner.file_size = end + frame.len() as u64;
        Ok(())
    }

    /// Move the read cursor back to the first record
    pub fn rewind(&self) {
        self.inner.lock().position = HEADER_LEN;
    }

    /// Read the record under the cursor and advance past it
    pub fn next_record(&self) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let LogInner {
            file,
            position,
            file_size,
            ..
        } = &mut *inner;

        let data = read_frame(file, *position, *file_size)?;
        if let Some(data) = &data {
            *position += FRAME_PREFIX_LEN + data.len() as u64;
        }
        Ok(data)
    }

    /// Sync the log file
    pub fn close(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read_all(log: &Logger) -> Result<Vec<Vec<u8>>> {
        let mut records = Vec::new();
        log.rewind();
        while let Some(record) = log.next_record()? {
            records.push(record);
        }
        Ok(records)
    }

    #[test]
    fn test_append_and_read_back() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        let log = Logger::create(&path)?;
        assert!(read_all(&log)?.is_empty());

        log.append(b"first")?;
        log.append(b"")?;
        log.append(b"third record")?;

        let records = read_all(&log)?;
        assert_eq!(records, vec![b"first".to_vec(), Vec::new(), b"third record".to_vec()]);

        // Rewinding replays from the start
        log.rewind();
        assert_eq!(log.next_record()?, Some(b"first".to_vec()));
        Ok(())
    }

    #[test]
    fn test_reopen_keeps_records() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        {
            let log = Logger::create(&path)?;
            log.append(b"a")?;
            log.append(b"bb")?;
        }

        let log = Logger::open(&path)?;
        log.append(b"ccc")?;
        assert_eq!(
            read_all(&log)?,
            vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]
        );
        Ok(())
    }

    #[test]
    fn test_torn_tail_is_truncated() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        let good_len = {
            let log = Logger::create(&path)?;
            log.append(b"kept")?;
            std::fs::metadata(&path)?.len()
        };

        // Half a frame left behind by a crash mid-append
        {
            let mut file = OpenOptions::new().append(true).open(&path)?;
            file.write_all(&[0, 0, 0, 50, 1, 2])?;
        }

        let log = Logger::open(&path)?;
        assert_eq!(std::fs::metadata(&path)?.len(), good_len);
        assert_eq!(read_all(&log)?, vec![b"kept".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_uncovered_record_is_dropped() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        {
            let log = Logger::create(&path)?;
            log.append(b"covered")?;
        }

        // A complete record whose header update never happened
        {
            let data = b"uncovered";
            let mut file = OpenOptions::new().append(true).open(&path)?;
            file.write_all(&(data.len() as u32).to_be_bytes())?;
            file.write_all(&crc32fast::hash(data).to_be_bytes())?;
            file.write_all(data)?;
        }

        let log = Logger::open(&path)?;
        assert_eq!(read_all(&log)?, vec![b"covered".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_bad_header_checksum() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        {
            let log = Logger::create(&path)?;
            log.append(b"data")?;
        }
        {
            let mut file = OpenOptions::new().write(true).open(&path)?;
            file.write_all(&[0xDE, 0xAD, 0xBE, 0xEF])?;
        }

        assert!(matches!(
            Logger::open(&path),
            Err(StorageError::Corruption(_))
        ));
        Ok(())
    }

    #[test]
    fn test_short_file_rejected() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        std::fs::write(&path, [0u8; 2])?;
        assert!(matches!(
            Logger::open(&path),
            Err(StorageError::InvalidDatabaseFile(_))
        ));
        Ok(())
    }
}
