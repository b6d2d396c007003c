//! Log manager.
//!
//! File layout: a 4-byte checksum header followed by framed records. The
//! header is the rolling checksum of every record payload in order, rewritten
//! and synced after each append. A record is durable once the header that
//! covers it is on disk.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use parking_lot::Mutex;

use super::record::{checksum, parse_header, wrap, FRAME_HEADER_LEN};
use crate::error::{Error, Result};

/// Length of the checksum header.
const LOG_HEADER_LEN: u64 = 4;

struct LogFile {
    file: File,
    /// Checksum of every record up to `file_size`.
    checksum: u32,
    file_size: u64,
    /// Read cursor of `next`.
    position: u64,
}

impl LogFile {
    /// Read the record at `position`; `None` for a torn or corrupt record.
    fn read_record(&mut self, position: u64) -> Result<Option<(Vec<u8>, u64)>> {
        if position + FRAME_HEADER_LEN as u64 > self.file_size {
            return Ok(None);
        }
        self.file.seek(SeekFrom::Start(position))?;
        let mut header = [0u8; FRAME_HEADER_LEN];
        self.file.read_exact(&mut header)?;
        let (size, record_checksum) = parse_header(&header);

        let end = position + FRAME_HEADER_LEN as u64 + size as u64;
        if end > self.file_size {
            return Ok(None);
        }
        let mut payload = vec![0u8; size as usize];
        self.file.read_exact(&mut payload)?;
        if checksum(0, &payload) != record_checksum {
            return Ok(None);
        }

        Ok(Some((payload, end)))
    }

    fn write_header(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_u32::<BigEndian>(self.checksum)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.file_size = len;
        if self.position > len {
            self.position = len;
        }
        Ok(())
    }
}

/// The data manager's log.
pub struct Logger {
    inner: Mutex<LogFile>,
}

impl Logger {
    /// Create an empty log.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => Error::FileExists(path.to_path_buf()),
                _ => Error::Io(e),
            })?;

        let mut log_file = LogFile {
            file,
            checksum: 0,
            file_size: LOG_HEADER_LEN,
            position: LOG_HEADER_LEN,
        };
        log_file.write_header()?;

        Ok(Self {
            inner: Mutex::new(log_file),
        })
    }

    /// Open a log, dropping any tail the checksum header does not cover.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotExists(path.to_path_buf()));
        }
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < LOG_HEADER_LEN {
            return Err(Error::BadLogFile);
        }
        file.seek(SeekFrom::Start(0))?;
        let header_checksum = file.read_u32::<BigEndian>()?;

        let mut log_file = LogFile {
            file,
            checksum: header_checksum,
            file_size,
            position: LOG_HEADER_LEN,
        };

        // Longest prefix of records whose checksum matches the header.
        let mut valid_end = (header_checksum == 0).then_some(LOG_HEADER_LEN);
        let mut accumulated = 0u32;
        let mut position = LOG_HEADER_LEN;
        while let Some((payload, next)) = log_file.read_record(position)? {
            accumulated = checksum(accumulated, &payload);
            if accumulated == header_checksum {
                valid_end = Some(next);
            }
            position = next;
        }

        let valid_end = valid_end.ok_or(Error::BadLogFile)?;
        if valid_end < file_size {
            warn!(
                "log {:?}: dropping {} bytes of bad tail",
                path,
                file_size - valid_end
            );
            log_file.truncate(valid_end)?;
        }
        debug!("opened log {:?} ({} bytes)", path, valid_end);

        Ok(Self {
            inner: Mutex::new(log_file),
        })
    }

    /// Append a record and make it durable.
    pub fn log(&self, payload: &[u8]) -> Result<()> {
        let frame = wrap(payload);
        let mut inner = self.inner.lock();

        let end = inner.file_size;
        inner.file.seek(SeekFrom::Start(end))?;
        inner.file.write_all(&frame)?;
        inner.file_size += frame.len() as u64;

        inner.checksum = checksum(inner.checksum, payload);
        inner.write_header()
    }

    /// Move the read cursor back to the first record.
    pub fn rewind(&self) {
        self.inner.lock().position = LOG_HEADER_LEN;
    }

    /// Read the record under the cursor and advance past it.
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let position = inner.position;
        match inner.read_record(position)? {
            Some((payload, next)) => {
                inner.position = next;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    /// Cut the file to `len` bytes.
    pub fn truncate(&self, len: u64) -> Result<()> {
        self.inner.lock().truncate(len.max(LOG_HEADER_LEN))
    }

    /// Size of the log file in bytes.
    pub fn len(&self) -> u64 {
        self.inner.lock().file_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == LOG_HEADER_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read_all(logger: &Logger) -> Result<Vec<Vec<u8>>> {
        logger.rewind();
        let mut records = vec![];
        while let Some(record) = logger.next()? {
            records.push(record);
        }
        Ok(records)
    }

    #[test]
    fn test_log_round_trip() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.log");

        {
            let logger = Logger::create(&path)?;
            assert!(logger.is_empty());
            logger.log(b"first")?;
            logger.log(b"")?;
            logger.log(b"third record")?;
        }

        let logger = Logger::open(&path)?;
        let records = read_all(&logger)?;
        assert_eq!(
            records,
            vec![b"first".to_vec(), vec![], b"third record".to_vec()]
        );

        // The cursor stays at the end until rewound.
        assert_eq!(logger.next()?, None);
        logger.rewind();
        assert_eq!(logger.next()?, Some(b"first".to_vec()));

        Ok(())
    }

    #[test]
    fn test_torn_tail_is_truncated() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.log");

        let good_len = {
            let logger = Logger::create(&path)?;
            logger.log(b"kept")?;
            logger.len()
        };

        // Half a frame with no header update.
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&wrap(b"torn record")[..6])?;
        drop(file);

        let logger = Logger::open(&path)?;
        assert_eq!(logger.len(), good_len);
        assert_eq!(read_all(&logger)?, vec![b"kept".to_vec()]);

        // Appending after the cut keeps the log consistent.
        logger.log(b"after")?;
        drop(logger);
        let logger = Logger::open(&path)?;
        assert_eq!(
            read_all(&logger)?,
            vec![b"kept".to_vec(), b"after".to_vec()]
        );

        Ok(())
    }

    #[test]
    fn test_unacknowledged_record_is_truncated() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.log");

        let good_len = {
            let logger = Logger::create(&path)?;
            logger.log(b"kept")?;
            logger.len()
        };

        // A complete record whose header checksum update never landed.
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&wrap(b"complete but unacknowledged"))?;
        drop(file);

        let logger = Logger::open(&path)?;
        assert_eq!(logger.len(), good_len);
        assert_eq!(read_all(&logger)?, vec![b"kept".to_vec()]);

        Ok(())
    }

    #[test]
    fn test_corrupt_record_is_truncated() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.log");

        {
            let logger = Logger::create(&path)?;
            logger.log(b"one")?;
            logger.log(b"two")?;
        }

        // Flip the last payload byte.
        let mut bytes = std::fs::read(&path)?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes)?;

        let logger = Logger::open(&path)?;
        assert_eq!(read_all(&logger)?, vec![b"one".to_vec()]);

        Ok(())
    }

    #[test]
    fn test_bad_header() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.log");

        {
            let logger = Logger::create(&path)?;
            logger.log(b"one")?;
        }

        let mut bytes = std::fs::read(&path)?;
        bytes[0] ^= 0x55;
        std::fs::write(&path, &bytes)?;
        assert!(matches!(Logger::open(&path), Err(Error::BadLogFile)));

        std::fs::write(&path, [0u8; 2])?;
        assert!(matches!(Logger::open(&path), Err(Error::BadLogFile)));

        Ok(())
    }
}
