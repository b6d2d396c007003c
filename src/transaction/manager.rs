//! Transaction manager backed by the transaction status file.
//!
//! File layout: an 8-byte counter of allocated ids followed by one status
//! byte per transaction id (id 1 at offset 8). Every update is a single-byte
//! overwrite in place, synced before returning.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use parking_lot::Mutex;

use super::id::{TransactionId, SUPER_XID};
use super::state::TransactionState;
use crate::config::{with_suffix, XID_SUFFIX};
use crate::error::{Error, Result};

/// Length of the counter header.
const XID_HEADER_LENGTH: u64 = 8;

/// Bytes per transaction status.
const XID_FIELD_SIZE: u64 = 1;

struct XidFile {
    file: File,
    /// Number of ids handed out so far.
    counter: u64,
}

impl XidFile {
    fn position(xid: TransactionId) -> u64 {
        XID_HEADER_LENGTH + (xid.0 - 1) * XID_FIELD_SIZE
    }

    fn write_status(&mut self, xid: TransactionId, state: TransactionState) -> Result<()> {
        self.file.seek(SeekFrom::Start(Self::position(xid)))?;
        self.file.write_all(&[state.to_byte()])?;
        self.file.sync_data()?;
        Ok(())
    }

    fn read_status(&mut self, xid: TransactionId) -> Result<TransactionState> {
        if xid.0 > self.counter {
            return Err(Error::NoSuchTransaction(xid.0));
        }
        self.file.seek(SeekFrom::Start(Self::position(xid)))?;
        let mut byte = [0u8; 1];
        self.file.read_exact(&mut byte)?;
        TransactionState::from_byte(byte[0]).ok_or(Error::BadXidFile)
    }

    fn write_counter(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_u64::<BigEndian>(self.counter)?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Records the outcome of every transaction.
pub struct TransactionManager {
    inner: Mutex<XidFile>,
}

impl TransactionManager {
    /// Create a fresh status file at `<path>.xid`.
    pub fn create(path: &Path) -> Result<Self> {
        let xid_path = with_suffix(path, XID_SUFFIX);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&xid_path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => Error::FileExists(xid_path.clone()),
                _ => Error::Io(e),
            })?;

        let mut xid_file = XidFile { file, counter: 0 };
        xid_file.write_counter()?;

        Ok(Self {
            inner: Mutex::new(xid_file),
        })
    }

    /// Open an existing status file, validating its length against the counter.
    pub fn open(path: &Path) -> Result<Self> {
        let xid_path = with_suffix(path, XID_SUFFIX);
        if !xid_path.exists() {
            return Err(Error::FileNotExists(xid_path));
        }
        let mut file = OpenOptions::new().read(true).write(true).open(&xid_path)?;

        let file_len = file.metadata()?.len();
        if file_len < XID_HEADER_LENGTH {
            return Err(Error::BadXidFile);
        }
        file.seek(SeekFrom::Start(0))?;
        let counter = file.read_u64::<BigEndian>()?;
        let expected_len = counter
            .checked_mul(XID_FIELD_SIZE)
            .and_then(|len| len.checked_add(XID_HEADER_LENGTH))
            .ok_or(Error::BadXidFile)?;
        if expected_len != file_len {
            return Err(Error::BadXidFile);
        }
        debug!("opened {:?} with {} transactions", xid_path, counter);

        Ok(Self {
            inner: Mutex::new(XidFile { file, counter }),
        })
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> Result<TransactionId> {
        let mut inner = self.inner.lock();
        let xid = TransactionId(inner.counter + 1);
        inner.write_status(xid, TransactionState::Active)?;
        inner.counter += 1;
        inner.write_counter()?;
        Ok(xid)
    }

    /// Commits a transaction.
    pub fn commit(&self, xid: TransactionId) -> Result<()> {
        self.finish(xid, TransactionState::Committed)
    }

    /// Aborts a transaction.
    pub fn abort(&self, xid: TransactionId) -> Result<()> {
        self.finish(xid, TransactionState::Aborted)
    }

    fn finish(&self, xid: TransactionId, state: TransactionState) -> Result<()> {
        if xid.is_super() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        if xid.0 > inner.counter {
            return Err(Error::NoSuchTransaction(xid.0));
        }
        inner.write_status(xid, state)
    }

    /// Gets the state of a transaction.
    pub fn state(&self, xid: TransactionId) -> Result<TransactionState> {
        if xid == SUPER_XID {
            return Ok(TransactionState::Committed);
        }
        self.inner.lock().read_status(xid)
    }

    pub fn is_active(&self, xid: TransactionId) -> Result<bool> {
        Ok(self.state(xid)? == TransactionState::Active)
    }

    pub fn is_committed(&self, xid: TransactionId) -> Result<bool> {
        Ok(self.state(xid)? == TransactionState::Committed)
    }

    pub fn is_aborted(&self, xid: TransactionId) -> Result<bool> {
        Ok(self.state(xid)? == TransactionState::Aborted)
    }

    /// Number of transaction ids allocated so far.
    pub fn xid_count(&self) -> u64 {
        self.inner.lock().counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_transaction_manager_begin() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = TransactionManager::create(&dir.path().join("tm"))?;

        let id1 = manager.begin()?;
        let id2 = manager.begin()?;

        assert_eq!(id1, TransactionId(1));
        assert_eq!(id2, TransactionId(2));
        assert_eq!(manager.xid_count(), 2);
        assert!(manager.is_active(id1)?);
        assert!(manager.is_active(id2)?);

        Ok(())
    }

    #[test]
    fn test_commit_and_abort_are_exclusive() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = TransactionManager::create(&dir.path().join("tm"))?;

        let committed = manager.begin()?;
        let aborted = manager.begin()?;
        manager.commit(committed)?;
        manager.abort(aborted)?;

        assert!(manager.is_committed(committed)?);
        assert!(!manager.is_aborted(committed)?);
        assert!(!manager.is_active(committed)?);

        assert!(manager.is_aborted(aborted)?);
        assert!(!manager.is_committed(aborted)?);
        assert!(!manager.is_active(aborted)?);

        Ok(())
    }

    #[test]
    fn test_super_xid() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = TransactionManager::create(&dir.path().join("tm"))?;

        assert!(manager.is_committed(SUPER_XID)?);
        assert!(!manager.is_active(SUPER_XID)?);
        assert!(!manager.is_aborted(SUPER_XID)?);

        // Finishing the super transaction changes nothing.
        manager.abort(SUPER_XID)?;
        assert!(manager.is_committed(SUPER_XID)?);

        Ok(())
    }

    #[test]
    fn test_unknown_transaction() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = TransactionManager::create(&dir.path().join("tm"))?;

        assert!(matches!(
            manager.state(TransactionId(5)),
            Err(Error::NoSuchTransaction(5))
        ));
        assert!(matches!(
            manager.commit(TransactionId(5)),
            Err(Error::NoSuchTransaction(5))
        ));

        Ok(())
    }

    #[test]
    fn test_reopen_keeps_states() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("tm");

        {
            let manager = TransactionManager::create(&path)?;
            let t1 = manager.begin()?;
            let _t2 = manager.begin()?;
            manager.commit(t1)?;
        }

        let manager = TransactionManager::open(&path)?;
        assert_eq!(manager.xid_count(), 2);
        assert!(manager.is_committed(TransactionId(1))?);
        assert!(manager.is_active(TransactionId(2))?);
        assert_eq!(manager.begin()?, TransactionId(3));

        Ok(())
    }

    #[test]
    fn test_create_existing_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("tm");
        TransactionManager::create(&path)?;

        assert!(matches!(
            TransactionManager::create(&path),
            Err(Error::FileExists(_))
        ));

        Ok(())
    }

    #[test]
    fn test_open_corrupted_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("tm");
        {
            let manager = TransactionManager::create(&path)?;
            manager.begin()?;
        }

        // A stray status byte breaks the length invariant.
        let mut file = OpenOptions::new()
            .append(true)
            .open(with_suffix(&path, XID_SUFFIX))?;
        file.write_all(&[0])?;
        drop(file);

        assert!(matches!(
            TransactionManager::open(&path),
            Err(Error::BadXidFile)
        ));
        assert!(matches!(
            TransactionManager::open(&dir.path().join("missing")),
            Err(Error::FileNotExists(_))
        ));

        Ok(())
    }

    #[test]
    fn test_open_huge_counter() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("tm");
        TransactionManager::create(&path)?;

        for counter in [u64::MAX, u64::MAX - 3] {
            let mut file = OpenOptions::new()
                .write(true)
                .open(with_suffix(&path, XID_SUFFIX))?;
            file.write_u64::<BigEndian>(counter)?;
            drop(file);

            assert!(matches!(
                TransactionManager::open(&path),
                Err(Error::BadXidFile)
            ));
        }

        Ok(())
    }

    #[test]
    fn test_transaction_manager_thread_safety() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = Arc::new(TransactionManager::create(&dir.path().join("tm"))?);
        let mut handles = vec![];

        for _ in 0..4 {
            let mgr = Arc::clone(&manager);
            handles.push(thread::spawn(move || {
                let mut ids = vec![];
                for _ in 0..10 {
                    ids.push(mgr.begin().unwrap());
                }
                ids
            }));
        }

        let mut all_ids = vec![];
        for handle in handles {
            all_ids.extend(handle.join().unwrap());
        }
        all_ids.sort();
        all_ids.dedup();

        assert_eq!(all_ids.len(), 40);
        assert_eq!(manager.xid_count(), 40);

        Ok(())
    }
}
