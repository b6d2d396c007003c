//! Versioned records.
//!
//! An entry is a data item whose payload starts with the id of the
//! transaction that created it (XMIN) and the id of the transaction that
//! deleted it (XMAX, 0 while live): `[8B XMIN][8B XMAX][data]`.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use crate::common::CacheSource;
use crate::data::{DataItem, DataManager};
use crate::error::{Error, Result};
use crate::storage::Address;
use crate::transaction::TransactionId;

const OF_XMIN: usize = 0;
const OF_XMAX: usize = 8;
const OF_DATA: usize = 16;

/// Payload of a new entry created by `xid`.
pub fn wrap_entry_raw(xid: TransactionId, data: &[u8]) -> Vec<u8> {
    let mut raw = vec![0u8; OF_DATA + data.len()];
    BigEndian::write_u64(&mut raw[OF_XMIN..OF_XMAX], xid.0);
    raw[OF_DATA..].copy_from_slice(data);
    raw
}

pub struct Entry {
    uid: Address,
    item: Arc<DataItem>,
}

impl Entry {
    pub fn new(uid: Address, item: Arc<DataItem>) -> Self {
        Self { uid, item }
    }

    pub fn uid(&self) -> Address {
        self.uid
    }

    pub fn xmin(&self) -> TransactionId {
        self.item
            .read(|bytes| TransactionId(BigEndian::read_u64(&bytes[OF_XMIN..OF_XMAX])))
    }

    pub fn xmax(&self) -> TransactionId {
        self.item
            .read(|bytes| TransactionId(BigEndian::read_u64(&bytes[OF_XMAX..OF_DATA])))
    }

    /// Copy of the user data.
    pub fn data(&self) -> Vec<u8> {
        self.item.read(|bytes| bytes[OF_DATA..].to_vec())
    }

    /// Mark the entry deleted by `xid`, logged under `xid`.
    pub fn set_xmax(&self, xid: TransactionId) -> Result<()> {
        let mut edit = self.item.edit();
        edit.update(|bytes| BigEndian::write_u64(&mut bytes[OF_XMAX..OF_DATA], xid.0));
        edit.commit(xid)
    }
}

/// Loads entries through the data manager.
pub struct EntrySource {
    dm: Arc<DataManager>,
}

impl EntrySource {
    pub fn new(dm: Arc<DataManager>) -> Self {
        Self { dm }
    }
}

impl CacheSource for EntrySource {
    type Value = Entry;

    fn fetch(&self, key: u64) -> Result<Entry> {
        let uid = Address(key);
        let item = self.dm.acquire(uid)?.ok_or(Error::NullEntry)?;
        if item.data().len() < OF_DATA {
            self.dm.release(uid)?;
            return Err(Error::NullEntry);
        }
        Ok(Entry::new(uid, item))
    }

    fn write_back(&self, entry: &Entry) -> Result<()> {
        self.dm.release(entry.uid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TransactionManager, SUPER_XID};
    use tempfile::tempdir;

    #[test]
    fn test_wrap_entry_raw() {
        let raw = wrap_entry_raw(TransactionId(5), b"row");
        assert_eq!(&raw[OF_XMIN..OF_XMAX], &5u64.to_be_bytes());
        assert_eq!(&raw[OF_XMAX..OF_DATA], &[0; 8]);
        assert_eq!(&raw[OF_DATA..], b"row");
    }

    #[test]
    fn test_entry_fields() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("db");
        let tm = Arc::new(TransactionManager::create(&path)?);
        let dm = Arc::new(DataManager::create(&path, 1 << 20, tm)?);
        let source = EntrySource::new(Arc::clone(&dm));

        let uid = dm.insert(SUPER_XID, &wrap_entry_raw(TransactionId(3), b"payload"))?;
        let entry = source.fetch(uid.0)?;
        assert_eq!(entry.uid(), uid);
        assert_eq!(entry.xmin(), TransactionId(3));
        assert_eq!(entry.xmax(), SUPER_XID);
        assert_eq!(entry.data(), b"payload");

        entry.set_xmax(TransactionId(4))?;
        assert_eq!(entry.xmax(), TransactionId(4));
        source.write_back(&entry)?;

        // Too short to be an entry.
        let short = dm.insert(SUPER_XID, &[1, 2, 3])?;
        assert!(matches!(source.fetch(short.0), Err(Error::NullEntry)));

        Ok(())
    }
}
