//! Records the data manager writes to the log.
//!
//! - insert: `[0][8B xid][4B page][2B offset][item raw]`
//! - update: `[1][8B xid][8B address][old raw][new raw]`, both raws the same length

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::storage::{Address, PageId};
use crate::transaction::TransactionId;

const TYPE_INSERT: u8 = 0;
const TYPE_UPDATE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Insert {
        xid: TransactionId,
        page_id: PageId,
        offset: u16,
        raw: Vec<u8>,
    },
    Update {
        xid: TransactionId,
        address: Address,
        old_raw: Vec<u8>,
        new_raw: Vec<u8>,
    },
}

impl LogRecord {
    pub fn xid(&self) -> TransactionId {
        match self {
            LogRecord::Insert { xid, .. } | LogRecord::Update { xid, .. } => *xid,
        }
    }

    /// Address of the item the record writes.
    pub fn address(&self) -> Address {
        match self {
            LogRecord::Insert {
                page_id, offset, ..
            } => Address::new(*page_id, *offset),
            LogRecord::Update { address, .. } => *address,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.address().page_id()
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            LogRecord::Insert {
                xid,
                page_id,
                offset,
                raw,
            } => insert_log(*xid, *page_id, *offset, raw),
            LogRecord::Update {
                xid,
                address,
                old_raw,
                new_raw,
            } => update_log(*xid, *address, old_raw, new_raw),
        }
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < 1 {
            return Err(Error::BadLogFile);
        }
        match buf.get_u8() {
            TYPE_INSERT => {
                if buf.remaining() < 8 + 4 + 2 {
                    return Err(Error::BadLogFile);
                }
                let xid = TransactionId(buf.get_u64());
                let page_id = PageId(buf.get_u32());
                let offset = buf.get_u16();
                Ok(LogRecord::Insert {
                    xid,
                    page_id,
                    offset,
                    raw: buf.to_vec(),
                })
            }
            TYPE_UPDATE => {
                if buf.remaining() < 8 + 8 || (buf.remaining() - 16) % 2 != 0 {
                    return Err(Error::BadLogFile);
                }
                let xid = TransactionId(buf.get_u64());
                let address = Address(buf.get_u64());
                let (old_raw, new_raw) = buf.split_at(buf.len() / 2);
                Ok(LogRecord::Update {
                    xid,
                    address,
                    old_raw: old_raw.to_vec(),
                    new_raw: new_raw.to_vec(),
                })
            }
            _ => Err(Error::BadLogFile),
        }
    }
}

pub fn insert_log(xid: TransactionId, page_id: PageId, offset: u16, raw: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(1 + 8 + 4 + 2 + raw.len());
    buf.put_u8(TYPE_INSERT);
    buf.put_u64(xid.0);
    buf.put_u32(page_id.0);
    buf.put_u16(offset);
    buf.put_slice(raw);
    buf.to_vec()
}

pub fn update_log(xid: TransactionId, address: Address, old_raw: &[u8], new_raw: &[u8]) -> Vec<u8> {
    debug_assert_eq!(old_raw.len(), new_raw.len());
    let mut buf = BytesMut::with_capacity(1 + 8 + 8 + old_raw.len() + new_raw.len());
    buf.put_u8(TYPE_UPDATE);
    buf.put_u64(xid.0);
    buf.put_u64(address.0);
    buf.put_slice(old_raw);
    buf.put_slice(new_raw);
    buf.to_vec()
}
