//! Data items: `[1B valid][2B size][payload]` records inside data pages.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use log::warn;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};

use crate::common::CacheSource;
use crate::error::{Error, Result};
use crate::recovery::log_record::update_log;
use crate::storage::page::data_page::OF_DATA as OF_PAGE_DATA;
use crate::storage::{Address, Logger, PageCache, PageRef, PageView, PAGE_SIZE};
use crate::transaction::TransactionId;

const OF_VALID: usize = 0;
const OF_SIZE: usize = 1;
pub const OF_DATA: usize = 3;

const VALID: u8 = 0;
const INVALID: u8 = 1;

/// Frame a payload as a valid item.
pub fn wrap_raw(data: &[u8]) -> Vec<u8> {
    let mut raw = vec![0u8; OF_DATA + data.len()];
    raw[OF_VALID] = VALID;
    BigEndian::write_u16(&mut raw[OF_SIZE..OF_DATA], data.len() as u16);
    raw[OF_DATA..].copy_from_slice(data);
    raw
}

/// Clear the valid flag of an item raw.
pub fn set_raw_invalid(raw: &mut [u8]) {
    raw[OF_VALID] = INVALID;
}

/// One record, pinned in the page cache while it is cached.
pub struct DataItem {
    address: Address,
    raw: PageView,
    lock: RwLock<()>,
    page: Mutex<Option<PageRef>>,
    logger: Arc<Logger>,
}

impl DataItem {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_valid(&self) -> bool {
        self.raw.read(|raw| raw[OF_VALID] == VALID)
    }

    /// The whole item, header included.
    pub fn raw(&self) -> &PageView {
        &self.raw
    }

    /// The payload.
    pub fn data(&self) -> PageView {
        self.raw.slice(OF_DATA, self.raw.len())
    }

    /// Run `f` on the payload under the item's read lock.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let _guard = self.lock.read();
        self.data().read(f)
    }

    /// Copy of the payload.
    pub fn to_vec(&self) -> Vec<u8> {
        self.read(|bytes| bytes.to_vec())
    }

    /// Start an in-place modification. Holds the item's write lock until the
    /// edit is committed or rolled back.
    pub fn edit(&self) -> ItemEdit<'_> {
        let guard = self.lock.write();
        let snapshot = self.raw.to_vec();
        self.raw.page().set_dirty(true);
        ItemEdit {
            item: self,
            _guard: guard,
            snapshot,
            finished: false,
        }
    }

    fn release_page(&self) -> Result<()> {
        match self.page.lock().take() {
            Some(page) => page.release(),
            None => Ok(()),
        }
    }
}

/// An open modification of a [`DataItem`].
///
/// Dropping the edit without `commit` restores the item.
pub struct ItemEdit<'a> {
    item: &'a DataItem,
    _guard: RwLockWriteGuard<'a, ()>,
    snapshot: Vec<u8>,
    finished: bool,
}

impl ItemEdit<'_> {
    pub fn item(&self) -> &DataItem {
        self.item
    }

    /// Look at the payload as currently edited.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.item.data().read(f)
    }

    /// Mutate the payload in place.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.item.data().write(f)
    }

    /// Log the change under `xid` and keep it. A failed log write rolls the
    /// change back.
    pub fn commit(mut self, xid: TransactionId) -> Result<()> {
        self.finished = true;
        let new_raw = self.item.raw.to_vec();
        let record = update_log(xid, self.item.address, &self.snapshot, &new_raw);
        if let Err(e) = self.item.logger.log(&record) {
            self.restore();
            return Err(e);
        }
        Ok(())
    }

    pub fn rollback(mut self) {
        self.finished = true;
        self.restore();
    }

    fn restore(&self) {
        self.item
            .raw
            .write(|raw| raw.copy_from_slice(&self.snapshot));
    }
}

impl Drop for ItemEdit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.restore();
        }
    }
}

/// Loads items from the page cache.
pub struct ItemSource {
    pages: Arc<PageCache>,
    logger: Arc<Logger>,
}

impl ItemSource {
    pub fn new(pages: Arc<PageCache>, logger: Arc<Logger>) -> Self {
        Self { pages, logger }
    }
}

impl CacheSource for ItemSource {
    type Value = DataItem;

    fn fetch(&self, key: u64) -> Result<DataItem> {
        let address = Address(key);
        let page_id = address.page_id();
        let start = address.offset() as usize;
        if page_id.0 < 2
            || page_id.0 > self.pages.page_count()
            || start < OF_PAGE_DATA
            || start + OF_DATA > PAGE_SIZE
        {
            return Err(Error::MissingRecord(key));
        }

        let page = self.pages.get_page(page_id)?;
        let size = {
            let data = page.read();
            BigEndian::read_u16(&data[start + OF_SIZE..start + OF_DATA]) as usize
        };
        if start + OF_DATA + size > PAGE_SIZE {
            return Err(Error::MissingRecord(key));
        }
        let raw = PageView::new(Arc::clone(page.value()), start, start + OF_DATA + size);

        Ok(DataItem {
            address,
            raw,
            lock: RwLock::new(()),
            page: Mutex::new(Some(page)),
            logger: Arc::clone(&self.logger),
        })
    }

    fn write_back(&self, item: &DataItem) -> Result<()> {
        item.release_page()
    }
}

impl Drop for DataItem {
    fn drop(&mut self) {
        if let Err(e) = self.release_page() {
            warn!("release of page for item {} failed: {}", self.address, e);
        }
    }
}
