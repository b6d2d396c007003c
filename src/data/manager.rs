use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use super::item::{self, DataItem, ItemSource};
use crate::common::{CacheRef, RefCountCache};
use crate::config::{with_suffix, DB_SUFFIX, LOG_SUFFIX};
use crate::error::{Error, Result};
use crate::recovery::{self, log_record::insert_log};
use crate::storage::page::data_page::{self, MAX_FREE_SPACE};
use crate::storage::page::page_one;
use crate::storage::{Address, FreeSpaceIndex, Logger, Page, PageCache, PageId, PageRef};
use crate::transaction::{TransactionId, TransactionManager};

/// A cached data item. Dropping it releases the item.
pub type ItemRef = CacheRef<ItemSource>;

/// Attempts at finding a page with room before giving up.
const INSERT_ATTEMPTS: usize = 5;

const PAGE_ONE: PageId = PageId(1);

pub struct DataManager {
    tm: Arc<TransactionManager>,
    pages: Arc<PageCache>,
    logger: Arc<Logger>,
    items: Arc<RefCountCache<ItemSource>>,
    free_space: FreeSpaceIndex,
    page_one: Mutex<Option<PageRef>>,
}

impl DataManager {
    /// Create `<path>.db` and `<path>.log` for a new database.
    pub fn create(path: &Path, memory: u64, tm: Arc<TransactionManager>) -> Result<Self> {
        let pages = PageCache::create(&with_suffix(path, DB_SUFFIX), memory)?;
        let logger = Logger::create(&with_suffix(path, LOG_SUFFIX))?;
        let dm = Self::new(tm, pages, logger);

        let page_id = dm.pages.new_page(&page_one::init_raw())?;
        debug_assert_eq!(page_id, PAGE_ONE);
        let page = dm.pages.get_page(page_id)?;
        dm.pages.flush_page(&page)?;
        *dm.page_one.lock() = Some(page);

        Ok(dm)
    }

    /// Open an existing database, replaying the log if the last session did
    /// not close cleanly.
    pub fn open(path: &Path, memory: u64, tm: Arc<TransactionManager>) -> Result<Self> {
        let pages = PageCache::open(&with_suffix(path, DB_SUFFIX), memory)?;
        let logger = Logger::open(&with_suffix(path, LOG_SUFFIX))?;
        let dm = Self::new(tm, pages, logger);

        let page = dm.pages.get_page(PAGE_ONE)?;
        if !page_one::check_token(&page) {
            warn!("{:?} was not closed cleanly, running recovery", path);
            let stats = recovery::recover(&dm.tm, &dm.logger, &dm.pages)?;
            info!("recovery finished: {}", stats);
        }
        dm.fill_free_space()?;

        page_one::set_open_token(&page);
        dm.pages.flush_page(&page)?;
        *dm.page_one.lock() = Some(page);

        Ok(dm)
    }

    fn new(tm: Arc<TransactionManager>, pages: PageCache, logger: Logger) -> Self {
        let pages = Arc::new(pages);
        let logger = Arc::new(logger);
        let items = Arc::new(RefCountCache::new(
            ItemSource::new(Arc::clone(&pages), Arc::clone(&logger)),
            0,
        ));
        Self {
            tm,
            pages,
            logger,
            items,
            free_space: FreeSpaceIndex::new(),
            page_one: Mutex::new(None),
        }
    }

    fn fill_free_space(&self) -> Result<()> {
        let page_count = self.pages.page_count();
        for page_no in 2..=page_count {
            let page = self.pages.get_page(PageId(page_no))?;
            self.free_space.add(page.id(), data_page::free_space(&page));
            page.release()?;
        }
        debug!("free-space index filled from {} pages", page_count.saturating_sub(1));
        Ok(())
    }

    pub fn tm(&self) -> &Arc<TransactionManager> {
        &self.tm
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    /// Read the item at `address`; `None` if it has been invalidated.
    pub fn read(&self, address: Address) -> Result<Option<ItemRef>> {
        let item = self.items.get(address.0)?;
        if !item.is_valid() {
            item.release()?;
            return Ok(None);
        }
        Ok(Some(item))
    }

    /// Take a counted reference to a valid item; pair with [`release`](Self::release).
    pub(crate) fn acquire(&self, address: Address) -> Result<Option<Arc<DataItem>>> {
        let item = self.items.acquire(address.0)?;
        if !item.is_valid() {
            self.items.release(address.0)?;
            return Ok(None);
        }
        Ok(Some(item))
    }

    pub(crate) fn release(&self, address: Address) -> Result<()> {
        self.items.release(address.0)
    }

    /// Store `data` as a new item written by `xid`.
    pub fn insert(&self, xid: TransactionId, data: &[u8]) -> Result<Address> {
        let raw = item::wrap_raw(data);
        if raw.len() > MAX_FREE_SPACE {
            return Err(Error::DataTooLarge {
                size: raw.len(),
                max: MAX_FREE_SPACE,
            });
        }

        for _ in 0..INSERT_ATTEMPTS {
            let info = match self.free_space.select(raw.len()) {
                Some(info) => info,
                None => {
                    let page_id = self.pages.new_page(&data_page::init_raw())?;
                    self.free_space.add(page_id, MAX_FREE_SPACE);
                    continue;
                }
            };

            let page = match self.pages.get_page(info.page_id) {
                Ok(page) => page,
                Err(e) => {
                    self.free_space.add(info.page_id, info.free_space);
                    return Err(e);
                }
            };

            let free = data_page::free_space(&page);
            if free < raw.len() {
                self.free_space.add(info.page_id, free);
                page.release()?;
                continue;
            }

            let inserted = self.insert_into(&page, xid, &raw);
            self.free_space
                .add(info.page_id, data_page::free_space(&page));
            page.release()?;

            let offset = inserted?;
            return Ok(Address::new(info.page_id, offset));
        }
        Err(Error::DatabaseBusy)
    }

    fn insert_into(&self, page: &Page, xid: TransactionId, raw: &[u8]) -> Result<u16> {
        let offset = data_page::free_offset(page);
        self.logger.log(&insert_log(xid, page.id(), offset, raw))?;
        Ok(data_page::insert(page, raw))
    }

    /// Flush everything and mark the shutdown as clean.
    pub fn close(&self) -> Result<()> {
        self.items.close()?;
        if let Some(page) = self.page_one.lock().take() {
            page_one::set_close_token(&page);
            page.release()?;
        }
        self.pages.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::SUPER_XID;
    use tempfile::tempdir;

    const MEMORY: u64 = 1 << 20;

    fn create(path: &Path) -> anyhow::Result<DataManager> {
        let tm = Arc::new(TransactionManager::create(path)?);
        Ok(DataManager::create(path, MEMORY, tm)?)
    }

    fn open(path: &Path) -> anyhow::Result<DataManager> {
        let tm = Arc::new(TransactionManager::open(path)?);
        Ok(DataManager::open(path, MEMORY, tm)?)
    }

    #[test]
    fn test_insert_and_read() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let dm = create(&dir.path().join("db"))?;

        let first = dm.insert(SUPER_XID, b"hello")?;
        let second = dm.insert(SUPER_XID, b"world!")?;
        assert_eq!(first.page_id(), PageId(2));
        assert_eq!(second.page_id(), PageId(2));
        assert_eq!(first.offset(), 2);
        assert_eq!(second.offset(), 2 + 3 + 5);

        let item = dm.read(first)?.expect("item is valid");
        assert_eq!(item.to_vec(), b"hello");
        assert_eq!(item.address(), first);
        drop(item);

        let item = dm.read(second)?.expect("item is valid");
        assert_eq!(item.to_vec(), b"world!");

        Ok(())
    }

    #[test]
    fn test_insert_too_large() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let dm = create(&dir.path().join("db"))?;

        let data = vec![0u8; MAX_FREE_SPACE];
        assert!(matches!(
            dm.insert(SUPER_XID, &data),
            Err(Error::DataTooLarge { .. })
        ));

        // The largest item that fits fills a page on its own.
        let data = vec![1u8; MAX_FREE_SPACE - item::OF_DATA];
        let address = dm.insert(SUPER_XID, &data)?;
        assert_eq!(dm.read(address)?.expect("item is valid").to_vec(), data);

        Ok(())
    }

    #[test]
    fn test_inserts_spill_to_new_pages() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let dm = create(&dir.path().join("db"))?;

        let data = vec![7u8; 3000];
        let addresses = (0..5)
            .map(|_| dm.insert(SUPER_XID, &data))
            .collect::<Result<Vec<_>>>()?;

        let mut pages: Vec<_> = addresses.iter().map(|a| a.page_id()).collect();
        pages.dedup();
        assert!(pages.len() >= 3);
        for address in addresses {
            assert_eq!(dm.read(address)?.expect("item is valid").to_vec(), data);
        }

        Ok(())
    }

    #[test]
    fn test_large_insert_after_small_one() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let dm = create(&dir.path().join("db"))?;

        // Page 2 keeps 8170 bytes free: still in the last bucket, but too
        // small for an 8180-byte item.
        let small = dm.insert(SUPER_XID, &[0u8; 17])?;
        let data = vec![1u8; 8177];
        let large = dm.insert(SUPER_XID, &data)?;

        assert_eq!(small.page_id(), PageId(2));
        assert_eq!(large.page_id(), PageId(3));
        assert_eq!(dm.read(large)?.expect("item is valid").to_vec(), data);

        // Page 2 is still available to inserts that fit.
        let next = dm.insert(SUPER_XID, &[2u8; 100])?;
        assert_eq!(next.page_id(), PageId(2));

        Ok(())
    }

    #[test]
    fn test_edit_commit_and_rollback() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let dm = create(&dir.path().join("db"))?;
        let address = dm.insert(SUPER_XID, &[1, 2, 3])?;
        let item = dm.read(address)?.expect("item is valid");

        let mut edit = item.edit();
        edit.update(|bytes| bytes[0] = 9);
        edit.rollback();
        assert_eq!(item.to_vec(), vec![1, 2, 3]);

        {
            let mut edit = item.edit();
            edit.update(|bytes| bytes[1] = 9);
            // Dropped without commit.
        }
        assert_eq!(item.to_vec(), vec![1, 2, 3]);

        let log_len = dm.logger().len();
        let mut edit = item.edit();
        edit.update(|bytes| bytes[2] = 9);
        edit.commit(SUPER_XID)?;
        assert_eq!(item.to_vec(), vec![1, 2, 9]);
        assert!(dm.logger().len() > log_len);

        Ok(())
    }

    #[test]
    fn test_reopen_after_close() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("db");

        let address = {
            let dm = create(&path)?;
            let address = dm.insert(SUPER_XID, b"durable")?;
            dm.close()?;
            address
        };

        let dm = open(&path)?;
        assert_eq!(dm.read(address)?.expect("item is valid").to_vec(), b"durable");

        // Free space of page 2 was rebuilt: the next insert lands after the first.
        let next = dm.insert(SUPER_XID, b"more")?;
        assert_eq!(next.page_id(), PageId(2));
        assert_eq!(next.offset(), address.offset() + 3 + 7);

        Ok(())
    }

    #[test]
    fn test_missing_record() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let dm = create(&dir.path().join("db"))?;

        assert!(matches!(
            dm.read(Address::new(PageId(9), 2)),
            Err(Error::MissingRecord(_))
        ));
        assert!(matches!(
            dm.read(Address::new(PageId(1), 2)),
            Err(Error::MissingRecord(_))
        ));

        Ok(())
    }
}
