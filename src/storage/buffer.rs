use crate::common::{CacheRef, RefCountCache};
use crate::error::{Error, Result};
use crate::storage::{Page, PageFile, PageId, PAGE_SIZE};
use log::debug;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Smallest page cache the engine runs with.
pub const MIN_CACHE_PAGES: usize = 10;

/// A pinned page. Dropping it unpins the page; the last pin writes it back
/// if it is dirty.
pub type PageRef = CacheRef<PageFile>;

/// Page cache over the `.db` file.
pub struct PageCache {
    cache: Arc<RefCountCache<PageFile>>,
    page_count: AtomicU32,
}

impl PageCache {
    pub fn create(path: &Path, memory: u64) -> Result<Self> {
        let capacity = Self::capacity(memory)?;
        Self::with_file(PageFile::create(path)?, capacity)
    }

    pub fn open(path: &Path, memory: u64) -> Result<Self> {
        let capacity = Self::capacity(memory)?;
        Self::with_file(PageFile::open(path)?, capacity)
    }

    fn capacity(memory: u64) -> Result<usize> {
        let capacity = (memory / PAGE_SIZE as u64) as usize;
        if capacity < MIN_CACHE_PAGES {
            return Err(Error::MemTooSmall {
                min_pages: MIN_CACHE_PAGES,
            });
        }
        Ok(capacity)
    }

    fn with_file(file: PageFile, capacity: usize) -> Result<Self> {
        let page_count = file.num_pages()?;
        debug!(
            "page cache: {} pages on disk, capacity {}",
            page_count, capacity
        );
        Ok(Self {
            cache: Arc::new(RefCountCache::new(file, capacity)),
            page_count: AtomicU32::new(page_count),
        })
    }

    /// Append a page initialised with `init` and write it through to disk.
    pub fn new_page(&self, init: &[u8]) -> Result<PageId> {
        let page_id = PageId(self.page_count.fetch_add(1, Ordering::SeqCst) + 1);
        self.cache.source().write_page(page_id, init)?;
        Ok(page_id)
    }

    /// Pin a page, loading it if needed.
    pub fn get_page(&self, page_id: PageId) -> Result<PageRef> {
        self.cache.get(page_id.0 as u64)
    }

    /// Unpin a page, reporting write-back failures.
    pub fn release(&self, page: PageRef) -> Result<()> {
        page.release()
    }

    /// Write a page to disk now, keeping it resident.
    pub fn flush_page(&self, page: &Page) -> Result<()> {
        self.cache.source().write_page(page.id(), &page.read())?;
        page.set_dirty(false);
        Ok(())
    }

    /// Drop every page after `max_page`.
    pub fn truncate(&self, max_page: u32) -> Result<()> {
        self.cache.source().truncate(max_page)?;
        self.page_count.store(max_page, Ordering::SeqCst);
        Ok(())
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::SeqCst)
    }

    /// Write back every resident page.
    pub fn close(&self) -> Result<()> {
        self.cache.close()
    }
}
