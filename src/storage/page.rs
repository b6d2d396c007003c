pub mod data_page;
pub mod page_one;

use crate::storage::PAGE_SIZE;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Page number. Pages are numbered from 1; page 1 is the bootstrap page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u32);

impl PageId {
    /// Byte offset of the page in the page file.
    pub fn file_offset(&self) -> u64 {
        (self.0.saturating_sub(1)) as u64 * PAGE_SIZE as u64
    }
}

/// Location of a record: page number in the high 32 bits, in-page offset in
/// the low 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u64);

impl Address {
    pub fn new(page_id: PageId, offset: u16) -> Self {
        Address(((page_id.0 as u64) << 32) | offset as u64)
    }

    pub fn page_id(&self) -> PageId {
        PageId((self.0 >> 32) as u32)
    }

    pub fn offset(&self) -> u16 {
        (self.0 & 0xffff_ffff) as u16
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_id().0, self.offset())
    }
}

/// An in-memory page.
pub struct Page {
    id: PageId,
    data: RwLock<Vec<u8>>,
    dirty: AtomicBool,
}

impl Page {
    pub fn new(id: PageId, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self {
            id,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read()
    }

    /// Lock the page for writing and mark it dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        let guard = self.data.write();
        self.dirty.store(true, Ordering::Release);
        guard
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

/// A window `[start, end)` into a page's buffer.
///
/// Views share the page's memory; no bytes are copied until `to_vec`.
#[derive(Debug, Clone)]
pub struct PageView {
    page: Arc<Page>,
    start: usize,
    end: usize,
}

impl PageView {
    pub fn new(page: Arc<Page>, start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= PAGE_SIZE);
        Self { page, start, end }
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Sub-view relative to this one.
    pub fn slice(&self, start: usize, end: usize) -> PageView {
        debug_assert!(start <= end && end <= self.len());
        PageView::new(Arc::clone(&self.page), self.start + start, self.start + end)
    }

    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.page.read();
        f(&data[self.start..self.end])
    }

    /// Mutate the viewed bytes; the page is marked dirty.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.page.write();
        f(&mut data[self.start..self.end])
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.read(|bytes| bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address() {
        let address = Address::new(PageId(3), 0x1234);
        assert_eq!(address.value(), (3u64 << 32) | 0x1234);
        assert_eq!(address.page_id(), PageId(3));
        assert_eq!(address.offset(), 0x1234);
        assert_eq!(address.to_string(), "3:4660");
    }

    #[test]
    fn test_file_offset() {
        assert_eq!(PageId(1).file_offset(), 0);
        assert_eq!(PageId(3).file_offset(), 2 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_views_share_page_memory() {
        let page = Arc::new(Page::new(PageId(1), vec![0u8; PAGE_SIZE]));
        let view = PageView::new(Arc::clone(&page), 10, 20);
        let inner = view.slice(2, 4);

        assert_eq!(view.len(), 10);
        assert_eq!(inner.len(), 2);
        assert!(!page.is_dirty());

        inner.write(|bytes| bytes.copy_from_slice(&[7, 8]));
        assert!(page.is_dirty());
        assert_eq!(&page.read()[12..14], &[7, 8]);
        assert_eq!(view.to_vec()[2..4], [7, 8]);
    }
}
