use crate::common::CacheSource;
use crate::error::{Error, Result};
use crate::storage::page::{Page, PageId};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 8192;

/// The `.db` file, read and written one page at a time.
pub struct PageFile {
    file: Mutex<File>,
}

impl PageFile {
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

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotExists(path.to_path_buf()));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Read a page into `buf`. Bytes past the end of the file read as zero.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset()))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf[filled..].fill(0);

        Ok(())
    }

    /// Write a full page and sync it, extending the file if necessary.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset()))?;
        file.write_all(data)?;
        file.sync_data()?;

        Ok(())
    }

    pub fn num_pages(&self) -> Result<u32> {
        let file_size = self.file.lock().metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as u32)
    }

    /// Cut the file down to its first `num_pages` pages.
    pub fn truncate(&self, num_pages: u32) -> Result<()> {
        let file = self.file.lock();
        file.set_len(num_pages as u64 * PAGE_SIZE as u64)?;
        file.sync_all()?;
        Ok(())
    }
}

impl CacheSource for PageFile {
    type Value = Page;

    fn fetch(&self, key: u64) -> Result<Page> {
        let page_id = PageId(key as u32);
        let mut data = vec![0u8; PAGE_SIZE];
        self.read_page(page_id, &mut data)?;
        Ok(Page::new(page_id, data))
    }

    fn write_back(&self, page: &Page) -> Result<()> {
        if page.is_dirty() {
            self.write_page(page.id(), &page.read())?;
            page.set_dirty(false);
        }
        Ok(())
    }
}
