//! Storage layer.
//!
//! Everything below the data manager lives here:
//!
//! - **PageFile**: raw page I/O on the `.db` file
//! - **PageCache**: reference-counted cache of pages, bounded by the memory budget
//! - **Page layouts**: page one (clean-shutdown token) and data pages
//! - **FreeSpaceIndex**: coarse in-memory index from free space to page
//! - **Logger**: checksummed append-only log used for crash recovery

pub mod buffer;
pub mod disk;
pub mod free_space;
pub mod page;
pub mod wal;

pub use buffer::{PageCache, PageRef};
pub use disk::{PageFile, PAGE_SIZE};
pub use free_space::FreeSpaceIndex;
pub use page::{Address, Page, PageId, PageView};
pub use wal::Logger;
