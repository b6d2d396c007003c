//! Disk access for the page file.

pub mod page_manager;

pub use page_manager::{PageFile, PAGE_SIZE};
