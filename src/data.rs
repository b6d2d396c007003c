//! Data manager.
//!
//! Owns the page cache, the log and the free-space index, and hands out
//! data items by address. Every page mutation is logged first so a crashed
//! session can be replayed by [`crate::recovery`].

pub mod item;
pub mod manager;

pub use item::{DataItem, ItemEdit};
pub use manager::{DataManager, ItemRef};
