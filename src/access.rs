//! Index layer.
//!
//! - **BPlusTree**: B+Tree from `u64` keys to record addresses, stored as data
//!   items and reached through a boot record

pub mod btree;

pub use btree::BPlusTree;
