//! Concurrency control module.
//!
//! This module implements multi-version concurrency control on top of the
//! data manager:
//! - Versioned entries carrying their creating and deleting transactions
//! - Visibility rules for read committed and repeatable read
//! - A lock table with deadlock detection for deletions
//! - The version manager tying these to transactions

pub mod lock;
pub mod mvcc;
pub mod version;
pub mod visibility;

pub use lock::{LockTable, Waiter};
pub use mvcc::{AbortReason, IsolationLevel, Transaction, VersionManager};
pub use version::Entry;
