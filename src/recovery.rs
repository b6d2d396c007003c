//! Crash recovery.
//!
//! This module replays the data manager's log after an unclean shutdown:
//! - Analysis: decode the log and cut the page file back to the pages it references
//! - Redo of every record written by a committed transaction
//! - Undo of every record written by a transaction that did not commit
//! - Aborting transactions that were still active at the crash

pub mod log_record;
pub mod replay;

// Re-export commonly used types
pub use log_record::LogRecord;
pub use replay::{recover, RecoveryStats};
