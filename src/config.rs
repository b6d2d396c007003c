//! Engine configuration.
//!
//! A database is a set of three files sharing one base path:
//! `<path>.xid` (transaction status), `<path>.db` (pages) and `<path>.log`.

use std::path::{Path, PathBuf};

/// Suffix of the transaction status file.
pub const XID_SUFFIX: &str = ".xid";

/// Suffix of the page file.
pub const DB_SUFFIX: &str = ".db";

/// Suffix of the log file.
pub const LOG_SUFFIX: &str = ".log";

const KB: u64 = 1 << 10;
const MB: u64 = 1 << 20;
const GB: u64 = 1 << 30;

/// Default page cache budget (64MB).
pub const DEFAULT_MEMORY: u64 = 64 * MB;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Base path of the file set.
    pub path: PathBuf,
    /// Memory budget of the page cache in bytes.
    pub memory: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            path: PathBuf::from("mydb"),
            memory: DEFAULT_MEMORY,
        }
    }
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_memory(mut self, memory: u64) -> Self {
        self.memory = memory;
        self
    }

    pub fn xid_path(&self) -> PathBuf {
        with_suffix(&self.path, XID_SUFFIX)
    }

    pub fn db_path(&self) -> PathBuf {
        with_suffix(&self.path, DB_SUFFIX)
    }

    pub fn log_path(&self) -> PathBuf {
        with_suffix(&self.path, LOG_SUFFIX)
    }
}

/// Append `suffix` to the file name of `base` (`a/b` + `.db` = `a/b.db`).
pub fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Parse a memory size such as `64MB`, `512KB` or `1GB`.
pub fn parse_memory(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.len() < 3 {
        return None;
    }
    let (number, unit) = text.split_at(text.len() - 2);
    let scale = match unit.to_ascii_uppercase().as_str() {
        "KB" => KB,
        "MB" => MB,
        "GB" => GB,
        _ => return None,
    };
    number.trim().parse::<u64>().ok()?.checked_mul(scale)
}
