//! Append-only log.
//!
//! This module implements the log the data manager writes before touching a
//! page:
//! - Record framing (`[length][checksum][payload]`) and the rolling checksum
//! - A file-level checksum header covering every record
//! - Truncation of a torn or unacknowledged tail when the log is opened

pub mod manager;
pub mod record;

pub use manager::Logger;
pub use record::{checksum, wrap};
