pub mod access;
pub mod common;
pub mod concurrency;
pub mod config;
pub mod data;
pub mod database;
pub mod error;
pub mod network;
pub mod recovery;
pub mod storage;
pub mod transaction;

pub use config::DbConfig;
pub use database::Database;
pub use error::{Error, Result};
