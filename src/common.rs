//! Building blocks shared by the storage and version layers.

pub mod cache;

pub use cache::{CacheRef, CacheSource, RefCountCache};
