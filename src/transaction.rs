//! Transaction management module.
//!
//! The transaction manager records the outcome of every transaction in the
//! transaction status file:
//! - Transaction id allocation (`begin`)
//! - Commit / abort as single-byte in-place status updates
//! - Status queries, with the reserved super transaction always committed

pub mod id;
pub mod manager;
pub mod state;

// Re-export commonly used types
pub use id::{TransactionId, SUPER_XID};
pub use manager::TransactionManager;
pub use state::TransactionState;
