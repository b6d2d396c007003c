use std::fmt;

/// Transaction id, as allocated by the status file counter starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

/// Reserved id that is always committed. Index structure is written under it
/// so it is never undone.
pub const SUPER_XID: TransactionId = TransactionId(0);

impl TransactionId {
    pub fn is_super(self) -> bool {
        self == SUPER_XID
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xid {}", self.0)
    }
}
