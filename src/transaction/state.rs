//! Outcome of a transaction as recorded in the status file.

use std::fmt;

/// One status byte per transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    Active = 0,
    Committed = 1,
    Aborted = 2,
}

impl TransactionState {
    /// `None` for a byte no state encodes to.
    pub fn from_byte(byte: u8) -> Option<Self> {
        [Self::Active, Self::Committed, Self::Aborted]
            .into_iter()
            .find(|state| state.to_byte() == byte)
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Committed and aborted are terminal and never change again.
    pub fn is_terminal(self) -> bool {
        self != Self::Active
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
