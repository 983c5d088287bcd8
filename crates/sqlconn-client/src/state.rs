//! Session status reported by a connection.
//!
//! The pool only looks at these values when deciding whether a returned
//! connection can be reused. The upper-case names are part of the log
//! contract: operators grep for `INTRANS`, `INERROR` and friends.

use std::fmt;

/// Transaction status of a backend session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionStatus {
    /// No transaction open, no command in progress.
    #[default]
    Idle,
    /// A command is in progress (e.g. a `COPY` that was never consumed).
    Active,
    /// Idle inside a transaction block.
    InTrans,
    /// Idle inside a failed transaction block.
    InError,
    /// The session is gone or in an unrecognised state.
    Unknown,
}

impl TransactionStatus {
    /// Stable upper-case name of the status.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Active => "ACTIVE",
            Self::InTrans => "INTRANS",
            Self::InError => "INERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether a transaction block is open (successful or failed).
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        matches!(self, Self::InTrans | Self::InError)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
