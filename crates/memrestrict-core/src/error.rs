use thiserror::Error;

use crate::raw::Operation;

/// Canonical result for memrestrict.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the facade can report.
///
/// The C surface collapses all of these into `ENOMEM`; the variants exist so
/// Rust callers and the diagnostics can tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("memory budget exceeded: requested {requested} bytes, live {live}, threshold {threshold}")]
    BudgetExceeded {
        requested: usize,
        live: usize,
        threshold: usize,
    },

    #[error("underlying {op} failed for {bytes} bytes")]
    Exhausted { op: Operation, bytes: usize },

    #[error("could not resolve the real `{0}` entry point")]
    Unresolved(Operation),

    #[error("allocation size overflow: {count} x {size} bytes")]
    SizeOverflow { count: usize, size: usize },

    #[error("ledger total overflow resizing {address:#x} from {old_size} to {new_size} bytes")]
    LedgerOverflow {
        address: usize,
        old_size: usize,
        new_size: usize,
    },
}

impl Error {
    /// Whether this failure was a budget denial rather than a genuine fault.
    pub fn is_denial(&self) -> bool {
        matches!(self, Error::BudgetExceeded { .. })
    }
}
