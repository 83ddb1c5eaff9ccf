//! Budget gate: admit or deny a request against the live ledger total.
//!
//! The gate checks the projected total *after* the request. A request that
//! lands exactly on the threshold is admitted; one byte more is denied.

use crate::ledger::Ledger;

pub struct BudgetGate<'a> {
    ledger: &'a Ledger,
    threshold: usize,
}

impl<'a> BudgetGate<'a> {
    pub fn new(ledger: &'a Ledger, threshold: usize) -> Self {
        Self { ledger, threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Live total if `requested` more bytes were granted. `None` on overflow.
    pub fn projected(&self, requested: usize) -> Option<usize> {
        self.ledger.total_live().checked_add(requested)
    }

    /// Admit a fresh allocation of `requested` bytes.
    pub fn admit(&self, requested: usize) -> bool {
        if requested == 0 {
            return true;
        }
        self.projected(requested)
            .is_some_and(|total| total <= self.threshold)
    }

    /// Admit resizing the block at `address` to `new_size` bytes.
    ///
    /// The block's current size is taken out of the projection first, so the
    /// check is `total - old + new <= threshold`. Untracked blocks count as
    /// size 0. Shrinking and resizing to zero are never refused.
    pub fn admit_resize(&self, address: usize, new_size: usize) -> bool {
        if address == 0 {
            return self.admit(new_size);
        }
        let old_size = self.ledger.size_of(address).unwrap_or(0);
        if new_size <= old_size {
            return true;
        }
        (self.ledger.total_live() - old_size)
            .checked_add(new_size)
            .is_some_and(|total| total <= self.threshold)
    }
}
