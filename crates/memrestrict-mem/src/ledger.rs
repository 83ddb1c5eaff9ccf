//! Accounting ledger: live block address -> size.
//!
//! The ledger is the single source of truth for how many tracked bytes are
//! outstanding. `total_live()` always equals the sum of the sizes of the
//! records it holds, and its key set is exactly the set of tracked addresses
//! the application has not released or seen relocated.
//!
//! The ledger itself does no locking, never touches the reentrancy guard and
//! emits no diagnostics. The facade owns it behind a mutex and reports each
//! outcome once the lock is released.

use std::collections::HashMap;

use memrestrict_core::error::{Error, Result};

/// One live block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    pub address: usize,
    pub size: usize,
}

/// What `record_allocation` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Inserted,
    /// The address was already live; the newer record replaced it.
    Replaced { previous: usize },
    /// Null address or zero size; nothing to track.
    Ignored,
}

/// What `record_resize` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resized {
    /// Resize from null, handled as an allocation.
    Allocated(Recorded),
    /// Resize to zero, handled as a release of the returned size.
    Released(Option<usize>),
    /// The block moved: the old record was released and a new one inserted.
    Moved {
        released: Option<usize>,
        recorded: Recorded,
    },
    /// The block was resized where it stood.
    InPlace { delta: isize },
    /// In-place resize of an address the ledger never saw.
    Unaccounted,
}

#[derive(Debug, Default)]
pub struct Ledger {
    records: HashMap<usize, AllocationRecord>,
    total: usize,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently outstanding.
    pub fn total_live(&self) -> usize {
        self.total
    }

    /// Number of live records.
    pub fn live_blocks(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, address: usize) -> Option<&AllocationRecord> {
        self.records.get(&address)
    }

    /// Size of the live block at `address`, if tracked.
    pub fn size_of(&self, address: usize) -> Option<usize> {
        self.records.get(&address).map(|r| r.size)
    }

    pub fn records(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.records.values()
    }

    pub fn record_allocation(&mut self, address: usize, size: usize) -> Recorded {
        if address == 0 || size == 0 {
            return Recorded::Ignored;
        }

        match self.records.insert(address, AllocationRecord { address, size }) {
            Some(old) => {
                self.total = self.total - old.size + size;
                Recorded::Replaced { previous: old.size }
            }
            None => {
                self.total += size;
                Recorded::Inserted
            }
        }
    }

    /// Remove the record for `address`, returning the size it held.
    /// `None` means the address was never tracked.
    pub fn record_release(&mut self, address: usize) -> Option<usize> {
        self.remove(address)
    }

    /// Apply a completed `realloc(old_address, new_size) == new_address`.
    ///
    /// Cases are checked in order: from null, to zero, moved, in place.
    /// An in-place resize whose delta cannot be applied leaves the ledger
    /// untouched and reports `LedgerOverflow`.
    pub fn record_resize(
        &mut self,
        new_address: usize,
        old_address: usize,
        new_size: usize,
    ) -> Result<Resized> {
        if old_address == 0 {
            return Ok(Resized::Allocated(
                self.record_allocation(new_address, new_size),
            ));
        }

        if new_size == 0 {
            return Ok(Resized::Released(self.record_release(old_address)));
        }

        if new_address != old_address {
            let released = self.record_release(old_address);
            let recorded = self.record_allocation(new_address, new_size);
            return Ok(Resized::Moved { released, recorded });
        }

        let Some(record) = self.records.get_mut(&old_address) else {
            return Ok(Resized::Unaccounted);
        };

        let overflow = Error::LedgerOverflow {
            address: old_address,
            old_size: record.size,
            new_size,
        };
        let delta = new_size as i128 - record.size as i128;
        let total = usize::try_from(self.total as i128 + delta).map_err(|_| overflow.clone())?;
        let delta = isize::try_from(delta).map_err(|_| overflow)?;

        record.size = new_size;
        self.total = total;
        Ok(Resized::InPlace { delta })
    }

    /// Drop a record, returning the size it held.
    pub(crate) fn remove(&mut self, address: usize) -> Option<usize> {
        let record = self.records.remove(&address)?;
        self.total -= record.size;
        Some(record.size)
    }
}
