//! memrestrict-mem: the interception and accounting engine.
//!
//! `Restrictor` is the allocation-API facade. It owns the accounting
//! `Ledger` behind a single mutex, consults the `BudgetGate` before every
//! growing request, and delegates to an injected `RawAllocator`. A per-thread
//! `ReentrancyGuard` keeps the ledger's own allocations out of the books.
//!
//! Nothing here installs itself as the process allocator; the preload crate
//! does that with a static `Restrictor` over the `dlsym`-resolved libc.

pub mod event;
pub mod facade;
pub mod gate;
pub mod guard;
pub mod ledger;
pub mod tracking;

pub use event::{Event, Totals};
pub use facade::Restrictor;
pub use gate::BudgetGate;
pub use guard::ReentrancyGuard;
pub use ledger::{AllocationRecord, Ledger, Recorded, Resized};
pub use tracking::{EventCounter, PeakTracker, Stats};
