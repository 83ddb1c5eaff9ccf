//! memrestrict-core: shared vocabulary for the memrestrict workspace.
//!
//! This crate holds the configuration snapshot, the names of the intercepted
//! operations, the `RawAllocator` capability trait, and the error taxonomy.
//! The ledger, gate and facade live in `memrestrict-mem`; the C ABI surface
//! lives in `memrestrict-preload`.

pub mod config;
pub mod error;
pub mod prelude;
pub mod raw;

pub use config::RestrictConfig;
pub use error::{Error, Result};
pub use raw::{MapRequest, Operation, RawAllocator};
