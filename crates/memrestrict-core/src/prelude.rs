//! Convenient re-exports for downstream crates.

pub use crate::config::{RestrictConfig, DEBUG_VAR, DEFAULT_THRESHOLD_BYTES, THRESHOLD_VAR};
pub use crate::error::{Error, Result};
pub use crate::raw::{MapRequest, Operation, RawAllocator, MAP_FAILED};
