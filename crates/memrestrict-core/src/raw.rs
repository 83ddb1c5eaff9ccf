//! The capability interface onto the genuine allocation API.
//!
//! The facade in `memrestrict-mem` never calls libc directly. It is handed a
//! `RawAllocator` and delegates through it, so the same accounting engine
//! runs over the `dlsym`-resolved libc entry points in the preload library and
//! over scripted fakes in tests.

use std::ffi::{c_int, c_void, CStr};
use std::fmt;

use crate::error::Result;

/// One intercepted entry point of the allocation API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Allocate,
    ZeroAllocate,
    Resize,
    Release,
    Map,
    Unmap,
}

impl Operation {
    pub const COUNT: usize = 6;

    pub const ALL: [Operation; Operation::COUNT] = [
        Operation::Allocate,
        Operation::ZeroAllocate,
        Operation::Resize,
        Operation::Release,
        Operation::Map,
        Operation::Unmap,
    ];

    /// Slot index for per-operation tables.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Name of the C symbol implementing this operation.
    pub fn symbol(self) -> &'static CStr {
        match self {
            Operation::Allocate => c"malloc",
            Operation::ZeroAllocate => c"calloc",
            Operation::Resize => c"realloc",
            Operation::Release => c"free",
            Operation::Map => c"mmap",
            Operation::Unmap => c"munmap",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Allocate => "malloc",
            Operation::ZeroAllocate => "calloc",
            Operation::Resize => "realloc",
            Operation::Release => "free",
            Operation::Map => "mmap",
            Operation::Unmap => "munmap",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments of a raw `mmap` call, forwarded verbatim.
#[derive(Debug, Clone, Copy)]
pub struct MapRequest {
    pub addr: *mut c_void,
    pub len: usize,
    pub prot: c_int,
    pub flags: c_int,
    pub fd: c_int,
    pub offset: i64,
}

/// `MAP_FAILED` as returned by `mmap`.
pub const MAP_FAILED: *mut c_void = usize::MAX as *mut c_void;

/// The genuine allocation API, as seen from the facade.
///
/// Methods mirror the C functions one-to-one and keep their failure
/// conventions (null pointer, `MAP_FAILED`, `-1`).
pub trait RawAllocator: Send + Sync {
    /// Make sure the real implementation of `op` is available.
    ///
    /// Called by the facade before every tracked operation. Implementations
    /// cache the result; calling it again after success must be cheap.
    fn bind(&self, op: Operation) -> Result<()>;

    /// # Safety
    /// Same contract as C `malloc`.
    unsafe fn allocate(&self, size: usize) -> *mut c_void;

    /// # Safety
    /// Same contract as C `calloc`.
    unsafe fn zero_allocate(&self, count: usize, size: usize) -> *mut c_void;

    /// # Safety
    /// Same contract as C `realloc`; `ptr` must be null or live.
    unsafe fn resize(&self, ptr: *mut c_void, size: usize) -> *mut c_void;

    /// # Safety
    /// Same contract as C `free`; `ptr` must be null or live.
    unsafe fn release(&self, ptr: *mut c_void);

    /// # Safety
    /// Same contract as C `mmap`.
    unsafe fn map(&self, request: MapRequest) -> *mut c_void;

    /// # Safety
    /// Same contract as C `munmap`.
    unsafe fn unmap(&self, addr: *mut c_void, len: usize) -> c_int;
}
