//! Binder for the genuine libc allocation entry points.
//!
//! Each operation has one slot holding the address `dlsym(RTLD_NEXT, name)`
//! returned for it. A slot is filled on first use and read on every call
//! after that. Two threads racing to fill the same slot both store the same
//! address, so the race is harmless.
//!
//! While this thread is inside `dlsym`, requests for an unbound operation are
//! served by the bootstrap arena instead of recursing.

use std::cell::Cell;
use std::ffi::{c_int, c_void};
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use memrestrict_core::error::{Error, Result};
use memrestrict_core::raw::{MapRequest, Operation, RawAllocator, MAP_FAILED};

use crate::bootstrap::ARENA;

type MallocFn = unsafe extern "C" fn(libc::size_t) -> *mut c_void;
type CallocFn = unsafe extern "C" fn(libc::size_t, libc::size_t) -> *mut c_void;
type ReallocFn = unsafe extern "C" fn(*mut c_void, libc::size_t) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);
type MmapFn = unsafe extern "C" fn(
    *mut c_void,
    libc::size_t,
    c_int,
    c_int,
    c_int,
    libc::off_t,
) -> *mut c_void;
type MunmapFn = unsafe extern "C" fn(*mut c_void, libc::size_t) -> c_int;

thread_local! {
    static RESOLVING: Cell<bool> = const { Cell::new(false) };
}

pub struct LibcBinder {
    slots: [AtomicPtr<c_void>; Operation::COUNT],
}

impl Default for LibcBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl LibcBinder {
    pub const fn new() -> Self {
        Self {
            slots: [const { AtomicPtr::new(ptr::null_mut()) }; Operation::COUNT],
        }
    }

    /// Whether `op` has been resolved already.
    pub fn is_bound(&self, op: Operation) -> bool {
        !self.slots[op.index()].load(Ordering::Acquire).is_null()
    }

    /// Resolved address of `op`, resolving it now if needed.
    ///
    /// `None` if the symbol cannot be found, or if this thread is already
    /// inside `dlsym` and `op` is not bound yet.
    fn entry(&self, op: Operation) -> Option<*mut c_void> {
        let slot = &self.slots[op.index()];
        let cached = slot.load(Ordering::Acquire);
        if !cached.is_null() {
            return Some(cached);
        }
        if RESOLVING.with(Cell::get) {
            return None;
        }

        RESOLVING.with(|r| r.set(true));
        // SAFETY: symbol names are NUL-terminated constants.
        let found = unsafe { libc::dlsym(libc::RTLD_NEXT, op.symbol().as_ptr()) };
        RESOLVING.with(|r| r.set(false));

        if found.is_null() {
            return None;
        }
        slot.store(found, Ordering::Release);
        Some(found)
    }
}

impl RawAllocator for LibcBinder {
    fn bind(&self, op: Operation) -> Result<()> {
        self.entry(op).map(drop).ok_or(Error::Unresolved(op))
    }

    unsafe fn allocate(&self, size: usize) -> *mut c_void {
        match self.entry(Operation::Allocate) {
            Some(f) => mem::transmute::<*mut c_void, MallocFn>(f)(size),
            None => ARENA.allocate(size),
        }
    }

    unsafe fn zero_allocate(&self, count: usize, size: usize) -> *mut c_void {
        match self.entry(Operation::ZeroAllocate) {
            Some(f) => mem::transmute::<*mut c_void, CallocFn>(f)(count, size),
            // Arena memory is never reused, so it is still zeroed.
            None => match count.checked_mul(size) {
                Some(bytes) => ARENA.allocate(bytes),
                None => ptr::null_mut(),
            },
        }
    }

    unsafe fn resize(&self, old: *mut c_void, size: usize) -> *mut c_void {
        if ARENA.owns(old) {
            // Move out of the arena into a real block.
            let moved = self.allocate(size);
            if !moved.is_null() {
                let len = ARENA.block_len(old).min(size);
                ptr::copy_nonoverlapping(old.cast::<u8>(), moved.cast::<u8>(), len);
            }
            return moved;
        }
        match self.entry(Operation::Resize) {
            Some(f) => mem::transmute::<*mut c_void, ReallocFn>(f)(old, size),
            None => ptr::null_mut(),
        }
    }

    unsafe fn release(&self, ptr: *mut c_void) {
        if ARENA.owns(ptr) {
            return;
        }
        if let Some(f) = self.entry(Operation::Release) {
            mem::transmute::<*mut c_void, FreeFn>(f)(ptr);
        }
    }

    unsafe fn map(&self, request: MapRequest) -> *mut c_void {
        match self.entry(Operation::Map) {
            Some(f) => mem::transmute::<*mut c_void, MmapFn>(f)(
                request.addr,
                request.len,
                request.prot,
                request.flags,
                request.fd,
                request.offset as libc::off_t,
            ),
            None => MAP_FAILED,
        }
    }

    unsafe fn unmap(&self, addr: *mut c_void, len: usize) -> c_int {
        match self.entry(Operation::Unmap) {
            Some(f) => mem::transmute::<*mut c_void, MunmapFn>(f)(addr, len),
            None => -1,
        }
    }
}
