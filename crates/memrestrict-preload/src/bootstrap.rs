//! Static bump arena for allocations made while the binder is resolving.
//!
//! `dlsym` may itself call `calloc`, which lands back in our `calloc` before
//! the real one is known. Those few requests are carved out of a static
//! buffer. Blocks are never reused; freeing one is a no-op.

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const ARENA_BYTES: usize = 64 * 1024;

/// Every block starts on this boundary, preceded by a header of the same size
/// holding the requested length.
const ALIGN: usize = 16;
const HEADER: usize = ALIGN;

#[repr(C, align(16))]
struct Storage(UnsafeCell<[u8; ARENA_BYTES]>);

pub struct BootstrapArena {
    storage: Storage,
    next: AtomicUsize,
}

// SAFETY: disjoint ranges are handed out by an atomic bump; no byte is ever
// handed out twice.
unsafe impl Sync for BootstrapArena {}

pub static ARENA: BootstrapArena = BootstrapArena::new();

impl BootstrapArena {
    pub const fn new() -> Self {
        Self {
            storage: Storage(UnsafeCell::new([0; ARENA_BYTES])),
            next: AtomicUsize::new(0),
        }
    }

    fn base(&self) -> *mut u8 {
        self.storage.0.get().cast()
    }

    /// Carve `size` zeroed bytes out of the arena. Null when exhausted.
    pub fn allocate(&self, size: usize) -> *mut c_void {
        let Some(needed) = size
            .checked_add(ALIGN - 1)
            .map(|s| s & !(ALIGN - 1))
            .and_then(|s| s.checked_add(HEADER))
        else {
            return ptr::null_mut();
        };

        let mut cur = self.next.load(Ordering::Relaxed);
        loop {
            let end = match cur.checked_add(needed) {
                Some(end) if end <= ARENA_BYTES => end,
                _ => return ptr::null_mut(),
            };
            match self
                .next
                .compare_exchange(cur, end, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }

        // SAFETY: [cur, cur + needed) is inside the arena and exclusively ours.
        unsafe {
            let header = self.base().add(cur);
            header.cast::<usize>().write(size);
            header.add(HEADER).cast()
        }
    }

    /// Whether `ptr` points into this arena.
    pub fn owns(&self, ptr: *const c_void) -> bool {
        let start = self.base() as usize;
        let addr = ptr as usize;
        addr >= start && addr < start + ARENA_BYTES
    }

    /// Length requested for the arena block at `ptr`.
    ///
    /// # Safety
    /// `ptr` must have been returned by `allocate` on this arena.
    pub unsafe fn block_len(&self, ptr: *const c_void) -> usize {
        ptr.cast::<u8>().sub(HEADER).cast::<usize>().read()
    }

    /// Bytes carved so far, headers included.
    pub fn used(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }
}
