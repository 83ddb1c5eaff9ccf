//! Shared fixtures: an in-process fake heap standing in for libc.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::{c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use memrestrict_core::prelude::*;
use memrestrict_mem::Restrictor;

/// Addresses handed out by `FakeHeap`. Never dereferenced.
const BASE_ADDRESS: usize = 0x10000;
const GAP: usize = 16;
pub const FAKE_MAPPING: usize = 0x7000_0000;

#[derive(Default)]
struct HeapState {
    next: usize,
    blocks: HashMap<usize, usize>,
    freed: Vec<(usize, usize)>,
    calls: [usize; Operation::COUNT],
    binds: [usize; Operation::COUNT],
}

/// Bookkeeping-only allocator: hands out distinct fake addresses and
/// remembers what is live, so tests can compare it with the ledger.
pub struct FakeHeap {
    state: Mutex<HeapState>,
    relocate_on_grow: bool,
    recycle: bool,
    unbound: Option<Operation>,
    fail_next: AtomicBool,
}

impl Default for FakeHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHeap {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeapState {
                next: BASE_ADDRESS,
                ..HeapState::default()
            }),
            relocate_on_grow: false,
            recycle: false,
            unbound: None,
            fail_next: AtomicBool::new(false),
        }
    }

    /// Growing resizes always move the block.
    pub fn relocating() -> Self {
        Self {
            relocate_on_grow: true,
            ..Self::new()
        }
    }

    /// Freed blocks are handed back first, newest first, to requests of the
    /// same size.
    pub fn recycling() -> Self {
        Self {
            recycle: true,
            ..Self::new()
        }
    }

    /// `op` cannot be resolved.
    pub fn without(op: Operation) -> Self {
        Self {
            unbound: Some(op),
            ..Self::new()
        }
    }

    /// Make the next allocating call return null.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn live_blocks(&self) -> usize {
        self.state.lock().unwrap().blocks.len()
    }

    pub fn live_bytes(&self) -> usize {
        self.state.lock().unwrap().blocks.values().sum()
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.state.lock().unwrap().calls[op.index()]
    }

    pub fn binds(&self, op: Operation) -> usize {
        self.state.lock().unwrap().binds[op.index()]
    }

    fn take_failure(&self) -> bool {
        self.fail_next.swap(false, Ordering::SeqCst)
    }

    fn carve(state: &mut HeapState, size: usize) -> usize {
        if let Some(i) = state.freed.iter().rposition(|&(_, s)| s == size) {
            let (address, _) = state.freed.remove(i);
            state.blocks.insert(address, size);
            return address;
        }
        let address = state.next;
        state.next += size.max(1).next_multiple_of(GAP) + GAP;
        state.blocks.insert(address, size);
        address
    }

    fn count(&self, op: Operation) -> std::sync::MutexGuard<'_, HeapState> {
        let mut state = self.state.lock().unwrap();
        state.calls[op.index()] += 1;
        state
    }
}

impl RawAllocator for FakeHeap {
    fn bind(&self, op: Operation) -> Result<()> {
        self.state.lock().unwrap().binds[op.index()] += 1;
        if self.unbound == Some(op) {
            return Err(Error::Unresolved(op));
        }
        Ok(())
    }

    unsafe fn allocate(&self, size: usize) -> *mut c_void {
        let mut state = self.count(Operation::Allocate);
        if self.take_failure() {
            return ptr::null_mut();
        }
        Self::carve(&mut state, size) as *mut c_void
    }

    unsafe fn zero_allocate(&self, count: usize, size: usize) -> *mut c_void {
        let mut state = self.count(Operation::ZeroAllocate);
        if self.take_failure() {
            return ptr::null_mut();
        }
        match count.checked_mul(size) {
            Some(bytes) => Self::carve(&mut state, bytes) as *mut c_void,
            None => ptr::null_mut(),
        }
    }

    unsafe fn resize(&self, old: *mut c_void, size: usize) -> *mut c_void {
        let mut state = self.count(Operation::Resize);
        if self.take_failure() {
            return ptr::null_mut();
        }
        let address = old as usize;
        if address == 0 {
            return Self::carve(&mut state, size) as *mut c_void;
        }
        if size == 0 {
            state.blocks.remove(&address);
            return ptr::null_mut();
        }
        let current = state.blocks.get(&address).copied().unwrap_or(0);
        if self.relocate_on_grow && size > current {
            state.blocks.remove(&address);
            return Self::carve(&mut state, size) as *mut c_void;
        }
        state.blocks.insert(address, size);
        old
    }

    unsafe fn release(&self, ptr: *mut c_void) {
        let mut state = self.count(Operation::Release);
        let address = ptr as usize;
        if let Some(size) = state.blocks.remove(&address) {
            if self.recycle {
                state.freed.push((address, size));
            }
        }
    }

    unsafe fn map(&self, _request: MapRequest) -> *mut c_void {
        drop(self.count(Operation::Map));
        FAKE_MAPPING as *mut c_void
    }

    unsafe fn unmap(&self, _addr: *mut c_void, _len: usize) -> c_int {
        drop(self.count(Operation::Unmap));
        0
    }
}

/// A facade over a fresh `FakeHeap` with the given budget.
pub fn restrictor(threshold_bytes: usize) -> Restrictor<FakeHeap> {
    restrictor_over(FakeHeap::new(), threshold_bytes)
}

pub fn restrictor_over(heap: FakeHeap, threshold_bytes: usize) -> Restrictor<FakeHeap> {
    Restrictor::with_config(
        heap,
        RestrictConfig {
            threshold_bytes,
            debug: false,
        },
    )
}

/// Ledger total and block count, read under the ledger lock.
pub fn books<A>(restrictor: &Restrictor<A>) -> (usize, usize) {
    restrictor.with_ledger(|ledger| (ledger.total_live(), ledger.live_blocks()))
}

/// Sum of record sizes, for checking it against `total_live`.
pub fn record_sum<A>(restrictor: &Restrictor<A>) -> usize {
    restrictor.with_ledger(|ledger| ledger.records().map(|r| r.size).sum())
}
