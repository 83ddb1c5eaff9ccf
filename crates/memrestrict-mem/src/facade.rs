//! `Restrictor`: the budget-gated allocation API.
//!
//! One entry point per intercepted operation. Every tracked call follows the
//! same sequence: raise the reentrancy guard, make sure the real
//! implementation is bound, lock the ledger, ask the gate, delegate, apply
//! parked releases, record the outcome, unlock, then report the decision.
//! Calls that arrive while the guard is already raised come from our own
//! bookkeeping and go straight to the real allocator.

use std::ffi::{c_int, c_void};
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};

use once_cell::sync::OnceCell;

use memrestrict_core::config::RestrictConfig;
use memrestrict_core::error::{Error, Result};
use memrestrict_core::raw::{MapRequest, Operation, RawAllocator, MAP_FAILED};

use crate::event::{Event, Totals};
use crate::gate::BudgetGate;
use crate::guard::{self, ReentrancyGuard};
use crate::ledger::Ledger;
use crate::tracking::{EventCounter, PeakTracker, Stats};

/// A call's result and the event describing it, emitted after unlocking.
type Tracked<T> = (Result<T>, Event);

pub struct Restrictor<A> {
    raw: A,
    config: OnceCell<RestrictConfig>,
    load_config: fn() -> RestrictConfig,
    on_config: Option<fn(&RestrictConfig)>,
    ledger: Mutex<Ledger>,
    peak: PeakTracker,
    denied: EventCounter,
    dropped: EventCounter,
}

/// The locked ledger for the duration of one facade call.
///
/// Releases parked while it is held are applied by `settle`, before every
/// record and again on drop, both before the lock is released. It must be
/// dropped before the guard that was raised to take it.
struct Books<'a> {
    ledger: MutexGuard<'a, Ledger>,
    peak: &'a PeakTracker,
}

impl Books<'_> {
    /// Apply the releases parked since the lock was taken. A parked address
    /// may already have been handed out again by the real allocator, so this
    /// has to run before that address is recorded.
    fn settle(&mut self) {
        let ledger = &mut self.ledger;
        guard::drain_deferred(|address| {
            ledger.remove(address);
        });
    }

    fn totals(&self) -> Totals {
        Totals::of(&self.ledger)
    }
}

impl Deref for Books<'_> {
    type Target = Ledger;
    fn deref(&self) -> &Ledger {
        &self.ledger
    }
}

impl DerefMut for Books<'_> {
    fn deref_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }
}

impl Drop for Books<'_> {
    fn drop(&mut self) {
        self.settle();
        self.peak.record_used(self.ledger.total_live());
        guard::set_ledger_held(false);
    }
}

impl<A> Restrictor<A> {
    /// Facade over `raw`, configured from the environment on first use.
    pub fn new(raw: A) -> Self {
        Self {
            raw,
            config: OnceCell::new(),
            load_config: RestrictConfig::from_env,
            on_config: None,
            ledger: Mutex::new(Ledger::new()),
            peak: PeakTracker::new(),
            denied: EventCounter::new(),
            dropped: EventCounter::new(),
        }
    }

    /// Facade over `raw` with a fixed configuration.
    pub fn with_config(raw: A, config: RestrictConfig) -> Self {
        let restrictor = Self::new(raw);
        let _ = restrictor.config.set(config);
        restrictor
    }

    /// Replace the loader used on first use. No effect once loaded.
    pub fn config_source(mut self, load: fn() -> RestrictConfig) -> Self {
        self.load_config = load;
        self
    }

    /// Run `hook` once, right after the configuration is loaded.
    pub fn on_config_loaded(mut self, hook: fn(&RestrictConfig)) -> Self {
        self.on_config = Some(hook);
        self
    }

    pub fn raw(&self) -> &A {
        &self.raw
    }

    // Loading reads the environment and may run the hook, both of which
    // allocate: only call with the guard raised and the ledger unlocked.
    fn loaded_config(&self) -> &RestrictConfig {
        self.config.get_or_init(|| {
            let cfg = (self.load_config)();
            if let Some(hook) = self.on_config {
                hook(&cfg);
            }
            cfg
        })
    }

    fn books(&self) -> Books<'_> {
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        guard::set_ledger_held(true);
        Books {
            ledger,
            peak: &self.peak,
        }
    }

    /// The configuration snapshot, loading it if needed.
    pub fn config(&self) -> RestrictConfig {
        let _guard = ReentrancyGuard::enter();
        *self.loaded_config()
    }

    /// Point-in-time accounting snapshot.
    ///
    /// Must not be called from inside an allocation hook on a thread that
    /// already holds the ledger.
    pub fn stats(&self) -> Stats {
        let _guard = ReentrancyGuard::enter();
        let threshold_bytes = self.loaded_config().threshold_bytes;
        let books = self.books();
        Stats {
            threshold_bytes,
            live_bytes: books.total_live(),
            live_blocks: books.live_blocks(),
            peak_bytes: self.peak.peak().max(books.total_live()),
            denied_requests: self.denied.count(),
            dropped_releases: self.dropped.count(),
        }
    }

    /// Run `f` against the locked ledger.
    pub fn with_ledger<R>(&self, f: impl FnOnce(&Ledger) -> R) -> R {
        let _guard = ReentrancyGuard::enter();
        let books = self.books();
        f(&*books)
    }

    fn deny<T>(
        &self,
        ledger: &Ledger,
        op: Operation,
        requested: usize,
        threshold: usize,
    ) -> Tracked<T> {
        let denied = self.denied.record();
        let live = ledger.total_live();
        (
            Err(Error::BudgetExceeded {
                requested,
                live,
                threshold,
            }),
            Event::Denied {
                op,
                requested,
                live,
                threshold,
                denied,
            },
        )
    }
}

impl<A: RawAllocator> Restrictor<A> {
    /// Budget-gated `malloc`.
    ///
    /// # Safety
    /// Same contract as C `malloc`.
    pub unsafe fn allocate(&self, size: usize) -> Result<*mut c_void> {
        let Some(_guard) = ReentrancyGuard::enter() else {
            return Ok(self.raw.allocate(size));
        };
        let (result, event) = self.allocate_tracked(size);
        event.emit();
        result
    }

    unsafe fn allocate_tracked(&self, size: usize) -> Tracked<*mut c_void> {
        let op = Operation::Allocate;
        if let Err(e) = self.raw.bind(op) {
            return failed(op, e);
        }
        let threshold = self.loaded_config().threshold_bytes;

        let mut books = self.books();
        if !BudgetGate::new(&books, threshold).admit(size) {
            return self.deny(&books, op, size, threshold);
        }

        let ptr = self.raw.allocate(size);
        if let Err(e) = delegated(ptr, op, size) {
            return failed(op, e);
        }
        books.settle();
        let outcome = books.record_allocation(ptr as usize, size);
        let event = Event::Allocated {
            op,
            address: ptr as usize,
            size,
            outcome,
            totals: books.totals(),
        };
        (Ok(ptr), event)
    }

    /// Budget-gated `calloc`. `count * size` overflow is denied up front.
    ///
    /// # Safety
    /// Same contract as C `calloc`.
    pub unsafe fn zero_allocate(&self, count: usize, size: usize) -> Result<*mut c_void> {
        let Some(_guard) = ReentrancyGuard::enter() else {
            return Ok(self.raw.zero_allocate(count, size));
        };
        let (result, event) = self.zero_allocate_tracked(count, size);
        event.emit();
        result
    }

    unsafe fn zero_allocate_tracked(&self, count: usize, size: usize) -> Tracked<*mut c_void> {
        let op = Operation::ZeroAllocate;
        if let Err(e) = self.raw.bind(op) {
            return failed(op, e);
        }
        let Some(bytes) = count.checked_mul(size) else {
            return failed(op, Error::SizeOverflow { count, size });
        };
        let threshold = self.loaded_config().threshold_bytes;

        let mut books = self.books();
        if !BudgetGate::new(&books, threshold).admit(bytes) {
            return self.deny(&books, op, bytes, threshold);
        }

        let ptr = self.raw.zero_allocate(count, size);
        if let Err(e) = delegated(ptr, op, bytes) {
            return failed(op, e);
        }
        books.settle();
        let outcome = books.record_allocation(ptr as usize, bytes);
        let event = Event::Allocated {
            op,
            address: ptr as usize,
            size: bytes,
            outcome,
            totals: books.totals(),
        };
        (Ok(ptr), event)
    }

    /// Budget-gated `realloc`.
    ///
    /// A denied or failed resize leaves the original block untouched and
    /// still tracked, as C `realloc` does. `resize(ptr, 0)` releases `ptr`
    /// and may return null.
    ///
    /// # Safety
    /// Same contract as C `realloc`.
    pub unsafe fn resize(&self, ptr: *mut c_void, size: usize) -> Result<*mut c_void> {
        let Some(_guard) = ReentrancyGuard::enter() else {
            return Ok(self.raw.resize(ptr, size));
        };
        let (result, event) = self.resize_tracked(ptr, size);
        event.emit();
        result
    }

    unsafe fn resize_tracked(&self, ptr: *mut c_void, size: usize) -> Tracked<*mut c_void> {
        let op = Operation::Resize;
        if let Err(e) = self.raw.bind(op) {
            return failed(op, e);
        }
        let threshold = self.loaded_config().threshold_bytes;

        let address = ptr as usize;
        let mut books = self.books();
        if !BudgetGate::new(&books, threshold).admit_resize(address, size) {
            return self.deny(&books, op, size, threshold);
        }

        let moved = self.raw.resize(ptr, size);
        if let Err(e) = delegated(moved, op, size) {
            return failed(op, e);
        }
        books.settle();
        let outcome = books.record_resize(moved as usize, address, size);
        let event = Event::Resized {
            from: address,
            to: moved as usize,
            size,
            outcome,
            totals: books.totals(),
        };
        (Ok(moved), event)
    }

    /// `free`. Never refused, always accounted.
    ///
    /// # Safety
    /// Same contract as C `free`.
    pub unsafe fn release(&self, ptr: *mut c_void) {
        if ptr.is_null() {
            return;
        }
        let Some(_guard) = ReentrancyGuard::enter() else {
            self.release_nested(ptr);
            return;
        };

        let address = ptr as usize;
        let unbound = self.raw.bind(Operation::Release).err();
        let event = {
            let mut books = self.books();
            books.settle();
            let released = books.record_release(address);
            // An unbound free leaks the block; the ledger already let it go.
            if unbound.is_none() {
                self.raw.release(ptr);
            }
            Event::Released {
                address,
                released,
                totals: books.totals(),
            }
        };

        if let Some(error) = unbound {
            Event::Failed {
                op: Operation::Release,
                error,
            }
            .emit();
        }
        event.emit();
    }

    // A release from inside bookkeeping. Nothing here may log: it would
    // allocate and free again.
    unsafe fn release_nested(&self, ptr: *mut c_void) {
        let address = ptr as usize;
        if guard::ledger_held() {
            // No other thread can record this address until we unlock, and
            // the lock holder settles the parked address before then.
            self.raw.release(ptr);
            if !guard::defer_release(address) {
                self.dropped.record();
            }
            return;
        }
        // Forget the record before the block can be handed out again.
        let mut books = self.books();
        books.remove(address);
        self.raw.release(ptr);
    }

    /// Pass-through `mmap`. Never gated or tracked.
    ///
    /// # Safety
    /// Same contract as C `mmap`.
    pub unsafe fn map(&self, request: MapRequest) -> Result<*mut c_void> {
        let Some(_guard) = ReentrancyGuard::enter() else {
            return Ok(self.raw.map(request));
        };
        if let Err(error) = self.raw.bind(Operation::Map) {
            Event::Failed {
                op: Operation::Map,
                error: error.clone(),
            }
            .emit();
            return Err(error);
        }
        self.loaded_config();

        let addr = self.raw.map(request);
        let live = self.books().total_live();
        Event::Mapped {
            addr: addr as usize,
            len: request.len,
            prot: request.prot,
            flags: request.flags,
            fd: request.fd,
            offset: request.offset,
            failed: addr == MAP_FAILED,
            live,
        }
        .emit();
        Ok(addr)
    }

    /// Pass-through `munmap`. Never gated or tracked.
    ///
    /// # Safety
    /// Same contract as C `munmap`.
    pub unsafe fn unmap(&self, addr: *mut c_void, len: usize) -> Result<c_int> {
        let Some(_guard) = ReentrancyGuard::enter() else {
            return Ok(self.raw.unmap(addr, len));
        };
        if let Err(error) = self.raw.bind(Operation::Unmap) {
            Event::Failed {
                op: Operation::Unmap,
                error: error.clone(),
            }
            .emit();
            return Err(error);
        }
        self.loaded_config();

        let rc = self.raw.unmap(addr, len);
        let live = self.books().total_live();
        Event::Unmapped {
            addr: addr as usize,
            len,
            rc,
            live,
        }
        .emit();
        Ok(rc)
    }
}

fn failed<T>(op: Operation, error: Error) -> Tracked<T> {
    (Err(error.clone()), Event::Failed { op, error })
}

/// Map a null result from the real allocator to `Exhausted`. Zero-byte
/// requests may legitimately come back null.
fn delegated(ptr: *mut c_void, op: Operation, bytes: usize) -> Result<*mut c_void> {
    if ptr.is_null() && bytes != 0 {
        return Err(Error::Exhausted { op, bytes });
    }
    Ok(ptr)
}
