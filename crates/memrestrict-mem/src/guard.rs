//! Per-thread reentrancy guard.
//!
//! The ledger allocates while it records, and when the facade is installed as
//! the process allocator those allocations come straight back into the facade.
//! While a thread holds a `ReentrancyGuard`, the facade passes its calls
//! through to the real allocator without gating or accounting them.
//!
//! Releases issued under the guard are still owed to the ledger. If this
//! thread holds the ledger lock they are parked in a fixed per-thread buffer
//! and applied before the next record and before the lock is let go.
//! Otherwise the ledger is locked and updated on the spot.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;

/// Parked releases per thread. Bookkeeping frees at most a handful of
/// blocks per operation.
pub const DEFERRED_CAPACITY: usize = 32;

struct Deferred {
    slots: [usize; DEFERRED_CAPACITY],
    len: usize,
}

thread_local! {
    static RAISED: Cell<bool> = const { Cell::new(false) };
    static LEDGER_HELD: Cell<bool> = const { Cell::new(false) };
    static DEFERRED: RefCell<Deferred> = const {
        RefCell::new(Deferred { slots: [0; DEFERRED_CAPACITY], len: 0 })
    };
}

/// RAII token proving the current thread is inside memrestrict bookkeeping.
///
/// Not `Send`: the flag it lowers on drop belongs to the thread that raised it.
pub struct ReentrancyGuard {
    _thread_bound: PhantomData<*const ()>,
}

impl ReentrancyGuard {
    /// Raise the guard, or return `None` if this thread already holds it.
    pub fn enter() -> Option<Self> {
        RAISED.with(|raised| {
            if raised.replace(true) {
                None
            } else {
                Some(Self {
                    _thread_bound: PhantomData,
                })
            }
        })
    }

    /// Whether the current thread is inside bookkeeping.
    pub fn is_raised() -> bool {
        RAISED.with(Cell::get)
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        RAISED.with(|raised| raised.set(false));
    }
}

/// Whether this thread currently holds a ledger lock.
pub fn ledger_held() -> bool {
    LEDGER_HELD.with(Cell::get)
}

pub(crate) fn set_ledger_held(held: bool) {
    LEDGER_HELD.with(|h| h.set(held));
}

/// Park a release observed while the guard was raised.
///
/// Returns `false` when the buffer is full and the release was dropped.
pub fn defer_release(address: usize) -> bool {
    DEFERRED.with(|deferred| {
        let Ok(mut deferred) = deferred.try_borrow_mut() else {
            return false;
        };
        if deferred.len == DEFERRED_CAPACITY {
            return false;
        }
        let len = deferred.len;
        deferred.slots[len] = address;
        deferred.len += 1;
        true
    })
}

/// Hand every parked release to `apply`, oldest first, and empty the buffer.
///
/// Releases parked by `apply` itself are picked up in the same call.
pub fn drain_deferred<F: FnMut(usize)>(mut apply: F) -> usize {
    let mut drained = 0;
    loop {
        let next = DEFERRED.with(|deferred| {
            let mut deferred = deferred.borrow_mut();
            if deferred.len == 0 {
                return None;
            }
            let address = deferred.slots[0];
            let len = deferred.len;
            deferred.slots.copy_within(1..len, 0);
            deferred.len -= 1;
            Some(address)
        });
        match next {
            Some(address) => {
                apply(address);
                drained += 1;
            }
            None => return drained,
        }
    }
}

/// Number of releases currently parked on this thread.
pub fn deferred_len() -> usize {
    DEFERRED.with(|deferred| deferred.borrow().len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_exclusive_per_thread() {
        let outer = ReentrancyGuard::enter().expect("first enter");
        assert!(ReentrancyGuard::is_raised());
        assert!(ReentrancyGuard::enter().is_none());
        drop(outer);
        assert!(!ReentrancyGuard::is_raised());
        assert!(ReentrancyGuard::enter().is_some());
    }

    #[test]
    fn guard_lowers_on_early_return() {
        fn bail() -> Option<()> {
            let _guard = ReentrancyGuard::enter()?;
            None
        }
        assert!(bail().is_none());
        assert!(!ReentrancyGuard::is_raised());
    }

    #[test]
    fn guard_is_thread_local() {
        let _guard = ReentrancyGuard::enter().expect("enter");
        let other = std::thread::spawn(|| ReentrancyGuard::enter().is_some())
            .join()
            .unwrap();
        assert!(other);
    }

    #[test]
    fn ledger_held_flag_is_thread_local() {
        assert!(!ledger_held());
        set_ledger_held(true);
        let other = std::thread::spawn(ledger_held).join().unwrap();
        assert!(ledger_held());
        assert!(!other);
        set_ledger_held(false);
    }

    #[test]
    fn deferred_releases_drain_in_order() {
        assert!(defer_release(0x10));
        assert!(defer_release(0x20));
        assert_eq!(deferred_len(), 2);

        let mut seen = Vec::new();
        assert_eq!(drain_deferred(|a| seen.push(a)), 2);
        assert_eq!(seen, vec![0x10, 0x20]);
        assert_eq!(deferred_len(), 0);
    }

    #[test]
    fn deferred_buffer_is_bounded() {
        for i in 0..DEFERRED_CAPACITY {
            assert!(defer_release(i + 1));
        }
        assert!(!defer_release(0xdead));
        assert_eq!(drain_deferred(|_| {}), DEFERRED_CAPACITY);
    }

    #[test]
    fn drain_picks_up_releases_parked_while_draining() {
        assert!(defer_release(1));
        let mut seen = Vec::new();
        drain_deferred(|a| {
            seen.push(a);
            if a == 1 {
                defer_release(2);
            }
        });
        assert_eq!(seen, vec![1, 2]);
    }
}
