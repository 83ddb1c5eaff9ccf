//! Decisions reported by the facade.
//!
//! An `Event` is built while the ledger is locked, carrying the totals as
//! they stood, and emitted after the lock is released. A subscriber that
//! takes its own locks (stderr, files) never runs under the ledger mutex.

use memrestrict_core::error::{Error, Result};
use memrestrict_core::raw::Operation;

use crate::ledger::{Ledger, Recorded, Resized};

/// Ledger totals at the time of the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub live: usize,
    pub blocks: usize,
}

impl Totals {
    pub fn of(ledger: &Ledger) -> Self {
        Self {
            live: ledger.total_live(),
            blocks: ledger.live_blocks(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Allocated {
        op: Operation,
        address: usize,
        size: usize,
        outcome: Recorded,
        totals: Totals,
    },
    Released {
        address: usize,
        released: Option<usize>,
        totals: Totals,
    },
    Resized {
        from: usize,
        to: usize,
        size: usize,
        outcome: Result<Resized>,
        totals: Totals,
    },
    Denied {
        op: Operation,
        requested: usize,
        live: usize,
        threshold: usize,
        denied: usize,
    },
    Failed {
        op: Operation,
        error: Error,
    },
    Mapped {
        addr: usize,
        len: usize,
        prot: i32,
        flags: i32,
        fd: i32,
        offset: i64,
        failed: bool,
        live: usize,
    },
    Unmapped {
        addr: usize,
        len: usize,
        rc: i32,
        live: usize,
    },
}

impl Event {
    /// Write the event to the current `tracing` subscriber.
    pub fn emit(&self) {
        match self {
            Event::Allocated {
                op,
                address,
                size,
                outcome,
                totals,
            } => {
                allocated(*op, *address, *size, *outcome);
                log_totals(totals);
            }
            Event::Released {
                address,
                released,
                totals,
            } => {
                released_block(*address, *released);
                log_totals(totals);
            }
            Event::Resized {
                from,
                to,
                size,
                outcome,
                totals,
            } => {
                resized(*from, *to, *size, outcome);
                log_totals(totals);
            }
            Event::Denied {
                op,
                requested,
                live,
                threshold,
                denied,
            } => {
                tracing::debug!(%op, requested, live, threshold, denied, "denied: budget exceeded");
            }
            Event::Failed { op, error } => match error {
                Error::Unresolved(_) => tracing::error!(%op, %error, "cannot delegate"),
                Error::SizeOverflow { count, size } => {
                    tracing::debug!(count, size, "calloc size overflow")
                }
                _ => tracing::debug!(%op, %error, "real allocator failed"),
            },
            Event::Mapped {
                addr,
                len,
                prot,
                flags,
                fd,
                offset,
                failed,
                live,
            } => {
                tracing::debug!(
                    addr = %format_args!("{addr:#x}"),
                    len,
                    prot,
                    flags,
                    fd,
                    offset,
                    failed,
                    live,
                    "mmap (untracked)"
                );
            }
            Event::Unmapped { addr, len, rc, live } => {
                tracing::debug!(
                    addr = %format_args!("{addr:#x}"),
                    len,
                    rc,
                    live,
                    "munmap (untracked)"
                );
            }
        }
    }
}

fn allocated(op: Operation, address: usize, size: usize, outcome: Recorded) {
    match outcome {
        Recorded::Inserted => {
            tracing::debug!(%op, address = %format_args!("{address:#x}"), size, "alloc");
        }
        Recorded::Replaced { previous } => {
            tracing::warn!(
                %op,
                address = %format_args!("{address:#x}"),
                previous,
                size,
                "allocation over a live unaccounted block"
            );
        }
        Recorded::Ignored => {
            tracing::trace!(%op, address = %format_args!("{address:#x}"), size, "untracked");
        }
    }
}

fn released_block(address: usize, released: Option<usize>) {
    match released {
        Some(size) => tracing::debug!(address = %format_args!("{address:#x}"), size, "free"),
        None => tracing::warn!(
            address = %format_args!("{address:#x}"),
            "freeing unaccounted allocation"
        ),
    }
}

fn resized(from: usize, to: usize, size: usize, outcome: &Result<Resized>) {
    match outcome {
        Ok(Resized::Allocated(recorded)) => allocated(Operation::Resize, to, size, *recorded),
        Ok(Resized::Released(released)) => released_block(from, *released),
        Ok(Resized::Moved { released, recorded }) => {
            tracing::debug!(
                from = %format_args!("{from:#x}"),
                to = %format_args!("{to:#x}"),
                size,
                "realloc moved block"
            );
            released_block(from, *released);
            allocated(Operation::Resize, to, size, *recorded);
        }
        Ok(Resized::InPlace { delta }) => {
            tracing::debug!(address = %format_args!("{from:#x}"), delta, "realloc in place");
        }
        Ok(Resized::Unaccounted) => {
            tracing::warn!(
                address = %format_args!("{from:#x}"),
                size,
                "resizing unaccounted pointer"
            );
        }
        Err(e) => tracing::error!(%e, "ledger left unchanged"),
    }
}

fn log_totals(totals: &Totals) {
    tracing::trace!(total = totals.live, blocks = totals.blocks, "ledger");
}
