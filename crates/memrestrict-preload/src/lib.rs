//! memrestrict-preload: enforce a byte budget on an unmodified program.
//!
//! Built as a `cdylib`, this crate exports `malloc`, `calloc`, `realloc`,
//! `free`, `mmap` and `munmap`. Loaded with `LD_PRELOAD`, those symbols win
//! over libc's and route every call through one process-wide `Restrictor`
//! bound to the libc implementations found with `dlsym(RTLD_NEXT, ..)`.
//!
//! ```text
//! MR_THRESHOLD=1048576 MR_DEBUG=1 LD_PRELOAD=libmemrestrict_preload.so ./program
//! ```
//!
//! A request that would push live tracked bytes past `MR_THRESHOLD` fails
//! with `NULL` and `errno = ENOMEM`, as a genuinely exhausted heap would.

pub mod binder;
pub mod bootstrap;
pub mod env;
pub mod errno;
pub mod logging;

#[cfg(all(feature = "interpose", not(test)))]
mod exports;

use once_cell::sync::Lazy;

use memrestrict_mem::Restrictor;

pub use binder::LibcBinder;

static RESTRICTOR: Lazy<Restrictor<LibcBinder>> = Lazy::new(|| {
    Restrictor::new(LibcBinder::new())
        .config_source(env::secure_config)
        .on_config_loaded(logging::install)
});

/// The process-wide facade behind the exported symbols.
pub fn restrictor() -> &'static Restrictor<LibcBinder> {
    &RESTRICTOR
}
