//! Environment access for the preloaded library.

use std::ffi::{CStr, CString};

use memrestrict_core::config::RestrictConfig;

/// Configuration loader for the preloaded library.
///
/// Goes through `secure_getenv` so set-user-ID programs ignore the variables.
pub fn secure_config() -> RestrictConfig {
    RestrictConfig::from_lookup(secure_var)
}

// The `libc` crate does not bind glibc's `secure_getenv` on Linux.
extern "C" {
    fn secure_getenv(name: *const libc::c_char) -> *mut libc::c_char;
}

fn secure_var(key: &str) -> Option<String> {
    let key = CString::new(key).ok()?;
    // SAFETY: `key` is NUL-terminated; the returned pointer is only read
    // before any further environment access on this thread.
    unsafe {
        let value = secure_getenv(key.as_ptr());
        if value.is_null() {
            return None;
        }
        Some(CStr::from_ptr(value).to_string_lossy().into_owned())
    }
}
