//! Translation of facade results to the C failure convention.

use memrestrict_core::error::Result;

pub fn set_enomem() {
    // SAFETY: errno is thread-local and always addressable.
    unsafe { *libc::__errno_location() = libc::ENOMEM };
}

/// `Ok` passes through with errno untouched; any `Err` sets `errno = ENOMEM`
/// and yields `failed`, the function's usual failure value.
pub fn or_enomem<T>(result: Result<T>, failed: T) -> T {
    result.unwrap_or_else(|_| {
        set_enomem();
        failed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use memrestrict_core::error::Error;
    use memrestrict_core::raw::{Operation, MAP_FAILED};
    use std::ffi::c_void;
    use std::ptr;

    fn errno() -> i32 {
        unsafe { *libc::__errno_location() }
    }

    fn clear_errno() {
        unsafe { *libc::__errno_location() = 0 };
    }

    #[test]
    fn denial_becomes_null_and_enomem() {
        clear_errno();
        let denied = Err(Error::BudgetExceeded {
            requested: 500,
            live: 600,
            threshold: 1000,
        });
        let p: *mut c_void = or_enomem(denied, ptr::null_mut());
        assert!(p.is_null());
        assert_eq!(errno(), libc::ENOMEM);
    }

    #[test]
    fn success_leaves_errno_alone() {
        clear_errno();
        let block = 0x1000 as *mut c_void;
        assert_eq!(or_enomem(Ok(block), ptr::null_mut()), block);
        assert_eq!(or_enomem(Ok(0), -1), 0);
        assert_eq!(errno(), 0);
    }

    #[test]
    fn mapping_failures_use_their_own_sentinels() {
        clear_errno();
        let unresolved = Err(Error::Unresolved(Operation::Map));
        assert_eq!(or_enomem(unresolved, MAP_FAILED), MAP_FAILED);
        assert_eq!(errno(), libc::ENOMEM);

        clear_errno();
        let unresolved = Err(Error::Unresolved(Operation::Unmap));
        assert_eq!(or_enomem(unresolved, -1), -1);
        assert_eq!(errno(), libc::ENOMEM);
    }

    #[test]
    fn errno_is_per_thread() {
        clear_errno();
        std::thread::spawn(set_enomem).join().unwrap();
        assert_eq!(errno(), 0);
    }
}
