//! The interposed C allocation API.
//!
//! Every failure the facade reports becomes `errno = ENOMEM` plus the
//! function's usual failure value.

use std::ffi::{c_int, c_void};
use std::ptr;

use libc::{off_t, size_t};

use memrestrict_core::raw::{MapRequest, MAP_FAILED};

use crate::errno::or_enomem;
use crate::restrictor;

#[no_mangle]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    or_enomem(restrictor().allocate(size), ptr::null_mut())
}

#[no_mangle]
pub unsafe extern "C" fn calloc(nmemb: size_t, size: size_t) -> *mut c_void {
    or_enomem(restrictor().zero_allocate(nmemb, size), ptr::null_mut())
}

#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    or_enomem(restrictor().resize(ptr, size), ptr::null_mut())
}

#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    restrictor().release(ptr)
}

#[no_mangle]
pub unsafe extern "C" fn mmap(
    addr: *mut c_void,
    len: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> *mut c_void {
    let request = MapRequest {
        addr,
        len,
        prot,
        flags,
        fd,
        offset: offset as i64,
    };
    or_enomem(restrictor().map(request), MAP_FAILED)
}

#[no_mangle]
pub unsafe extern "C" fn munmap(addr: *mut c_void, len: size_t) -> c_int {
    or_enomem(restrictor().unmap(addr, len), -1)
}
