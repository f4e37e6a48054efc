//! C-callable boundary. Every handle is a raw address and the caller vouches
//! that each type handle matches its container; nothing is verified beyond
//! null checks on descriptors. Keys cross the boundary as string headers over
//! arbitrary bytes. A contract violation panics, which aborts the process at
//! this boundary.

use crate::abi::{MapType, Type};
use crate::error::Error;
use crate::maps::{self, Map};
use crate::runtime::fatal;
use crate::slice::{self, SliceHeader};
use crate::string::StrHeader;

unsafe fn descriptor<'a, T>(p: *const T) -> &'a T {
    match unsafe { p.as_ref() } {
        Some(t) => t,
        None => fatal(Error::Fatal("nil type descriptor")),
    }
}

/// Element address for `key`, or null.
///
/// # Safety
/// `m` must be null or a live map of `typ`; `key` must be readable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abiview_map_get(
    m: *const Map,
    typ: *const MapType,
    key: StrHeader,
) -> *mut u8 {
    unsafe { maps::str_get(m, descriptor(typ), key.as_bytes()) }
}

/// Copies `*value` into the slot for `key`, creating it when absent. The key
/// bytes are copied; the caller keeps ownership of its buffer.
///
/// # Safety
/// `m` must be a live map of `typ` and `value` must point to a `typ.elem`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abiview_map_set(
    m: *mut Map,
    typ: *const MapType,
    key: StrHeader,
    value: *const u8,
) {
    unsafe { maps::str_set(m, descriptor(typ), key.as_bytes(), value) }
}

/// # Safety
/// `m` must be null or a live map of `typ`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abiview_map_clone(m: *const Map, typ: *const MapType) -> *mut Map {
    unsafe { maps::clone(m, descriptor(typ)) }
}

/// # Safety
/// `m` must be null or a live map of `typ`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abiview_map_clear(m: *mut Map, typ: *const MapType) {
    unsafe { maps::clear(m, descriptor(typ)) }
}

/// # Safety
/// `m` must be null or a live map.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abiview_map_len(m: *const Map) -> u64 {
    unsafe { maps::len(m) }
}

/// # Safety
/// `m` must be null or a map of `typ` made by this crate, unused afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abiview_map_release(m: *mut Map, typ: *const MapType) {
    unsafe { maps::release(m, descriptor(typ)) }
}

/// A new heap-allocated header over an exact-length copy of `*s`.
///
/// # Safety
/// `s` must point to a valid slice of `elem` values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abiview_slice_clone(
    s: *const SliceHeader,
    elem: *const Type,
) -> *mut SliceHeader {
    let Some(src) = (unsafe { s.as_ref() }) else {
        fatal(Error::Fatal("nil slice handle"));
    };
    let cloned = unsafe { slice::clone(src, descriptor(elem)) };
    Box::into_raw(Box::new(cloned))
}

/// Frees a header from [`abiview_slice_clone`] and its buffer.
///
/// # Safety
/// `s` must be null or come from [`abiview_slice_clone`], unused afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abiview_slice_release(s: *mut SliceHeader, elem: *const Type) {
    if s.is_null() {
        return;
    }
    let mut header = unsafe { Box::from_raw(s) };
    unsafe { slice::release(&mut header, descriptor(elem)) };
}
