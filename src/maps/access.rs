//! Type-erased map accessors: every function takes the map header and the
//! map's descriptor and trusts that the two belong together.

use super::group::own_elem;
use super::map::{Map, MapStats};
use crate::abi::{Kind, MapType, Type};
use crate::eface::Eface;
use crate::error::Error;
use crate::runtime::{fatal, mem};

/// Allocates an empty map sized for `hint` entries.
pub fn make_map(typ: &MapType, hint: u64) -> *mut Map {
    Box::into_raw(Map::new(typ, hint))
}

/// Element address for the key at `key`, or null when absent. A nil map
/// holds nothing.
///
/// # Safety
/// `m` must be null or a live map of `typ`; `key` must point to a `typ.key`.
pub unsafe fn get(m: *const Map, typ: &MapType, key: *const u8) -> *mut u8 {
    unsafe { get_checked(m, typ, key) }.0
}

/// Like [`get`], also reporting whether the key was found.
///
/// # Safety
/// As [`get`].
pub unsafe fn get_checked(m: *const Map, typ: &MapType, key: *const u8) -> (*mut u8, bool) {
    let Some(m) = (unsafe { m.as_ref() }) else {
        return (std::ptr::null_mut(), false);
    };
    match unsafe { m.get_with_key(typ, &super::key::ErasedKey(key)) } {
        Some((_, elem)) => (elem, true),
        None => (std::ptr::null_mut(), false),
    }
}

/// Returns the element slot for `key`, inserting the key with a zero element
/// when absent. A new key is copied into the map, including the bytes of a
/// string key and the box of an interface key. Assigning into a nil map
/// aborts.
///
/// Interface elements written through the slot belong to the map, which frees
/// their box when the entry goes away: store either a direct value or a box
/// from this crate's heap, such as one made by [`crate::eface::Eface::boxed`].
///
/// # Safety
/// As [`get`]. The returned slot is valid until the next mutation.
pub unsafe fn assign(m: *mut Map, typ: &MapType, key: *const u8) -> *mut u8 {
    let Some(m) = (unsafe { m.as_mut() }) else {
        fatal(Error::NilMap);
    };
    unsafe { m.put_slot(typ, &super::key::ErasedKey(key)) }
}

/// Copies the element at `value` into the slot for `key`. An interface
/// element gets its own copy of the box and the one it replaces is freed.
///
/// # Safety
/// As [`get`], and `value` must point to a `typ.elem`.
pub unsafe fn set(m: *mut Map, typ: &MapType, key: *const u8, value: *const u8) {
    unsafe { store_elem(typ, assign(m, typ, key), value) }
}

unsafe fn store_elem(typ: &MapType, slot: *mut u8, value: *const u8) {
    if !typ.elem_owns_data() {
        unsafe { mem::typed_memmove(typ.elem, slot, value) };
        return;
    }
    // The old box goes last: `value` may hold a copy of it.
    unsafe {
        let old = *(slot as *const Eface);
        mem::typed_memmove(typ.elem, slot, value);
        own_elem(typ, slot);
        old.release_box();
    }
}

/// Removes `key`, returning whether it was present.
///
/// # Safety
/// As [`get`].
pub unsafe fn delete(m: *mut Map, typ: &MapType, key: *const u8) -> bool {
    match unsafe { m.as_mut() } {
        Some(m) => unsafe { m.delete(typ, &super::key::ErasedKey(key)) },
        None => false,
    }
}

/// Deep copy; the clone of a nil map is nil.
///
/// # Safety
/// `m` must be null or a live map of `typ`.
pub unsafe fn clone(m: *const Map, typ: &MapType) -> *mut Map {
    match unsafe { m.as_ref() } {
        Some(m) => Box::into_raw(unsafe { m.clone_map(typ) }),
        None => std::ptr::null_mut(),
    }
}

/// # Safety
/// `m` must be null or a live map of `typ`.
pub unsafe fn clear(m: *mut Map, typ: &MapType) {
    if let Some(m) = unsafe { m.as_mut() } {
        unsafe { m.clear(typ) };
    }
}

pub fn elem_type(typ: &MapType) -> &'static Type {
    typ.elem
}

/// # Safety
/// `m` must be null or a live map.
pub unsafe fn len(m: *const Map) -> u64 {
    unsafe { m.as_ref() }.map_or(0, Map::len)
}

/// # Safety
/// `m` must be null or a live map of `typ`.
pub unsafe fn stats(m: *const Map, typ: &MapType) -> MapStats {
    match unsafe { m.as_ref() } {
        Some(m) => unsafe { m.stats(typ) },
        None => MapStats::default(),
    }
}

/// Frees the map and everything it owns.
///
/// # Safety
/// `m` must be null or a map made by this crate, and unused afterwards.
pub unsafe fn release(m: *mut Map, typ: &MapType) {
    if !m.is_null() {
        unsafe { Box::from_raw(m).release(typ) };
    }
}

fn require_string_keys(typ: &MapType) {
    if typ.key.kind != Kind::String {
        fatal(Error::InvalidKind {
            expected: "map with string keys",
            actual: typ.key.kind,
        });
    }
}

/// Fast-path lookup by string key; null when absent. Keys are raw bytes and
/// need not be UTF-8.
///
/// # Safety
/// `m` must be null or a live map of `typ`.
pub unsafe fn str_get(m: *const Map, typ: &MapType, key: impl AsRef<[u8]>) -> *mut u8 {
    require_string_keys(typ);
    match unsafe { m.as_ref() } {
        Some(m) => unsafe { m.get_str(typ, key.as_ref()) }.unwrap_or(std::ptr::null_mut()),
        None => std::ptr::null_mut(),
    }
}

/// Fast-path slot lookup-or-insert. A new key is copied into memory the map
/// owns until the entry is deleted or the map cleared or released, so the
/// map never borrows `key`.
///
/// # Safety
/// `m` must be a live map of `typ`.
pub unsafe fn str_assign(m: *mut Map, typ: &MapType, key: impl AsRef<[u8]>) -> *mut u8 {
    require_string_keys(typ);
    let Some(m) = (unsafe { m.as_mut() }) else {
        fatal(Error::NilMap);
    };
    unsafe { m.put_str(typ, key.as_ref()) }
}

/// # Safety
/// `m` must be a live map of `typ` and `value` must point to a `typ.elem`.
pub unsafe fn str_set(m: *mut Map, typ: &MapType, key: impl AsRef<[u8]>, value: *const u8) {
    unsafe { store_elem(typ, str_assign(m, typ, key), value) }
}

/// # Safety
/// `m` must be null or a live map of `typ`.
pub unsafe fn str_delete(m: *mut Map, typ: &MapType, key: impl AsRef<[u8]>) -> bool {
    require_string_keys(typ);
    match unsafe { m.as_mut() } {
        Some(m) => unsafe { m.delete_str(typ, key.as_ref()) },
        None => false,
    }
}

/// Calls `f` with the key and element addresses of every entry.
///
/// # Safety
/// `m` must be null or a live map of `typ`; `f` must not mutate the map.
pub unsafe fn for_each(m: *const Map, typ: &MapType, f: impl FnMut(*mut u8, *mut u8)) {
    if let Some(m) = unsafe { m.as_ref() } {
        unsafe { m.for_each(typ, f) };
    }
}
