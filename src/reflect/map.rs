use super::convert::{as_interface, convertible, store_converted};
use super::value::Value;
use crate::abi::{Kind, MapType, Type};
use crate::eface::Eface;
use crate::error::{Error, Result};
use crate::maps::{self, Map};
use crate::runtime::{fatal, mem};

fn map_type(t: &'static Type) -> &'static MapType {
    match t.as_map_type() {
        Some(mt) => mt,
        None => fatal(Error::InvalidKind {
            expected: "map",
            actual: t.kind,
        }),
    }
}

/// The map header and descriptor behind a map-kinded handle. The header is
/// null for a nil map.
///
/// # Safety
/// The value must be live.
pub unsafe fn map_from_reflective(v: &Value) -> (*mut Map, &'static MapType) {
    let mt = map_type(v.type_of());
    (unsafe { v.pointer_word() } as *mut Map, mt)
}

/// The map header and descriptor held by a dynamic value.
pub fn map_unpack(e: Eface) -> (*mut Map, &'static MapType) {
    let Some(t) = e.type_of() else {
        fatal(Error::InvalidKind {
            expected: "map",
            actual: Kind::Invalid,
        });
    };
    (e.data as *mut Map, map_type(t))
}

/// Stores a fresh empty map sized for `hint` entries into `v`. Whatever map
/// `v` held before is dropped from the handle, not freed.
///
/// # Safety
/// The value must be live.
pub unsafe fn init_map(v: &Value, hint: u64) {
    let mt = map_type(v.type_of());
    let target = v.data_mut("reflect: init of unaddressable map");
    let m = maps::make_map(mt, hint);
    unsafe { mem::typed_memmove(v.type_of(), target, &m as *const *mut Map as *const u8) };
}

/// Settable handle on the element slot for `key`, inserting the key when
/// absent. Aborts on a nil map or a map whose keys are not strings.
///
/// # Safety
/// The map must be live. The handle is valid until the next mutation.
pub unsafe fn assign_by_string_key(v: &Value, key: &str) -> Value {
    let (m, mt) = unsafe { map_from_reflective(v) };
    let slot = unsafe { maps::str_assign(m, mt, key) };
    unsafe { Value::at(mt.elem, slot) }
}

/// Calls `f` with a pointer to `key` as a value of the map's key type. A key
/// of exactly that type is passed in place and interface keys borrow the
/// value; anything else is converted into a scratch copy freed afterwards.
unsafe fn with_key<R>(mt: &MapType, key: &Value, f: impl FnOnce(*const u8) -> R) -> Result<R> {
    let key_type = mt.key;
    if std::ptr::eq(key.type_of(), key_type) {
        return Ok(f(key.data_ptr()));
    }
    if key_type.kind == Kind::Interface {
        let e = unsafe { as_interface(key) };
        return Ok(f(&e as *const Eface as *const u8));
    }
    if !convertible(key.type_of(), key_type) {
        return Err(Error::NotAssignable {
            from: key.type_of().name,
            to: key_type.name,
        });
    }
    let scratch = mem::new_object(key_type);
    let result = unsafe { store_converted(key_type, scratch, key) }.map(|()| f(scratch));
    unsafe { mem::free_object(key_type, scratch) };
    result
}

/// Settable handle on the element slot for `key`. A key of exactly the
/// declared key type is used in place; otherwise it is converted to the key
/// type first, failing with [`Error::NotAssignable`] when no conversion
/// exists. A new key is copied into the map. Aborts on a nil map.
///
/// Interface elements stored through the handle belong to the map; see
/// [`maps::assign`].
///
/// # Safety
/// The map and the key must be live. The handle is valid until the next
/// mutation.
pub unsafe fn assign_by_key(v: &Value, key: &Value) -> Result<Value> {
    let (m, mt) = unsafe { map_from_reflective(v) };
    if m.is_null() {
        fatal(Error::NilMap);
    }
    let slot = unsafe { with_key(mt, key, |k| maps::assign(m, mt, k)) }?;
    Ok(unsafe { Value::at(mt.elem, slot) })
}

/// Read-only handle on the element for `key`, or `None` when absent. Keys
/// are converted like [`assign_by_key`].
///
/// # Safety
/// The map and the key must be live.
pub unsafe fn lookup_by_key(v: &Value, key: &Value) -> Result<Option<Value>> {
    let (m, mt) = unsafe { map_from_reflective(v) };
    let slot = unsafe { with_key(mt, key, |k| maps::get(m, mt, k)) }?;
    Ok((!slot.is_null()).then(|| unsafe { Value::at(mt.elem, slot) }))
}
