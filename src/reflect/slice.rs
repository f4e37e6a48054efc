use tracing::trace;

use super::convert::as_interface;
use super::value::Value;
use crate::abi::{Kind, Type};
use crate::eface::Eface;
use crate::error::Error;
use crate::runtime::{fatal, mem};
use crate::slice::{self, SliceHeader};

fn elem_of(t: &'static Type) -> &'static Type {
    match t.as_slice_type() {
        Some(st) => st.elem,
        None => fatal(Error::InvalidKind {
            expected: "slice",
            actual: t.kind,
        }),
    }
}

fn check_bounds(len: isize, cap: isize) -> (usize, usize) {
    if len < 0 {
        fatal(Error::Fatal("makeslice: len out of range"));
    }
    if cap < 0 || len > cap {
        fatal(Error::Fatal("makeslice: cap out of range"));
    }
    (len as usize, cap as usize)
}

/// A zeroed slice of the slice type `typ`.
pub fn make_slice(typ: &'static Type, len: isize, cap: isize) -> SliceHeader {
    let elem = elem_of(typ);
    let (len, cap) = check_bounds(len, cap);
    slice::make(elem, len, cap)
}

/// Resizes the slice behind `v` to `len`, growing its buffer in place when
/// it holds fewer than `cap` elements. A nil slice gets a fresh buffer.
///
/// # Safety
/// The value must be live and its buffer owned by this crate's allocator.
pub unsafe fn init_slice(v: &Value, len: isize, cap: isize) {
    let elem = elem_of(v.type_of());
    let (len, cap) = check_bounds(len, cap);
    let target = v.data_mut("reflect: init of unaddressable slice");
    let header = unsafe { &mut *(target as *mut SliceHeader) };
    if header.is_nil() {
        *header = slice::make(elem, len, cap);
        return;
    }
    if cap > header.cap {
        let (ptr, grown) = unsafe { mem::grow_array(elem, header.ptr, header.cap, cap) };
        trace!(elem = elem.name, old_cap = header.cap, new_cap = grown, "grew slice");
        header.ptr = ptr;
        header.cap = grown;
    }
    header.len = len;
}

/// Stores `value` at `index` of the slice behind `v`. Interface elements
/// receive a dynamic value with its own box holding a copy of `value`, and
/// the box they held before is freed; other elements are copied byte for
/// byte and must have the element's size.
///
/// # Safety
/// Both values must be live.
pub unsafe fn set_slice_element_at(v: &Value, index: isize, value: &Value) {
    v.must_be(Kind::Slice, "slice");
    let elem = elem_of(v.type_of());
    let header = unsafe { *(v.data_ptr() as *const SliceHeader) };
    if index < 0 || index as usize >= header.len {
        fatal(Error::IndexOutOfRange {
            index,
            len: header.len,
        });
    }
    if elem.kind == Kind::Interface {
        let e = unsafe { as_interface(value) };
        unsafe { slice::set_at(&header, index, elem, Eface::wrap(&e)) };
    } else {
        unsafe { slice::set_at(&header, index, elem, value.to_eface()) };
    }
}
