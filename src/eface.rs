//! Dynamic values: a type descriptor paired with a data word.

use std::fmt;

use crate::abi::{Type, Typed};
use crate::error::{Error, Result};
use crate::runtime::mem;

/// `{ type, data }`.
///
/// For pointer-shaped types (see [`Type::is_direct_iface`]) `data` is the
/// value itself; otherwise it points at the value. An `Eface` on its own owns
/// nothing. Interface slots inside maps and slices own their box: storing a
/// dynamic value there copies the box, and removing it frees the copy. Only
/// the box is copied; whatever the boxed value points to stays borrowed.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Eface {
    pub typ: *const Type,
    pub data: *mut u8,
}

impl Eface {
    pub const NIL: Eface = Eface {
        typ: std::ptr::null(),
        data: std::ptr::null_mut(),
    };

    /// Borrows `value`. The result is only valid while `value` is.
    pub fn wrap<T: Typed>(value: &T) -> Eface {
        let t = T::descriptor();
        let data = if t.is_direct_iface() {
            unsafe { *(value as *const T as *const *mut u8) }
        } else {
            value as *const T as *mut u8
        };
        Eface { typ: t, data }
    }

    /// Moves `value` into a fresh heap box that the caller must keep alive
    /// (and may release with [`Eface::release_box`]).
    pub fn boxed<T: Typed>(value: T) -> Eface {
        let t = T::descriptor();
        if t.is_direct_iface() {
            return Eface::wrap(&value);
        }
        let data = mem::new_object(t);
        unsafe { mem::typed_memmove(t, data, &value as *const T as *const u8) };
        Eface { typ: t, data }
    }

    /// Builds a dynamic value from a pointer to a `t` value.
    ///
    /// # Safety
    /// `value` must point to a valid `t`.
    pub unsafe fn from_value_ptr(t: &'static Type, value: *const u8) -> Eface {
        let data = if t.is_direct_iface() {
            unsafe { *(value as *const *mut u8) }
        } else {
            value as *mut u8
        };
        Eface { typ: t, data }
    }

    pub fn type_of(&self) -> Option<&'static Type> {
        unsafe { self.typ.as_ref() }
    }

    pub fn is_nil(&self) -> bool {
        self.typ.is_null()
    }

    /// Address of the value: the data word itself for direct types.
    pub fn data_ptr(&self) -> *const u8 {
        match self.type_of() {
            Some(t) if t.is_direct_iface() => &self.data as *const *mut u8 as *const u8,
            _ => self.data,
        }
    }

    /// Copies the value out, failing unless the dynamic type is exactly `T`.
    pub fn unwrap<T: Typed>(&self) -> Result<T> {
        let expected = T::descriptor();
        match self.type_of() {
            Some(t) if std::ptr::eq(t, expected) => {
                Ok(unsafe { (self.data_ptr() as *const T).read() })
            }
            actual => Err(Error::TypeMismatch {
                expected: expected.name,
                actual: actual.map(|t| t.name).unwrap_or("nil"),
            }),
        }
    }

    /// Frees a box made by [`Eface::boxed`].
    ///
    /// # Safety
    /// `self` must come from [`Eface::boxed`] and no copy of it may be used again.
    pub unsafe fn release_box(self) {
        match self.type_of() {
            Some(t) if !t.is_direct_iface() => unsafe { mem::free_object(t, self.data) },
            _ => {}
        }
    }
}

/// Replaces the box of the dynamic value at `p` with a fresh copy that the
/// slot owns. Nil and direct values carry no box and are left alone.
///
/// # Safety
/// `p` must point to a valid `Eface` whose box (if any) is live.
pub(crate) unsafe fn copy_payload(p: *mut u8) {
    let e = unsafe { &mut *(p as *mut Eface) };
    let Some(t) = e.type_of() else {
        return;
    };
    if t.is_direct_iface() {
        return;
    }
    let fresh = mem::new_object(t);
    unsafe { mem::typed_memmove(t, fresh, e.data) };
    e.data = fresh;
}

/// Frees the box a slot took with [`copy_payload`] and sets the slot to nil.
///
/// # Safety
/// `p` must point to a valid `Eface` that owns its box, and no copy of that
/// box may be used again.
pub(crate) unsafe fn release_payload(p: *mut u8) {
    let e = unsafe { &mut *(p as *mut Eface) };
    unsafe { e.release_box() };
    *e = Eface::NIL;
}

impl fmt::Debug for Eface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eface")
            .field("type", &self.type_of().map(|t| t.name).unwrap_or("nil"))
            .field("data", &self.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::abi::type_of;
    use crate::string::StrHeader;

    #[test]
    fn wrap_borrows_indirect_values() {
        let value = 42i64;
        let e = Eface::wrap(&value);
        assert_eq!(e.type_of(), Some(type_of::<i64>()));
        assert_eq!(e.data as *const i64, &value as *const i64);
        assert_eq!(e.unwrap::<i64>(), Ok(42));
    }

    #[test]
    fn pointers_travel_in_the_data_word() {
        let target = 7u32;
        let p: *const u32 = &target;
        let e = Eface::wrap(&p);
        assert_eq!(e.data as *const u32, p);
        assert_eq!(e.unwrap::<*const u32>(), Ok(p));
    }

    #[test]
    fn unwrap_checks_type_identity() {
        let value = 1u32;
        let e = Eface::wrap(&value);
        assert_eq!(
            e.unwrap::<i32>(),
            Err(Error::TypeMismatch {
                expected: "int32",
                actual: "uint32",
            })
        );
        assert_eq!(
            Eface::NIL.unwrap::<u8>(),
            Err(Error::TypeMismatch {
                expected: "uint8",
                actual: "nil",
            })
        );
    }

    #[test]
    fn boxed_values_outlive_the_source() {
        let e = {
            let local = String::from("boxed");
            Eface::boxed(local.len() as u64)
        };
        assert_eq!(e.unwrap::<u64>(), Ok(5));
        unsafe { e.release_box() };
    }

    #[test]
    fn slots_own_a_copy_of_the_box() {
        let source = StrHeader::view("payload");
        let mut slot = Eface::wrap(&source);
        let slot_ptr = &mut slot as *mut Eface as *mut u8;
        unsafe {
            copy_payload(slot_ptr);
            assert_ne!(slot.data as *const StrHeader, &source as *const StrHeader);
            assert_eq!(slot.unwrap::<StrHeader>(), Ok(source));
            release_payload(slot_ptr);
        }
        assert_eq!(slot, Eface::NIL);

        let word = 0x10 as *const u8;
        let mut direct = Eface::wrap(&word);
        let before = direct;
        unsafe {
            copy_payload(&mut direct as *mut Eface as *mut u8);
            assert_eq!(direct, before);
            release_payload(&mut direct as *mut Eface as *mut u8);
        }
        assert!(direct.is_nil());
    }
}
