use std::fmt;

use crate::abi::{Kind, Type, Typed};
use crate::eface::Eface;
use crate::error::{Error, Result};
use crate::runtime::{fatal, mem};

/// Reflective handle: `{ type, ptr, flag }`.
///
/// With [`Flag::INDIR`] set, `ptr` points at the value; otherwise `ptr` is
/// the value (pointer-shaped types taken out of a dynamic value). Only
/// [`Flag::ADDR`] handles may be written through.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Value {
    typ: &'static Type,
    ptr: *mut u8,
    flag: Flag,
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flag: usize {
        const INDIR = 1 << 7;
        const ADDR = 1 << 8;
    }
}

impl Value {
    /// Read-only view of `value`.
    pub fn of<T: Typed>(value: &T) -> Value {
        Value {
            typ: T::descriptor(),
            ptr: value as *const T as *mut u8,
            flag: Flag::INDIR,
        }
    }

    /// Settable view of `value`.
    pub fn of_mut<T: Typed>(value: &mut T) -> Value {
        Value {
            typ: T::descriptor(),
            ptr: value as *mut T as *mut u8,
            flag: Flag::INDIR | Flag::ADDR,
        }
    }

    /// Settable view of the `typ` value stored at `ptr`.
    ///
    /// # Safety
    /// `ptr` must point to a valid `typ` that outlives the handle.
    pub unsafe fn at(typ: &'static Type, ptr: *mut u8) -> Value {
        Value {
            typ,
            ptr,
            flag: Flag::INDIR | Flag::ADDR,
        }
    }

    /// Read-only view of a dynamic value's contents. Fails on a nil value.
    pub fn from_eface(e: Eface) -> Result<Value> {
        let Some(typ) = e.type_of() else {
            return Err(Error::TypeMismatch {
                expected: "non-nil interface value",
                actual: "nil",
            });
        };
        let flag = if typ.is_direct_iface() {
            Flag::empty()
        } else {
            Flag::INDIR
        };
        Ok(Value {
            typ,
            ptr: e.data,
            flag,
        })
    }

    pub fn type_of(&self) -> &'static Type {
        self.typ
    }

    pub fn kind(&self) -> Kind {
        self.typ.kind
    }

    pub fn flag(&self) -> Flag {
        self.flag
    }

    pub fn can_set(&self) -> bool {
        self.flag.contains(Flag::ADDR)
    }

    /// Address of the value: `ptr` itself for indirect handles, the address
    /// of the `ptr` field otherwise.
    pub fn data_ptr(&self) -> *const u8 {
        if self.flag.contains(Flag::INDIR) {
            self.ptr
        } else {
            &self.ptr as *const *mut u8 as *const u8
        }
    }

    /// Writable address of the value; aborts on a read-only handle.
    pub(crate) fn data_mut(&self, op: &'static str) -> *mut u8 {
        if !self.can_set() {
            fatal(Error::Fatal(op));
        }
        self.ptr
    }

    /// Aborts unless the handle's kind is `kind`.
    pub(crate) fn must_be(&self, kind: Kind, expected: &'static str) {
        if self.kind() != kind {
            fatal(Error::InvalidKind {
                expected,
                actual: self.kind(),
            });
        }
    }

    /// The pointer word of a pointer-shaped value.
    ///
    /// # Safety
    /// The value must be live and pointer-shaped.
    pub(crate) unsafe fn pointer_word(&self) -> *mut u8 {
        unsafe { *(self.data_ptr() as *const *mut u8) }
    }

    /// Whether a pointer-shaped or slice value is nil.
    ///
    /// # Safety
    /// The value must be live.
    pub unsafe fn is_nil(&self) -> bool {
        match self.kind() {
            k if k.is_pointer_shaped() || k == Kind::Slice => {
                unsafe { self.pointer_word() }.is_null()
            }
            Kind::Interface => unsafe { (*(self.data_ptr() as *const Eface)).is_nil() },
            k => fatal(Error::InvalidKind {
                expected: "nillable kind",
                actual: k,
            }),
        }
    }

    /// Copies the value out as a `T`.
    ///
    /// # Safety
    /// The value must be live.
    pub unsafe fn get<T: Typed>(&self) -> Result<T> {
        self.check_type::<T>()?;
        Ok(unsafe { (self.data_ptr() as *const T).read() })
    }

    /// Stores `x`; aborts on a read-only handle.
    ///
    /// # Safety
    /// The value must be live.
    pub unsafe fn set<T: Typed>(&self, x: T) -> Result<()> {
        self.check_type::<T>()?;
        let dst = self.data_mut("reflect: set of unaddressable value");
        unsafe { mem::typed_memmove(self.typ, dst, &x as *const T as *const u8) };
        Ok(())
    }

    fn check_type<T: Typed>(&self) -> Result<()> {
        let expected = T::descriptor();
        if std::ptr::eq(expected, self.typ) {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                expected: expected.name,
                actual: self.typ.name,
            })
        }
    }

    /// The value as a dynamic value, borrowing its storage.
    pub fn to_eface(&self) -> Eface {
        unsafe { Eface::from_value_ptr(self.typ, self.data_ptr()) }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("type", &self.typ.name)
            .field("ptr", &self.ptr)
            .field("flag", &self.flag)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn get_and_set_through_a_settable_handle() {
        let mut x = 5i32;
        let v = Value::of_mut(&mut x);
        assert!(v.can_set());
        unsafe {
            assert_eq!(v.get::<i32>(), Ok(5));
            v.set(9i32).unwrap();
            assert_eq!(
                v.set(1u8),
                Err(Error::TypeMismatch {
                    expected: "uint8",
                    actual: "int32",
                })
            );
        }
        assert_eq!(x, 9);
    }

    #[test]
    #[should_panic(expected = "set of unaddressable value")]
    fn read_only_handles_reject_writes() {
        let x = 5i32;
        unsafe { Value::of(&x).set(1i32).unwrap() };
    }

    #[test]
    fn direct_values_from_interfaces() {
        let target = 3u64;
        let p: *const u64 = &target;
        let v = Value::from_eface(Eface::wrap(&p)).unwrap();
        assert_eq!(v.flag(), Flag::empty());
        unsafe {
            assert_eq!(v.get::<*const u64>(), Ok(p));
            assert!(!v.is_nil());
        }
        assert_eq!(v.to_eface(), Eface::wrap(&p));
        assert!(Value::from_eface(Eface::NIL).is_err());
    }
}
