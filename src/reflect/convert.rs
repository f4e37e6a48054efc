//! Assignability, value conversion and string formatting/parsing over
//! reflective handles.

use std::num::{IntErrorKind, ParseIntError};

use super::value::Value;
use crate::abi::{Complex64, Complex128, Kind, Type, Typed};
use crate::eface::{self, Eface};
use crate::error::{Error, Result};
use crate::runtime::{fatal, mem};
use crate::string::StrHeader;

/// A numeric value widened to its category.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(i64),
    Uint(u64),
    Float(f64),
    Complex(f64, f64),
}

impl Number {
    fn as_i64(self) -> i64 {
        match self {
            Number::Int(i) => i,
            Number::Uint(u) => u as i64,
            Number::Float(f) => f as i64,
            Number::Complex(re, _) => re as i64,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Uint(u) => u as f64,
            Number::Float(f) => f,
            Number::Complex(re, _) => re,
        }
    }
}

unsafe fn read_number(t: &Type, p: *const u8) -> Option<Number> {
    unsafe {
        Some(match t.kind {
            Kind::Int => Number::Int(*(p as *const isize) as i64),
            Kind::Int8 => Number::Int(*(p as *const i8) as i64),
            Kind::Int16 => Number::Int(*(p as *const i16) as i64),
            Kind::Int32 => Number::Int(*(p as *const i32) as i64),
            Kind::Int64 => Number::Int(*(p as *const i64)),
            Kind::Uint | Kind::Uintptr => Number::Uint(*(p as *const usize) as u64),
            Kind::Uint8 => Number::Uint(*(p as *const u8) as u64),
            Kind::Uint16 => Number::Uint(*(p as *const u16) as u64),
            Kind::Uint32 => Number::Uint(*(p as *const u32) as u64),
            Kind::Uint64 => Number::Uint(*(p as *const u64)),
            Kind::Float32 => Number::Float(*(p as *const f32) as f64),
            Kind::Float64 => Number::Float(*(p as *const f64)),
            Kind::Complex64 => {
                let c = *(p as *const Complex64);
                Number::Complex(c.re as f64, c.im as f64)
            }
            Kind::Complex128 => {
                let c = *(p as *const Complex128);
                Number::Complex(c.re, c.im)
            }
            _ => return None,
        })
    }
}

/// Stores `n` converted to `t`: integers wrap, floats truncate toward zero.
unsafe fn write_number(t: &Type, p: *mut u8, n: Number) {
    let i = n.as_i64();
    let u = match n {
        Number::Uint(u) => u,
        other => other.as_i64() as u64,
    };
    unsafe {
        match t.kind {
            Kind::Int => *(p as *mut isize) = i as isize,
            Kind::Int8 => *(p as *mut i8) = i as i8,
            Kind::Int16 => *(p as *mut i16) = i as i16,
            Kind::Int32 => *(p as *mut i32) = i as i32,
            Kind::Int64 => *(p as *mut i64) = i,
            Kind::Uint | Kind::Uintptr => *(p as *mut usize) = u as usize,
            Kind::Uint8 => *(p as *mut u8) = u as u8,
            Kind::Uint16 => *(p as *mut u16) = u as u16,
            Kind::Uint32 => *(p as *mut u32) = u as u32,
            Kind::Uint64 => *(p as *mut u64) = u,
            Kind::Float32 => *(p as *mut f32) = n.as_f64() as f32,
            Kind::Float64 => *(p as *mut f64) = n.as_f64(),
            Kind::Complex64 | Kind::Complex128 => {
                let (re, im) = match n {
                    Number::Complex(re, im) => (re, im),
                    other => (other.as_f64(), 0.0),
                };
                if t.kind == Kind::Complex64 {
                    *(p as *mut Complex64) = Complex64 {
                        re: re as f32,
                        im: im as f32,
                    };
                } else {
                    *(p as *mut Complex128) = Complex128 { re, im };
                }
            }
            kind => fatal(Error::InvalidKind {
                expected: "numeric",
                actual: kind,
            }),
        }
    }
}

fn is_real(kind: Kind) -> bool {
    kind.is_signed() || kind.is_unsigned() || kind.is_float()
}

/// Same layout and meaning: identical types, or composites whose parts are
/// identical (two structs declared with the same fields).
pub fn same_underlying(a: &Type, b: &Type) -> bool {
    if std::ptr::eq(a, b) {
        return true;
    }
    if a.kind != b.kind || a.size != b.size {
        return false;
    }
    match a.kind {
        Kind::Struct => match (a.as_struct_type(), b.as_struct_type()) {
            (Some(x), Some(y)) => {
                x.fields.len() == y.fields.len()
                    && x.fields.iter().zip(y.fields).all(|(f, g)| {
                        f.name == g.name && f.offset == g.offset && std::ptr::eq(f.typ, g.typ)
                    })
            }
            _ => false,
        },
        Kind::Array => match (a.as_array_type(), b.as_array_type()) {
            (Some(x), Some(y)) => x.len == y.len && std::ptr::eq(x.elem, y.elem),
            _ => false,
        },
        _ => false,
    }
}

/// A value of type `from` may be stored into a `to` as is.
pub fn assignable(from: &Type, to: &Type) -> bool {
    std::ptr::eq(from, to) || to.kind == Kind::Interface
}

/// A value of type `from` may be converted into a `to`.
pub fn convertible(from: &Type, to: &Type) -> bool {
    assignable(from, to)
        || same_underlying(from, to)
        || (is_real(from.kind) && is_real(to.kind))
        || (from.kind.is_complex() && to.kind.is_complex())
}

/// `src` as a dynamic value over its own storage. Interfaces are returned
/// as they are.
///
/// # Safety
/// `src` must be live; the result borrows it.
pub(crate) unsafe fn as_interface(src: &Value) -> Eface {
    if src.type_of().kind == Kind::Interface {
        return unsafe { *(src.data_ptr() as *const Eface) };
    }
    src.to_eface()
}

/// Stores `src` into the `to` value at `dst`, converting when needed.
/// Interface destinations receive a dynamic value with a box of their own,
/// which whoever owns `dst` frees (maps and slices do so themselves).
///
/// # Safety
/// `dst` must point to a valid `to` and `src` must be live.
pub(crate) unsafe fn store_converted(to: &'static Type, dst: *mut u8, src: &Value) -> Result<()> {
    let from = src.type_of();
    if to.kind == Kind::Interface {
        let e = unsafe { as_interface(src) };
        unsafe {
            mem::typed_memmove(to, dst, &e as *const Eface as *const u8);
            eface::copy_payload(dst);
        }
        return Ok(());
    }
    if std::ptr::eq(from, to) || same_underlying(from, to) {
        unsafe { mem::typed_memmove(to, dst, src.data_ptr()) };
        return Ok(());
    }
    if convertible(from, to) {
        if let Some(n) = unsafe { read_number(from, src.data_ptr()) } {
            unsafe { write_number(to, dst, n) };
            return Ok(());
        }
    }
    Err(Error::NotAssignable {
        from: from.name,
        to: to.name,
    })
}

/// Copies `src` into `dst`: a typed copy when the types match or share a
/// layout, a value conversion between numeric types. Anything else aborts.
///
/// # Safety
/// Both values must be live.
pub unsafe fn shallow_copy(dst: &Value, src: &Value) {
    let target = dst.data_mut("reflect: shallow copy into unaddressable value");
    if let Err(err) = unsafe { store_converted(dst.type_of(), target, src) } {
        fatal(err);
    }
}

/// # Safety
/// The value must be live.
pub unsafe fn set_zero(v: &Value) {
    let target = v.data_mut("reflect: zeroing an unaddressable value");
    unsafe { mem::typed_memclr(v.type_of(), target) };
}

/// Points a nil pointer at a freshly allocated zero value. Non-nil pointers
/// are left alone.
///
/// # Safety
/// The value must be live.
pub unsafe fn init_ptr(v: &Value) {
    v.must_be(Kind::Pointer, "pointer");
    let target = v.data_mut("reflect: init of unaddressable pointer");
    if !unsafe { v.pointer_word() }.is_null() {
        return;
    }
    let Some(ptr_type) = v.type_of().as_ptr_type() else {
        fatal(Error::Fatal("pointer descriptor without element type"));
    };
    let pointee = mem::new_object(ptr_type.elem());
    unsafe {
        mem::typed_memmove(v.type_of(), target, &pointee as *const *mut u8 as *const u8)
    };
}

fn int_error(input: &str, kind: Kind, err: ParseIntError) -> Error {
    match err.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => Error::OutOfRange {
            input: input.to_owned(),
            kind,
        },
        _ => Error::Parse {
            input: input.to_owned(),
            kind,
            reason: err.to_string(),
        },
    }
}

/// Writes `v` as a `T` when it fits.
unsafe fn narrow<S, T: TryFrom<S>>(p: *mut u8, v: S) -> bool {
    match T::try_from(v) {
        Ok(x) => {
            unsafe { (p as *mut T).write(x) };
            true
        }
        Err(_) => false,
    }
}

fn parse_bool(src: &str) -> Option<bool> {
    match src {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn explicit_infinity(src: &str) -> bool {
    src.trim_start_matches(['+', '-'])
        .to_ascii_lowercase()
        .starts_with("inf")
}

/// Parses `src` into the integer, float or bool destination `dst`.
/// Values that parse but do not fit the destination fail with
/// [`Error::OutOfRange`]; other destinations abort.
///
/// # Safety
/// The value must be live.
pub unsafe fn str_to_num_bool(dst: &Value, src: &str) -> Result<()> {
    let kind = dst.kind();
    if !is_real(kind) && kind != Kind::Bool {
        fatal(Error::InvalidKind {
            expected: "numeric or bool destination",
            actual: kind,
        });
    }
    let p = dst.data_mut("reflect: parse into unaddressable value");
    let out_of_range = || Error::OutOfRange {
        input: src.to_owned(),
        kind,
    };

    if kind.is_signed() {
        let i: i64 = src.parse().map_err(|e| int_error(src, kind, e))?;
        let fits = unsafe {
            match kind {
                Kind::Int => narrow::<i64, isize>(p, i),
                Kind::Int8 => narrow::<i64, i8>(p, i),
                Kind::Int16 => narrow::<i64, i16>(p, i),
                Kind::Int32 => narrow::<i64, i32>(p, i),
                _ => narrow::<i64, i64>(p, i),
            }
        };
        return if fits { Ok(()) } else { Err(out_of_range()) };
    }
    if kind.is_unsigned() {
        let u: u64 = src.parse().map_err(|e| int_error(src, kind, e))?;
        let fits = unsafe {
            match kind {
                Kind::Uint | Kind::Uintptr => narrow::<u64, usize>(p, u),
                Kind::Uint8 => narrow::<u64, u8>(p, u),
                Kind::Uint16 => narrow::<u64, u16>(p, u),
                Kind::Uint32 => narrow::<u64, u32>(p, u),
                _ => narrow::<u64, u64>(p, u),
            }
        };
        return if fits { Ok(()) } else { Err(out_of_range()) };
    }

    let parse_error = |reason: String| Error::Parse {
        input: src.to_owned(),
        kind,
        reason,
    };
    match kind {
        Kind::Float32 => {
            let f: f32 = src.parse().map_err(|e| parse_error(format!("{e}")))?;
            if f.is_infinite() && !explicit_infinity(src) {
                return Err(out_of_range());
            }
            unsafe { (p as *mut f32).write(f) };
        }
        Kind::Float64 => {
            let f: f64 = src.parse().map_err(|e| parse_error(format!("{e}")))?;
            if f.is_infinite() && !explicit_infinity(src) {
                return Err(out_of_range());
            }
            unsafe { (p as *mut f64).write(f) };
        }
        _ => {
            let b = parse_bool(src).ok_or_else(|| parse_error("invalid syntax".to_owned()))?;
            unsafe { (p as *mut bool).write(b) };
        }
    }
    Ok(())
}

/// Formats numbers, bools and strings by value; other kinds render as
/// `<type Value>`.
///
/// # Safety
/// The value must be live.
pub unsafe fn to_str(v: &Value) -> String {
    let p = v.data_ptr();
    unsafe {
        match v.kind() {
            Kind::Bool => (*(p as *const bool)).to_string(),
            Kind::Float32 => (*(p as *const f32)).to_string(),
            Kind::Float64 => (*(p as *const f64)).to_string(),
            Kind::Complex64 => {
                let c = *(p as *const Complex64);
                format!("({}{:+}i)", c.re, c.im)
            }
            Kind::Complex128 => {
                let c = *(p as *const Complex128);
                format!("({}{:+}i)", c.re, c.im)
            }
            Kind::String => (*(p as *const StrHeader)).to_string_lossy(),
            kind if is_real(kind) => match read_number(v.type_of(), p) {
                Some(Number::Int(i)) => i.to_string(),
                Some(Number::Uint(u)) => u.to_string(),
                _ => format!("<{} Value>", v.type_of().name),
            },
            _ => format!("<{} Value>", v.type_of().name),
        }
    }
}

/// Reads a number of any real kind as `T`, converting like [`shallow_copy`].
/// An interface result owns its box; free it with [`Eface::release_box`].
///
/// # Safety
/// The value must be live.
pub unsafe fn convert_to<T: Typed>(v: &Value) -> Result<T> {
    let mut out = std::mem::MaybeUninit::<T>::zeroed();
    unsafe {
        store_converted(T::descriptor(), out.as_mut_ptr() as *mut u8, v)?;
        Ok(out.assume_init())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::abi::type_of;

    #[test]
    fn parses_signed_with_range_checks() {
        let mut i32_dst = 0i32;
        let mut i16_dst = 0i16;
        let mut i64_dst = 0i64;
        unsafe {
            str_to_num_bool(&Value::of_mut(&mut i32_dst), "2147483647").unwrap();
            assert_eq!(i32_dst, i32::MAX);
            assert_eq!(
                str_to_num_bool(&Value::of_mut(&mut i32_dst), "2147483648"),
                Err(Error::OutOfRange {
                    input: "2147483648".into(),
                    kind: Kind::Int32,
                })
            );
            str_to_num_bool(&Value::of_mut(&mut i16_dst), "-32768").unwrap();
            assert_eq!(i16_dst, i16::MIN);
            str_to_num_bool(&Value::of_mut(&mut i64_dst), "9223372036854775807").unwrap();
            assert_eq!(i64_dst, i64::MAX);
            assert!(matches!(
                str_to_num_bool(&Value::of_mut(&mut i64_dst), "12x"),
                Err(Error::Parse { .. })
            ));
        }
    }

    #[test]
    fn parses_unsigned_floats_and_bools() {
        let mut u8_dst = 0u8;
        let mut u64_dst = 0u64;
        let mut f32_dst = 0f32;
        let mut f64_dst = 0f64;
        let mut b = false;
        unsafe {
            str_to_num_bool(&Value::of_mut(&mut u8_dst), "255").unwrap();
            assert_eq!(u8_dst, 255);
            assert!(matches!(
                str_to_num_bool(&Value::of_mut(&mut u8_dst), "256"),
                Err(Error::OutOfRange { .. })
            ));
            assert!(matches!(
                str_to_num_bool(&Value::of_mut(&mut u8_dst), "-1"),
                Err(Error::Parse { .. })
            ));
            str_to_num_bool(&Value::of_mut(&mut u64_dst), "18446744073709551615").unwrap();
            assert_eq!(u64_dst, u64::MAX);
            str_to_num_bool(&Value::of_mut(&mut f32_dst), "3.5").unwrap();
            assert_eq!(f32_dst, 3.5);
            str_to_num_bool(&Value::of_mut(&mut f64_dst), "2.718281828").unwrap();
            assert!((f64_dst - 2.718281828).abs() < 1e-12);
            assert!(str_to_num_bool(&Value::of_mut(&mut f64_dst), "abc").is_err());
            str_to_num_bool(&Value::of_mut(&mut b), "true").unwrap();
            assert!(b);
            str_to_num_bool(&Value::of_mut(&mut b), "F").unwrap();
            assert!(!b);
            assert!(str_to_num_bool(&Value::of_mut(&mut b), "yes").is_err());
        }
    }

    #[test]
    #[should_panic(expected = "expected numeric or bool destination, got string")]
    fn string_destination_aborts() {
        let mut s = StrHeader::empty();
        let _ = unsafe { str_to_num_bool(&Value::of_mut(&mut s), "123") };
    }

    #[test]
    fn formats_scalars() {
        unsafe {
            assert_eq!(to_str(&Value::of(&42isize)), "42");
            assert_eq!(to_str(&Value::of(&-8i8)), "-8");
            assert_eq!(to_str(&Value::of(&255u8)), "255");
            assert_eq!(to_str(&Value::of(&3.5f32)), "3.5");
            assert_eq!(to_str(&Value::of(&2.0f32)), "2");
            assert_eq!(to_str(&Value::of(&10.0f64)), "10");
            assert_eq!(to_str(&Value::of(&true)), "true");
            assert_eq!(to_str(&Value::of(&StrHeader::view("hi"))), "hi");
            assert_eq!(
                to_str(&Value::of(&Complex128 { re: 1.0, im: -2.0 })),
                "(1-2i)"
            );
            assert_eq!(to_str(&Value::of(&[1u8, 2])), "<[2]uint8 Value>");
        }
    }

    #[test]
    fn shallow_copy_converts_numbers() {
        let mut wide = 0i16;
        let mut narrow_dst = 0i32;
        let mut f = 0f64;
        unsafe {
            shallow_copy(&Value::of_mut(&mut wide), &Value::of(&-5i8));
            assert_eq!(wide, -5);
            shallow_copy(&Value::of_mut(&mut narrow_dst), &Value::of(&u32::MAX));
            assert_eq!(narrow_dst, -1);
            shallow_copy(&Value::of_mut(&mut f), &Value::of(&1.5f32));
            assert_eq!(f, 1.5);
        }
    }

    #[test]
    fn shallow_copy_into_an_interface_boxes() {
        let mut any = Eface::NIL;
        unsafe {
            shallow_copy(&Value::of_mut(&mut any), &Value::of(&77i64));
        }
        assert_eq!(any.unwrap::<i64>(), Ok(77));

        let source = any;
        let mut copy = Eface::NIL;
        unsafe {
            shallow_copy(&Value::of_mut(&mut copy), &Value::of(&source));
            assert_ne!(copy.data, source.data);
            assert_eq!(copy.unwrap::<i64>(), Ok(77));
            copy.release_box();
            any.release_box();
        }
    }

    #[test]
    #[should_panic(expected = "value of type string is not assignable to type int")]
    fn shallow_copy_rejects_unrelated_types() {
        let mut n = 0isize;
        unsafe { shallow_copy(&Value::of_mut(&mut n), &Value::of(&StrHeader::view("1"))) };
    }

    #[test]
    fn convertibility() {
        assert!(convertible(type_of::<u8>(), type_of::<f64>()));
        assert!(convertible(type_of::<Complex64>(), type_of::<Complex128>()));
        assert!(!convertible(type_of::<i32>(), type_of::<Complex64>()));
        assert!(!convertible(type_of::<StrHeader>(), type_of::<i32>()));
        assert!(assignable(type_of::<StrHeader>(), type_of::<Eface>()));
        assert_eq!(unsafe { convert_to::<u16>(&Value::of(&300i64)) }, Ok(300));
    }

    #[test]
    fn init_ptr_allocates_once() {
        let mut p: *mut u32 = std::ptr::null_mut();
        unsafe {
            init_ptr(&Value::of_mut(&mut p));
            assert!(!p.is_null());
            assert_eq!(*p, 0);
            *p = 4;
            let before = p;
            init_ptr(&Value::of_mut(&mut p));
            assert_eq!(p, before);

            let mut x = 12u64;
            set_zero(&Value::of_mut(&mut x));
            assert_eq!(x, 0);
        }
    }
}
