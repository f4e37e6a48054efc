//! Hashing and equality over descriptor-typed memory.
//!
//! Map types pick a specialized hasher per key kind at registration; the
//! generic [`type_hash`] / [`type_equal`] walk composite layouts with a single
//! kind switch. String keys hash through [`str_hasher`] on every path, which
//! keeps the fast string lookups in agreement with the generic ones.

use std::hash::{BuildHasher, Hasher};

use ahash::RandomState;

use super::{fatal, rand_u64};
use crate::abi::{Complex64, Complex128, Kind, PTR_SIZE, Type, Typed};
use crate::eface::Eface;
use crate::error::Error;
use crate::string::StrHeader;

const SEED_K1: u64 = 0x243f_6a88_85a3_08d3;
const SEED_K2: u64 = 0x1319_8a2e_0370_7344;
const SEED_K3: u64 = 0xa409_3822_299f_31d0;

/// Hashes `len` bytes at `p`.
///
/// # Safety
///
/// `p` must be valid for reads of `len` bytes (any pointer when `len == 0`).
pub unsafe fn mem_hash(p: *const u8, len: usize, seed: u64) -> u64 {
    let bytes: &[u8] = if len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(p, len) }
    };
    let mut hasher = RandomState::with_seeds(seed, SEED_K1, SEED_K2, SEED_K3).build_hasher();
    hasher.write(bytes);
    hasher.finish()
}

fn word_hash(word: u64, width: usize, seed: u64) -> u64 {
    let bytes = word.to_ne_bytes();
    unsafe { mem_hash(bytes.as_ptr(), width, seed) }
}

fn f32_hash(f: f32, seed: u64) -> u64 {
    if f == 0.0 {
        // +0 and -0 compare equal, so they must hash equal.
        word_hash(0, 4, seed)
    } else if f.is_nan() {
        // NaN keys never match, so each gets a fresh hash.
        word_hash(rand_u64(), 8, seed)
    } else {
        word_hash(f.to_bits() as u64, 4, seed)
    }
}

fn f64_hash(f: f64, seed: u64) -> u64 {
    if f == 0.0 {
        word_hash(0, 8, seed)
    } else if f.is_nan() {
        word_hash(rand_u64(), 8, seed)
    } else {
        word_hash(f.to_bits(), 8, seed)
    }
}

/// # Safety
/// `p` must point to a value of type `T`.
pub unsafe fn mem_hasher<T: Copy>(p: *const u8, seed: u64) -> u64 {
    unsafe { mem_hash(p, std::mem::size_of::<T>(), seed) }
}

/// # Safety
/// `p` must point to an `f32`.
pub unsafe fn f32_hasher(p: *const u8, seed: u64) -> u64 {
    f32_hash(unsafe { *(p as *const f32) }, seed)
}

/// # Safety
/// `p` must point to an `f64`.
pub unsafe fn f64_hasher(p: *const u8, seed: u64) -> u64 {
    f64_hash(unsafe { *(p as *const f64) }, seed)
}

/// # Safety
/// `p` must point to a [`Complex64`].
pub unsafe fn c64_hasher(p: *const u8, seed: u64) -> u64 {
    let c = unsafe { *(p as *const Complex64) };
    f32_hash(c.im, f32_hash(c.re, seed))
}

/// # Safety
/// `p` must point to a [`Complex128`].
pub unsafe fn c128_hasher(p: *const u8, seed: u64) -> u64 {
    let c = unsafe { *(p as *const Complex128) };
    f64_hash(c.im, f64_hash(c.re, seed))
}

/// # Safety
/// `p` must point to a [`StrHeader`] whose bytes are readable.
pub unsafe fn str_hasher(p: *const u8, seed: u64) -> u64 {
    let s = unsafe { *(p as *const StrHeader) };
    unsafe { mem_hash(s.ptr, s.len, seed) }
}

/// # Safety
/// `p` must point to an [`Eface`].
pub unsafe fn eface_hasher(p: *const u8, seed: u64) -> u64 {
    unsafe { eface_hash(&*(p as *const Eface), seed) }
}

/// # Safety
/// `p` must point to a value of type `T`.
pub unsafe fn typed_hasher<T: Typed>(p: *const u8, seed: u64) -> u64 {
    unsafe { type_hash(T::descriptor(), p, seed) }
}

unsafe fn eface_hash(e: &Eface, seed: u64) -> u64 {
    let Some(t) = e.type_of() else {
        return seed;
    };
    if !t.is_comparable() {
        fatal(Error::Unhashable { name: t.name });
    }
    let seed = seed ^ t.hash as u64;
    if t.is_direct_iface() {
        word_hash(e.data as u64, PTR_SIZE, seed)
    } else {
        unsafe { type_hash(t, e.data, seed) }
    }
}

/// Hashes a value of type `t`.
///
/// # Safety
///
/// `p` must point to a valid value of type `t`.
pub unsafe fn type_hash(t: &Type, p: *const u8, seed: u64) -> u64 {
    if t.is_regular_memory() {
        return unsafe { mem_hash(p, t.size, seed) };
    }
    unsafe {
        match t.kind {
            Kind::Float32 => f32_hasher(p, seed),
            Kind::Float64 => f64_hasher(p, seed),
            Kind::Complex64 => c64_hasher(p, seed),
            Kind::Complex128 => c128_hasher(p, seed),
            Kind::String => str_hasher(p, seed),
            Kind::Interface => eface_hasher(p, seed),
            Kind::Array => match t.as_array_type() {
                Some(array) => (0..array.len).fold(seed, |h, i| {
                    type_hash(array.elem, p.add(i * array.elem.size), h)
                }),
                None => fatal(Error::Unhashable { name: t.name }),
            },
            Kind::Struct => match t.as_struct_type() {
                Some(st) => st.fields.iter().fold(seed, |h, field| {
                    type_hash(field.typ, p.add(field.offset), h)
                }),
                None => fatal(Error::Unhashable { name: t.name }),
            },
            _ => fatal(Error::Unhashable { name: t.name }),
        }
    }
}

/// # Safety
/// `a` and `b` must point to values of type `T`.
pub unsafe fn mem_equal<T: Copy>(a: *const u8, b: *const u8) -> bool {
    let n = std::mem::size_of::<T>();
    unsafe { std::slice::from_raw_parts(a, n) == std::slice::from_raw_parts(b, n) }
}

/// # Safety
/// `a` and `b` must point to `f32` values.
pub unsafe fn f32_equal(a: *const u8, b: *const u8) -> bool {
    unsafe { *(a as *const f32) == *(b as *const f32) }
}

/// # Safety
/// `a` and `b` must point to `f64` values.
pub unsafe fn f64_equal(a: *const u8, b: *const u8) -> bool {
    unsafe { *(a as *const f64) == *(b as *const f64) }
}

/// # Safety
/// `a` and `b` must point to [`Complex64`] values.
pub unsafe fn c64_equal(a: *const u8, b: *const u8) -> bool {
    unsafe { *(a as *const Complex64) == *(b as *const Complex64) }
}

/// # Safety
/// `a` and `b` must point to [`Complex128`] values.
pub unsafe fn c128_equal(a: *const u8, b: *const u8) -> bool {
    unsafe { *(a as *const Complex128) == *(b as *const Complex128) }
}

/// # Safety
/// `a` and `b` must point to [`StrHeader`] values with readable bytes.
pub unsafe fn str_equal(a: *const u8, b: *const u8) -> bool {
    let (x, y) = unsafe { (*(a as *const StrHeader), *(b as *const StrHeader)) };
    x.len == y.len && (x.ptr == y.ptr || unsafe { x.as_bytes() == y.as_bytes() })
}

/// # Safety
/// `a` and `b` must point to [`Eface`] values.
pub unsafe fn eface_equal(a: *const u8, b: *const u8) -> bool {
    let (x, y) = unsafe { (&*(a as *const Eface), &*(b as *const Eface)) };
    if x.typ != y.typ {
        return false;
    }
    let Some(t) = x.type_of() else {
        return true;
    };
    if !t.is_comparable() {
        fatal(Error::Uncomparable { name: t.name });
    }
    if t.is_direct_iface() {
        x.data == y.data
    } else {
        unsafe { type_equal(t, x.data, y.data) }
    }
}

/// # Safety
/// `a` and `b` must point to values of type `T`.
pub unsafe fn typed_equal<T: Typed>(a: *const u8, b: *const u8) -> bool {
    unsafe { type_equal(T::descriptor(), a, b) }
}

/// Compares two values of type `t`.
///
/// # Safety
///
/// `a` and `b` must point to valid values of type `t`.
pub unsafe fn type_equal(t: &Type, a: *const u8, b: *const u8) -> bool {
    if t.is_regular_memory() {
        return unsafe {
            std::slice::from_raw_parts(a, t.size) == std::slice::from_raw_parts(b, t.size)
        };
    }
    unsafe {
        match t.kind {
            Kind::Float32 => f32_equal(a, b),
            Kind::Float64 => f64_equal(a, b),
            Kind::Complex64 => c64_equal(a, b),
            Kind::Complex128 => c128_equal(a, b),
            Kind::String => str_equal(a, b),
            Kind::Interface => eface_equal(a, b),
            Kind::Array => match t.as_array_type() {
                Some(array) => (0..array.len).all(|i| {
                    let off = i * array.elem.size;
                    type_equal(array.elem, a.add(off), b.add(off))
                }),
                None => fatal(Error::Uncomparable { name: t.name }),
            },
            Kind::Struct => match t.as_struct_type() {
                Some(st) => st.fields.iter().all(|field| {
                    type_equal(field.typ, a.add(field.offset), b.add(field.offset))
                }),
                None => fatal(Error::Uncomparable { name: t.name }),
            },
            _ => fatal(Error::Uncomparable { name: t.name }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::type_of;
    use crate::slice::Slice;

    fn hash_of<T: Typed>(value: &T, seed: u64) -> u64 {
        unsafe { type_hash(type_of::<T>(), value as *const T as *const u8, seed) }
    }

    fn equal<T: Typed>(a: &T, b: &T) -> bool {
        unsafe {
            type_equal(
                type_of::<T>(),
                a as *const T as *const u8,
                b as *const T as *const u8,
            )
        }
    }

    #[test]
    fn signed_zeroes_hash_and_compare_equal() {
        assert_eq!(hash_of(&0.0f64, 7), hash_of(&-0.0f64, 7));
        assert!(equal(&0.0f64, &-0.0f64));
        assert_eq!(hash_of(&0.0f32, 7), hash_of(&-0.0f32, 7));
    }

    #[test]
    fn nan_never_equals_itself() {
        assert!(!equal(&f64::NAN, &f64::NAN));
    }

    #[test]
    fn seed_changes_hash() {
        assert_ne!(hash_of(&42u64, 1), hash_of(&42u64, 2));
        assert_eq!(hash_of(&42u64, 1), hash_of(&42u64, 1));
    }

    #[test]
    fn string_hash_depends_on_contents_only() {
        let owned = String::from("hello");
        let a = StrHeader::view("hello");
        let b = StrHeader::view(&owned);
        assert_ne!(a.ptr, b.ptr);
        assert_eq!(hash_of(&a, 3), hash_of(&b, 3));
        assert!(equal(&a, &b));
        assert!(!equal(&a, &StrHeader::view("hellO")));
    }

    #[test]
    fn interface_hash_follows_dynamic_type() {
        let x = 10i64;
        let y = 10i64;
        let z = 10i32;
        let a = Eface::wrap(&x);
        let b = Eface::wrap(&y);
        let c = Eface::wrap(&z);
        assert_eq!(hash_of(&a, 9), hash_of(&b, 9));
        assert!(equal(&a, &b));
        assert!(!equal(&a, &c));
        assert!(equal(&Eface::NIL, &Eface::NIL));
    }

    #[test]
    #[should_panic(expected = "hash of unhashable type")]
    fn unhashable_interface_panics() {
        let s: Slice<u8> = Slice::empty();
        let e = Eface::wrap(&s);
        hash_of(&e, 0);
    }

    #[test]
    fn arrays_compare_elementwise() {
        assert!(equal(&[1.0f32, 0.0], &[1.0f32, -0.0]));
        assert!(!equal(&[1.0f32, 2.0], &[1.0f32, 3.0]));
        assert_eq!(hash_of(&[1.0f32, 0.0], 5), hash_of(&[1.0f32, -0.0], 5));
    }
}
