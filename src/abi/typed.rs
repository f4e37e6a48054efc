use super::descriptor::{MapType, PTR_SIZE, PtrType, SliceType, Type};
use super::kind::{Kind, TFlag};
use super::registry;
use crate::eface::Eface;
use crate::maps::MapRef;
use crate::runtime::alg;
use crate::slice::Slice;
use crate::string::StrHeader;

/// Rust types with a registered runtime descriptor.
///
/// # Safety
///
/// `descriptor()` must describe the implementing type exactly: size,
/// alignment, kind and pointer layout. The accessor layer copies values as raw
/// bytes based on it.
pub unsafe trait Typed: Copy + 'static {
    fn descriptor() -> &'static Type;
}

pub fn type_of<T: Typed>() -> &'static Type {
    T::descriptor()
}

pub fn map_type_of<K: Typed, V: Typed>() -> &'static MapType {
    registry::map_type::<K, V>()
}

pub fn slice_type_of<T: Typed>() -> &'static SliceType {
    registry::slice_type::<T>()
}

pub fn ptr_type_of<T: Typed>() -> &'static PtrType {
    registry::ptr_type::<T>()
}

macro_rules! regular_scalars {
    ($($t:ty => $kind:ident),* $(,)?) => {
        $(
            unsafe impl Typed for $t {
                fn descriptor() -> &'static Type {
                    registry::scalar::<$t>(
                        Kind::$kind,
                        TFlag::REGULAR_MEMORY,
                        0,
                        Some(alg::mem_equal::<$t>),
                    )
                }
            }
        )*
    };
}

regular_scalars! {
    bool => Bool,
    isize => Int,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    usize => Uint,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
}

unsafe impl Typed for f32 {
    fn descriptor() -> &'static Type {
        registry::scalar::<f32>(Kind::Float32, TFlag::empty(), 0, Some(alg::f32_equal))
    }
}

unsafe impl Typed for f64 {
    fn descriptor() -> &'static Type {
        registry::scalar::<f64>(Kind::Float64, TFlag::empty(), 0, Some(alg::f64_equal))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex64 {
    pub re: f32,
    pub im: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex128 {
    pub re: f64,
    pub im: f64,
}

unsafe impl Typed for Complex64 {
    fn descriptor() -> &'static Type {
        registry::scalar::<Complex64>(Kind::Complex64, TFlag::empty(), 0, Some(alg::c64_equal))
    }
}

unsafe impl Typed for Complex128 {
    fn descriptor() -> &'static Type {
        registry::scalar::<Complex128>(
            Kind::Complex128,
            TFlag::empty(),
            0,
            Some(alg::c128_equal),
        )
    }
}

/// An untyped pointer, kind `unsafe.Pointer`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsafePointer(pub *mut u8);

unsafe impl Typed for UnsafePointer {
    fn descriptor() -> &'static Type {
        registry::scalar::<UnsafePointer>(
            Kind::UnsafePointer,
            TFlag::REGULAR_MEMORY | TFlag::DIRECT_IFACE,
            PTR_SIZE,
            Some(alg::mem_equal::<UnsafePointer>),
        )
    }
}

unsafe impl Typed for StrHeader {
    fn descriptor() -> &'static Type {
        registry::scalar::<StrHeader>(Kind::String, TFlag::empty(), PTR_SIZE, Some(alg::str_equal))
    }
}

unsafe impl Typed for Eface {
    fn descriptor() -> &'static Type {
        registry::scalar::<Eface>(
            Kind::Interface,
            TFlag::empty(),
            2 * PTR_SIZE,
            Some(alg::eface_equal),
        )
    }
}

unsafe impl<T: Typed> Typed for *const T {
    fn descriptor() -> &'static Type {
        &registry::ptr_type::<T>().typ
    }
}

unsafe impl<T: Typed> Typed for *mut T {
    fn descriptor() -> &'static Type {
        &registry::ptr_type::<T>().typ
    }
}

unsafe impl<T: Typed> Typed for Slice<T> {
    fn descriptor() -> &'static Type {
        &registry::slice_type::<T>().typ
    }
}

unsafe impl<K: Typed, V: Typed> Typed for MapRef<K, V> {
    fn descriptor() -> &'static Type {
        &registry::map_type::<K, V>().typ
    }
}

unsafe impl<T: Typed, const N: usize> Typed for [T; N] {
    fn descriptor() -> &'static Type {
        registry::array_type::<T, N>()
    }
}

/// Declares a `#[repr(C)]` struct together with its [`Typed`] descriptor.
///
/// ```
/// abiview::typed_struct! {
///     #[derive(Debug, PartialEq)]
///     pub struct Point {
///         pub x: i64,
///         pub y: i64,
///     }
/// }
///
/// use abiview::abi::Typed;
/// assert_eq!(Point::descriptor().size, 16);
/// ```
#[macro_export]
macro_rules! typed_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($(#[$fmeta:meta])* $fvis:vis $field:ident : $fty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(C)]
        #[derive(Clone, Copy)]
        $vis struct $name {
            $($(#[$fmeta])* $fvis $field: $fty),*
        }

        unsafe impl $crate::abi::Typed for $name {
            fn descriptor() -> &'static $crate::abi::Type {
                $crate::abi::registry::struct_type::<$name>(
                    stringify!($name),
                    &[$((
                        stringify!($field),
                        <$fty as $crate::abi::Typed>::descriptor as fn() -> &'static $crate::abi::Type,
                        ::std::mem::offset_of!($name, $field),
                    )),*],
                )
            }
        }
    };
}
