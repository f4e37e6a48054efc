//! Process-wide descriptor interning.
//!
//! One descriptor exists per Rust type, keyed by [`TypeId`], so identity
//! comparison of `&'static Type` is type equality. Descriptors are built
//! outside the lock (building may recursively intern element types); if two
//! threads race to publish the same type, the first published one wins and
//! the loser's copy stays leaked but unreachable.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use tracing::trace;

use super::descriptor::{
    ArrayType, GROUP_SLOTS, GROUP_SLOTS_OFFSET, MAX_ELEM_BYTES, MAX_KEY_BYTES, MapFlags, MapType,
    PTR_SIZE, PtrType, SliceType, StructField, StructType, Type, align_up,
};
use super::kind::{Kind, TFlag};
use super::typed::Typed;
use crate::error::Error;
use crate::runtime::{self, alg};

type Registry = RwLock<HashMap<TypeId, &'static Type>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

pub(crate) fn intern<T: ?Sized + 'static>(build: impl FnOnce() -> &'static Type) -> &'static Type {
    let id = TypeId::of::<T>();
    if let Some(found) = registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id)
    {
        return found;
    }
    let built = build();
    let mut types = registry().write().unwrap_or_else(PoisonError::into_inner);
    let published = *types.entry(id).or_insert(built);
    if std::ptr::eq(published, built) {
        trace!(name = built.name, kind = %built.kind, size = built.size, "registered type");
    }
    published
}

/// Number of descriptors registered so far.
pub fn registered_types() -> usize {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .len()
}

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

fn leak_str(s: String) -> &'static str {
    Box::leak(s.into_boxed_str())
}

/// Drops module paths from `std::any::type_name` output.
pub(crate) fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();
    let mut chars = full.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ':' && chars.peek() == Some(&':') {
            chars.next();
            segment.clear();
        } else if c.is_alphanumeric() || c == '_' {
            segment.push(c);
        } else {
            out.push_str(&segment);
            segment.clear();
            out.push(c);
        }
    }
    out.push_str(&segment);
    out
}

pub(crate) fn scalar<T: Typed>(
    kind: Kind,
    tflag: TFlag,
    ptr_bytes: usize,
    equal: Option<super::EqualFn>,
) -> &'static Type {
    intern::<T>(|| {
        leak(Type::new(
            kind,
            std::mem::size_of::<T>(),
            std::mem::align_of::<T>(),
            ptr_bytes,
            tflag,
            equal,
            kind.name(),
        ))
    })
}

pub(crate) fn ptr_type<T: Typed>() -> &'static PtrType {
    let typ = intern::<*const T>(|| {
        let name = leak_str(format!("*{}", short_type_name(std::any::type_name::<T>())));
        let typ = Type::new(
            Kind::Pointer,
            PTR_SIZE,
            PTR_SIZE,
            PTR_SIZE,
            TFlag::REGULAR_MEMORY | TFlag::DIRECT_IFACE,
            Some(alg::mem_equal::<usize>),
            name,
        );
        &leak(PtrType::new(typ, T::descriptor)).typ
    });
    match typ.as_ptr_type() {
        Some(ptr) => ptr,
        None => runtime::fatal(Error::Fatal("registry: pointer type has wrong kind")),
    }
}

pub(crate) fn slice_type<T: Typed>() -> &'static SliceType {
    let typ = intern::<crate::slice::Slice<T>>(|| {
        let elem = T::descriptor();
        let typ = Type::new(
            Kind::Slice,
            std::mem::size_of::<crate::slice::SliceHeader>(),
            PTR_SIZE,
            PTR_SIZE,
            TFlag::empty(),
            None,
            leak_str(format!("[]{}", elem.name)),
        );
        &leak(SliceType { typ, elem }).typ
    });
    match typ.as_slice_type() {
        Some(slice) => slice,
        None => runtime::fatal(Error::Fatal("registry: slice type has wrong kind")),
    }
}

pub(crate) fn array_type<T: Typed, const N: usize>() -> &'static Type {
    intern::<[T; N]>(|| {
        let elem = T::descriptor();
        let ptr_bytes = if N == 0 || elem.ptr_bytes == 0 {
            0
        } else {
            (N - 1) * elem.size + elem.ptr_bytes
        };
        let mut tflag = TFlag::empty();
        if elem.is_regular_memory() {
            tflag = tflag | TFlag::REGULAR_MEMORY;
        }
        if ptr_bytes != 0 {
            tflag = tflag | TFlag::GC_MASK_ON_DEMAND;
        }
        let equal: Option<super::EqualFn> = if elem.is_regular_memory() {
            Some(alg::mem_equal::<[T; N]>)
        } else if elem.is_comparable() {
            Some(alg::typed_equal::<[T; N]>)
        } else {
            None
        };
        let typ = Type::new(
            Kind::Array,
            std::mem::size_of::<[T; N]>(),
            std::mem::align_of::<[T; N]>(),
            ptr_bytes,
            tflag,
            equal,
            leak_str(format!("[{}]{}", N, elem.name)),
        );
        &leak(ArrayType { typ, elem, len: N }).typ
    })
}

/// Builds (once) the descriptor of a `#[repr(C)]` struct declared with
/// [`typed_struct!`](crate::typed_struct).
#[doc(hidden)]
pub fn struct_type<S: Typed>(
    name: &'static str,
    fields: &[(&'static str, fn() -> &'static Type, usize)],
) -> &'static Type {
    intern::<S>(|| {
        let fields: Vec<StructField> = fields
            .iter()
            .map(|&(name, typ, offset)| StructField {
                name,
                typ: typ(),
                offset,
            })
            .collect();
        let size = std::mem::size_of::<S>();
        let ptr_bytes = fields
            .iter()
            .filter(|field| field.typ.has_pointers())
            .map(|field| field.offset + field.typ.ptr_bytes)
            .max()
            .unwrap_or(0);
        let packed = fields.iter().map(|field| field.typ.size).sum::<usize>() == size;
        let regular = packed && fields.iter().all(|field| field.typ.is_regular_memory());
        let comparable = fields.iter().all(|field| field.typ.is_comparable());

        let mut tflag = TFlag::NAMED;
        if regular {
            tflag = tflag | TFlag::REGULAR_MEMORY;
        }
        if ptr_bytes != 0 {
            tflag = tflag | TFlag::GC_MASK_ON_DEMAND;
        }
        let equal: Option<super::EqualFn> = if regular {
            Some(alg::mem_equal::<S>)
        } else if comparable {
            Some(alg::typed_equal::<S>)
        } else {
            None
        };
        let typ = Type::new(
            Kind::Struct,
            size,
            std::mem::align_of::<S>(),
            ptr_bytes,
            tflag,
            equal,
            name,
        );
        &leak(StructType {
            typ,
            fields: Box::leak(fields.into_boxed_slice()),
        })
        .typ
    })
}

fn needs_key_update(t: &Type) -> bool {
    match t.kind {
        Kind::Float32
        | Kind::Float64
        | Kind::Complex64
        | Kind::Complex128
        | Kind::Interface => true,
        Kind::Array => t.elem().is_some_and(needs_key_update),
        Kind::Struct => t
            .as_struct_type()
            .is_some_and(|st| st.fields.iter().any(|field| needs_key_update(field.typ))),
        _ => false,
    }
}

fn hash_might_panic(t: &Type) -> bool {
    match t.kind {
        Kind::Interface => true,
        Kind::Array => t.elem().is_some_and(hash_might_panic),
        Kind::Struct => t
            .as_struct_type()
            .is_some_and(|st| st.fields.iter().any(|field| hash_might_panic(field.typ))),
        _ => false,
    }
}

fn hasher_for<K: Typed>(key: &Type) -> super::HasherFn {
    match key.kind {
        Kind::String => alg::str_hasher,
        Kind::Float32 => alg::f32_hasher,
        Kind::Float64 => alg::f64_hasher,
        Kind::Complex64 => alg::c64_hasher,
        Kind::Complex128 => alg::c128_hasher,
        Kind::Interface => alg::eface_hasher,
        _ if key.is_regular_memory() => alg::mem_hasher::<K>,
        _ => alg::typed_hasher::<K>,
    }
}

const SLOT_FIELD_NAMES: [&str; GROUP_SLOTS * 2] = [
    "key0", "elem0", "key1", "elem1", "key2", "elem2", "key3", "elem3", "key4", "elem4", "key5",
    "elem5", "key6", "elem6", "key7", "elem7",
];

pub(crate) fn map_type<K: Typed, V: Typed>() -> &'static MapType {
    let typ = intern::<crate::maps::MapRef<K, V>>(|| {
        let key = K::descriptor();
        let elem = V::descriptor();
        if !key.is_comparable() {
            runtime::fatal(Error::InvalidKind {
                expected: "comparable map key",
                actual: key.kind,
            });
        }

        let mut flags = MapFlags::empty();
        let key_slot = if key.size > MAX_KEY_BYTES {
            flags |= MapFlags::INDIRECT_KEY;
            &ptr_type::<K>().typ
        } else {
            key
        };
        let elem_slot = if elem.size > MAX_ELEM_BYTES {
            flags |= MapFlags::INDIRECT_ELEM;
            &ptr_type::<V>().typ
        } else {
            elem
        };
        if needs_key_update(key) {
            flags |= MapFlags::NEED_KEY_UPDATE;
        }
        if hash_might_panic(key) {
            flags |= MapFlags::HASH_MIGHT_PANIC;
        }
        if matches!(key.kind, Kind::String | Kind::Interface) {
            flags |= MapFlags::KEY_OWNS_DATA;
        }
        if elem.kind == Kind::Interface {
            flags |= MapFlags::ELEM_OWNS_DATA;
        }

        let slot_align = key_slot.align().max(elem_slot.align()).max(1);
        let elem_off = align_up(key_slot.size, elem_slot.align().max(1));
        let slot_size = align_up(elem_off + elem_slot.size, slot_align);
        let group_size = GROUP_SLOTS_OFFSET + GROUP_SLOTS * slot_size;

        let mut fields = Vec::with_capacity(1 + GROUP_SLOTS * 2);
        fields.push(StructField {
            name: "ctrl",
            typ: u64::descriptor(),
            offset: 0,
        });
        for slot in 0..GROUP_SLOTS {
            let base = GROUP_SLOTS_OFFSET + slot * slot_size;
            fields.push(StructField {
                name: SLOT_FIELD_NAMES[slot * 2],
                typ: key_slot,
                offset: base,
            });
            fields.push(StructField {
                name: SLOT_FIELD_NAMES[slot * 2 + 1],
                typ: elem_slot,
                offset: base + elem_off,
            });
        }
        let group_ptr_bytes = fields
            .iter()
            .filter(|field| field.typ.has_pointers())
            .map(|field| field.offset + field.typ.ptr_bytes)
            .max()
            .unwrap_or(0);
        let group_flags = if group_ptr_bytes != 0 {
            TFlag::GC_MASK_ON_DEMAND
        } else {
            TFlag::empty()
        };
        let name = leak_str(format!("map[{}]{}", key.name, elem.name));
        let group = &leak(StructType {
            typ: Type::new(
                Kind::Struct,
                group_size,
                slot_align.max(8),
                group_ptr_bytes,
                group_flags,
                None,
                leak_str(format!("group.{name}")),
            ),
            fields: Box::leak(fields.into_boxed_slice()),
        })
        .typ;

        let typ = Type::new(
            Kind::Map,
            PTR_SIZE,
            PTR_SIZE,
            PTR_SIZE,
            TFlag::DIRECT_IFACE,
            None,
            name,
        );
        &leak(MapType {
            typ,
            key,
            elem,
            group,
            hasher: hasher_for::<K>(key),
            group_size,
            slot_size,
            elem_off,
            flags,
        })
        .typ
    });
    match typ.as_map_type() {
        Some(map) => map,
        None => runtime::fatal(Error::Fatal("registry: map type has wrong kind")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_drop_module_paths() {
        assert_eq!(short_type_name("i64"), "i64");
        assert_eq!(short_type_name("abiview::string::StrHeader"), "StrHeader");
        assert_eq!(
            short_type_name("abiview::slice::Slice<abiview::string::StrHeader>"),
            "Slice<StrHeader>"
        );
        assert_eq!(short_type_name("*const a::B"), "*const B");
    }

    #[test]
    fn composite_names() {
        assert_eq!(slice_type::<i64>().typ.name, "[]int64");
        assert_eq!(array_type::<u8, 4>().name, "[4]uint8");
        assert_eq!(
            map_type::<crate::string::StrHeader, i64>().typ.name,
            "map[string]int64"
        );
    }

    #[test]
    fn interning_is_idempotent() {
        let first = array_type::<u16, 3>();
        let second = array_type::<u16, 3>();
        assert!(std::ptr::eq(first, second));
        assert!(registered_types() > 0);
    }

    #[test]
    #[should_panic(expected = "comparable map key")]
    fn slice_keys_are_rejected() {
        map_type::<crate::slice::Slice<u8>, u8>();
    }
}
