//! Runtime type descriptors.
//!
//! Every composite descriptor is `#[repr(C)]` and starts with an embedded
//! [`Type`], so a `&Type` whose kind is `Map` can be widened back to a
//! [`MapType`] (and likewise for pointers, slices, arrays and structs).
//! Descriptors are only built by the registry, which guarantees that pairing.
//!
//! # Layout
//!
//! - `size`, `ptr_bytes`: byte size and the length of the prefix that may hold pointers
//! - `hash`: a hash of the type name, mixed into interface hashing
//! - `tflag`, `align`, `field_align`, `kind`
//! - `equal`: equality for two values of this type, `None` when not comparable
//! - pointer bitmap, one bit per pointer-sized word of the prefix

use std::fmt;
use std::sync::OnceLock;

use super::kind::{Kind, TFlag};

pub type EqualFn = unsafe fn(*const u8, *const u8) -> bool;
pub type HasherFn = unsafe fn(*const u8, u64) -> u64;

pub const PTR_SIZE: usize = std::mem::size_of::<usize>();

#[repr(C)]
pub struct Type {
    pub size: usize,
    pub ptr_bytes: usize,
    pub hash: u32,
    pub tflag: TFlag,
    pub align: u8,
    pub field_align: u8,
    pub kind: Kind,
    pub equal: Option<EqualFn>,
    gc_data: OnceLock<Box<[u8]>>,
    pub name: &'static str,
}

impl Type {
    pub(crate) fn new(
        kind: Kind,
        size: usize,
        align: usize,
        ptr_bytes: usize,
        tflag: TFlag,
        equal: Option<EqualFn>,
        name: &'static str,
    ) -> Type {
        Type {
            size,
            ptr_bytes,
            hash: name_hash(name),
            tflag,
            align: align as u8,
            field_align: align as u8,
            kind,
            equal,
            gc_data: OnceLock::new(),
            name,
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align as usize
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True when any byte of a value may hold a pointer.
    pub fn has_pointers(&self) -> bool {
        self.ptr_bytes != 0
    }

    /// True when values travel inside a dynamic value's data word.
    pub fn is_direct_iface(&self) -> bool {
        self.tflag.contains(TFlag::DIRECT_IFACE)
    }

    pub fn is_regular_memory(&self) -> bool {
        self.tflag.contains(TFlag::REGULAR_MEMORY)
    }

    pub fn is_comparable(&self) -> bool {
        self.equal.is_some()
    }

    /// Pointer bitmap: bit `i` is set when word `i` of a value holds a pointer.
    ///
    /// Built on first use and cached; concurrent first calls compute the same
    /// bitmap and one of them is kept.
    pub fn gc_mask(&self) -> &[u8] {
        self.gc_data.get_or_init(|| {
            let words = self.ptr_bytes.div_ceil(PTR_SIZE);
            let mut bits = vec![0u8; words.div_ceil(8)];
            mark_pointer_words(self, 0, &mut bits);
            bits.into_boxed_slice()
        })
    }

    pub fn is_pointer_word(&self, word: usize) -> bool {
        let mask = self.gc_mask();
        mask.get(word / 8)
            .map(|byte| byte & (1 << (word % 8)) != 0)
            .unwrap_or(false)
    }

    pub fn as_ptr_type(&self) -> Option<&PtrType> {
        (self.kind == Kind::Pointer).then(|| unsafe { &*(self as *const Type).cast::<PtrType>() })
    }

    pub fn as_slice_type(&self) -> Option<&SliceType> {
        (self.kind == Kind::Slice).then(|| unsafe { &*(self as *const Type).cast::<SliceType>() })
    }

    pub fn as_array_type(&self) -> Option<&ArrayType> {
        (self.kind == Kind::Array).then(|| unsafe { &*(self as *const Type).cast::<ArrayType>() })
    }

    pub fn as_struct_type(&self) -> Option<&StructType> {
        (self.kind == Kind::Struct)
            .then(|| unsafe { &*(self as *const Type).cast::<StructType>() })
    }

    pub fn as_map_type(&self) -> Option<&MapType> {
        (self.kind == Kind::Map).then(|| unsafe { &*(self as *const Type).cast::<MapType>() })
    }

    /// Element type of pointers, slices, arrays and maps.
    pub fn elem(&self) -> Option<&'static Type> {
        match self.kind {
            Kind::Pointer => self.as_ptr_type().map(|t| t.elem()),
            Kind::Slice => self.as_slice_type().map(|t| t.elem),
            Kind::Array => self.as_array_type().map(|t| t.elem),
            Kind::Map => self.as_map_type().map(|t| t.elem),
            _ => None,
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Type) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for Type {}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Type")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("ptr_bytes", &self.ptr_bytes)
            .field("align", &self.align)
            .field("tflag", &self.tflag)
            .finish()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

fn name_hash(name: &str) -> u32 {
    // FNV-1a
    let mut hash: u32 = 0x811c_9dc5;
    for byte in name.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn set_word(bits: &mut [u8], word: usize) {
    if let Some(byte) = bits.get_mut(word / 8) {
        *byte |= 1 << (word % 8);
    }
}

fn mark_pointer_words(t: &Type, offset: usize, bits: &mut [u8]) {
    if t.ptr_bytes == 0 {
        return;
    }
    let word = offset / PTR_SIZE;
    match t.kind {
        Kind::Pointer | Kind::UnsafePointer | Kind::Map | Kind::Chan | Kind::Func => {
            set_word(bits, word)
        }
        Kind::String | Kind::Slice => set_word(bits, word),
        // The type word points at static descriptors; only the data word is a heap pointer.
        Kind::Interface => set_word(bits, word + 1),
        Kind::Array => {
            if let Some(array) = t.as_array_type() {
                for i in 0..array.len {
                    mark_pointer_words(array.elem, offset + i * array.elem.size, bits);
                }
            }
        }
        Kind::Struct => {
            if let Some(st) = t.as_struct_type() {
                for field in st.fields {
                    mark_pointer_words(field.typ, offset + field.offset, bits);
                }
            }
        }
        _ => {}
    }
}

#[repr(C)]
pub struct PtrType {
    pub typ: Type,
    elem_fn: fn() -> &'static Type,
}

impl PtrType {
    pub(crate) fn new(typ: Type, elem_fn: fn() -> &'static Type) -> PtrType {
        PtrType { typ, elem_fn }
    }

    /// Pointee type. Resolved lazily so that self-referential structs can be
    /// described.
    pub fn elem(&self) -> &'static Type {
        (self.elem_fn)()
    }
}

#[repr(C)]
pub struct SliceType {
    pub typ: Type,
    pub elem: &'static Type,
}

#[repr(C)]
pub struct ArrayType {
    pub typ: Type,
    pub elem: &'static Type,
    pub len: usize,
}

#[repr(C)]
#[derive(Debug)]
pub struct StructField {
    pub name: &'static str,
    pub typ: &'static Type,
    pub offset: usize,
}

#[repr(C)]
pub struct StructType {
    pub typ: Type,
    pub fields: &'static [StructField],
}

impl StructType {
    pub fn field_by_name(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Number of slots in a group.
pub const GROUP_SLOTS: usize = 8;
/// Keys and elements larger than this are boxed and the slot holds a pointer.
pub const MAX_KEY_BYTES: usize = 128;
pub const MAX_ELEM_BYTES: usize = 128;
/// Slots start after the 64-bit control word.
pub const GROUP_SLOTS_OFFSET: usize = 8;

#[repr(C)]
pub struct MapType {
    pub typ: Type,
    pub key: &'static Type,
    pub elem: &'static Type,
    /// Internal type of one slot group.
    pub group: &'static Type,
    pub hasher: HasherFn,
    pub group_size: usize,
    pub slot_size: usize,
    pub elem_off: usize,
    pub flags: MapFlags,
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        /// The stored key must be rewritten when an equal key is assigned again.
        const NEED_KEY_UPDATE = 1 << 0;
        const HASH_MIGHT_PANIC = 1 << 1;
        const INDIRECT_KEY = 1 << 2;
        const INDIRECT_ELEM = 1 << 3;
        /// Stored keys own what they point to: string bytes or an interface box.
        const KEY_OWNS_DATA = 1 << 4;
        /// Stored elements own their interface box.
        const ELEM_OWNS_DATA = 1 << 5;
    }
}

impl MapType {
    pub fn need_key_update(&self) -> bool {
        self.flags.contains(MapFlags::NEED_KEY_UPDATE)
    }

    pub fn hash_might_panic(&self) -> bool {
        self.flags.contains(MapFlags::HASH_MIGHT_PANIC)
    }

    pub fn indirect_key(&self) -> bool {
        self.flags.contains(MapFlags::INDIRECT_KEY)
    }

    pub fn indirect_elem(&self) -> bool {
        self.flags.contains(MapFlags::INDIRECT_ELEM)
    }

    pub fn key_owns_data(&self) -> bool {
        self.flags.contains(MapFlags::KEY_OWNS_DATA)
    }

    pub fn elem_owns_data(&self) -> bool {
        self.flags.contains(MapFlags::ELEM_OWNS_DATA)
    }

    pub fn as_type(&self) -> &Type {
        &self.typ
    }
}

impl fmt::Debug for MapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapType")
            .field("name", &self.typ.name)
            .field("key", &self.key.name)
            .field("elem", &self.elem.name)
            .field("group_size", &self.group_size)
            .field("slot_size", &self.slot_size)
            .field("elem_off", &self.elem_off)
            .field("flags", &self.flags)
            .finish()
    }
}

pub const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{Typed, map_type_of, type_of};
    use crate::eface::Eface;
    use crate::string::StrHeader;

    crate::typed_struct! {
        struct Mixed {
            count: i64,
            label: StrHeader,
            flag: bool,
            next: *const Mixed,
        }
    }

    #[test]
    fn scalar_descriptors() {
        let t = type_of::<i32>();
        assert_eq!(t.kind(), Kind::Int32);
        assert_eq!(t.size(), 4);
        assert_eq!(t.align(), 4);
        assert!(!t.has_pointers());
        assert!(t.is_regular_memory());
        assert!(!t.is_direct_iface());
    }

    #[test]
    fn descriptors_are_interned() {
        assert!(std::ptr::eq(type_of::<u64>(), type_of::<u64>()));
        assert_eq!(type_of::<StrHeader>(), type_of::<StrHeader>());
        assert_ne!(type_of::<u64>(), type_of::<i64>());
        assert!(std::ptr::eq(
            type_of::<*const i64>(),
            type_of::<*mut i64>()
        ));
    }

    #[test]
    fn struct_gc_mask_marks_pointer_words() {
        let t = Mixed::descriptor();
        assert_eq!(t.kind(), Kind::Struct);
        // count | label.ptr | label.len | flag | next
        assert!(!t.is_pointer_word(0));
        assert!(t.is_pointer_word(1));
        assert!(!t.is_pointer_word(2));
        assert!(!t.is_pointer_word(3));
        assert!(t.is_pointer_word(4));
        assert_eq!(t.ptr_bytes, 5 * PTR_SIZE);
        assert!(t.tflag.contains(TFlag::GC_MASK_ON_DEMAND));
    }

    #[test]
    fn self_referential_pointer_resolves() {
        let st = Mixed::descriptor().as_struct_type().unwrap();
        let next = st.field_by_name("next").unwrap();
        let ptr = next.typ.as_ptr_type().unwrap();
        assert_eq!(ptr.elem(), Mixed::descriptor());
    }

    #[test]
    fn interface_marks_only_data_word() {
        let t = type_of::<Eface>();
        assert!(!t.is_pointer_word(0));
        assert!(t.is_pointer_word(1));
    }

    #[test]
    fn map_type_layout() {
        let mt = map_type_of::<StrHeader, i64>();
        assert_eq!(mt.key.kind(), Kind::String);
        assert_eq!(mt.elem.kind(), Kind::Int64);
        assert_eq!(mt.elem_off, 16);
        assert_eq!(mt.slot_size, 24);
        assert_eq!(mt.group_size, GROUP_SLOTS_OFFSET + GROUP_SLOTS * 24);
        assert_eq!(mt.group.size, mt.group_size);
        assert!(!mt.need_key_update());
        assert!(mt.key_owns_data());
        assert!(!mt.elem_owns_data());
        assert!(!mt.indirect_key());
        assert!(!mt.indirect_elem());
        assert_eq!(mt.as_type().kind(), Kind::Map);
        assert!(mt.as_type().is_direct_iface());
    }

    #[test]
    fn large_values_are_stored_indirectly() {
        let mt = map_type_of::<u8, [u64; 32]>();
        assert!(mt.indirect_elem());
        assert!(!mt.indirect_key());
        assert_eq!(mt.elem_off, 8);
        assert_eq!(mt.slot_size, 16);
    }

    #[test]
    fn float_keys_need_update_and_interfaces_might_panic() {
        let floats = map_type_of::<f64, u8>();
        assert!(floats.need_key_update());
        assert!(!floats.hash_might_panic());
        let ifaces = map_type_of::<Eface, u8>();
        assert!(ifaces.hash_might_panic());
        assert!(ifaces.need_key_update());
        assert!(ifaces.key_owns_data());
        assert!(map_type_of::<u8, Eface>().elem_owns_data());
        let ints = map_type_of::<u32, u8>();
        assert_eq!(ints.flags, MapFlags::empty());
    }
}
