//! Type descriptors and the Rust-side registration of them.

mod descriptor;
mod kind;
pub mod registry;
mod typed;

pub use descriptor::{
    ArrayType, EqualFn, GROUP_SLOTS, GROUP_SLOTS_OFFSET, HasherFn, MAX_ELEM_BYTES, MAX_KEY_BYTES,
    MapFlags, MapType, PTR_SIZE, PtrType, SliceType, StructField, StructType, Type, align_up,
};
pub use kind::{Kind, TFlag};
pub use typed::{
    Complex64, Complex128, Typed, UnsafePointer, map_type_of, ptr_type_of, slice_type_of, type_of,
};
