//! Type-erased container layouts: type descriptors, dynamic values, slice
//! and string fat pointers, and a swiss-table map with extendible hashing,
//! all manipulated through descriptor-driven accessors.

pub mod abi;
pub mod eface;
pub mod error;
pub mod ffi;
pub mod maps;
pub mod reflect;
pub mod runtime;
pub mod slice;
pub mod string;

pub use error::{Error, Result};
