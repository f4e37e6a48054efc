//! Reflection bridge: operations on values known only through a
//! [`Value`] handle.

mod convert;
mod map;
mod slice;
mod value;

pub use convert::{
    assignable, convert_to, convertible, init_ptr, same_underlying, set_zero, shallow_copy,
    str_to_num_bool, to_str,
};
pub use map::{
    assign_by_key, assign_by_string_key, init_map, lookup_by_key, map_from_reflective,
    map_unpack,
};
pub use slice::{init_slice, make_slice, set_slice_element_at};
pub use value::{Flag, Value};
