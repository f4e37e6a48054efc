//! Swiss-table hash maps with extendible hashing.
//!
//! A map is a header ([`Map`]) reached through a pointer-sized handle
//! ([`MapRef`]); its descriptor ([`crate::abi::MapType`]) carries everything
//! the engine needs to hash, compare and copy keys and elements. The free
//! functions re-exported here work on erased `(*mut Map, &MapType)` pairs;
//! [`MapRef`] wraps them for statically known key and element types.

mod access;
mod faststr;
mod group;
mod key;
mod map;
mod table;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use crate::abi::{Typed, map_type_of};
use crate::string::StrHeader;

pub use access::{
    assign, clear, clone, delete, elem_type, for_each, get, get_checked, len, make_map, release,
    set, stats, str_assign, str_delete, str_get, str_set,
};
pub use group::CTRL_GROUP_EMPTY;
pub use map::{Map, MapStats};

/// Slots per table before it splits instead of growing.
pub const MAX_TABLE_CAPACITY: u64 = table::MAX_TABLE_CAPACITY;

/// A map handle: one pointer, null for a nil map. Copies share the map.
#[repr(transparent)]
pub struct MapRef<K, V> {
    ptr: *mut Map,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for MapRef<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for MapRef<K, V> {}

impl<K, V> fmt::Debug for MapRef<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MapRef").field(&self.ptr).finish()
    }
}

impl<K: Typed, V: Typed> MapRef<K, V> {
    pub const fn nil() -> Self {
        Self::from_raw(std::ptr::null_mut())
    }

    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(hint: u64) -> Self {
        Self::from_raw(make_map(map_type_of::<K, V>(), hint))
    }

    pub const fn from_raw(ptr: *mut Map) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *mut Map {
        self.ptr
    }

    pub fn is_nil(&self) -> bool {
        self.ptr.is_null()
    }

    /// # Safety
    /// The map must be nil or live.
    pub unsafe fn len(&self) -> u64 {
        unsafe { len(self.ptr) }
    }

    /// # Safety
    /// The map must be nil or live.
    pub unsafe fn is_empty(&self) -> bool {
        unsafe { self.len() == 0 }
    }

    /// # Safety
    /// The map must be nil or live.
    pub unsafe fn get(&self, key: &K) -> Option<V> {
        let elem = unsafe { get(self.ptr, map_type_of::<K, V>(), key as *const K as *const u8) };
        if elem.is_null() {
            None
        } else {
            Some(unsafe { (elem as *const V).read() })
        }
    }

    /// # Safety
    /// The map must be live, with no outstanding element pointers.
    pub unsafe fn insert(&self, key: K, value: V) {
        unsafe {
            set(
                self.ptr,
                map_type_of::<K, V>(),
                &key as *const K as *const u8,
                &value as *const V as *const u8,
            )
        }
    }

    /// # Safety
    /// As [`MapRef::insert`].
    pub unsafe fn remove(&self, key: &K) -> bool {
        unsafe { delete(self.ptr, map_type_of::<K, V>(), key as *const K as *const u8) }
    }

    /// # Safety
    /// The map must be nil or live.
    pub unsafe fn clone_map(&self) -> Self {
        Self::from_raw(unsafe { clone(self.ptr, map_type_of::<K, V>()) })
    }

    /// # Safety
    /// As [`MapRef::insert`].
    pub unsafe fn clear(&self) {
        unsafe { clear(self.ptr, map_type_of::<K, V>()) }
    }

    /// # Safety
    /// The map must be nil or live.
    pub unsafe fn stats(&self) -> MapStats {
        unsafe { stats(self.ptr, map_type_of::<K, V>()) }
    }

    /// Copies every entry out, in no particular order.
    ///
    /// # Safety
    /// The map must be nil or live.
    pub unsafe fn entries(&self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(unsafe { self.len() } as usize);
        unsafe {
            for_each(self.ptr, map_type_of::<K, V>(), |k, v| {
                out.push(((k as *const K).read(), (v as *const V).read()));
            })
        };
        out
    }

    /// Frees the map. Every copy of this handle dangles afterwards.
    ///
    /// # Safety
    /// The map must be nil or made by this crate, and unused afterwards.
    pub unsafe fn release(self) {
        unsafe { release(self.ptr, map_type_of::<K, V>()) }
    }
}

impl<V: Typed> MapRef<StrHeader, V> {
    /// # Safety
    /// The map must be nil or live.
    pub unsafe fn get_str(&self, key: impl AsRef<[u8]>) -> Option<V> {
        let elem = unsafe { str_get(self.ptr, map_type_of::<StrHeader, V>(), key) };
        if elem.is_null() {
            None
        } else {
            Some(unsafe { (elem as *const V).read() })
        }
    }

    /// Inserts `key`, copying its bytes into the map when it is new. The
    /// bytes need not be UTF-8.
    ///
    /// # Safety
    /// The map must be live, with no outstanding element pointers.
    pub unsafe fn insert_str(&self, key: impl AsRef<[u8]>, value: V) {
        unsafe {
            str_set(
                self.ptr,
                map_type_of::<StrHeader, V>(),
                key,
                &value as *const V as *const u8,
            )
        }
    }

    /// # Safety
    /// As [`MapRef::insert_str`].
    pub unsafe fn remove_str(&self, key: impl AsRef<[u8]>) -> bool {
        unsafe { str_delete(self.ptr, map_type_of::<StrHeader, V>(), key) }
    }
}

impl<K: Typed, V: Typed> Default for MapRef<K, V> {
    fn default() -> Self {
        Self::nil()
    }
}

/// Builds an erased map holding the entries of `source`.
pub fn from_hash_map<K: Typed, V: Typed, S>(source: &HashMap<K, V, S>) -> MapRef<K, V> {
    let m = MapRef::with_capacity(source.len() as u64);
    for (k, v) in source {
        unsafe { m.insert(*k, *v) };
    }
    m
}

/// Builds a string-keyed erased map that owns a copy of every key.
pub fn from_string_map<V: Typed, S>(source: &HashMap<String, V, S>) -> MapRef<StrHeader, V> {
    let m = MapRef::with_capacity(source.len() as u64);
    for (k, v) in source {
        unsafe { m.insert_str(k, *v) };
    }
    m
}

/// # Safety
/// `m` must be nil or live.
pub unsafe fn to_hash_map<K: Typed + Eq + Hash, V: Typed>(m: MapRef<K, V>) -> HashMap<K, V> {
    unsafe { m.entries() }.into_iter().collect()
}

/// # Safety
/// `m` must be nil or live. Keys that are not UTF-8 are converted lossily.
pub unsafe fn to_string_map<V: Typed>(m: MapRef<StrHeader, V>) -> HashMap<String, V> {
    unsafe { m.entries() }
        .into_iter()
        .map(|(k, v)| (unsafe { k.to_string_lossy() }, v))
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn handle_is_one_pointer() {
        assert_eq!(std::mem::size_of::<MapRef<u8, u8>>(), std::mem::size_of::<usize>());
        assert_eq!(crate::abi::type_of::<MapRef<u8, u8>>().size, std::mem::size_of::<usize>());
    }

    #[test]
    fn clone_then_clear_leaves_the_original() {
        let m = MapRef::<StrHeader, i64>::new();
        unsafe {
            m.insert_str("a", 1);
            m.insert_str("b", 2);
            assert_eq!(m.get_str("a"), Some(1));
            let c = m.clone_map();
            c.clear();
            assert_eq!(c.len(), 0);
            assert_eq!(m.len(), 2);
            assert_eq!(m.get_str("b"), Some(2));
            c.release();
            m.release();
        }
    }

    #[test]
    fn string_keys_belong_to_the_map() {
        let m = MapRef::<StrHeader, i64>::new();
        unsafe {
            for i in 0..20 {
                let key = format!("key-{i}");
                m.insert_str(&key, i);
                m.insert_str(&key, i * 2);
            }
            let c = m.clone_map();
            assert!(m.remove_str("key-3"));
            m.release();

            assert_eq!(c.len(), 20);
            assert_eq!(c.get_str("key-3"), Some(6));
            assert_eq!(c.get_str(String::from("key-19")), Some(38));
            c.insert_str([0xffu8, 0x00], -1);
            assert_eq!(c.get_str([0xffu8, 0x00]), Some(-1));
            c.release();
        }
    }

    #[test]
    fn std_round_trip() {
        let source: HashMap<u32, i16> = (0..50).map(|i| (i, -(i as i16))).collect();
        let m = from_hash_map(&source);
        let back = unsafe { to_hash_map(m) };
        assert_eq!(back, source);
        unsafe { m.release() };

        let words: HashMap<String, u8> = [("one".to_string(), 1), ("two".to_string(), 2)].into();
        let m = from_string_map(&words);
        assert_eq!(unsafe { to_string_map(m) }, words);
        unsafe { m.release() };
    }

    #[test]
    fn nil_handle() {
        let m = MapRef::<u8, u8>::default();
        assert!(m.is_nil());
        unsafe {
            assert_eq!(m.get(&1), None);
            assert!(m.entries().is_empty());
            assert!(m.clone_map().is_nil());
        }
    }
}
