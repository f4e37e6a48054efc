//! String-keyed map operations that skip the descriptor's hasher and
//! equality dispatch. Large maps share the generic probing through
//! [`StrKey`]; small maps are scanned by comparing strings directly, without
//! hashing unless two long keys look alike.

use super::group::{GroupRef, is_full};
use super::key::{SlotKey, StrKey};
use super::map::Map;
use crate::abi::{GROUP_SLOTS, MapType};
use crate::string::StrHeader;

/// Keys shorter than this are compared in full against every slot.
const SHORT_KEY_LEN: usize = 64;

/// Cheap filter for long keys: same length, same first and last 8 bytes.
fn long_key_may_equal(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a[..8] == b[..8] && a[a.len() - 8..] == b[b.len() - 8..]
}

unsafe fn stored_key<'a>(typ: &MapType, g: GroupRef, slot: usize) -> &'a [u8] {
    unsafe { (*(g.key(typ, slot) as *const StrHeader)).as_bytes() }
}

impl Map {
    /// Element address for `key`, or `None`.
    ///
    /// # Safety
    /// `typ` must be the map's type and its key type must be a string.
    pub(crate) unsafe fn get_str(&self, typ: &MapType, key: &[u8]) -> Option<*mut u8> {
        if self.used == 0 {
            return None;
        }
        self.check_not_writing("concurrent map read and map write");
        let key = StrKey(key);
        if self.dir_len == 0 {
            return unsafe { self.get_str_small(typ, &key) };
        }
        unsafe { self.get_with_key(typ, &key) }.map(|(_, elem)| elem)
    }

    unsafe fn get_str_small(&self, typ: &MapType, key: &StrKey) -> Option<*mut u8> {
        let g = GroupRef::new(self.dir_ptr);
        let ctrls = unsafe { *g.ctrls() };
        let wanted = key.bytes();

        if wanted.len() < SHORT_KEY_LEN {
            return (0..GROUP_SLOTS)
                .find(|&i| is_full(ctrls.get(i)) && unsafe { stored_key(typ, g, i) } == wanted)
                .map(|i| unsafe { g.elem_value(typ, i) });
        }

        let mut candidates = (0..GROUP_SLOTS).filter(|&i| {
            is_full(ctrls.get(i)) && long_key_may_equal(wanted, unsafe { stored_key(typ, g, i) })
        });
        let first = candidates.next()?;
        if candidates.next().is_none() {
            return (unsafe { stored_key(typ, g, first) } == wanted)
                .then(|| unsafe { g.elem_value(typ, first) });
        }

        // Several long keys share a prefix and suffix; let the fingerprint
        // narrow them down.
        let hash = unsafe { key.hash(typ, self.seed) };
        unsafe { self.get_small(typ, hash, key) }.map(|(_, elem)| elem)
    }

    /// Element slot for `key`, inserting a map-owned copy of the bytes when
    /// the key is new.
    ///
    /// # Safety
    /// As [`Map::get_str`].
    pub(crate) unsafe fn put_str(&mut self, typ: &MapType, key: &[u8]) -> *mut u8 {
        unsafe { self.put_slot(typ, &StrKey(key)) }
    }

    /// # Safety
    /// As [`Map::get_str`].
    pub(crate) unsafe fn delete_str(&mut self, typ: &MapType, key: &[u8]) -> bool {
        unsafe { self.delete(typ, &StrKey(key)) }
    }
}
