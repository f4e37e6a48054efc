//! Slot groups and control words.
//!
//! # Structure (one group, `MapType::group_size` bytes)
//!
//! - control word: 8 control bytes packed into a `u64`, byte `i` describes slot `i`
//! - 8 slots of `MapType::slot_size` bytes: key at offset 0, element at `elem_off`
//!
//! A control byte is `0x80` for an empty slot, `0xFE` for a tombstone, and
//! the 7-bit `h2` of the key's hash for a full slot.

use crate::abi::{GROUP_SLOTS, GROUP_SLOTS_OFFSET, Kind, MapType, Type};
use crate::eface;
use crate::runtime::mem;
use crate::string;

pub(crate) const CTRL_EMPTY: u8 = 0b1000_0000;
pub(crate) const CTRL_DELETED: u8 = 0b1111_1110;

const BITSET_LSB: u64 = 0x0101_0101_0101_0101;
const BITSET_MSB: u64 = 0x8080_8080_8080_8080;

/// Control word with every slot empty.
pub const CTRL_GROUP_EMPTY: u64 = BITSET_LSB * CTRL_EMPTY as u64;

/// Probe position bits.
pub(crate) fn h1(hash: u64) -> u64 {
    hash >> 7
}

/// Control-byte fingerprint.
pub(crate) fn h2(hash: u64) -> u8 {
    (hash & 0x7f) as u8
}

pub(crate) fn is_full(ctrl: u8) -> bool {
    ctrl & CTRL_EMPTY == 0
}

/// One bit (the high bit of the byte) per matching slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bitset(u64);

impl Bitset {
    pub(crate) fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub(crate) fn first(self) -> usize {
        (self.0.trailing_zeros() >> 3) as usize
    }

    pub(crate) fn remove_first(self) -> Bitset {
        Bitset(self.0 & self.0.wrapping_sub(1))
    }
}

impl Iterator for Bitset {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let slot = self.first();
        *self = self.remove_first();
        Some(slot)
    }
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CtrlGroup(pub(crate) u64);

impl CtrlGroup {
    pub(crate) fn get(self, slot: usize) -> u8 {
        (self.0 >> (8 * slot)) as u8
    }

    pub(crate) fn set(&mut self, slot: usize, ctrl: u8) {
        let shift = 8 * slot;
        self.0 = (self.0 & !(0xff << shift)) | ((ctrl as u64) << shift);
    }

    pub(crate) fn set_empty(&mut self) {
        self.0 = CTRL_GROUP_EMPTY;
    }

    /// Slots whose control byte equals `h2`. May report a false positive next
    /// to a true match; callers compare keys anyway.
    pub(crate) fn match_h2(self, h2: u8) -> Bitset {
        let v = self.0 ^ (BITSET_LSB * h2 as u64);
        Bitset((v.wrapping_sub(BITSET_LSB) & !v) & BITSET_MSB)
    }

    pub(crate) fn match_empty(self) -> Bitset {
        // Empty is the only control byte with the high bit set and bit 1 clear.
        let v = self.0;
        Bitset((v & !(v << 6)) & BITSET_MSB)
    }

    pub(crate) fn match_empty_or_deleted(self) -> Bitset {
        Bitset(self.0 & BITSET_MSB)
    }

    pub(crate) fn match_full(self) -> Bitset {
        Bitset(!self.0 & BITSET_MSB)
    }
}

/// Raw pointer to one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GroupRef {
    pub(crate) data: *mut u8,
}

impl GroupRef {
    pub(crate) fn new(data: *mut u8) -> GroupRef {
        GroupRef { data }
    }

    /// # Safety
    /// The group must be live.
    pub(crate) unsafe fn ctrls<'a>(self) -> &'a mut CtrlGroup {
        unsafe { &mut *(self.data as *mut CtrlGroup) }
    }

    /// Address of the key field of `slot`.
    pub(crate) fn key(self, typ: &MapType, slot: usize) -> *mut u8 {
        self.data
            .wrapping_add(GROUP_SLOTS_OFFSET + slot * typ.slot_size)
    }

    /// Address of the element field of `slot`.
    pub(crate) fn elem(self, typ: &MapType, slot: usize) -> *mut u8 {
        self.key(typ, slot).wrapping_add(typ.elem_off)
    }

    /// Address of the key value, following the box for indirect keys.
    ///
    /// # Safety
    /// The group must be live and `slot` full.
    pub(crate) unsafe fn key_value(self, typ: &MapType, slot: usize) -> *mut u8 {
        let key = self.key(typ, slot);
        if typ.indirect_key() {
            unsafe { *(key as *mut *mut u8) }
        } else {
            key
        }
    }

    /// Address of the element value, following the box for indirect elements.
    ///
    /// # Safety
    /// The group must be live and `slot` full.
    pub(crate) unsafe fn elem_value(self, typ: &MapType, slot: usize) -> *mut u8 {
        let elem = self.elem(typ, slot);
        if typ.indirect_elem() {
            unsafe { *(elem as *mut *mut u8) }
        } else {
            elem
        }
    }

    /// Frees what the full slots own: indirect boxes, string key bytes and
    /// interface boxes.
    ///
    /// # Safety
    /// The group must be live and the boxes not referenced elsewhere.
    pub(crate) unsafe fn release_boxes(self, typ: &MapType) {
        if !owns_anything(typ) {
            return;
        }
        let ctrls = unsafe { *self.ctrls() };
        for slot in 0..GROUP_SLOTS {
            if !is_full(ctrls.get(slot)) {
                continue;
            }
            unsafe {
                release_key(typ, self.key_value(typ, slot));
                release_elem(typ, self.elem_value(typ, slot));
                if typ.indirect_key() {
                    release_box(typ.key, self.key(typ, slot));
                }
                if typ.indirect_elem() {
                    release_box(typ.elem, self.elem(typ, slot));
                }
            }
        }
    }

    /// Copies this group into `dst`, giving `dst` its own boxes and key bytes.
    ///
    /// # Safety
    /// Both groups must be live and of `typ`.
    pub(crate) unsafe fn clone_into(self, typ: &MapType, dst: GroupRef) {
        unsafe { mem::typed_memmove(typ.group, dst.data, self.data) };
        if !owns_anything(typ) {
            return;
        }
        let ctrls = unsafe { *self.ctrls() };
        for slot in 0..GROUP_SLOTS {
            if !is_full(ctrls.get(slot)) {
                continue;
            }
            unsafe {
                if typ.indirect_key() {
                    clone_box(typ.key, self.key(typ, slot), dst.key(typ, slot));
                }
                if typ.indirect_elem() {
                    clone_box(typ.elem, self.elem(typ, slot), dst.elem(typ, slot));
                }
                own_key(typ, dst.key_value(typ, slot));
                own_elem(typ, dst.elem_value(typ, slot));
            }
        }
    }
}

fn owns_anything(typ: &MapType) -> bool {
    typ.indirect_key() || typ.indirect_elem() || typ.key_owns_data() || typ.elem_owns_data()
}

/// Gives a stored value its own copy of the data it points to.
unsafe fn own_data(t: &Type, p: *mut u8) {
    match t.kind {
        Kind::String => unsafe { string::own_bytes(p) },
        Kind::Interface => unsafe { eface::copy_payload(p) },
        _ => {}
    }
}

unsafe fn release_data(t: &Type, p: *mut u8) {
    match t.kind {
        Kind::String => unsafe { string::release_bytes(p) },
        Kind::Interface => unsafe { eface::release_payload(p) },
        _ => {}
    }
}

/// Makes the key value at `key` independent of the caller's key.
///
/// # Safety
/// `key` must point to a live key value of `typ` in a slot.
pub(crate) unsafe fn own_key(typ: &MapType, key: *mut u8) {
    if typ.key_owns_data() {
        unsafe { own_data(typ.key, key) };
    }
}

/// # Safety
/// `key` must point to a key value previously passed to [`own_key`].
pub(crate) unsafe fn release_key(typ: &MapType, key: *mut u8) {
    if typ.key_owns_data() {
        unsafe { release_data(typ.key, key) };
    }
}

/// # Safety
/// `elem` must point to a live element value of `typ` in a slot.
pub(crate) unsafe fn own_elem(typ: &MapType, elem: *mut u8) {
    if typ.elem_owns_data() {
        unsafe { own_data(typ.elem, elem) };
    }
}

/// # Safety
/// `elem` must point to an element value that owns its data (or is zero).
pub(crate) unsafe fn release_elem(typ: &MapType, elem: *mut u8) {
    if typ.elem_owns_data() {
        unsafe { release_data(typ.elem, elem) };
    }
}

/// Frees the box a slot field points to and nulls the field.
///
/// # Safety
/// `field` must hold a box of `t` (or null).
pub(crate) unsafe fn release_box(t: &Type, field: *mut u8) {
    let slot = field as *mut *mut u8;
    let boxed = unsafe { *slot };
    if !boxed.is_null() {
        unsafe {
            mem::free_object(t, boxed);
            *slot = std::ptr::null_mut();
        }
    }
}

unsafe fn clone_box(t: &Type, src_field: *mut u8, dst_field: *mut u8) {
    let old = unsafe { *(src_field as *mut *mut u8) };
    if old.is_null() {
        return;
    }
    let fresh = mem::new_object(t);
    unsafe {
        mem::typed_memmove(t, fresh, old);
        *(dst_field as *mut *mut u8) = fresh;
    }
}

/// A table's array of groups, `length_mask + 1` groups long.
#[repr(C)]
#[derive(Debug)]
pub(crate) struct Groups {
    pub(crate) data: *mut u8,
    pub(crate) length_mask: u64,
}

impl Groups {
    /// Allocates `length` zeroed groups. Callers must mark the control words
    /// empty before use.
    pub(crate) fn new(typ: &MapType, length: u64) -> Groups {
        Groups {
            data: mem::new_array(typ.group, length as usize),
            length_mask: length - 1,
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.length_mask + 1
    }

    pub(crate) fn group(&self, typ: &MapType, index: u64) -> GroupRef {
        GroupRef::new(
            self.data
                .wrapping_add(index as usize * typ.group_size),
        )
    }

    /// # Safety
    /// The groups must not be used afterwards.
    pub(crate) unsafe fn free(&mut self, typ: &MapType) {
        if !self.data.is_null() {
            unsafe { mem::free_array(typ.group, self.data, self.len() as usize) };
            self.data = std::ptr::null_mut();
        }
    }
}

/// Quadratic probe over group indices: offsets `p, p+1, p+3, p+6, ...`
/// modulo the group count, which visits every group once when the count is
/// a power of two.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProbeSeq {
    mask: u64,
    pub(crate) offset: u64,
    index: u64,
}

impl ProbeSeq {
    pub(crate) fn new(hash: u64, mask: u64) -> ProbeSeq {
        ProbeSeq {
            mask,
            offset: h1(hash) & mask,
            index: 0,
        }
    }

    pub(crate) fn next(self) -> ProbeSeq {
        let index = self.index + 1;
        ProbeSeq {
            mask: self.mask,
            offset: (self.offset + index) & self.mask,
            index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctrl(bytes: [u8; 8]) -> CtrlGroup {
        CtrlGroup(u64::from_le_bytes(bytes))
    }

    #[test]
    fn matches_find_the_right_slots() {
        let e = CTRL_EMPTY;
        let d = CTRL_DELETED;
        let g = ctrl([0x11, e, 0x22, d, 0x11, e, e, 0x33]);
        assert_eq!(g.match_h2(0x11).collect::<Vec<_>>(), vec![0, 4]);
        assert_eq!(g.match_empty().collect::<Vec<_>>(), vec![1, 5, 6]);
        assert_eq!(
            g.match_empty_or_deleted().collect::<Vec<_>>(),
            vec![1, 3, 5, 6]
        );
        assert_eq!(g.match_full().collect::<Vec<_>>(), vec![0, 2, 4, 7]);
    }

    #[test]
    fn set_and_get_round_trip() {
        let mut g = CtrlGroup(CTRL_GROUP_EMPTY);
        assert!(g.match_full().is_empty());
        g.set(3, 0x42);
        assert_eq!(g.get(3), 0x42);
        assert_eq!(g.get(2), CTRL_EMPTY);
        assert_eq!(g.match_h2(0x42).first(), 3);
        g.set(3, CTRL_DELETED);
        assert!(g.match_empty().collect::<Vec<_>>().len() == 7);
        g.set_empty();
        assert_eq!(g.0, CTRL_GROUP_EMPTY);
    }

    #[test]
    fn fingerprints() {
        let hash = 0xdead_beef_u64;
        assert_eq!(h2(hash), (0xef & 0x7f) as u8);
        assert_eq!(h1(hash), 0xdead_beef >> 7);
        assert!(is_full(h2(u64::MAX)));
        assert!(!is_full(CTRL_EMPTY));
        assert!(!is_full(CTRL_DELETED));
    }

    #[test]
    fn sequence_visits_every_group_once() {
        let mask = 15;
        let mut seq = ProbeSeq::new(0x1234 << 7, mask);
        let mut seen = [false; 16];
        for _ in 0..16 {
            assert!(!seen[seq.offset as usize]);
            seen[seq.offset as usize] = true;
            seq = seq.next();
        }
        assert!(seen.iter().all(|&s| s));
    }
}
