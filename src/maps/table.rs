//! One open-addressed hash table: a power-of-two array of groups with at most
//! [`MAX_TABLE_CAPACITY`] slots, probed quadratically by group.
//!
//! A table never grows past its cap; past that the owning map splits it in
//! two and lets the directory route each half.

use super::group::{
    CTRL_DELETED, CTRL_EMPTY, GroupRef, Groups, ProbeSeq, h2, is_full, own_key, release_box,
    release_elem, release_key,
};
use super::key::SlotKey;
use crate::abi::{GROUP_SLOTS, MapType};
use crate::error::Error;
use crate::runtime::{fatal, mem};

pub(crate) const MAX_TABLE_CAPACITY: u64 = 1024;

/// Full slots allowed per group before a table must grow.
pub(crate) const MAX_AVG_GROUP_LOAD: u64 = 7;

#[repr(C)]
#[derive(Debug)]
pub(crate) struct Table {
    pub(crate) used: u16,
    pub(crate) capacity: u16,
    /// Inserts left before a rehash. Tombstones do not give slots back.
    pub(crate) growth_left: u16,
    pub(crate) local_depth: u8,
    /// First directory entry pointing at this table, -1 while detached.
    pub(crate) index: isize,
    pub(crate) groups: Groups,
}

pub(crate) enum PutSlot {
    Existing(*mut u8),
    Inserted(*mut u8),
    /// No room left; the table must be rehashed and the put retried.
    Full,
}

pub(crate) enum Deleted {
    Missing,
    Emptied,
    Tombstoned,
}

impl Table {
    pub(crate) fn new(typ: &MapType, capacity: u64, index: isize, local_depth: u8) -> Box<Table> {
        let capacity = capacity.max(GROUP_SLOTS as u64);
        if capacity > MAX_TABLE_CAPACITY {
            fatal(Error::Fatal("initial table capacity too large"));
        }
        let capacity = capacity.next_power_of_two();
        let groups = Groups::new(typ, capacity / GROUP_SLOTS as u64);
        let mut table = Box::new(Table {
            used: 0,
            capacity: capacity as u16,
            growth_left: 0,
            local_depth,
            index,
            groups,
        });
        table.growth_left = table.max_growth_left();
        for i in 0..table.groups.len() {
            unsafe { table.groups.group(typ, i).ctrls().set_empty() };
        }
        table
    }

    pub(crate) fn max_growth_left(&self) -> u16 {
        if self.capacity as usize <= GROUP_SLOTS {
            // Keep one slot empty so probes terminate.
            return self.capacity - 1;
        }
        (self.capacity as u64 * MAX_AVG_GROUP_LOAD / GROUP_SLOTS as u64) as u16
    }

    /// Finds `key`, returning the addresses of its key and element values.
    ///
    /// # Safety
    /// `key` must be a live key of `typ` and `hash` its hash under the map seed.
    pub(crate) unsafe fn get_with_key<K: SlotKey>(
        &self,
        typ: &MapType,
        hash: u64,
        key: &K,
    ) -> Option<(*mut u8, *mut u8)> {
        let mut seq = ProbeSeq::new(hash, self.groups.length_mask);
        loop {
            let g = self.groups.group(typ, seq.offset);
            let ctrls = unsafe { *g.ctrls() };
            for i in ctrls.match_h2(h2(hash)) {
                let stored = unsafe { g.key_value(typ, i) };
                if unsafe { key.matches(typ, stored) } {
                    return Some((stored, unsafe { g.elem_value(typ, i) }));
                }
            }
            if !ctrls.match_empty().is_empty() {
                return None;
            }
            seq = seq.next();
        }
    }

    /// Finds or claims the slot for `key`. Claimed slots hold the key and a
    /// zeroed element.
    ///
    /// # Safety
    /// As [`Table::get_with_key`].
    pub(crate) unsafe fn put_slot<K: SlotKey>(&mut self, typ: &MapType, hash: u64, key: &K) -> PutSlot {
        let mut seq = ProbeSeq::new(hash, self.groups.length_mask);
        let mut first_deleted: Option<(GroupRef, usize)> = None;
        loop {
            let g = self.groups.group(typ, seq.offset);
            let ctrls = unsafe { *g.ctrls() };
            for i in ctrls.match_h2(h2(hash)) {
                let stored = unsafe { g.key_value(typ, i) };
                if unsafe { key.matches(typ, stored) } {
                    unsafe { update_key(typ, stored, key) };
                    return PutSlot::Existing(unsafe { g.elem_value(typ, i) });
                }
            }

            // An empty slot ends the probe: the key is absent.
            let empty = ctrls.match_empty();
            if !empty.is_empty() {
                let (g, i) = match first_deleted {
                    Some(slot) => {
                        self.growth_left += 1;
                        slot
                    }
                    None => (g, empty.first()),
                };
                if self.growth_left == 0 {
                    return PutSlot::Full;
                }
                let elem = unsafe { claim_slot(typ, g, i, hash, key) };
                self.growth_left -= 1;
                self.used += 1;
                return PutSlot::Inserted(elem);
            }

            if first_deleted.is_none() {
                let deleted = ctrls.match_empty_or_deleted();
                if !deleted.is_empty() {
                    first_deleted = Some((g, deleted.first()));
                }
            }
            seq = seq.next();
        }
    }

    /// Places a key known to be absent, moving `key` and `elem` in. For
    /// indirect storage they are the boxes themselves.
    ///
    /// # Safety
    /// `key` and `elem` must be live values (or boxes) of the slot types, and
    /// the key must not already be present.
    pub(crate) unsafe fn unchecked_put_slot(
        &mut self,
        typ: &MapType,
        hash: u64,
        key: *mut u8,
        elem: *mut u8,
    ) {
        if self.growth_left == 0 {
            fatal(Error::Fatal("invariant violated: growth_left is unexpectedly 0"));
        }
        let mut seq = ProbeSeq::new(hash, self.groups.length_mask);
        loop {
            let g = self.groups.group(typ, seq.offset);
            let free = unsafe { g.ctrls().match_empty_or_deleted() };
            if !free.is_empty() {
                let i = free.first();
                unsafe {
                    let slot_key = g.key(typ, i);
                    if typ.indirect_key() {
                        *(slot_key as *mut *mut u8) = key;
                    } else {
                        mem::typed_memmove(typ.key, slot_key, key);
                    }
                    let slot_elem = g.elem(typ, i);
                    if typ.indirect_elem() {
                        *(slot_elem as *mut *mut u8) = elem;
                    } else {
                        mem::typed_memmove(typ.elem, slot_elem, elem);
                    }
                    g.ctrls().set(i, h2(hash));
                }
                self.growth_left -= 1;
                self.used += 1;
                return;
            }
            seq = seq.next();
        }
    }

    /// # Safety
    /// As [`Table::get_with_key`].
    pub(crate) unsafe fn delete<K: SlotKey>(&mut self, typ: &MapType, hash: u64, key: &K) -> Deleted {
        let mut seq = ProbeSeq::new(hash, self.groups.length_mask);
        loop {
            let g = self.groups.group(typ, seq.offset);
            let ctrls = unsafe { *g.ctrls() };
            for i in ctrls.match_h2(h2(hash)) {
                let stored = unsafe { g.key_value(typ, i) };
                if !unsafe { key.matches(typ, stored) } {
                    continue;
                }
                self.used -= 1;
                unsafe { clear_slot(typ, g, i) };

                // A group with an empty slot never ended a probe past it, so
                // this slot can become empty again. Otherwise a probe may
                // continue through here and it must stay occupied.
                if !ctrls.match_empty().is_empty() {
                    unsafe { g.ctrls().set(i, CTRL_EMPTY) };
                    self.growth_left += 1;
                    return Deleted::Emptied;
                }
                unsafe { g.ctrls().set(i, CTRL_DELETED) };
                return Deleted::Tombstoned;
            }
            if !ctrls.match_empty().is_empty() {
                return Deleted::Missing;
            }
            seq = seq.next();
        }
    }

    /// Empties every slot, dropping tombstones too.
    ///
    /// # Safety
    /// The table must belong to a map of `typ`.
    pub(crate) unsafe fn clear(&mut self, typ: &MapType) {
        let max_growth_left = self.max_growth_left();
        if self.used == 0 && self.growth_left == max_growth_left {
            return;
        }
        for i in 0..self.groups.len() {
            let g = self.groups.group(typ, i);
            unsafe {
                if !g.ctrls().match_full().is_empty() {
                    g.release_boxes(typ);
                    mem::typed_memclr(typ.group, g.data);
                }
                g.ctrls().set_empty();
            }
        }
        self.used = 0;
        self.growth_left = max_growth_left;
    }

    /// Calls `f` with the key and element values of every full slot.
    ///
    /// # Safety
    /// The table must belong to a map of `typ`.
    pub(crate) unsafe fn for_each(&self, typ: &MapType, mut f: impl FnMut(*mut u8, *mut u8)) {
        for i in 0..self.groups.len() {
            let g = self.groups.group(typ, i);
            let ctrls = unsafe { *g.ctrls() };
            for slot in ctrls.match_full() {
                unsafe { f(g.key_value(typ, slot), g.elem_value(typ, slot)) };
            }
        }
    }

    /// Moves every entry into a larger table with the same directory position.
    /// `self` keeps its groups, which no longer own any boxes.
    ///
    /// # Safety
    /// The table must belong to a map of `typ` hashed with `seed`.
    pub(crate) unsafe fn grown(&self, typ: &MapType, seed: u64, capacity: u64) -> Box<Table> {
        let mut grown = Table::new(typ, capacity, self.index, self.local_depth);
        unsafe {
            self.for_each(typ, |key, elem| {
                let hash = (typ.hasher)(key, seed);
                grown.unchecked_put_slot(typ, hash, key, elem);
            })
        };
        grown
    }

    /// Moves every entry into two full-size tables one level deeper, routed
    /// by the next hash bit below the directory's.
    ///
    /// # Safety
    /// As [`Table::grown`].
    pub(crate) unsafe fn split(&self, typ: &MapType, seed: u64) -> (Box<Table>, Box<Table>) {
        let local_depth = self.local_depth + 1;
        let mut left = Table::new(typ, MAX_TABLE_CAPACITY, -1, local_depth);
        let mut right = Table::new(typ, MAX_TABLE_CAPACITY, -1, local_depth);
        let mask = local_depth_mask(local_depth);
        unsafe {
            self.for_each(typ, |key, elem| {
                let hash = (typ.hasher)(key, seed);
                if hash & mask == 0 {
                    left.unchecked_put_slot(typ, hash, key, elem);
                } else {
                    right.unchecked_put_slot(typ, hash, key, elem);
                }
            })
        };
        (left, right)
    }

    /// Deep copy with its own groups and boxes.
    ///
    /// # Safety
    /// The table must belong to a map of `typ`.
    pub(crate) unsafe fn clone_table(&self, typ: &MapType) -> Box<Table> {
        let groups = Groups::new(typ, self.groups.len());
        for i in 0..self.groups.len() {
            unsafe { self.groups.group(typ, i).clone_into(typ, groups.group(typ, i)) };
        }
        Box::new(Table {
            used: self.used,
            capacity: self.capacity,
            growth_left: self.growth_left,
            local_depth: self.local_depth,
            index: self.index,
            groups,
        })
    }

    /// Frees the groups only; the entries' boxes must have moved elsewhere.
    ///
    /// # Safety
    /// Nothing may reference the table afterwards.
    pub(crate) unsafe fn free_storage(mut self: Box<Self>, typ: &MapType) {
        unsafe { self.groups.free(typ) };
    }

    /// Frees the groups and every box the entries own.
    ///
    /// # Safety
    /// Nothing may reference the table or its entries afterwards.
    pub(crate) unsafe fn release(self: Box<Self>, typ: &MapType) {
        for i in 0..self.groups.len() {
            unsafe { self.groups.group(typ, i).release_boxes(typ) };
        }
        unsafe { self.free_storage(typ) };
    }
}

/// Hash bit that separates the two halves of a split at `local_depth`.
pub(crate) fn local_depth_mask(local_depth: u8) -> u64 {
    1 << (64 - local_depth as u32)
}

/// Boxes indirect fields, stores the key and marks slot `i` full.
/// Returns the address of the (zeroed) element value.
///
/// # Safety
/// Slot `i` of `g` must be empty or deleted.
pub(crate) unsafe fn claim_slot<K: SlotKey>(
    typ: &MapType,
    g: GroupRef,
    i: usize,
    hash: u64,
    key: &K,
) -> *mut u8 {
    let mut slot_key = g.key(typ, i);
    let mut slot_elem = g.elem(typ, i);
    unsafe {
        if typ.indirect_key() {
            let boxed = mem::new_object(typ.key);
            *(slot_key as *mut *mut u8) = boxed;
            slot_key = boxed;
        }
        if typ.indirect_elem() {
            let boxed = mem::new_object(typ.elem);
            *(slot_elem as *mut *mut u8) = boxed;
            slot_elem = boxed;
        }
        key.store(typ, slot_key);
        own_key(typ, slot_key);
        g.ctrls().set(i, h2(hash));
    }
    slot_elem
}

/// Rewrites a stored key that equals `key` but may differ in its bits, such
/// as `-0.0` against `+0.0`. Keys that need no update are left alone.
///
/// # Safety
/// `stored` must point to a full slot's key value that equals `key`.
pub(crate) unsafe fn update_key<K: SlotKey>(typ: &MapType, stored: *mut u8, key: &K) {
    if !typ.need_key_update() {
        return;
    }
    if !typ.key_owns_data() {
        unsafe { key.store(typ, stored) };
        return;
    }
    // Owning keys are two words. The old data goes last: `key` may point into it.
    let mut old = [0usize; 2];
    let old_ptr = old.as_mut_ptr() as *mut u8;
    debug_assert!(typ.key.size <= std::mem::size_of_val(&old));
    unsafe {
        mem::memmove(old_ptr, stored, typ.key.size);
        key.store(typ, stored);
        own_key(typ, stored);
        release_key(typ, old_ptr);
    }
}

/// Drops the key and element of slot `i`, leaving the control byte alone.
///
/// # Safety
/// Slot `i` of `g` must be full.
pub(crate) unsafe fn clear_slot(typ: &MapType, g: GroupRef, i: usize) {
    let slot_key = g.key(typ, i);
    let slot_elem = g.elem(typ, i);
    unsafe {
        release_key(typ, g.key_value(typ, i));
        release_elem(typ, g.elem_value(typ, i));
        if typ.indirect_key() {
            release_box(typ.key, slot_key);
        } else if typ.key.has_pointers() {
            mem::typed_memclr(typ.key, slot_key);
        }
        if typ.indirect_elem() {
            release_box(typ.elem, slot_elem);
        } else {
            mem::typed_memclr(typ.elem, slot_elem);
        }
    }
}

/// Number of full slots in `g`, used by consistency checks.
pub(crate) unsafe fn full_slots(g: GroupRef) -> usize {
    let ctrls = unsafe { *g.ctrls() };
    (0..GROUP_SLOTS).filter(|&i| is_full(ctrls.get(i))).count()
}
