//! The map header: a directory of tables indexed by the top bits of the hash
//! (extendible hashing), or a single group for maps of up to eight entries.
//!
//! # Layout
//!
//! - `dir_len == 0`: small map, `dir_ptr` is one group (or null before the
//!   first insert)
//! - `dir_len > 0`: `dir_ptr` is `dir_len` table pointers; a table with local
//!   depth `d` appears `2^(global_depth - d)` times in a row starting at its
//!   `index`
//!
//! Nothing here locks. Concurrent use is a caller error that debug builds (and
//! the `race-detector` feature) detect on a best-effort basis.

use std::sync::atomic::AtomicU8;

use tracing::debug;

use super::group::{GroupRef, h2, is_full};
use super::key::SlotKey;
use super::table::{
    self, Deleted, MAX_AVG_GROUP_LOAD, MAX_TABLE_CAPACITY, PutSlot, Table, claim_slot, clear_slot,
    update_key,
};
use crate::abi::{GROUP_SLOTS, MapType, PTR_SIZE};
use crate::error::Error;
use crate::runtime::{fatal, heap, mem, rand_u64};

#[repr(C)]
#[derive(Debug)]
pub struct Map {
    pub(crate) used: u64,
    pub(crate) seed: u64,
    pub(crate) dir_ptr: *mut u8,
    pub(crate) dir_len: usize,
    pub(crate) global_depth: u8,
    pub(crate) global_shift: u8,
    pub(crate) writing: AtomicU8,
    /// Some table may hold tombstones, so a clear cannot be skipped.
    pub(crate) tombstone_possible: bool,
    pub(crate) clear_seq: u64,
}

/// Shape of a map, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapStats {
    pub len: u64,
    pub small: bool,
    pub directory_len: usize,
    pub global_depth: u8,
    pub tables: usize,
    pub capacity: u64,
    pub full_slots: u64,
}

impl Map {
    /// Creates a map sized for `hint` entries. Hints of a group or less (and
    /// hints too large to allocate up front) give a lazily allocated small map.
    /// Presized maps do not grow until the hint is exceeded, although
    /// tombstones left by deletes use up room and can force a rehash sooner.
    pub fn new(typ: &MapType, hint: u64) -> Box<Map> {
        let mut m = Box::new(Map {
            used: 0,
            seed: rand_u64(),
            dir_ptr: std::ptr::null_mut(),
            dir_len: 0,
            global_depth: 0,
            global_shift: 64,
            writing: AtomicU8::new(0),
            tombstone_possible: false,
            clear_seq: 0,
        });
        if hint <= GROUP_SLOTS as u64 {
            return m;
        }

        let Some(target_capacity) = hint
            .checked_mul(GROUP_SLOTS as u64)
            .map(|c| c / MAX_AVG_GROUP_LOAD)
        else {
            return m;
        };
        let Some(dir_size) = target_capacity
            .div_ceil(MAX_TABLE_CAPACITY)
            .checked_next_power_of_two()
        else {
            return m;
        };
        let too_large = dir_size
            .checked_mul(MAX_TABLE_CAPACITY)
            .and_then(|slots| slots.checked_mul(typ.slot_size as u64))
            .is_none_or(|bytes| bytes > isize::MAX as u64);
        if too_large {
            return m;
        }

        m.global_depth = dir_size.trailing_zeros() as u8;
        m.global_shift = 64 - m.global_depth;
        let directory = new_directory(dir_size as usize);
        for i in 0..dir_size as usize {
            let t = Table::new(typ, target_capacity / dir_size, i as isize, m.global_depth);
            unsafe { *directory.add(i) = Box::into_raw(t) };
        }
        m.dir_ptr = directory as *mut u8;
        m.dir_len = dir_size as usize;
        debug!(map = typ.typ.name, hint, tables = dir_size, "presized map");
        m
    }

    pub fn len(&self) -> u64 {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn is_small(&self) -> bool {
        self.dir_len == 0
    }

    pub fn clear_seq(&self) -> u64 {
        self.clear_seq
    }

    fn directory(&self) -> *mut *mut Table {
        self.dir_ptr as *mut *mut Table
    }

    fn directory_index(&self, hash: u64) -> usize {
        if self.dir_len == 1 {
            return 0;
        }
        (hash >> self.global_shift) as usize
    }

    unsafe fn directory_at(&self, i: usize) -> *mut Table {
        unsafe { *self.directory().add(i) }
    }

    unsafe fn directory_set(&mut self, i: usize, t: *mut Table) {
        unsafe { *self.directory().add(i) = t };
    }

    fn small_group(&self) -> GroupRef {
        GroupRef::new(self.dir_ptr)
    }

    /// Calls `f` once per distinct table, in directory order.
    unsafe fn for_each_table(&self, mut f: impl FnMut(*mut Table)) {
        let mut last = std::ptr::null_mut();
        for i in 0..self.dir_len {
            let t = unsafe { self.directory_at(i) };
            if t == last {
                continue;
            }
            last = t;
            f(t);
        }
    }

    /// Looks `key` up, returning the addresses of the stored key and element
    /// values.
    ///
    /// # Safety
    /// `typ` must be the map's type and `key` a live key of it.
    pub(crate) unsafe fn get_with_key<K: SlotKey>(
        &self,
        typ: &MapType,
        key: &K,
    ) -> Option<(*mut u8, *mut u8)> {
        if self.used == 0 {
            if typ.hash_might_panic() {
                unsafe { key.hash(typ, self.seed) };
            }
            return None;
        }
        self.check_not_writing("concurrent map read and map write");
        let hash = unsafe { key.hash(typ, self.seed) };
        if self.dir_len == 0 {
            return unsafe { self.get_small(typ, hash, key) };
        }
        let t = unsafe { &*self.directory_at(self.directory_index(hash)) };
        unsafe { t.get_with_key(typ, hash, key) }
    }

    pub(crate) unsafe fn get_small<K: SlotKey>(
        &self,
        typ: &MapType,
        hash: u64,
        key: &K,
    ) -> Option<(*mut u8, *mut u8)> {
        let g = self.small_group();
        let ctrls = unsafe { *g.ctrls() };
        for i in ctrls.match_h2(h2(hash)) {
            let stored = unsafe { g.key_value(typ, i) };
            if unsafe { key.matches(typ, stored) } {
                return Some((stored, unsafe { g.elem_value(typ, i) }));
            }
        }
        None
    }

    /// Returns the element slot for `key`, inserting the key with a zeroed
    /// element when absent.
    ///
    /// # Safety
    /// As [`Map::get_with_key`].
    pub(crate) unsafe fn put_slot<K: SlotKey>(&mut self, typ: &MapType, key: &K) -> *mut u8 {
        let hash = unsafe { key.hash(typ, self.seed) };
        self.begin_write();

        if self.dir_ptr.is_null() {
            self.grow_to_small(typ);
        }
        if self.dir_len == 0 {
            if self.used < GROUP_SLOTS as u64 {
                let elem = unsafe { self.put_slot_small(typ, hash, key) };
                self.end_write();
                return elem;
            }
            unsafe { self.grow_to_table(typ) };
        }

        let elem = loop {
            let t = unsafe { self.directory_at(self.directory_index(hash)) };
            match unsafe { (*t).put_slot(typ, hash, key) } {
                PutSlot::Existing(elem) => break elem,
                PutSlot::Inserted(elem) => {
                    self.used += 1;
                    break elem;
                }
                // The directory may have changed; look the table up again.
                PutSlot::Full => unsafe { self.rehash(typ, t) },
            }
        };
        self.end_write();
        elem
    }

    unsafe fn put_slot_small<K: SlotKey>(&mut self, typ: &MapType, hash: u64, key: &K) -> *mut u8 {
        let g = self.small_group();
        let ctrls = unsafe { *g.ctrls() };
        for i in ctrls.match_h2(h2(hash)) {
            let stored = unsafe { g.key_value(typ, i) };
            if unsafe { key.matches(typ, stored) } {
                unsafe { update_key(typ, stored, key) };
                return unsafe { g.elem_value(typ, i) };
            }
        }
        // Small maps never hold tombstones, so any free slot is empty.
        let free = ctrls.match_empty_or_deleted();
        if free.is_empty() {
            fatal(Error::Fatal("no space left in small map"));
        }
        let elem = unsafe { claim_slot(typ, g, free.first(), hash, key) };
        self.used += 1;
        elem
    }

    fn grow_to_small(&mut self, typ: &MapType) {
        let data = mem::new_array(typ.group, 1);
        unsafe { GroupRef::new(data).ctrls().set_empty() };
        self.dir_ptr = data;
    }

    unsafe fn grow_to_table(&mut self, typ: &MapType) {
        let mut t = Table::new(typ, 2 * GROUP_SLOTS as u64, 0, 0);
        let g = self.small_group();
        let ctrls = unsafe { *g.ctrls() };
        for i in 0..GROUP_SLOTS {
            if !is_full(ctrls.get(i)) {
                continue;
            }
            unsafe {
                let key = g.key_value(typ, i);
                let elem = g.elem_value(typ, i);
                let hash = (typ.hasher)(key, self.seed);
                t.unchecked_put_slot(typ, hash, key, elem);
            }
        }

        let directory = new_directory(1);
        unsafe {
            *directory = Box::into_raw(t);
            mem::free_array(typ.group, self.dir_ptr, 1);
        }
        self.dir_ptr = directory as *mut u8;
        self.dir_len = 1;
        self.global_depth = 0;
        self.global_shift = 64;
        debug!(map = typ.typ.name, len = self.used, "promoted small map to table");
    }

    /// Removes `key`, returning whether it was present.
    ///
    /// # Safety
    /// As [`Map::get_with_key`].
    pub(crate) unsafe fn delete<K: SlotKey>(&mut self, typ: &MapType, key: &K) -> bool {
        if self.used == 0 {
            if typ.hash_might_panic() {
                unsafe { key.hash(typ, self.seed) };
            }
            return false;
        }
        let hash = unsafe { key.hash(typ, self.seed) };
        self.begin_write();

        let removed = if self.dir_len == 0 {
            unsafe { self.delete_small(typ, hash, key) }
        } else {
            let t = unsafe { self.directory_at(self.directory_index(hash)) };
            match unsafe { (*t).delete(typ, hash, key) } {
                Deleted::Missing => false,
                Deleted::Emptied => true,
                Deleted::Tombstoned => {
                    self.tombstone_possible = true;
                    true
                }
            }
        };
        if removed {
            self.used -= 1;
            if self.used == 0 {
                // Fresh seed so an emptied map does not keep a learnable layout.
                self.seed = rand_u64();
            }
        }
        self.end_write();
        removed
    }

    unsafe fn delete_small<K: SlotKey>(&mut self, typ: &MapType, hash: u64, key: &K) -> bool {
        let g = self.small_group();
        let ctrls = unsafe { *g.ctrls() };
        for i in ctrls.match_h2(h2(hash)) {
            let stored = unsafe { g.key_value(typ, i) };
            if unsafe { key.matches(typ, stored) } {
                unsafe {
                    clear_slot(typ, g, i);
                    g.ctrls().set(i, super::group::CTRL_EMPTY);
                }
                return true;
            }
        }
        false
    }

    /// Removes every entry, keeping the allocated tables.
    ///
    /// # Safety
    /// `typ` must be the map's type.
    pub unsafe fn clear(&mut self, typ: &MapType) {
        if self.used == 0 && !self.tombstone_possible {
            return;
        }
        self.begin_write();
        if self.dir_len == 0 {
            let g = self.small_group();
            unsafe {
                g.release_boxes(typ);
                mem::typed_memclr(typ.group, g.data);
                g.ctrls().set_empty();
            }
        } else {
            unsafe { self.for_each_table(|t| (*t).clear(typ)) };
        }
        let cleared = self.used;
        self.used = 0;
        self.tombstone_possible = false;
        self.clear_seq += 1;
        self.seed = rand_u64();
        debug!(map = typ.typ.name, cleared, clear_seq = self.clear_seq, "cleared map");
        self.end_write();
    }

    /// Deep copy: the clone shares no groups, tables or boxes with `self`.
    ///
    /// # Safety
    /// `typ` must be the map's type.
    pub unsafe fn clone_map(&self, typ: &MapType) -> Box<Map> {
        self.check_not_writing("concurrent map clone and map write");
        let mut m = Box::new(Map {
            used: self.used,
            seed: self.seed,
            dir_ptr: std::ptr::null_mut(),
            dir_len: self.dir_len,
            global_depth: self.global_depth,
            global_shift: self.global_shift,
            writing: AtomicU8::new(0),
            tombstone_possible: self.tombstone_possible,
            clear_seq: self.clear_seq,
        });
        if self.dir_ptr.is_null() {
            return m;
        }
        if self.dir_len == 0 {
            let data = mem::new_array(typ.group, 1);
            unsafe { self.small_group().clone_into(typ, GroupRef::new(data)) };
            m.dir_ptr = data;
            return m;
        }

        let directory = new_directory(self.dir_len);
        let mut last_old = std::ptr::null_mut();
        let mut last_new = std::ptr::null_mut();
        for i in 0..self.dir_len {
            unsafe {
                let t = self.directory_at(i);
                if t != last_old {
                    last_old = t;
                    last_new = Box::into_raw((*t).clone_table(typ));
                }
                *directory.add(i) = last_new;
            }
        }
        m.dir_ptr = directory as *mut u8;
        debug!(map = typ.typ.name, len = self.used, directory = self.dir_len, "cloned map");
        m
    }

    /// Calls `f` with the key and element values of every entry, in no
    /// particular order. `f` must not modify the map.
    ///
    /// # Safety
    /// `typ` must be the map's type.
    pub(crate) unsafe fn for_each(&self, typ: &MapType, mut f: impl FnMut(*mut u8, *mut u8)) {
        if self.used == 0 {
            return;
        }
        if self.dir_len == 0 {
            let g = self.small_group();
            let ctrls = unsafe { *g.ctrls() };
            for i in ctrls.match_full() {
                unsafe { f(g.key_value(typ, i), g.elem_value(typ, i)) };
            }
            return;
        }
        unsafe { self.for_each_table(|t| (*t).for_each(typ, &mut f)) };
    }

    /// # Safety
    /// `typ` must be the map's type.
    pub unsafe fn stats(&self, typ: &MapType) -> MapStats {
        let mut stats = MapStats {
            len: self.used,
            small: self.dir_len == 0,
            directory_len: self.dir_len,
            global_depth: self.global_depth,
            ..MapStats::default()
        };
        if self.dir_len == 0 {
            if !self.dir_ptr.is_null() {
                stats.capacity = GROUP_SLOTS as u64;
                stats.full_slots = unsafe { table::full_slots(self.small_group()) } as u64;
            }
            return stats;
        }
        unsafe {
            self.for_each_table(|t| {
                let t = &*t;
                stats.tables += 1;
                stats.capacity += t.capacity as u64;
                for i in 0..t.groups.len() {
                    stats.full_slots += table::full_slots(t.groups.group(typ, i)) as u64;
                }
            })
        };
        stats
    }

    /// Frees everything the map owns, including the header.
    ///
    /// # Safety
    /// `typ` must be the map's type and nothing may use the map afterwards.
    pub unsafe fn release(self: Box<Self>, typ: &MapType) {
        if self.dir_ptr.is_null() {
            return;
        }
        if self.dir_len == 0 {
            let g = self.small_group();
            unsafe {
                g.release_boxes(typ);
                mem::free_array(typ.group, g.data, 1);
            }
            return;
        }
        unsafe {
            self.for_each_table(|t| Box::from_raw(t).release(typ));
            free_directory(self.directory(), self.dir_len);
        }
    }

    unsafe fn rehash(&mut self, typ: &MapType, t: *mut Table) {
        let capacity = 2 * unsafe { (*t).capacity } as u64;
        if capacity <= MAX_TABLE_CAPACITY {
            let grown = unsafe { (*t).grown(typ, self.seed, capacity) };
            debug!(map = typ.typ.name, capacity, index = grown.index, "grew table");
            unsafe { self.replace_table(Box::into_raw(grown)) };
        } else {
            let (left, right) = unsafe { (*t).split(typ, self.seed) };
            debug!(
                map = typ.typ.name,
                local_depth = left.local_depth,
                left = left.used,
                right = right.used,
                "split table"
            );
            unsafe { self.install_table_split(t, left, right) };
        }
        unsafe { Box::from_raw(t).free_storage(typ) };
    }

    /// Points every directory entry of `nt`'s range at `nt`.
    unsafe fn replace_table(&mut self, nt: *mut Table) {
        let (index, local_depth) = unsafe { ((*nt).index, (*nt).local_depth) };
        let entries = 1usize << (self.global_depth - local_depth);
        for i in 0..entries {
            unsafe { self.directory_set(index as usize + i, nt) };
        }
    }

    unsafe fn install_table_split(&mut self, old: *mut Table, left: Box<Table>, right: Box<Table>) {
        if unsafe { (*old).local_depth } == self.global_depth {
            let new_len = self.dir_len * 2;
            let new_dir = new_directory(new_len);
            for i in 0..self.dir_len {
                unsafe {
                    let t = self.directory_at(i);
                    *new_dir.add(2 * i) = t;
                    *new_dir.add(2 * i + 1) = t;
                    // Each table's first entry moves once.
                    if (*t).index == i as isize {
                        (*t).index = 2 * i as isize;
                    }
                }
            }
            unsafe { free_directory(self.directory(), self.dir_len) };
            self.global_depth += 1;
            self.global_shift -= 1;
            self.dir_ptr = new_dir as *mut u8;
            self.dir_len = new_len;
            debug!(directory = new_len, global_depth = self.global_depth, "doubled directory");
        }

        let left = Box::into_raw(left);
        let right = Box::into_raw(right);
        unsafe {
            (*left).index = (*old).index;
            self.replace_table(left);
            let entries = 1isize << (self.global_depth - (*left).local_depth);
            (*right).index = (*left).index + entries;
            self.replace_table(right);
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(debug_assertions, feature = "race-detector"))] {
        use std::sync::atomic::Ordering;

        impl Map {
            pub(super) fn begin_write(&self) {
                if self.writing.fetch_xor(1, Ordering::Relaxed) != 0 {
                    fatal(Error::Fatal("concurrent map writes"));
                }
            }

            pub(super) fn end_write(&self) {
                if self.writing.fetch_xor(1, Ordering::Relaxed) == 0 {
                    fatal(Error::Fatal("concurrent map writes"));
                }
            }

            pub(super) fn check_not_writing(&self, what: &'static str) {
                if self.writing.load(Ordering::Relaxed) != 0 {
                    fatal(Error::Fatal(what));
                }
            }
        }
    } else {
        impl Map {
            pub(super) fn begin_write(&self) {}

            pub(super) fn end_write(&self) {}

            pub(super) fn check_not_writing(&self, _what: &'static str) {}
        }
    }
}

fn new_directory(len: usize) -> *mut *mut Table {
    heap()
        .allocate_zeroed(len * PTR_SIZE, PTR_SIZE)
        .unwrap_or_else(|err| fatal(err)) as *mut *mut Table
}

unsafe fn free_directory(directory: *mut *mut Table, len: usize) {
    unsafe { heap().deallocate(directory as *mut u8, len * PTR_SIZE, PTR_SIZE) };
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::abi::map_type_of;
    use crate::maps::key::ErasedKey;

    unsafe fn put(m: &mut Map, typ: &MapType, k: u64, v: u64) {
        let elem = unsafe { m.put_slot(typ, &ErasedKey(&k as *const u64 as *const u8)) };
        unsafe { *(elem as *mut u64) = v };
    }

    unsafe fn get(m: &Map, typ: &MapType, k: u64) -> Option<u64> {
        unsafe { m.get_with_key(typ, &ErasedKey(&k as *const u64 as *const u8)) }
            .map(|(_, e)| unsafe { *(e as *const u64) })
    }

    unsafe fn del(m: &mut Map, typ: &MapType, k: u64) -> bool {
        unsafe { m.delete(typ, &ErasedKey(&k as *const u64 as *const u8)) }
    }

    #[test]
    fn small_map_promotes_on_ninth_key() {
        let typ = map_type_of::<u64, u64>();
        let mut m = Map::new(typ, 0);
        assert!(m.dir_ptr.is_null());
        unsafe {
            for k in 0..8 {
                put(&mut m, typ, k, k * 2);
            }
            assert!(m.is_small());
            put(&mut m, typ, 8, 16);
            assert!(!m.is_small());
            assert_eq!(m.len(), 9);
            for k in 0..9 {
                assert_eq!(get(&m, typ, k), Some(k * 2));
            }
            let stats = m.stats(typ);
            assert_eq!(stats.tables, 1);
            assert_eq!(stats.full_slots, 9);
            m.release(typ);
        }
    }

    #[test]
    fn many_keys_split_tables_and_double_the_directory() {
        let typ = map_type_of::<u64, u64>();
        let mut m = Map::new(typ, 0);
        unsafe {
            for k in 0..5000 {
                put(&mut m, typ, k, !k);
            }
            let stats = m.stats(typ);
            assert!(stats.directory_len > 1);
            assert!(stats.tables > 1);
            assert_eq!(stats.directory_len, 1 << stats.global_depth);
            assert_eq!(stats.full_slots, 5000);
            for k in 0..5000 {
                assert_eq!(get(&m, typ, k), Some(!k));
            }
            assert_eq!(get(&m, typ, 5000), None);
            m.release(typ);
        }
    }

    #[test]
    fn directory_ranges_are_consistent() {
        let typ = map_type_of::<u64, u64>();
        let mut m = Map::new(typ, 0);
        unsafe {
            for k in 0..20_000 {
                put(&mut m, typ, k, k);
            }
            let mut i = 0;
            while i < m.dir_len {
                let t = &*m.directory_at(i);
                assert_eq!(t.index, i as isize);
                let span = 1usize << (m.global_depth - t.local_depth);
                for j in i..i + span {
                    assert!(std::ptr::eq(m.directory_at(j), t));
                }
                i += span;
            }
            m.release(typ);
        }
    }

    #[test]
    fn presized_map_starts_with_tables() {
        let typ = map_type_of::<u64, u64>();
        let m = Map::new(typ, 3000);
        let stats = unsafe { m.stats(typ) };
        assert_eq!(stats.directory_len, 4);
        assert_eq!(stats.global_depth, 2);
        assert!(stats.capacity >= 3000);
        unsafe { m.release(typ) };
    }

    #[test]
    fn presized_map_holds_its_hint_without_growing() {
        let typ = map_type_of::<u64, u64>();
        let mut m = Map::new(typ, 3000);
        unsafe {
            let before = m.stats(typ);
            for k in 0..3000 {
                put(&mut m, typ, k, k);
            }
            let after = m.stats(typ);
            assert_eq!(after.tables, before.tables);
            assert_eq!(after.capacity, before.capacity);
            assert_eq!(after.len, 3000);
            m.release(typ);
        }
    }

    #[test]
    fn deletes_reset_the_seed_when_empty() {
        let typ = map_type_of::<u64, u64>();
        let mut m = Map::new(typ, 0);
        unsafe {
            for k in 0..100 {
                put(&mut m, typ, k, k);
            }
            for k in 0..100 {
                assert!(del(&mut m, typ, k));
            }
            assert!(!del(&mut m, typ, 3));
            assert_eq!(m.len(), 0);
            put(&mut m, typ, 7, 70);
            assert_eq!(get(&m, typ, 7), Some(70));
            m.release(typ);
        }
    }

    #[test]
    fn clear_keeps_tables_and_bumps_the_sequence() {
        let typ = map_type_of::<u64, u64>();
        let mut m = Map::new(typ, 0);
        unsafe {
            for k in 0..2000 {
                put(&mut m, typ, k, k);
            }
            let before = m.stats(typ);
            m.clear(typ);
            let after = m.stats(typ);
            assert_eq!(after.len, 0);
            assert_eq!(after.full_slots, 0);
            assert_eq!(after.tables, before.tables);
            assert_eq!(m.clear_seq(), 1);
            assert_eq!(get(&m, typ, 5), None);
            m.clear(typ);
            assert_eq!(m.clear_seq(), 1);
            m.release(typ);
        }
    }

    #[test]
    fn clone_is_independent() {
        let typ = map_type_of::<u64, u64>();
        let mut m = Map::new(typ, 0);
        unsafe {
            for k in 0..3000 {
                put(&mut m, typ, k, k);
            }
            let mut c = m.clone_map(typ);
            put(&mut c, typ, 1, 100);
            assert!(del(&mut c, typ, 2));
            assert_eq!(get(&m, typ, 1), Some(1));
            assert_eq!(get(&m, typ, 2), Some(2));
            assert_eq!(c.len(), 2999);
            assert_eq!(c.stats(typ).tables, m.stats(typ).tables);
            c.release(typ);
            m.release(typ);
        }
    }

    #[cfg(feature = "race-detector")]
    #[test]
    #[should_panic(expected = "concurrent map writes")]
    fn writes_during_a_write_are_fatal() {
        use std::sync::atomic::Ordering;

        let typ = map_type_of::<u64, u64>();
        let mut m = Map::new(typ, 0);
        m.writing.store(1, Ordering::Relaxed);
        unsafe { put(&mut m, typ, 1, 1) };
    }

    #[cfg(feature = "race-detector")]
    #[test]
    #[should_panic(expected = "concurrent map read and map write")]
    fn reads_during_a_write_are_fatal() {
        use std::sync::atomic::Ordering;

        let typ = map_type_of::<u64, u64>();
        let mut m = Map::new(typ, 0);
        unsafe { put(&mut m, typ, 1, 1) };
        m.writing.store(1, Ordering::Relaxed);
        unsafe { get(&m, typ, 1) };
    }

    #[test]
    fn interface_keys_own_their_boxes() {
        use crate::eface::Eface;

        let typ = map_type_of::<Eface, u64>();
        let mut m = Map::new(typ, 0);
        unsafe {
            for round in 0..3u64 {
                for k in 0..20u64 {
                    let key = Eface::wrap(&k);
                    let elem = m.put_slot(typ, &ErasedKey(&key as *const Eface as *const u8));
                    *(elem as *mut u64) = k + round;
                }
            }
            assert_eq!(m.len(), 20);
            let k = 4u64;
            let key = Eface::wrap(&k);
            let (stored, elem) = m
                .get_with_key(typ, &ErasedKey(&key as *const Eface as *const u8))
                .unwrap();
            assert_ne!((*(stored as *const Eface)).data, key.data);
            assert_eq!(*(elem as *const u64), 6);
            assert!(m.delete(typ, &ErasedKey(&key as *const Eface as *const u8)));
            m.clear(typ);
            let c = m.clone_map(typ);
            assert_eq!(c.len(), 0);
            c.release(typ);
            m.release(typ);
        }
    }

    #[test]
    fn indirect_elements_are_boxed_per_map() {
        let typ = map_type_of::<u64, [u64; 32]>();
        assert!(typ.indirect_elem());
        let mut m = Map::new(typ, 0);
        unsafe {
            let k = 4u64;
            let key = ErasedKey(&k as *const u64 as *const u8);
            let elem = m.put_slot(typ, &key) as *mut [u64; 32];
            (*elem)[31] = 9;
            let c = m.clone_map(typ);
            let (_, copied) = c.get_with_key(typ, &key).unwrap();
            assert_ne!(copied as *mut [u64; 32], elem);
            assert_eq!((*(copied as *const [u64; 32]))[31], 9);
            c.release(typ);
            assert!(m.delete(typ, &key));
            m.release(typ);
        }
    }
}
