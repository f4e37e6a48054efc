//! How a lookup key is hashed, compared against a slot and written into one.
//!
//! The probing code in [`super::table`] and [`super::map`] is generic over
//! [`SlotKey`], so the string fast path shares every probe and placement
//! decision with the generic path and only skips the descriptor dispatch.

use crate::abi::MapType;
use crate::runtime::{alg, mem};
use crate::string::StrHeader;

pub(crate) trait SlotKey {
    /// # Safety
    /// The key must be a live value of `typ.key`.
    unsafe fn hash(&self, typ: &MapType, seed: u64) -> u64;

    /// Compares against the key value stored at `stored`.
    ///
    /// # Safety
    /// `stored` must point to a live `typ.key` value.
    unsafe fn matches(&self, typ: &MapType, stored: *const u8) -> bool;

    /// Writes the key into `dst`, which holds (or will hold) a `typ.key`.
    ///
    /// # Safety
    /// `dst` must be valid for a `typ.key` value.
    unsafe fn store(&self, typ: &MapType, dst: *mut u8);
}

/// A key reached through a pointer to a value of the map's key type.
#[derive(Clone, Copy)]
pub(crate) struct ErasedKey(pub(crate) *const u8);

impl SlotKey for ErasedKey {
    unsafe fn hash(&self, typ: &MapType, seed: u64) -> u64 {
        unsafe { (typ.hasher)(self.0, seed) }
    }

    unsafe fn matches(&self, typ: &MapType, stored: *const u8) -> bool {
        unsafe { alg::type_equal(typ.key, self.0, stored) }
    }

    unsafe fn store(&self, typ: &MapType, dst: *mut u8) {
        unsafe { mem::typed_memmove(typ.key, dst, self.0) }
    }
}

/// A string key passed as raw bytes, which need not be UTF-8.
#[derive(Clone, Copy)]
pub(crate) struct StrKey<'a>(pub(crate) &'a [u8]);

impl StrKey<'_> {
    pub(crate) fn bytes(&self) -> &[u8] {
        self.0
    }
}

impl SlotKey for StrKey<'_> {
    unsafe fn hash(&self, _typ: &MapType, seed: u64) -> u64 {
        unsafe { alg::mem_hash(self.0.as_ptr(), self.0.len(), seed) }
    }

    unsafe fn matches(&self, _typ: &MapType, stored: *const u8) -> bool {
        let stored = unsafe { *(stored as *const StrHeader) };
        stored.len == self.0.len()
            && (stored.ptr == self.0.as_ptr() || unsafe { stored.as_bytes() } == self.0)
    }

    unsafe fn store(&self, typ: &MapType, dst: *mut u8) {
        let header = StrHeader::from_bytes(self.0);
        unsafe { mem::typed_memmove(typ.key, dst, &header as *const StrHeader as *const u8) }
    }
}
