use std::fmt;

use crate::abi::type_of;
use crate::runtime::mem;

/// String fat pointer: `{ ptr, len }`.
///
/// The bytes are immutable once the header exists and need not be UTF-8. A
/// header built by [`StrHeader::view`] borrows them; maps own the bytes of
/// their string keys.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StrHeader {
    pub ptr: *const u8,
    pub len: usize,
}

impl StrHeader {
    pub const fn empty() -> Self {
        Self {
            ptr: std::ptr::null(),
            len: 0,
        }
    }

    /// Zero-copy view of `s`. The header is only valid while `s` is.
    pub fn view(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }

    /// Zero-copy view of arbitrary bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    /// `ptr` must be valid for `len` bytes for the chosen lifetime.
    pub unsafe fn as_bytes<'a>(&self) -> &'a [u8] {
        if self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// # Safety
    /// As [`StrHeader::as_bytes`], and the bytes must be UTF-8.
    pub unsafe fn as_str<'a>(&self) -> &'a str {
        unsafe { std::str::from_utf8_unchecked(self.as_bytes()) }
    }

    /// # Safety
    /// As [`StrHeader::as_bytes`].
    pub unsafe fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(unsafe { self.as_bytes() }).into_owned()
    }
}

impl Default for StrHeader {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for StrHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrHeader")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// Points the header at `p` to a fresh heap copy of its bytes.
///
/// # Safety
/// `p` must point to a header whose bytes are readable.
pub(crate) unsafe fn own_bytes(p: *mut u8) {
    let header = unsafe { &mut *(p as *mut StrHeader) };
    if header.len == 0 {
        *header = StrHeader::empty();
        return;
    }
    let copy = mem::new_array(type_of::<u8>(), header.len);
    unsafe { mem::memmove(copy, header.ptr, header.len) };
    header.ptr = copy;
}

/// Frees bytes taken by [`own_bytes`] and empties the header.
///
/// # Safety
/// The header at `p` must hold bytes from [`own_bytes`] (or be empty), and no
/// copy of it may be read again.
pub(crate) unsafe fn release_bytes(p: *mut u8) {
    let header = unsafe { &mut *(p as *mut StrHeader) };
    if header.len != 0 {
        unsafe { mem::free_array(type_of::<u8>(), header.ptr as *mut u8, header.len) };
    }
    *header = StrHeader::empty();
}
