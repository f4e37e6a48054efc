//! Slice fat pointers and their type-erased accessors.
//!
//! # Structure
//!
//! - `ptr`: buffer of `cap` elements, null only when `cap == 0`
//! - `len`: number of live elements, `len <= cap`
//! - `cap`: number of elements the buffer holds
//!
//! Buffers come from the installed [`crate::runtime::Allocator`]; a header
//! owns its buffer and nothing tracks sharing between headers. Interface
//! elements own their box: every element up to `cap` holds either no box or
//! one of its own.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;

use tracing::trace;

use crate::abi::{Kind, Type, Typed};
use crate::eface::{self, Eface};
use crate::error::{Error, Result};
use crate::runtime::{fatal, mem};

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SliceHeader {
    pub ptr: *mut u8,
    pub len: usize,
    pub cap: usize,
}

impl SliceHeader {
    pub const fn empty() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            len: 0,
            cap: 0,
        }
    }

    pub fn is_nil(&self) -> bool {
        self.ptr.is_null()
    }

    /// Address of element `index`, unchecked.
    pub fn elem_ptr(&self, elem: &Type, index: usize) -> *mut u8 {
        self.ptr.wrapping_add(index * elem.size)
    }
}

impl Default for SliceHeader {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for SliceHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceHeader")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("cap", &self.cap)
            .finish()
    }
}

/// Applies `f` to the interface elements in `range` of the buffer at `ptr`.
/// Other element types own nothing and are skipped.
unsafe fn for_each_payload(ptr: *mut u8, elem: &Type, range: Range<usize>, f: unsafe fn(*mut u8)) {
    if elem.kind != Kind::Interface || ptr.is_null() {
        return;
    }
    for i in range {
        unsafe { f(ptr.wrapping_add(i * elem.size)) };
    }
}

/// Allocates a zeroed buffer of `cap` elements with `len` of them live.
pub fn make(elem: &Type, len: usize, cap: usize) -> SliceHeader {
    if len > cap {
        fatal(Error::IndexOutOfRange {
            index: len as isize,
            len: cap,
        });
    }
    SliceHeader {
        ptr: mem::new_array(elem, cap),
        len,
        cap,
    }
}

/// Copies the live elements of `src` into a new buffer of exactly `src.len`.
///
/// # Safety
/// `src` must be a valid slice of `elem` values.
pub unsafe fn clone(src: &SliceHeader, elem: &Type) -> SliceHeader {
    let dst = make(elem, src.len, src.len);
    unsafe {
        mem::typed_slice_copy(elem, dst.ptr, dst.len, src.ptr, src.len);
        for_each_payload(dst.ptr, elem, 0..dst.len, eface::copy_payload);
    }
    dst
}

/// Copies `src` into `dst`, reusing `dst`'s buffer when it is large enough and
/// growing it otherwise.
///
/// # Safety
/// Both headers must be valid slices of `elem` values, and `dst` must own its
/// buffer (it may be reallocated) without sharing it with `src`.
pub unsafe fn clone_into(dst: &mut SliceHeader, src: &SliceHeader, elem: &Type) {
    unsafe { for_each_payload(dst.ptr, elem, 0..dst.cap, eface::release_payload) };
    if dst.cap < src.len {
        if dst.is_nil() {
            *dst = make(elem, 0, src.len);
        } else {
            let (ptr, cap) = unsafe { mem::grow_array(elem, dst.ptr, dst.cap, src.len) };
            trace!(elem = elem.name, old_cap = dst.cap, new_cap = cap, "grew clone destination");
            dst.ptr = ptr;
            dst.cap = cap;
        }
    }
    unsafe {
        mem::typed_slice_copy(elem, dst.ptr, src.len, src.ptr, src.len);
        for_each_payload(dst.ptr, elem, 0..src.len, eface::copy_payload);
    }
    dst.len = src.len;
}

/// Stores `value` at `index`, failing on a bad index or a value whose size
/// differs from the element size. An interface element takes its own copy of
/// the stored box and frees the one it held.
///
/// # Safety
/// `slice` must be a valid slice of `elem` values and `value` must be live.
pub unsafe fn try_set_at(
    slice: &SliceHeader,
    index: isize,
    elem: &Type,
    value: Eface,
) -> Result<()> {
    if index < 0 || index as usize >= slice.len {
        return Err(Error::IndexOutOfRange {
            index,
            len: slice.len,
        });
    }
    let actual = value.type_of().map(|t| t.size).unwrap_or(0);
    if actual != elem.size {
        return Err(Error::TypeSizeMismatch {
            expected: elem.size,
            actual,
        });
    }
    let dst = slice.elem_ptr(elem, index as usize);
    if elem.kind != Kind::Interface {
        unsafe { mem::typed_memmove(elem, dst, value.data_ptr()) };
        return Ok(());
    }
    // The old box goes last: `value` may hold a copy of it.
    unsafe {
        let old = *(dst as *const Eface);
        mem::typed_memmove(elem, dst, value.data_ptr());
        eface::copy_payload(dst);
        old.release_box();
    }
    Ok(())
}

/// [`try_set_at`] that aborts on failure.
///
/// # Safety
/// As [`try_set_at`].
pub unsafe fn set_at(slice: &SliceHeader, index: isize, elem: &Type, value: Eface) {
    if let Err(err) = unsafe { try_set_at(slice, index, elem, value) } {
        fatal(err);
    }
}

/// Frees the buffer, with the boxes of interface elements, and resets the
/// header to empty.
///
/// # Safety
/// The buffer must come from this crate's allocator and not be shared.
pub unsafe fn release(slice: &mut SliceHeader, elem: &Type) {
    if !slice.is_nil() {
        unsafe {
            for_each_payload(slice.ptr, elem, 0..slice.cap, eface::release_payload);
            mem::free_array(elem, slice.ptr, slice.cap);
        }
    }
    *slice = SliceHeader::empty();
}

/// A [`SliceHeader`] that remembers its element type.
#[repr(transparent)]
pub struct Slice<T> {
    header: SliceHeader,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Slice<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slice<T> {}

impl<T> fmt::Debug for Slice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.header.fmt(f)
    }
}

impl<T: Typed> Slice<T> {
    pub const fn empty() -> Self {
        Self::from_header(SliceHeader::empty())
    }

    pub const fn from_header(header: SliceHeader) -> Self {
        Self {
            header,
            _marker: PhantomData,
        }
    }

    pub fn header(&self) -> &SliceHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut SliceHeader {
        &mut self.header
    }

    pub fn with_capacity(len: usize, cap: usize) -> Self {
        Self::from_header(make(T::descriptor(), len, cap))
    }

    pub fn from_slice(values: &[T]) -> Self {
        let elem = T::descriptor();
        let slice = Self::with_capacity(values.len(), values.len());
        unsafe {
            mem::typed_slice_copy(
                elem,
                slice.header.ptr,
                values.len(),
                values.as_ptr() as *const u8,
                values.len(),
            );
            for_each_payload(slice.header.ptr, elem, 0..values.len(), eface::copy_payload);
        }
        slice
    }

    pub fn len(&self) -> usize {
        self.header.len
    }

    pub fn cap(&self) -> usize {
        self.header.cap
    }

    pub fn is_empty(&self) -> bool {
        self.header.len == 0
    }

    /// # Safety
    /// The buffer must still be alive.
    pub unsafe fn as_slice<'a>(&self) -> &'a [T] {
        if self.header.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.header.ptr as *const T, self.header.len) }
    }

    /// # Safety
    /// The buffer must still be alive.
    pub unsafe fn get(&self, index: usize) -> Option<T> {
        unsafe { self.as_slice() }.get(index).copied()
    }

    /// # Safety
    /// The buffer must still be alive.
    pub unsafe fn to_vec(&self) -> Vec<T> {
        unsafe { self.as_slice() }.to_vec()
    }

    /// # Safety
    /// The buffer must still be alive.
    pub unsafe fn clone_slice(&self) -> Self {
        Self::from_header(unsafe { clone(&self.header, T::descriptor()) })
    }

    /// # Safety
    /// Both buffers must be alive and `self` must own its buffer.
    pub unsafe fn clone_from_slice(&mut self, src: &Slice<T>) {
        unsafe { clone_into(&mut self.header, &src.header, T::descriptor()) }
    }

    /// # Safety
    /// The buffer must still be alive.
    pub unsafe fn set(&self, index: isize, value: T) {
        unsafe { set_at(&self.header, index, T::descriptor(), Eface::wrap(&value)) }
    }

    /// # Safety
    /// The buffer must not be used again through any copy of this slice.
    pub unsafe fn release(&mut self) {
        unsafe { release(&mut self.header, T::descriptor()) }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::abi::type_of;
    use crate::string::StrHeader;

    #[test]
    fn clone_allocates_exactly_len() {
        let mut src = Slice::<i64>::with_capacity(3, 10);
        unsafe {
            src.set(0, 1);
            src.set(1, 2);
            src.set(2, 3);
            let mut copy = src.clone_slice();
            assert_eq!(copy.len(), 3);
            assert_eq!(copy.cap(), 3);
            assert_eq!(copy.to_vec(), vec![1, 2, 3]);
            copy.set(0, 99);
            assert_eq!(src.get(0), Some(1));
            copy.release();
            src.release();
        }
    }

    #[test]
    fn clone_of_nil_is_empty() {
        let nil = Slice::<StrHeader>::empty();
        let copy = unsafe { nil.clone_slice() };
        assert_eq!(copy.len(), 0);
        assert_eq!(copy.cap(), 0);
    }

    #[test]
    fn clone_into_reuses_a_large_enough_buffer() {
        let src = Slice::from_slice(&[4u16, 5, 6]);
        let mut dst = Slice::<u16>::with_capacity(0, 8);
        let before = dst.header().ptr;
        unsafe {
            dst.clone_from_slice(&src);
            assert_eq!(dst.header().ptr, before);
            assert_eq!(dst.to_vec(), vec![4, 5, 6]);
            assert_eq!(dst.cap(), 8);
        }
    }

    #[test]
    fn clone_into_grows_a_small_buffer() {
        let src = Slice::from_slice(&[1u32, 2, 3, 4, 5]);
        let mut dst = Slice::from_slice(&[9u32]);
        unsafe {
            dst.clone_from_slice(&src);
            assert!(dst.cap() >= 5);
            assert_eq!(dst.to_vec(), vec![1, 2, 3, 4, 5]);
        }
        let mut fresh = Slice::<u32>::empty();
        unsafe {
            fresh.clone_from_slice(&src);
            assert_eq!(fresh.cap(), 5);
            assert_eq!(fresh.to_vec(), vec![1, 2, 3, 4, 5]);
        }
    }

    #[test]
    fn set_at_rejects_bad_indices() {
        let s = Slice::from_slice(&[1i32, 2]);
        let value = 5i32;
        let elem = type_of::<i32>();
        unsafe {
            assert_eq!(
                try_set_at(s.header(), -1, elem, Eface::wrap(&value)),
                Err(Error::IndexOutOfRange { index: -1, len: 2 })
            );
            assert_eq!(
                try_set_at(s.header(), 2, elem, Eface::wrap(&value)),
                Err(Error::IndexOutOfRange { index: 2, len: 2 })
            );
            assert_eq!(try_set_at(s.header(), 1, elem, Eface::wrap(&value)), Ok(()));
            assert_eq!(s.to_vec(), vec![1, 5]);
        }
    }

    #[test]
    fn set_at_rejects_size_mismatch() {
        let s = Slice::from_slice(&[1i32, 2]);
        let wide = 5i64;
        let result = unsafe { try_set_at(s.header(), 0, type_of::<i32>(), Eface::wrap(&wide)) };
        assert_eq!(
            result,
            Err(Error::TypeSizeMismatch {
                expected: 4,
                actual: 8,
            })
        );
    }

    #[test]
    fn interface_elements_own_their_boxes() {
        let first = 11u64;
        let mut s = Slice::from_slice(&[Eface::wrap(&first), Eface::NIL]);
        unsafe {
            let stored = s.get(0).unwrap();
            assert_ne!(stored.data, Eface::wrap(&first).data);
            assert_eq!(stored.unwrap::<u64>(), Ok(11));

            s.set(1, stored);
            s.set(0, s.get(0).unwrap());
            assert_ne!(s.get(1).unwrap().data, s.get(0).unwrap().data);
            assert_eq!(s.get(0).unwrap().unwrap::<u64>(), Ok(11));

            let mut copy = s.clone_slice();
            assert_ne!(copy.get(1).unwrap().data, s.get(1).unwrap().data);
            s.release();
            assert_eq!(copy.get(1).unwrap().unwrap::<u64>(), Ok(11));

            let mut target = Slice::<Eface>::with_capacity(1, 4);
            target.set(0, Eface::wrap(&first));
            target.clone_from_slice(&copy);
            copy.release();
            assert_eq!(target.len(), 2);
            assert_eq!(target.get(0).unwrap().unwrap::<u64>(), Ok(11));
            target.release();
        }
    }

    #[test]
    #[should_panic(expected = "index out of range [3] with length 2")]
    fn set_at_panics_on_contract_violation() {
        let s = Slice::from_slice(&[1u8, 2]);
        unsafe { s.set(3, 0) };
    }
}
