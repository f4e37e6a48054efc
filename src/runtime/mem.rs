//! Typed memory moves and allocation on top of the installed heap.
//!
//! Every copy of a value whose type carries pointers goes through
//! [`typed_memmove`] (or [`typed_slice_copy`]), which reports each pointer
//! word to the heap's write barrier before the bytes move.

use std::cell::Cell;

use super::{fatal, heap};
use crate::abi::{PTR_SIZE, Type};
use crate::error::Error;

thread_local! {
    static BARRIER_WRITES: Cell<u64> = const { Cell::new(0) };
}

/// Pointer words reported to the write barrier by this thread so far.
pub fn barrier_writes() -> u64 {
    BARRIER_WRITES.with(|count| count.get())
}

/// # Safety
/// Both ranges must be valid for `n` bytes; they may overlap.
pub unsafe fn memmove(dst: *mut u8, src: *const u8, n: usize) {
    if n > 0 {
        unsafe { std::ptr::copy(src, dst, n) };
    }
}

/// # Safety
/// `p` must be valid for writes of `n` bytes.
pub unsafe fn memclr(p: *mut u8, n: usize) {
    if n > 0 {
        unsafe { p.write_bytes(0, n) };
    }
}

/// Reports the pointer words of one `t` value at `dst` that are about to be
/// overwritten with the words at `src` (zero when `src` is null).
unsafe fn bulk_barrier(t: &Type, dst: *mut u8, src: *const u8) {
    let allocator = heap();
    let words = t.ptr_bytes / PTR_SIZE;
    let mut reported = 0;
    for word in 0..words {
        if !t.is_pointer_word(word) {
            continue;
        }
        let value = if src.is_null() {
            0
        } else {
            unsafe { (src.add(word * PTR_SIZE) as *const usize).read_unaligned() }
        };
        allocator.write_barrier(unsafe { dst.add(word * PTR_SIZE) }, value);
        reported += 1;
    }
    BARRIER_WRITES.with(|count| count.set(count.get() + reported));
}

/// Copies one value of type `t`.
///
/// # Safety
/// `dst` and `src` must each point to a valid `t`-sized region.
pub unsafe fn typed_memmove(t: &Type, dst: *mut u8, src: *const u8) {
    if std::ptr::eq(dst, src) || t.size == 0 {
        return;
    }
    if t.has_pointers() {
        unsafe { bulk_barrier(t, dst, src) };
    }
    unsafe { memmove(dst, src, t.size) };
}

/// Zeroes one value of type `t`.
///
/// # Safety
/// `p` must point to a valid `t`-sized region.
pub unsafe fn typed_memclr(t: &Type, p: *mut u8) {
    if t.has_pointers() {
        unsafe { bulk_barrier(t, p, std::ptr::null()) };
    }
    unsafe { memclr(p, t.size) };
}

/// Copies `min(dst_len, src_len)` elements and returns that count.
///
/// # Safety
/// Both buffers must hold at least their stated number of `elem` values.
pub unsafe fn typed_slice_copy(
    elem: &Type,
    dst: *mut u8,
    dst_len: usize,
    src: *const u8,
    src_len: usize,
) -> usize {
    let n = dst_len.min(src_len);
    if n == 0 || std::ptr::eq(dst, src) {
        return n;
    }
    if elem.has_pointers() {
        for i in 0..n {
            unsafe { bulk_barrier(elem, dst.add(i * elem.size), src.add(i * elem.size)) };
        }
    }
    unsafe { memmove(dst, src, n * elem.size) };
    n
}

fn array_bytes(t: &Type, n: usize) -> usize {
    match t.size.checked_mul(n) {
        Some(bytes) if bytes <= isize::MAX as usize => bytes,
        _ => fatal(Error::OutOfMemory {
            bytes: t.size.saturating_mul(n),
        }),
    }
}

/// Allocates one zeroed `t`.
pub fn new_object(t: &Type) -> *mut u8 {
    heap()
        .allocate_zeroed(t.size, t.align())
        .unwrap_or_else(|err| fatal(err))
}

/// Allocates `n` zeroed `t` values.
pub fn new_array(t: &Type, n: usize) -> *mut u8 {
    heap()
        .allocate_zeroed(array_bytes(t, n), t.align())
        .unwrap_or_else(|err| fatal(err))
}

/// # Safety
/// `p` must come from [`new_object`] with the same `t`.
pub unsafe fn free_object(t: &Type, p: *mut u8) {
    unsafe { heap().deallocate(p, t.size, t.align()) };
}

/// # Safety
/// `p` must come from [`new_array`] (or [`grow_array`]) with the same `t` and `n`.
pub unsafe fn free_array(t: &Type, p: *mut u8, n: usize) {
    unsafe { heap().deallocate(p, t.size * n, t.align()) };
}

/// Capacity chosen when a buffer of `old_cap` elements must hold `new_len`:
/// double small buffers, grow large ones by about 1.25x.
pub fn next_capacity(new_len: usize, old_cap: usize) -> usize {
    const THRESHOLD: usize = 256;
    let double = old_cap.saturating_add(old_cap);
    if new_len > double {
        return new_len;
    }
    if old_cap < THRESHOLD {
        return double;
    }
    let mut cap = old_cap;
    while cap < new_len {
        cap = cap.saturating_add((cap + 3 * THRESHOLD) >> 2);
    }
    cap
}

/// Grows an array of `old_cap` elements in place where the heap allows it,
/// keeping the existing elements. Returns the new pointer and capacity.
///
/// # Safety
/// `p` must come from [`new_array`] or [`grow_array`] with `old_cap` elements
/// of `t` (or be any pointer when `old_cap == 0`).
pub unsafe fn grow_array(t: &Type, p: *mut u8, old_cap: usize, new_len: usize) -> (*mut u8, usize) {
    let new_cap = next_capacity(new_len, old_cap);
    let old_bytes = array_bytes(t, old_cap);
    let new_bytes = array_bytes(t, new_cap);
    let grown = unsafe { heap().reallocate(p, old_bytes, new_bytes, t.align()) }
        .unwrap_or_else(|err| fatal(err));
    (grown, new_cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::type_of;
    use crate::string::StrHeader;

    #[test]
    fn growth_policy() {
        assert_eq!(next_capacity(1, 0), 1);
        assert_eq!(next_capacity(5, 4), 8);
        assert_eq!(next_capacity(20, 4), 20);
        assert_eq!(next_capacity(513, 512), 512 + (512 + 768) / 4);
    }

    #[test]
    fn pointer_free_copies_skip_the_barrier() {
        let before = barrier_writes();
        let src = 5u64;
        let mut dst = 0u64;
        unsafe {
            typed_memmove(
                type_of::<u64>(),
                &mut dst as *mut u64 as *mut u8,
                &src as *const u64 as *const u8,
            )
        };
        assert_eq!(dst, 5);
        assert_eq!(barrier_writes(), before);
    }

    #[test]
    fn pointer_copies_report_each_pointer_word() {
        let before = barrier_writes();
        let src = [StrHeader::view("a"), StrHeader::view("bc")];
        let mut dst = [StrHeader::empty(); 2];
        let copied = unsafe {
            typed_slice_copy(
                type_of::<StrHeader>(),
                dst.as_mut_ptr() as *mut u8,
                2,
                src.as_ptr() as *const u8,
                2,
            )
        };
        assert_eq!(copied, 2);
        assert_eq!(barrier_writes() - before, 2);
        assert_eq!(unsafe { dst[1].as_str() }, "bc");
    }

    #[test]
    fn grow_array_keeps_contents() {
        let t = type_of::<u32>();
        let p = new_array(t, 4);
        unsafe {
            for i in 0..4 {
                (p as *mut u32).add(i).write(i as u32 + 1);
            }
            let (q, cap) = grow_array(t, p, 4, 5);
            assert_eq!(cap, 8);
            let values = std::slice::from_raw_parts(q as *const u32, cap);
            assert_eq!(values, &[1, 2, 3, 4, 0, 0, 0, 0]);
            free_array(t, q, cap);
        }
    }
}
