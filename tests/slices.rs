use abiview::Error;
use abiview::abi::type_of;
use abiview::eface::Eface;
use abiview::slice::{self, Slice, SliceHeader};
use abiview::string::StrHeader;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

proptest! {
    #[test]
    fn clone_is_exact_and_independent(values in prop::collection::vec(any::<i32>(), 0..200)) {
        let mut src = Slice::from_slice(&values);
        unsafe {
            let mut copy = src.clone_slice();
            prop_assert_eq!(copy.len(), values.len());
            prop_assert_eq!(copy.cap(), values.len());
            prop_assert_eq!(copy.to_vec(), values.clone());
            if !values.is_empty() {
                copy.set(0, values[0].wrapping_add(1));
                prop_assert_eq!(src.get(0), Some(values[0]));
            }
            copy.release();
            src.release();
        }
    }

    #[test]
    fn clone_into_reuses_a_large_enough_buffer(
        values in prop::collection::vec(any::<u64>(), 0..64),
        extra in 0usize..32,
    ) {
        let src = Slice::from_slice(&values);
        let mut dst = Slice::<u64>::with_capacity(0, values.len() + extra);
        let before = dst.header().ptr;
        unsafe {
            dst.clone_from_slice(&src);
            prop_assert_eq!(dst.header().ptr, before);
            prop_assert_eq!(dst.to_vec(), values);
            dst.release();
            let mut src = src;
            src.release();
        }
    }
}

#[test]
fn clone_into_grows_and_allocates() {
    let src = Slice::from_slice(&[1u16, 2, 3, 4, 5]);
    let mut small = Slice::from_slice(&[9u16, 9]);
    let mut empty = Slice::<u16>::empty();
    unsafe {
        small.clone_from_slice(&src);
        empty.clone_from_slice(&src);
        assert_eq!(small.to_vec(), vec![1, 2, 3, 4, 5]);
        assert_eq!(empty.to_vec(), vec![1, 2, 3, 4, 5]);
        assert!(small.cap() >= 5);
        small.release();
        empty.release();
        let mut src = src;
        src.release();
    }
}

#[test]
fn set_at_bounds() {
    let s = Slice::<i64>::with_capacity(3, 3);
    let elem = type_of::<i64>();
    let v = 5i64;
    unsafe {
        for index in [-1isize, 3] {
            assert_eq!(
                slice::try_set_at(s.header(), index, elem, Eface::wrap(&v)),
                Err(Error::IndexOutOfRange { index, len: 3 })
            );
        }
        slice::try_set_at(s.header(), 2, elem, Eface::wrap(&v)).unwrap();
        assert_eq!(s.get(2), Some(5));
    }
}

#[test]
fn set_at_size_mismatch() {
    let s = Slice::<i64>::with_capacity(1, 1);
    let small = 1u16;
    let err = unsafe { slice::try_set_at(s.header(), 0, type_of::<i64>(), Eface::wrap(&small)) };
    assert_eq!(
        err,
        Err(Error::TypeSizeMismatch {
            expected: 8,
            actual: 2,
        })
    );
}

#[test]
#[should_panic(expected = "index out of range [-1] with length 1")]
fn set_at_aborts_on_contract_violation() {
    let s = Slice::<i64>::with_capacity(1, 1);
    unsafe { s.set(-1, 0) };
}

#[test]
fn strings_copy_headers_not_bytes() {
    let owned = String::from("shared");
    let s = Slice::from_slice(&[StrHeader::view(&owned)]);
    unsafe {
        let copy = slice::clone(s.header(), type_of::<StrHeader>());
        let first = Slice::<StrHeader>::from_header(copy).get(0).unwrap();
        assert_eq!(first.ptr, owned.as_ptr());
        let mut copy: SliceHeader = copy;
        slice::release(&mut copy, type_of::<StrHeader>());
        assert!(copy.is_nil());
    }
}
