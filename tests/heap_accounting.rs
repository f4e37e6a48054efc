//! Allocation accounting for the containers. Everything runs in one test so
//! no other test allocates from the shared heap while the counts are read.

use abiview::abi::map_type_of;
use abiview::eface::Eface;
use abiview::maps::{self, MapRef};
use abiview::reflect::{self, Value};
use abiview::runtime::heap;
use abiview::slice::Slice;
use abiview::string::StrHeader;
use pretty_assertions::assert_eq;

fn live() -> u64 {
    let stats = heap().stats();
    stats.allocations - stats.frees
}

fn reflective_interface_keys_do_not_leak() {
    let m = MapRef::<Eface, i64>::new();
    let v = Value::of(&m);
    unsafe {
        reflect::assign_by_key(&v, &Value::of(&7u32))
            .unwrap()
            .set(70i64)
            .unwrap();
        let before = live();
        for _ in 0..1000 {
            let found = reflect::lookup_by_key(&v, &Value::of(&7u32)).unwrap();
            assert_eq!(found.unwrap().get::<i64>(), Ok(70));
            reflect::assign_by_key(&v, &Value::of(&7u32))
                .unwrap()
                .set(71i64)
                .unwrap();
        }
        assert_eq!(live(), before);
        assert_eq!(m.len(), 1);
    }
    let before_release = live();
    unsafe { m.release() };
    assert!(live() < before_release);
}

fn interface_slices_free_their_boxes() {
    let baseline = live();
    let mut anys = Slice::<Eface>::with_capacity(4, 4);
    unsafe {
        for round in 0..100u64 {
            for i in 0..4 {
                let n = round + i as u64;
                reflect::set_slice_element_at(&Value::of(&anys), i, &Value::of(&n));
            }
        }
        let mut copy = anys.clone_slice();
        anys.clone_from_slice(&copy);
        copy.release();
        anys.release();
    }
    assert_eq!(live(), baseline);
}

fn string_keys_are_freed_with_the_map() {
    let typ = map_type_of::<StrHeader, i64>();
    let baseline = live();
    for round in 0..4 {
        let m = maps::make_map(typ, 0);
        unsafe {
            for i in 0..2000i64 {
                let key = format!("{round}-{i}-{}", "k".repeat(64));
                maps::str_set(m, typ, &key, &i as *const i64 as *const u8);
                maps::str_set(m, typ, &key, &i as *const i64 as *const u8);
            }
            for i in 0..500 {
                assert!(maps::str_delete(m, typ, format!("{round}-{i}-{}", "k".repeat(64))));
            }
            let c = maps::clone(m, typ);
            maps::clear(c, typ);
            maps::release(c, typ);
            maps::release(m, typ);
        }
        assert_eq!(live(), baseline);
    }
}

fn interface_map_values_are_freed() {
    let baseline = live();
    let m = MapRef::<u8, Eface>::new();
    unsafe {
        for n in 0..50u64 {
            m.insert((n % 5) as u8, Eface::wrap(&n));
        }
        assert!(m.remove(&0));
        let c = m.clone_map();
        c.clear();
        c.release();
        m.release();
    }
    assert_eq!(live(), baseline);
}

#[test]
fn containers_free_what_they_own() {
    reflective_interface_keys_do_not_leak();
    interface_slices_free_their_boxes();
    string_keys_are_freed_with_the_map();
    interface_map_values_are_freed();
}
