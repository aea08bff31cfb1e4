// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared memory segment tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use evring::{HeapSegment, Segment, ShmSegment};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_shm_{}_{n}", std::process::id())
}

#[test]
fn create_then_attach_discovers_size() {
    let name = unique_name("attach_size");
    ShmSegment::clear_storage(&name);

    let created = ShmSegment::create(&name, 4096).expect("create");
    assert_eq!(created.len(), 4096);
    assert!(created.is_first());

    let attached = ShmSegment::attach(&name).expect("attach");
    assert!(attached.len() >= 4096);
    assert!(!attached.is_first());
}

#[test]
fn attach_missing_fails() {
    let name = unique_name("attach_missing");
    ShmSegment::clear_storage(&name);
    assert!(ShmSegment::attach(&name).is_err());
}

#[test]
fn create_twice_fails() {
    let name = unique_name("create_twice");
    ShmSegment::clear_storage(&name);

    let _first = ShmSegment::create(&name, 256).expect("create");
    assert!(ShmSegment::create(&name, 256).is_err());
}

#[test]
fn new_segment_is_zeroed() {
    let name = unique_name("zeroed");
    ShmSegment::clear_storage(&name);

    let seg = ShmSegment::create(&name, 1000).expect("create");
    let bytes = unsafe { std::slice::from_raw_parts(seg.as_ptr(), seg.len()) };
    assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn reference_count() {
    let name = unique_name("ref_count");
    ShmSegment::clear_storage(&name);

    let seg1 = ShmSegment::create(&name, 512).expect("create");
    assert_eq!(seg1.ref_count(), 1);

    let seg2 = ShmSegment::attach(&name).expect("attach");
    assert_eq!(seg1.ref_count(), 2);
    assert_eq!(seg2.ref_count(), 2);

    drop(seg2);
    assert_eq!(seg1.ref_count(), 1);
}

#[test]
fn shared_data_visibility() {
    let name = unique_name("visibility");
    ShmSegment::clear_storage(&name);

    let h1 = ShmSegment::create(&name, 512).expect("create");
    let h2 = ShmSegment::attach(&name).expect("attach");

    unsafe {
        let ptr1 = h1.as_mut_ptr() as *mut u64;
        *ptr1 = 0xfeed_beef;
        let ptr2 = h2.as_ptr() as *const u64;
        assert_eq!(*ptr2, 0xfeed_beef);
    }
}

#[test]
fn last_drop_removes_object() {
    let name = unique_name("last_drop");
    ShmSegment::clear_storage(&name);

    {
        let _seg = ShmSegment::create(&name, 256).expect("create");
    }
    assert!(ShmSegment::attach(&name).is_err(), "should be gone after last handle dropped");
}

#[test]
fn empty_name_or_size_fails() {
    assert!(ShmSegment::create("", 128).is_err());
    assert!(ShmSegment::create(&unique_name("zero"), 0).is_err());
    assert!(ShmSegment::attach("").is_err());
}

#[test]
fn heap_segments_share_through_clones() {
    let a = HeapSegment::new(256).expect("heap");
    let b = a.clone();
    unsafe { *a.as_mut_ptr() = 42 };
    assert_eq!(unsafe { *b.as_mut_ptr() }, 42);
    assert_eq!(b.len(), 256);
}
