//! Pointer-identity tests for cache reuse.
//!
//! These assert exact address reuse, which only holds while no other code
//! churns the same size class, so each test here owns its classes and this
//! file stays separate from the general-purpose suites.

use rmempool::{allocate, deallocate};

#[test]
fn test_hot_reuse() {
    let p = allocate(16);
    assert!(!p.is_null());
    unsafe {
        p.write_bytes(0x5A, 16);
        deallocate(p, 16);
    }

    // The freed block is the hottest one; it comes straight back
    let q = allocate(16);
    assert_eq!(q, p);
    unsafe { deallocate(q, 16) };
}

#[test]
fn test_size_class_closure() {
    // Blocks freed at one size are never handed out for a different class.
    let a = allocate(8);
    let b = allocate(128);
    unsafe {
        deallocate(a, 8);
        deallocate(b, 128);
    }

    let b2 = allocate(128);
    let a2 = allocate(8);
    assert_eq!(b2, b);
    assert_eq!(a2, a);
    unsafe {
        deallocate(a2, 8);
        deallocate(b2, 128);
    }
}

#[test]
fn test_lifo_order_within_class() {
    // Frees stack up; allocations unwind them most-recent-first
    let ptrs: Vec<*mut u8> = (0..8).map(|_| allocate(48)).collect();
    for &p in &ptrs {
        assert!(!p.is_null());
    }
    for &p in &ptrs {
        unsafe { deallocate(p, 48) };
    }
    for &p in ptrs.iter().rev() {
        assert_eq!(allocate(48), p);
    }
    for &p in ptrs.iter().rev() {
        unsafe { deallocate(p, 48) };
    }
}
