//! 3-level radix tree mapping span start pages to Span pointers.
//!
//! This is the page cache's `span_map`: only the first page of each live
//! span has an entry, which is enough for both the identity lookup in
//! `deallocate_span` and the right-neighbor probe during coalescing.
//!
//! For 48-bit virtual addresses with a 12-bit page shift there are 36 bits
//! of page ID, split 12/12/12. The root is statically allocated (32 KiB);
//! mid and leaf nodes are lazily allocated from the OS. Reads are lock-free
//! (AtomicPtr with Acquire); writes must happen under external
//! synchronization (the page cache lock).

use crate::config::PAGE_SIZE;
use crate::platform;
use crate::span::Span;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

const ROOT_BITS: usize = 12;
const MID_BITS: usize = 12;
const LEAF_BITS: usize = 12;

const ROOT_LEN: usize = 1 << ROOT_BITS; // 4096
const MID_LEN: usize = 1 << MID_BITS; // 4096
const LEAF_LEN: usize = 1 << LEAF_BITS; // 4096

const MID_SHIFT: usize = LEAF_BITS; // 12
const ROOT_SHIFT: usize = LEAF_BITS + MID_BITS; // 24

const MID_MASK: usize = (1 << MID_BITS) - 1;
const LEAF_MASK: usize = (1 << LEAF_BITS) - 1;

#[repr(C)]
struct MidNode {
    children: [AtomicPtr<LeafNode>; MID_LEN],
}

#[repr(C)]
struct LeafNode {
    spans: [AtomicPtr<Span>; LEAF_LEN],
}

/// 3-level radix tree for page_id -> *mut Span lookup.
pub struct PageMap {
    root: [AtomicPtr<MidNode>; ROOT_LEN],
}

// AtomicPtr is Send+Sync, and we only expose safe operations
unsafe impl Send for PageMap {}
unsafe impl Sync for PageMap {}

/// Helper to create a const-initialized array of null AtomicPtrs.
macro_rules! null_atomic_array {
    ($len:expr, $T:ty) => {{
        // SAFETY: AtomicPtr<T>::new(null_mut()) is just a null pointer,
        // which has the same bit pattern as zeroed memory.
        unsafe { core::mem::transmute::<[usize; $len], [AtomicPtr<$T>; $len]>([0usize; $len]) }
    }};
}

impl PageMap {
    /// Create a new empty page map. All root entries are null.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            root: null_atomic_array!(ROOT_LEN, MidNode),
        }
    }

    /// Look up the span starting at the given page ID. Returns null if no
    /// span starts there. This is lock-free.
    #[inline]
    pub fn get(&self, page_id: usize) -> *mut Span {
        let root_idx = page_id >> ROOT_SHIFT;
        let mid_idx = (page_id >> MID_SHIFT) & MID_MASK;
        let leaf_idx = page_id & LEAF_MASK;

        if root_idx >= ROOT_LEN {
            return ptr::null_mut();
        }

        let mid = self.root[root_idx].load(Ordering::Acquire);
        if mid.is_null() {
            return ptr::null_mut();
        }

        let leaf = unsafe { (*mid).children[mid_idx].load(Ordering::Acquire) };
        if leaf.is_null() {
            return ptr::null_mut();
        }

        unsafe { (*leaf).spans[leaf_idx].load(Ordering::Acquire) }
    }

    /// Set (or clear, with null) the span entry for a given page ID.
    ///
    /// # Safety
    /// Must be called under external synchronization (the page cache lock).
    /// The span pointer must be valid or null.
    pub unsafe fn set(&self, page_id: usize, span: *mut Span) {
        let root_idx = page_id >> ROOT_SHIFT;
        let mid_idx = (page_id >> MID_SHIFT) & MID_MASK;
        let leaf_idx = page_id & LEAF_MASK;

        assert!(root_idx < ROOT_LEN, "page_id out of range for page map");

        // Ensure mid node exists
        let mut mid = self.root[root_idx].load(Ordering::Acquire);
        if mid.is_null() {
            mid = unsafe { Self::alloc_node::<MidNode>() };
            assert!(!mid.is_null(), "failed to allocate mid node for page map");
            // Store with Release so readers see the initialized node
            self.root[root_idx].store(mid, Ordering::Release);
        }

        // Ensure leaf node exists
        let mut leaf = unsafe { (*mid).children[mid_idx].load(Ordering::Acquire) };
        if leaf.is_null() {
            leaf = unsafe { Self::alloc_node::<LeafNode>() };
            assert!(!leaf.is_null(), "failed to allocate leaf node for page map");
            unsafe { (*mid).children[mid_idx].store(leaf, Ordering::Release) };
        }

        unsafe { (*leaf).spans[leaf_idx].store(span, Ordering::Release) };
    }

    unsafe fn alloc_node<T>() -> *mut T {
        let size = core::mem::size_of::<T>();
        let alloc_size = (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        // page_alloc returns zeroed memory, which is valid for AtomicPtr (all null)
        let ptr = unsafe { platform::page_alloc(alloc_size) };
        ptr.cast::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{self, SpanState};

    #[test]
    fn test_pagemap_get_empty() {
        let map = PageMap::new();
        assert!(map.get(0).is_null());
        assert!(map.get(1000).is_null());
        assert!(map.get(123456).is_null());
    }

    #[test]
    fn test_pagemap_set_get() {
        let map = PageMap::new();
        let s = span::new_record(42, 1, SpanState::Free);
        assert!(!s.is_null());

        unsafe {
            map.set(42, s);
            assert_eq!(map.get(42), s);
            assert!(map.get(41).is_null());
            assert!(map.get(43).is_null());

            // Clear it
            map.set(42, ptr::null_mut());
            assert!(map.get(42).is_null());

            span::free_record(s);
        }
    }

    #[test]
    fn test_pagemap_only_start_page_registered() {
        let map = PageMap::new();
        let s = span::new_record(100, 5, SpanState::Free);
        assert!(!s.is_null());

        unsafe {
            map.set(100, s);

            assert_eq!(map.get(100), s);
            // Interior pages have no entry of their own
            for page in 101..105 {
                assert!(map.get(page).is_null());
            }
            // The right-neighbor probe lands one past the end
            assert!(map.get((*s).end_page()).is_null());

            map.set(100, ptr::null_mut());
            span::free_record(s);
        }
    }

    #[test]
    fn test_pagemap_high_address() {
        let map = PageMap::new();
        // Use a high page ID that exercises all three levels
        let page_id = (1 << 30) + (1 << 18) + 42;
        let s = span::new_record(page_id, 1, SpanState::Free);
        assert!(!s.is_null());

        unsafe {
            map.set(page_id, s);
            assert_eq!(map.get(page_id), s);
            assert!(map.get(page_id - 1).is_null());
            assert!(map.get(page_id + 1).is_null());

            map.set(page_id, ptr::null_mut());
            span::free_record(s);
        }
    }
}
