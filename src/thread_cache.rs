//! Thread Cache (front-end): per-thread free lists for lock-free allocation.
//!
//! Each thread owns one `ThreadCache`. The fast path (list hit) requires no
//! synchronization at all. An empty list refills with a batch from the
//! central cache; a list that grows past the spill watermark hands three
//! quarters of itself back, so alternating alloc/free traffic stays local.
//!
//! Requests above `MAX_BYTES` never touch the tiers; they go straight to the
//! C heap.

use crate::central_cache::{CentralCache, FreeObject};
use crate::config::{FREE_LIST_SIZE, SPILL_THRESHOLD};
use crate::page_cache::PageCache;
use crate::platform;
use crate::size_class;
use crate::stat_inc;
use crate::sync::SpinMutex;
use core::ptr;

/// Per-size-class free list within the thread cache.
struct FreeList {
    /// Head of the singly-linked intrusive free list.
    head: *mut FreeObject,
    /// Number of blocks currently in this list.
    len: usize,
}

impl FreeList {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
        }
    }

    #[inline]
    fn pop(&mut self) -> *mut FreeObject {
        let obj = self.head;
        if !obj.is_null() {
            self.head = unsafe { (*obj).next };
            self.len -= 1;
        }
        obj
    }

    #[inline]
    fn push(&mut self, obj: *mut FreeObject) {
        unsafe { (*obj).next = self.head };
        self.head = obj;
        self.len += 1;
    }
}

/// Per-thread cache holding one free list per size class.
pub struct ThreadCache {
    lists: [FreeList; FREE_LIST_SIZE],
}

impl Default for ThreadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadCache {
    pub const fn new() -> Self {
        Self {
            lists: [const { FreeList::new() }; FREE_LIST_SIZE],
        }
    }

    /// Allocate a block of at least `size` bytes, aligned to `ALIGNMENT`.
    /// Returns null only on OOM. Zero-sized requests are served from the
    /// smallest class; oversize requests come from the C heap.
    ///
    /// # Safety
    ///
    /// `central` and `page_cache` must be the shared tier instances this
    /// cache always runs against.
    #[inline]
    pub unsafe fn allocate(
        &mut self,
        size: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
    ) -> *mut u8 {
        let Some(index) = size_class::size_to_index(size) else {
            stat_inc!(oversize_allocs);
            return unsafe { platform::sys_alloc(size) };
        };

        let obj = self.lists[index].pop();
        if !obj.is_null() {
            stat_inc!(thread_cache_hits);
            return obj as *mut u8;
        }
        unsafe { self.fetch_from_central(index, central, page_cache) }
    }

    /// Return a block. `size` must equal the size passed to the `allocate`
    /// call that produced `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must come from a matching `allocate` on this allocator and must
    /// not be used again.
    #[inline]
    pub unsafe fn deallocate(
        &mut self,
        ptr: *mut u8,
        size: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
    ) {
        let Some(index) = size_class::size_to_index(size) else {
            unsafe { platform::sys_free(ptr) };
            return;
        };

        let list = &mut self.lists[index];
        list.push(ptr as *mut FreeObject);

        if list.len > SPILL_THRESHOLD {
            unsafe { self.return_to_central(index, central, page_cache) };
        }
    }

    /// Slow path: pull a batch from the central cache. The first block goes
    /// to the caller; the rest (if any) become the local list. The batch
    /// length is discovered by walking the chain.
    #[cold]
    unsafe fn fetch_from_central(
        &mut self,
        index: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
    ) -> *mut u8 {
        stat_inc!(thread_cache_misses);

        let head = unsafe { central.fetch_range(index, page_cache) };
        if head.is_null() {
            return ptr::null_mut();
        }

        let rest = unsafe { (*head).next };
        let mut len = 0;
        let mut current = rest;
        while !current.is_null() {
            len += 1;
            current = unsafe { (*current).next };
        }

        let list = &mut self.lists[index];
        debug_assert!(list.head.is_null());
        list.head = rest;
        list.len = len;

        head as *mut u8
    }

    /// Spill: keep a quarter of the list locally, hand the rest back.
    unsafe fn return_to_central(
        &mut self,
        index: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
    ) {
        let list = &mut self.lists[index];
        if list.len <= 1 {
            return;
        }

        let keep = (list.len / 4).max(1);
        let return_count = list.len - keep;

        // Walk to the last kept node
        let mut split = list.head;
        for _ in 0..keep - 1 {
            let next = unsafe { (*split).next };
            if next.is_null() {
                // Chain is shorter than the counter claims; resync and
                // skip the spill
                list.len = Self::chain_len(list.head);
                return;
            }
            split = next;
        }

        let suffix = unsafe { (*split).next };
        if suffix.is_null() {
            list.len = keep;
            return;
        }
        unsafe { (*split).next = ptr::null_mut() };
        list.len = keep;

        stat_inc!(spills);
        let block_size = size_class::index_to_size(index);
        unsafe { central.return_range(suffix, return_count * block_size, index, page_cache) };
    }

    /// Hand every cached block back to the central cache. Called when the
    /// owning thread exits.
    ///
    /// # Safety
    ///
    /// No block from this cache may still be referenced by the thread.
    pub unsafe fn flush(&mut self, central: &CentralCache, page_cache: &SpinMutex<PageCache>) {
        for index in 0..FREE_LIST_SIZE {
            let list = &mut self.lists[index];
            if list.head.is_null() {
                continue;
            }
            let head = list.head;
            let len = list.len;
            list.head = ptr::null_mut();
            list.len = 0;

            let block_size = size_class::index_to_size(index);
            unsafe { central.return_range(head, len * block_size, index, page_cache) };
        }
    }

    fn chain_len(head: *mut FreeObject) -> usize {
        let mut len = 0;
        let mut current = head;
        while !current.is_null() {
            len += 1;
            current = unsafe { (*current).next };
        }
        len
    }
}
