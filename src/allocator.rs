//! Public allocation API and the process-wide tier singletons.
//!
//! Static state lives here: the span map, the page cache behind its single
//! lock, and the central cache. The thread-cache front end is selected by
//! feature:
//! - `std`: `std::thread_local!` with const-init (no lazy init overhead);
//!   the cache drains back to the central tier when its thread exits.
//! - neither: every request is served by the central cache (locked, slowest).

use crate::central_cache::{CentralCache, FreeObject};
use crate::page_cache::PageCache;
use crate::pagemap::PageMap;
use crate::platform;
use crate::size_class;
use crate::sync::SpinMutex;
use crate::{stat_add, stat_inc};
use core::mem;
use core::ptr;

pub(crate) static SPAN_MAP: PageMap = PageMap::new();
pub(crate) static PAGE_CACHE: SpinMutex<PageCache> = SpinMutex::new(PageCache::new(&SPAN_MAP));
pub(crate) static CENTRAL_CACHE: CentralCache = CentralCache::new();

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        use crate::thread_cache::ThreadCache;
        use core::cell::UnsafeCell;

        /// TLS slot wrapper; drains the cache to the central tier on drop so
        /// a thread's cached blocks are credited back when it exits.
        struct TcSlot(UnsafeCell<ThreadCache>);

        impl Drop for TcSlot {
            fn drop(&mut self) {
                unsafe { (*self.0.get()).flush(&CENTRAL_CACHE, &PAGE_CACHE) };
            }
        }

        std::thread_local! {
            static TC_SLOT: TcSlot = const { TcSlot(UnsafeCell::new(ThreadCache::new())) };
        }

        #[inline]
        fn tier_allocate(size: usize) -> *mut u8 {
            match TC_SLOT.try_with(|slot| unsafe {
                (*slot.0.get()).allocate(size, &CENTRAL_CACHE, &PAGE_CACHE)
            }) {
                Ok(ptr) => ptr,
                // TLS already torn down (thread exit): go through the
                // central cache directly
                Err(_) => alloc_from_central(size),
            }
        }

        #[inline]
        unsafe fn tier_deallocate(ptr: *mut u8, size: usize) {
            if TC_SLOT
                .try_with(|slot| unsafe {
                    (*slot.0.get()).deallocate(ptr, size, &CENTRAL_CACHE, &PAGE_CACHE)
                })
                .is_err()
            {
                unsafe { dealloc_to_central(ptr, size) };
            }
        }
    } else {
        #[inline]
        fn tier_allocate(size: usize) -> *mut u8 {
            alloc_from_central(size)
        }

        #[inline]
        unsafe fn tier_deallocate(ptr: *mut u8, size: usize) {
            unsafe { dealloc_to_central(ptr, size) };
        }
    }
}

/// Allocate at least `size` bytes, aligned to [`ALIGNMENT`](crate::config::ALIGNMENT).
///
/// Returns null only when the OS refuses to map more memory. A zero `size`
/// is served from the smallest size class; sizes above
/// [`MAX_BYTES`](crate::config::MAX_BYTES) come from the C heap.
#[inline]
pub fn allocate(size: usize) -> *mut u8 {
    stat_inc!(alloc_count);
    stat_add!(alloc_bytes, size as u64);
    tier_allocate(size)
}

/// Release a block obtained from [`allocate`]. `size` must equal the size
/// passed to the matching `allocate` call; the allocator does not record
/// per-block sizes.
///
/// # Safety
///
/// `ptr` must come from [`allocate`] (or be null, which is a no-op), `size`
/// must match, and the block must not be used or freed again afterwards.
#[inline]
pub unsafe fn deallocate(ptr: *mut u8, size: usize) {
    if ptr.is_null() {
        return;
    }
    stat_inc!(dealloc_count);
    unsafe { tier_deallocate(ptr, size) };
}

/// Allocate storage for a `T` and move `value` into it.
///
/// Returns null on OOM (the value is dropped in that case). Types whose
/// alignment exceeds [`ALIGNMENT`](crate::config::ALIGNMENT) are still placed
/// correctly as long as their size stays within
/// [`MAX_BYTES`](crate::config::MAX_BYTES): span bases are page-aligned and a
/// block size is always a multiple of its type's alignment.
pub fn new_element<T>(value: T) -> *mut T {
    let ptr = allocate(mem::size_of::<T>()) as *mut T;
    if !ptr.is_null() {
        unsafe { ptr::write(ptr, value) };
    }
    ptr
}

/// Drop the `T` behind `ptr` and release its storage.
///
/// # Safety
///
/// `ptr` must have come from [`new_element::<T>`] with the same `T` and must
/// not be used again. Null is a no-op.
pub unsafe fn delete_element<T>(ptr: *mut T) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        ptr::drop_in_place(ptr);
        deallocate(ptr as *mut u8, mem::size_of::<T>());
    }
}

fn alloc_from_central(size: usize) -> *mut u8 {
    let Some(index) = size_class::size_to_index(size) else {
        stat_inc!(oversize_allocs);
        return unsafe { platform::sys_alloc(size) };
    };
    unsafe { CENTRAL_CACHE.fetch_range(index, &PAGE_CACHE) as *mut u8 }
}

unsafe fn dealloc_to_central(ptr: *mut u8, size: usize) {
    let Some(index) = size_class::size_to_index(size) else {
        unsafe { platform::sys_free(ptr) };
        return;
    };
    let obj = ptr as *mut FreeObject;
    unsafe {
        (*obj).next = ptr::null_mut();
        CENTRAL_CACHE.return_range(obj, size_class::index_to_size(index), index, &PAGE_CACHE);
    }
}
