//! Page Cache (back-end): owns every byte obtained from the OS.
//!
//! Manages spans of contiguous pages bucketed by exact page count. Requests
//! are served from the smallest free span that fits, splitting off the
//! remainder; returned spans are merged with a free right neighbor before
//! being refiled. Memory is never handed back to the OS.
//!
//! A single lock guards all state; the span map is written only under it.

use crate::config::{MAX_PAGES, PAGE_SHIFT, PAGE_SIZE};
use crate::pagemap::PageMap;
use crate::platform;
use crate::span::{self, Span, SpanStack, SpanState};
use crate::{stat_add, stat_inc};
use core::ptr;
#[cfg(feature = "debug")]
use std::println;

pub struct PageCache {
    /// free_spans[k] holds free spans of exactly k pages (index 0 unused).
    free_spans: [SpanStack; MAX_PAGES + 1],
    /// Free spans larger than MAX_PAGES pages.
    large_spans: SpanStack,
    /// Span start page -> Span record, for every live span.
    span_map: &'static PageMap,
}

// SAFETY: PageCache is only accessed through a SpinMutex. Raw pointers within
// point to OS-allocated memory that outlives any thread.
unsafe impl Send for PageCache {}

impl PageCache {
    pub const fn new(span_map: &'static PageMap) -> Self {
        Self {
            free_spans: [const { SpanStack::new() }; MAX_PAGES + 1],
            large_spans: SpanStack::new(),
            span_map,
        }
    }

    /// Allocate a run of exactly `num_pages` contiguous pages and return its
    /// starting address, or null if the OS is out of memory.
    ///
    /// # Safety
    ///
    /// Caller must hold exclusive access (via the enclosing `SpinMutex`).
    pub unsafe fn allocate_span(&mut self, num_pages: usize) -> *mut u8 {
        assert!(num_pages > 0);

        let mut span = unsafe { self.take_free(num_pages) };
        if span.is_null() {
            span = unsafe { self.system_alloc(num_pages) };
            if span.is_null() {
                return ptr::null_mut();
            }
        }

        unsafe {
            if (*span).num_pages > num_pages {
                self.split_span(span, num_pages);
            }
            (*span).state = SpanState::InUse;
            (*span).start_addr()
        }
    }

    /// Return a run previously obtained from `allocate_span`. The length
    /// must match the original request. Addresses that do not start a live
    /// span are ignored (not our memory).
    ///
    /// # Safety
    ///
    /// Caller must hold exclusive access (via the enclosing `SpinMutex`),
    /// and the run must no longer be referenced.
    pub unsafe fn deallocate_span(&mut self, ptr: *mut u8, num_pages: usize) {
        let page_id = (ptr as usize) >> PAGE_SHIFT;
        let span = self.span_map.get(page_id);
        if span.is_null() {
            return;
        }

        unsafe {
            debug_assert_eq!((*span).start_page, page_id);
            debug_assert_eq!((*span).num_pages, num_pages, "span length mismatch on return");

            (*span).state = SpanState::Free;
            self.coalesce_right(span);
            self.insert_free(span);
        }
    }

    /// Detach the smallest free span with at least `num_pages` pages.
    unsafe fn take_free(&mut self, num_pages: usize) -> *mut Span {
        if num_pages <= MAX_PAGES {
            // Exact bucket first, then the next larger ones
            for n in num_pages..=MAX_PAGES {
                if !self.free_spans[n].is_empty() {
                    return unsafe { self.free_spans[n].pop() };
                }
            }
        }

        // Fall back to the overflow list (best fit)
        unsafe { self.large_spans.take_at_least(num_pages) }
    }

    /// Split a span: keep the first `num_pages` pages in `span`, refile the
    /// remainder as a new free span. If no record can be allocated for the
    /// remainder the span is handed out whole instead.
    unsafe fn split_span(&mut self, span: *mut Span, num_pages: usize) {
        let (rest_page, rest_pages) = unsafe {
            (
                (*span).start_page + num_pages,
                (*span).num_pages - num_pages,
            )
        };
        let remainder = span::new_record(rest_page, rest_pages, SpanState::Free);
        if remainder.is_null() {
            return;
        }

        unsafe {
            (*span).num_pages = num_pages;
            self.span_map.set(rest_page, remainder);
            self.insert_free(remainder);
        }
        stat_inc!(span_splits);
    }

    /// Insert a free span into the bucket for its page count.
    unsafe fn insert_free(&mut self, span: *mut Span) {
        let n = unsafe { (*span).num_pages };
        if n <= MAX_PAGES {
            unsafe { self.free_spans[n].push(span) };
        } else {
            unsafe { self.large_spans.push(span) };
        }
    }

    /// Merge `span` with the span starting right after it, if that span is
    /// currently free. Coalescing is forward-only; a free left neighbor is
    /// picked up when *it* is returned.
    unsafe fn coalesce_right(&mut self, span: *mut Span) {
        let next_page = unsafe { (*span).end_page() };
        let right = self.span_map.get(next_page);
        if right.is_null() {
            return;
        }

        unsafe {
            if (*right).state != SpanState::Free {
                return;
            }
            debug_assert_eq!((*right).start_page, next_page);

            // A free span sits in the bucket for its size; unlink it there
            let right_pages = (*right).num_pages;
            let found = if right_pages <= MAX_PAGES {
                self.free_spans[right_pages].unlink(right)
            } else {
                self.large_spans.unlink(right)
            };
            debug_assert!(found, "free span missing from its bucket");
            if !found {
                return;
            }

            (*span).num_pages += right_pages;
            self.span_map.set(next_page, ptr::null_mut());
            span::free_record(right);
        }
        stat_inc!(span_coalesces);
    }

    /// Map fresh pages from the OS and wrap them in a new span.
    unsafe fn system_alloc(&mut self, num_pages: usize) -> *mut Span {
        let size = num_pages * PAGE_SIZE;

        #[cfg(feature = "debug")]
        println!("[page_cache] mapping {} pages from the OS", num_pages);

        let ptr = unsafe { platform::page_alloc(size) };
        if ptr.is_null() {
            return ptr::null_mut();
        }
        stat_inc!(os_map_count);
        stat_add!(os_map_bytes, size as u64);

        let s = span::new_record((ptr as usize) >> PAGE_SHIFT, num_pages, SpanState::InUse);
        if s.is_null() {
            unsafe { platform::page_dealloc(ptr, size) };
            return ptr::null_mut();
        }

        unsafe { self.span_map.set((*s).start_page, s) };
        s
    }
}
