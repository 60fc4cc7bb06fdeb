//! Allocation statistics counters.
//!
//! All counters use `Relaxed` ordering — they are observational only and not
//! used as synchronization primitives. The allocator's own locks provide the
//! ordering guarantees for correctness; these counters are purely for
//! monitoring.
//!
//! Obtain a [`Snapshot`] with [`snapshot()`]. Individual counter loads are
//! each atomic but not globally consistent with one another.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    // ---- Request stream ----
    /// Total calls to `allocate`.
    pub alloc_count: AtomicU64,
    /// Total calls to `deallocate`.
    pub dealloc_count: AtomicU64,
    /// Sum of all requested byte sizes passed to `allocate`.
    pub alloc_bytes: AtomicU64,
    /// Requests above MAX_BYTES forwarded to the C heap.
    pub oversize_allocs: AtomicU64,

    // ---- Tier traffic ----
    /// Allocations served from a thread-local list (fast path, no lock).
    pub thread_cache_hits: AtomicU64,
    /// Allocations that fell through to the central cache.
    pub thread_cache_misses: AtomicU64,
    /// Thread cache lists trimmed back to the central cache.
    pub spills: AtomicU64,
    /// Delayed-return passes executed by the central cache.
    pub delayed_return_passes: AtomicU64,
    /// Spans carved into blocks by the central cache.
    pub spans_carved: AtomicU64,
    /// Fully-free spans handed back to the page cache.
    pub spans_reclaimed: AtomicU64,

    // ---- Page cache / OS ----
    /// Page runs mapped from the OS.
    pub os_map_count: AtomicU64,
    /// Bytes mapped from the OS.
    pub os_map_bytes: AtomicU64,
    /// Free spans split to satisfy a smaller request.
    pub span_splits: AtomicU64,
    /// Returned spans merged with a free right neighbor.
    pub span_coalesces: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            alloc_count: AtomicU64::new(0),
            dealloc_count: AtomicU64::new(0),
            alloc_bytes: AtomicU64::new(0),
            oversize_allocs: AtomicU64::new(0),
            thread_cache_hits: AtomicU64::new(0),
            thread_cache_misses: AtomicU64::new(0),
            spills: AtomicU64::new(0),
            delayed_return_passes: AtomicU64::new(0),
            spans_carved: AtomicU64::new(0),
            spans_reclaimed: AtomicU64::new(0),
            os_map_count: AtomicU64::new(0),
            os_map_bytes: AtomicU64::new(0),
            span_splits: AtomicU64::new(0),
            span_coalesces: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time snapshot of all allocation statistics.
///
/// Fields are plain `u64` values loaded from the global atomic counters.
/// Concurrent allocations may race between the individual loads; for
/// monitoring purposes that is always sufficient.
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    /// Total calls to `allocate`.
    pub alloc_count: u64,
    /// Total calls to `deallocate`.
    pub dealloc_count: u64,
    /// Sum of all requested byte sizes passed to `allocate`.
    pub alloc_bytes: u64,
    /// Requests above MAX_BYTES forwarded to the C heap.
    pub oversize_allocs: u64,
    /// Allocations served from a thread-local list (fast path, no lock).
    pub thread_cache_hits: u64,
    /// Allocations that fell through to the central cache.
    pub thread_cache_misses: u64,
    /// Thread cache lists trimmed back to the central cache.
    pub spills: u64,
    /// Delayed-return passes executed by the central cache.
    pub delayed_return_passes: u64,
    /// Spans carved into blocks by the central cache.
    pub spans_carved: u64,
    /// Fully-free spans handed back to the page cache.
    pub spans_reclaimed: u64,
    /// Page runs mapped from the OS.
    pub os_map_count: u64,
    /// Bytes mapped from the OS.
    pub os_map_bytes: u64,
    /// Free spans split to satisfy a smaller request.
    pub span_splits: u64,
    /// Returned spans merged with a free right neighbor.
    pub span_coalesces: u64,
}

/// Load all counters with `Relaxed` ordering and return a [`Snapshot`].
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        alloc_count: s.alloc_count.load(Ordering::Relaxed),
        dealloc_count: s.dealloc_count.load(Ordering::Relaxed),
        alloc_bytes: s.alloc_bytes.load(Ordering::Relaxed),
        oversize_allocs: s.oversize_allocs.load(Ordering::Relaxed),
        thread_cache_hits: s.thread_cache_hits.load(Ordering::Relaxed),
        thread_cache_misses: s.thread_cache_misses.load(Ordering::Relaxed),
        spills: s.spills.load(Ordering::Relaxed),
        delayed_return_passes: s.delayed_return_passes.load(Ordering::Relaxed),
        spans_carved: s.spans_carved.load(Ordering::Relaxed),
        spans_reclaimed: s.spans_reclaimed.load(Ordering::Relaxed),
        os_map_count: s.os_map_count.load(Ordering::Relaxed),
        os_map_bytes: s.os_map_bytes.load(Ordering::Relaxed),
        span_splits: s.span_splits.load(Ordering::Relaxed),
        span_coalesces: s.span_coalesces.load(Ordering::Relaxed),
    }
}
