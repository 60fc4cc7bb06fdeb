#![no_std]

//! rmempool: a thread-aware memory pool for small fixed-class objects.
//!
//! Requests flow through a three-level cache hierarchy:
//! - Thread caches (fast path, no locks) — enabled by the `std` feature
//! - A central cache (per-size-class locking, span-level accounting)
//! - A page cache (span management, OS interface)
//!
//! Sizes up to `MAX_BYTES` (512 by default) are served from size-classed
//! free lists; anything bigger goes straight to the C heap. Deallocation
//! takes the original request size — the pool stores no per-block headers.
//!
//! # Usage
//!
//! ```ignore
//! let p = rmempool::allocate(64);
//! // ... use the 64 bytes at p ...
//! unsafe { rmempool::deallocate(p, 64) };
//!
//! let node = rmempool::new_element(42u64);
//! unsafe { rmempool::delete_element(node) };
//! ```

#[cfg(test)]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod allocator;
pub mod central_cache;
pub mod config;
mod macros;
pub mod page_cache;
pub mod pagemap;
pub mod platform;
pub mod size_class;
pub mod span;
#[cfg(feature = "stats")]
pub mod stats;
pub mod sync;
pub mod thread_cache;

pub use allocator::{allocate, deallocate, delete_element, new_element};
pub use config::{ALIGNMENT, MAX_BYTES, PAGE_SIZE};
