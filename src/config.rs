//! Build-time configuration constants.
//!
//! Generated by `build.rs` from `rmempool.toml` (override the path with the
//! `RMEMPOOL_CONFIG` environment variable). See that file for the meaning of
//! each tunable.

include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));

// Free blocks carry the next pointer in their first word, so a block must be
// at least one pointer wide.
const _: () = assert!(ALIGNMENT >= core::mem::size_of::<*mut u8>());
const _: () = assert!(FREE_LIST_SIZE == MAX_BYTES / ALIGNMENT);
const _: () = assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
