//! Size class math.
//!
//! Requests are bucketed into `FREE_LIST_SIZE` classes spaced `ALIGNMENT`
//! bytes apart, from `ALIGNMENT` up to `MAX_BYTES` inclusive. The ladder is
//! uniform, so the mapping is closed-form rather than table-driven.

use crate::config::{ALIGNMENT, MAX_BYTES};

/// Map a request size to its size class index.
///
/// Zero-sized requests are served from the smallest class. Returns `None`
/// for sizes above `MAX_BYTES`; those bypass the tiered path entirely.
#[inline]
pub fn size_to_index(size: usize) -> Option<usize> {
    if size > MAX_BYTES {
        return None;
    }
    Some(size.max(1).div_ceil(ALIGNMENT) - 1)
}

/// Block size for a given class index.
#[inline]
pub const fn index_to_size(index: usize) -> usize {
    (index + 1) * ALIGNMENT
}

/// Round a request size up to its class's block size.
#[inline]
pub const fn round_up(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FREE_LIST_SIZE;

    #[test]
    fn test_zero_maps_to_smallest_class() {
        assert_eq!(size_to_index(0), Some(0));
        assert_eq!(index_to_size(0), ALIGNMENT);
    }

    #[test]
    fn test_exact_sizes() {
        assert_eq!(size_to_index(8), Some(0));
        assert_eq!(size_to_index(16), Some(1));
        assert_eq!(size_to_index(64), Some(7));
        assert_eq!(size_to_index(512), Some(63));
    }

    #[test]
    fn test_rounds_up() {
        assert_eq!(size_to_index(1), Some(0));
        assert_eq!(size_to_index(7), Some(0));
        assert_eq!(size_to_index(9), Some(1));
        assert_eq!(size_to_index(17), Some(2));
        assert_eq!(size_to_index(505), Some(63));
    }

    #[test]
    fn test_oversize_rejected() {
        assert_eq!(size_to_index(MAX_BYTES + 1), None);
        assert_eq!(size_to_index(1 << 20), None);
    }

    #[test]
    fn test_round_trip_all_classes() {
        for index in 0..FREE_LIST_SIZE {
            let size = index_to_size(index);
            assert_eq!(
                size_to_index(size),
                Some(index),
                "round-trip failed for class {} (size {})",
                index,
                size
            );
            assert_eq!(round_up(size), size);
        }
    }

    #[test]
    fn test_round_up_matches_class_size() {
        for size in 1..=MAX_BYTES {
            let index = size_to_index(size).unwrap();
            assert_eq!(round_up(size), index_to_size(index));
        }
    }
}
