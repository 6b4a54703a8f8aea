//! Triangular addressing of image pairs.
//!
//! Pair `(i, j)` with `i < j` lives at `(j - 1) * j / 2 + i`. All pairs sharing the
//! larger index `j` form one contiguous row, which is what lets the match buffers copy a
//! whole image's worth of records in one slice operation.

use std::ops::Range;

use crate::types::ImagePair;

#[inline]
pub fn pair_index(i: usize, j: usize) -> usize {
    debug_assert!(i < j, "pair ({i}, {j}) is not canonical");
    (j - 1) * j / 2 + i
}

/// Number of pairs among `num_images` images.
#[inline]
pub fn num_pairs(num_images: usize) -> usize {
    num_images * num_images.saturating_sub(1) / 2
}

/// Pair offsets of row `cur`, i.e. `(0, cur)..=(cur - 1, cur)`.
#[inline]
pub fn row_range(cur: usize) -> Range<usize> {
    let start = num_pairs(cur);
    start..start + cur
}

/// All pairs in storage order: `j` ascending, then `i` ascending.
pub fn pairs(num_images: usize) -> impl Iterator<Item = ImagePair> {
    (1..num_images).flat_map(|j| (0..j).map(move |i| ImagePair { i, j }))
}
