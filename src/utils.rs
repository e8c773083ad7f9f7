//! This file contains the size arithmetic helpers shared by every module.
//! They don't particularly belong to any concrete component of the pool.

use crate::block::WORD_SIZE;

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This is used to round block lengths up to the machine word and mapped
/// region sizes up to [`crate::mapped::page_size`].
pub const fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Rounds `n` up to the next multiple of the machine word size.
///
/// ```
/// use poolalloc::align_word;
///
/// match std::mem::size_of::<usize>() {
///     8 => assert_eq!(align_word(3), 8),
///     4 => assert_eq!(align_word(3), 4),
///     _ => {}
/// }
/// ```
#[inline]
pub const fn align_word(n: usize) -> usize {
    align(n, WORD_SIZE)
}

/// Same as [`align_word`] but returns `None` instead of wrapping when `n`
/// is within one word of `usize::MAX`.
#[inline]
pub const fn checked_align_word(n: usize) -> Option<usize> {
    match n.checked_add(WORD_SIZE - 1) {
        Some(bumped) => Some(bumped & !(WORD_SIZE - 1)),
        None => None,
    }
}
