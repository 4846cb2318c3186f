//! Helper functions for the allocator that don't particularly belong to any
//! concrete module of the program.

/// It aligns `to_be_aligned` using `alignment`, which must be a power of two.
///
/// This is used to round block sizes up to a multiple of [`crate::ALIGNMENT`]
/// and region sizes up to a multiple of the page size, since memory addresses
/// handed to the user have to be aligned to the computer's word size.
#[inline]
pub(crate) const fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Number of `per_chunk` sized pieces needed to cover `size` bytes.
/// Always at least one.
#[inline]
pub(crate) const fn chunks_needed(size: usize, per_chunk: usize) -> usize {
    if size == 0 {
        return 1;
    }

    size.div_ceil(per_chunk)
}
