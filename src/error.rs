use thiserror::Error;

/// Everything that can go wrong while serving an allocation request.
///
/// [`AllocError::ZeroSize`] and [`AllocError::TooLarge`] are ordinary user
/// errors, the pointer based API turns them into a null pointer. The rest are
/// fatal: there is no smaller request we could retry with and the process-wide
/// instance aborts on them. See [`AllocError::is_fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("allocation of zero bytes requested")]
    ZeroSize,

    #[error("requested {requested} bytes, maximum single allocation is {max} bytes")]
    TooLarge { requested: usize, max: usize },

    #[error("operating system could not provide a region of {bytes} bytes")]
    ResourceExhausted { bytes: usize },

    #[error("chunk registry is full ({capacity} regions)")]
    RegistryFull { capacity: usize },

    #[error("heap corrupted: {0}")]
    Corrupted(#[from] CorruptionError),
}

impl AllocError {
    /// Whether the allocator can keep serving requests after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ZeroSize | Self::TooLarge { .. })
    }
}

/// A broken heap invariant, found either by the allocator itself or by
/// [`crate::Heap::check_integrity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CorruptionError {
    #[error("block at chunk {chunk} offset {offset:#x} has invalid size {size}")]
    BadSize { chunk: usize, offset: usize, size: usize },

    #[error("header and footer of block at chunk {chunk} offset {offset:#x} disagree")]
    FooterMismatch { chunk: usize, offset: usize },

    #[error("blocks of chunk {chunk} cover {covered} bytes, region holds {expected}")]
    RegionNotCovered { chunk: usize, covered: usize, expected: usize },

    #[error("adjacent free blocks at chunk {chunk} offset {offset:#x} were not coalesced")]
    Uncoalesced { chunk: usize, offset: usize },

    #[error("free block at chunk {chunk} offset {offset:#x} is not in the free list")]
    MissingFromFreeList { chunk: usize, offset: usize },

    #[error("free list entry at chunk {chunk} offset {offset:#x} is not a free block")]
    ListedNotFree { chunk: usize, offset: usize },

    #[error("free list links around chunk {chunk} offset {offset:#x} are inconsistent")]
    BrokenLinks { chunk: usize, offset: usize },

    #[error("free list is out of address order at chunk {chunk} offset {offset:#x}")]
    OutOfOrder { chunk: usize, offset: usize },

    #[error("free list length {counted} does not match recorded length {recorded}")]
    LengthMismatch { counted: usize, recorded: usize },

    #[error("no free block of {size} bytes after growing the heap")]
    GrowthDidNotFit { size: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_user_errors_are_recoverable() {
        assert!(!AllocError::ZeroSize.is_fatal());
        assert!(!AllocError::TooLarge { requested: 10, max: 5 }.is_fatal());
        assert!(AllocError::ResourceExhausted { bytes: 1 }.is_fatal());
        assert!(AllocError::RegistryFull { capacity: 128 }.is_fatal());
        assert!(AllocError::from(CorruptionError::GrowthDidNotFit { size: 64 }).is_fatal());
    }

    #[test]
    fn messages_carry_the_numbers() {
        let err = AllocError::TooLarge { requested: 300, max: 200 };
        assert_eq!(
            "requested 300 bytes, maximum single allocation is 200 bytes",
            err.to_string()
        );
    }
}
