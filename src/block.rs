use std::mem;

use crate::{list::FreeLinks, utils::align};

/// Word alignment. Every block size and every payload address is a multiple of it.
pub const ALIGNMENT: usize = mem::size_of::<usize>();

/// Smallest payload we ever hand out (one word).
pub const MIN_ALLOCATION_SIZE: usize = ALIGNMENT;

/// Size of the block header. The footer has the exact same shape, so a block
/// carries `2 * METADATA_SIZE` bytes of metadata.
pub const METADATA_SIZE: usize = mem::size_of::<Header>();

/// Smallest block that can live on its own: header, the free list links that
/// are written into the payload while the block is free, one word of payload
/// and the footer.
pub const MIN_BLOCK_SIZE: usize = align(
    2 * METADATA_SIZE + mem::size_of::<FreeLinks>() + MIN_ALLOCATION_SIZE,
    ALIGNMENT,
);

const ALLOCATED: usize = 1;

/// This is the metadata of a block. It is written at the start of the block
/// and copied into its last `METADATA_SIZE` bytes, the footer.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        | -> Header
/// |        flags        |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        | -> Addressable content. While the block
/// |         ...         |        |    is free it starts with the free list
/// |                     |        |    links, see [`crate::list::FreeLinks`]
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        | -> Footer
/// |        flags        |        |
/// +---------------------+ <------+
/// ```
///
/// `size` is the total size of the block, metadata included, so the next
/// block in memory starts exactly `size` bytes after this one and the footer
/// right before a header tells us where the previous block starts.
///
/// The flag is a whole word rather than a `bool`: headers are read back from
/// raw memory and every bit pattern has to be a valid value.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    size: usize,
    flags: usize,
}

impl Header {
    pub const fn free(size: usize) -> Self {
        Self { size, flags: 0 }
    }

    pub const fn allocated(size: usize) -> Self {
        Self { size, flags: ALLOCATED }
    }

    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub const fn is_free(&self) -> bool {
        self.flags & ALLOCATED == 0
    }
}

/// Handle to a block: the chunk it lives in and the byte offset of its header
/// from the start of that chunk's mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef {
    pub(crate) chunk: usize,
    pub(crate) offset: usize,
}

impl BlockRef {
    pub(crate) const fn new(chunk: usize, offset: usize) -> Self {
        Self { chunk, offset }
    }

    /// Index of the region holding this block.
    pub fn chunk(&self) -> usize {
        self.chunk
    }

    /// Offset of the block header inside its region.
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub(crate) const fn at(&self, offset: usize) -> Self {
        Self { chunk: self.chunk, offset }
    }
}

/// Offset of the header that owns the payload at `payload`.
#[inline]
pub(crate) const fn payload_to_block(payload: usize) -> usize {
    payload.wrapping_sub(METADATA_SIZE)
}

/// Offset of the payload of the block whose header is at `block`.
#[inline]
pub(crate) const fn block_to_payload(block: usize) -> usize {
    block + METADATA_SIZE
}

/// Offset of the footer of a block of `size` bytes starting at `block`.
#[inline]
pub(crate) const fn footer_of(block: usize, size: usize) -> usize {
    block + size - METADATA_SIZE
}
