use crate::block::BlockRef;

/// Encoded sentinel values. Chunk indices never get anywhere near `0xFF`.
const HEAD: u64 = u64::MAX;
const TAIL: u64 = u64::MAX - 1;

const OFFSET_BITS: u32 = 56;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

/// One end of a free list edge: either a real block or one of the two
/// sentinels. The sentinels are not stored anywhere in the arena, they are
/// just names for "the list itself".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    Head,
    Tail,
    Block(BlockRef),
}

impl Link {
    /// Packs the link into a single word so it fits inside a free payload.
    pub fn encode(self) -> u64 {
        match self {
            Link::Head => HEAD,
            Link::Tail => TAIL,
            Link::Block(block) => {
                debug_assert!((block.offset as u64) <= OFFSET_MASK);
                ((block.chunk as u64) << OFFSET_BITS) | block.offset as u64
            }
        }
    }

    pub fn decode(raw: u64) -> Self {
        match raw {
            HEAD => Link::Head,
            TAIL => Link::Tail,
            raw => Link::Block(BlockRef::new(
                (raw >> OFFSET_BITS) as usize,
                (raw & OFFSET_MASK) as usize,
            )),
        }
    }

    #[inline]
    pub fn block(self) -> Option<BlockRef> {
        match self {
            Link::Block(block) => Some(block),
            _ => None,
        }
    }
}

/// Free list node. It is written in the payload of every free block, right
/// after the header, since that payload won't be used by anyone until the
/// block is allocated again:
///
/// ```text
/// +------------------------+ <--------+
/// |         Header         |          |-------> Block Header
/// +------------------------+ <--------+
/// |       prev (link)      |          |
/// +------------------------+          |-------> FreeLinks
/// |       next (link)      |          |
/// +------------------------+ <--------+
/// |      Free Payload      |
/// |        (unused)        |
/// +------------------------+
/// |         Footer         |
/// +------------------------+
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeLinks {
    prev: u64,
    next: u64,
}

impl FreeLinks {
    pub fn new(prev: Link, next: Link) -> Self {
        Self {
            prev: prev.encode(),
            next: next.encode(),
        }
    }

    #[inline]
    pub fn prev(&self) -> Link {
        Link::decode(self.prev)
    }

    #[inline]
    pub fn next(&self) -> Link {
        Link::decode(self.next)
    }

    #[inline]
    pub fn with_prev(self, prev: Link) -> Self {
        Self { prev: prev.encode(), ..self }
    }

    #[inline]
    pub fn with_next(self, next: Link) -> Self {
        Self { next: next.encode(), ..self }
    }
}
