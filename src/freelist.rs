use crate::{
    block::{BlockRef, block_to_payload},
    config::{FitPolicy, InsertOrder},
    list::{FreeLinks, Link},
    region::ChunkRegistry,
};

/// Doubly linked list of every free block, across all regions.
///
/// The nodes are [`FreeLinks`] written in the payload of each free block, so
/// the list itself only keeps what the head and tail sentinels point to:
///
/// ```text
///                                     Free List
///
///             +-------------------------+  +------------------------------------+
///             |                         |  |                                    |
///  Head ---+  |                         v  |                                    v
/// +--------|--|-----------------------------|----+      +------------------------|-----------+
/// |        | +|-----+    +-------+    +-----|+    |      |        | +-------+    +---|--+      |
/// | Region | | Free | -> | Block | -> | Free |    | ---> | Region | | Block | -> | Free | ... |
/// |        | +------+    +-------+    +------+    |      |        | +-------+    +------+      |
/// +----------------------------------------------+      +------------------------------------+
///                                                                                  |
///                                                                            Tail -+
/// ```
///
/// Because the sentinels are [`Link::Head`] and [`Link::Tail`] rather than
/// blocks, nothing can unlink them: [`FreeList::remove`] only accepts a
/// [`BlockRef`].
///
/// Every operation takes the [`ChunkRegistry`] that owns the memory the links
/// are stored in.
pub(crate) struct FreeList {
    /// What the head sentinel points to.
    first: Link,
    /// What the tail sentinel points back to.
    last: Link,
    len: usize,
    order: InsertOrder,
}

pub(crate) struct Iter<'a> {
    arena: &'a ChunkRegistry,
    current: Link,
}

impl FreeList {
    /// Creates a new empty list: head and tail pointing at each other.
    pub const fn new(order: InsertOrder) -> Self {
        Self {
            first: Link::Tail,
            last: Link::Head,
            len: 0,
            order,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn last(&self) -> Link {
        self.last
    }

    pub(crate) fn links(arena: &ChunkRegistry, block: BlockRef) -> FreeLinks {
        arena.get(block.chunk).read(block_to_payload(block.offset))
    }

    fn set_links(arena: &mut ChunkRegistry, block: BlockRef, links: FreeLinks) {
        arena.get_mut(block.chunk).write(block_to_payload(block.offset), links);
    }

    fn next_of(&self, arena: &ChunkRegistry, link: Link) -> Link {
        match link {
            Link::Head => self.first,
            Link::Block(block) => Self::links(arena, block).next(),
            Link::Tail => Link::Tail,
        }
    }

    fn set_next(&mut self, arena: &mut ChunkRegistry, link: Link, next: Link) {
        match link {
            Link::Head => self.first = next,
            Link::Block(block) => {
                let links = Self::links(arena, block).with_next(next);
                Self::set_links(arena, block, links);
            }
            Link::Tail => panic!("tail sentinel has no successor"),
        }
    }

    fn set_prev(&mut self, arena: &mut ChunkRegistry, link: Link, prev: Link) {
        match link {
            Link::Tail => self.last = prev,
            Link::Block(block) => {
                let links = Self::links(arena, block).with_prev(prev);
                Self::set_links(arena, block, links);
            }
            Link::Head => panic!("head sentinel has no predecessor"),
        }
    }

    /// Node after which `block` has to be linked.
    fn insertion_point(&self, arena: &ChunkRegistry, block: BlockRef) -> Link {
        match self.order {
            InsertOrder::Lifo => Link::Head,
            InsertOrder::Address => {
                let addr = arena.address_of(block);
                let mut prev = Link::Head;

                while let Link::Block(next) = self.next_of(arena, prev) {
                    if arena.address_of(next) > addr {
                        break;
                    }
                    prev = Link::Block(next);
                }

                prev
            }
        }
    }

    /// Links `block` into the list. The block header must already say it is free.
    pub fn insert(&mut self, arena: &mut ChunkRegistry, block: BlockRef) {
        debug_assert!(arena.header(block).is_free());

        let prev = self.insertion_point(arena, block);
        let next = self.next_of(arena, prev);

        Self::set_links(arena, block, FreeLinks::new(prev, next));
        self.set_next(arena, prev, Link::Block(block));
        self.set_prev(arena, next, Link::Block(block));

        self.len += 1;
    }

    /// Unlinks `block` using its own links. O(1).
    pub fn remove(&mut self, arena: &mut ChunkRegistry, block: BlockRef) {
        let links = Self::links(arena, block);

        self.set_next(arena, links.prev(), links.next());
        self.set_prev(arena, links.next(), links.prev());

        self.len -= 1;
    }

    /// Returns a free block of at least `size` bytes, picked according to `fit`.
    ///
    /// With [`FitPolicy::Best`] the whole list is scanned for the smallest block
    /// that fits, the first one found wins on ties. An exact fit can't be beaten
    /// so the scan stops there.
    pub fn find(&self, arena: &ChunkRegistry, size: usize, fit: FitPolicy) -> Option<BlockRef> {
        let mut best: Option<(BlockRef, usize)> = None;

        for block in self.iter(arena) {
            let block_size = arena.header(block).size();

            if block_size < size {
                continue;
            }

            if fit == FitPolicy::First || block_size == size {
                return Some(block);
            }

            if best.is_none_or(|(_, best_size)| block_size < best_size) {
                best = Some((block, block_size));
            }
        }

        best.map(|(block, _)| block)
    }

    pub fn iter<'a>(&self, arena: &'a ChunkRegistry) -> Iter<'a> {
        Iter {
            arena,
            current: self.first,
        }
    }
}

impl Iterator for Iter<'_> {
    type Item = BlockRef;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current.block()?;

        self.current = FreeList::links(self.arena, block).next();

        Some(block)
    }
}
