use std::{cmp, ptr::NonNull};

use log::{debug, trace, warn};

use crate::{
    block::{
        ALIGNMENT, BlockRef, Header, METADATA_SIZE, MIN_BLOCK_SIZE, block_to_payload, footer_of,
        payload_to_block,
    },
    config::{ForeignRelease, HeapConfig, InsertOrder},
    error::{AllocError, CorruptionError},
    freelist::FreeList,
    kernel,
    list::Link,
    region::ChunkRegistry,
    utils::{align, chunks_needed},
};

/// Largest request [`Heap::allocate`] accepts (128 MiB minus some metadata).
pub const MAX_ALLOCATION_SIZE: usize = (128 << 20) - 4 * METADATA_SIZE;

/// Explicit free list allocator over regions mapped from the kernel.
///
/// The heap is a list of regions, each one a sequence of blocks closed by
/// fenceposts (see [`crate::region`]), plus a free list threaded through the
/// payloads of the free blocks:
///
/// ```text
///                                  Free List
///
///                Next free block                Next free block
///           +----------------------+  +--------------------------------------+
///           |                      |  |                                      |
/// +---------|----------------------|--|----+      +-------------------------|---------+
/// | +----+ +|-----+  +-------+  +--|--|-+  |      | +----+ +-------+  +-----|+ +----+ |
/// | | FP | | Free |  | Block |  | Free  |  | ...  | | FP | | Block |  | Free | | FP | |
/// | +----+ +------+  +-------+  +-------+  |      | +----+ +-------+  +------+ +----+ |
/// +----------------------------------------+      +-----------------------------------+
/// ```
///
/// Requests are served with best fit (by default) from the free list. When
/// nothing fits, a new region big enough for the request is mapped and its
/// single free block goes into the list. Freed blocks are merged with free
/// neighbours straight away, so two free blocks are never adjacent.
///
/// A `Heap` is meant to be used from a single thread, every operation takes
/// `&mut self`. Regions stay mapped until the heap is dropped.
pub struct Heap {
    chunks: ChunkRegistry,
    free_list: FreeList,
    config: HeapConfig,
}

// The heap exclusively owns every mapping it points into.
unsafe impl Send for Heap {}

/// Snapshot of the heap layout, sizes include block metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub regions: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub allocated_bytes: usize,
    pub largest_free: usize,
}

/// Iterator over every block of every region, in address order within a region.
pub struct Blocks<'a> {
    heap: &'a Heap,
    current: Option<BlockRef>,
}

/// Size of the block needed to serve `size` bytes of payload.
#[inline]
fn block_size_for(size: usize) -> usize {
    cmp::max(align(size + 2 * METADATA_SIZE, ALIGNMENT), MIN_BLOCK_SIZE)
}

/// Offset right past a block of `size` bytes at `offset`. Sizes read from a
/// corrupted header can be anything, so this overflows to `None`.
#[inline]
fn block_end(offset: usize, size: usize) -> Option<usize> {
    offset.checked_add(size)
}

impl Heap {
    /// Creates an empty heap with the default [`HeapConfig`]. Nothing is
    /// mapped until the first allocation.
    pub const fn new() -> Self {
        Self::with_config(HeapConfig::new())
    }

    pub const fn with_config(config: HeapConfig) -> Self {
        Self {
            chunks: ChunkRegistry::new(),
            free_list: FreeList::new(config.order),
            config,
        }
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Whether the first region has been mapped yet.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        !self.chunks.is_empty()
    }

    pub fn region_count(&self) -> usize {
        self.chunks.len()
    }

    /// Allocates `size` bytes and returns a pointer to zero-filled, word
    /// aligned memory.
    ///
    /// `0` and anything above [`MAX_ALLOCATION_SIZE`] are rejected with a
    /// recoverable error. Any other error is fatal, see [`AllocError::is_fatal`].
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        if size > MAX_ALLOCATION_SIZE {
            return Err(AllocError::TooLarge {
                requested: size,
                max: MAX_ALLOCATION_SIZE,
            });
        }

        let alloc_size = block_size_for(size);

        if !self.is_initialized() {
            debug!("first allocation, initializing heap");
            self.grow(alloc_size)?;
        }

        let block = match self.free_list.find(&self.chunks, alloc_size, self.config.fit) {
            Some(block) => block,
            None => {
                self.grow(alloc_size)?;
                self.free_list
                    .find(&self.chunks, alloc_size, self.config.fit)
                    .ok_or(CorruptionError::GrowthDidNotFit { size: alloc_size })?
            }
        };

        let block = self.take(block, alloc_size);

        let region = self.chunks.get_mut(block.chunk);
        let payload = block_to_payload(block.offset);
        let block_size = region.header(block.offset).size();
        region.zero(payload, block_size - 2 * METADATA_SIZE);

        let ptr = region.ptr(payload);
        trace!("allocate({size}) -> {ptr:p} (block of {block_size} bytes)");

        Ok(ptr)
    }

    /// Chunk size actually used when mapping, whole pages and at least big
    /// enough for fenceposts plus one block.
    fn chunk_size(&self) -> usize {
        let wanted = cmp::max(self.config.chunk_size, 2 * METADATA_SIZE + MIN_BLOCK_SIZE);
        align(wanted, kernel::page_size())
    }

    /// Maps a new region able to hold a block of `alloc_size` bytes and puts
    /// its only block in the free list.
    fn grow(&mut self, alloc_size: usize) -> Result<BlockRef, AllocError> {
        // Checked up front so a full registry never leaks a mapping.
        if self.chunks.is_full() {
            return Err(AllocError::RegistryFull {
                capacity: crate::region::MAX_CHUNKS,
            });
        }

        let chunk_size = self.chunk_size();
        let count = chunks_needed(alloc_size, chunk_size - 2 * METADATA_SIZE);

        let mapping = kernel::acquire(count * chunk_size)?;
        let chunk = self.chunks.register(mapping)?;

        let region = self.chunks.get(chunk);
        let block = BlockRef::new(chunk, region.first_block());
        debug!(
            "region {chunk}: {count} chunk(s), {} bytes at {:p}",
            region.len(),
            mapping.base
        );

        self.free_list.insert(&mut self.chunks, block);

        Ok(block)
    }

    /// Takes `block` out of the free list and turns (part of) it into an
    /// allocated block of `alloc_size` bytes.
    ///
    /// If what would be left is too small to be a block of its own, the whole
    /// block is handed out. Otherwise the lower part stays free and the upper
    /// `alloc_size` bytes are returned.
    fn take(&mut self, block: BlockRef, alloc_size: usize) -> BlockRef {
        self.free_list.remove(&mut self.chunks, block);

        let size = self.chunks.header(block).size();
        let remainder = size - alloc_size;

        if remainder < MIN_BLOCK_SIZE {
            self.chunks.set_block(block, Header::allocated(size));
            return block;
        }

        self.chunks.set_block(block, Header::free(remainder));
        self.free_list.insert(&mut self.chunks, block);

        let allocated = block.at(block.offset + remainder);
        self.chunks.set_block(allocated, Header::allocated(alloc_size));

        allocated
    }

    /// Gives back memory obtained from [`Heap::allocate`].
    ///
    /// Null pointers, pointers outside every region and pointers to blocks that
    /// are already free are ignored. Before the heap has mapped anything, the
    /// pointer can only come from somewhere else and is handed to the platform
    /// allocator (unless [`ForeignRelease::Ignore`] is configured).
    ///
    /// # Safety
    ///
    /// `ptr` must be null, a pointer returned by [`Heap::allocate`] on this
    /// heap, or a pointer that does not point into this heap's regions. On an
    /// uninitialized heap with [`ForeignRelease::Platform`] it must be a live
    /// pointer from the platform allocator (`malloc`).
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        if !self.is_initialized() {
            match self.config.foreign {
                ForeignRelease::Platform => {
                    trace!("release({ptr:p}) before initialization, passing to platform allocator");
                    unsafe { kernel::release_foreign(ptr) };
                }
                ForeignRelease::Ignore => {
                    warn!("release({ptr:p}) before initialization, ignored");
                }
            }
            return;
        }

        let Some(block) = self.block_from_pointer(ptr) else {
            warn!("release({ptr:p}): not inside any region, ignored");
            return;
        };

        if let Err(reason) = self.check_releasable(block) {
            warn!("release({ptr:p}): {reason}, ignored");
            return;
        }

        let merged = self.coalesce(block);
        trace!(
            "release({ptr:p}) -> free block of {} bytes",
            self.chunks.header(merged).size()
        );
    }

    /// Whether `block` looks like a live allocated block.
    fn check_releasable(&self, block: BlockRef) -> Result<(), &'static str> {
        let region = self.chunks.get(block.chunk);

        if block.offset % ALIGNMENT != 0 {
            return Err("misaligned pointer");
        }

        let header = region.header(block.offset);
        let size = header.size();

        if size < MIN_BLOCK_SIZE
            || size % ALIGNMENT != 0
            || block_end(block.offset, size).is_none_or(|end| end > region.fencepost_end())
        {
            return Err("no block header at this address");
        }

        if region.read::<Header>(footer_of(block.offset, size)) != header {
            return Err("block header and footer disagree");
        }

        if header.is_free() {
            return Err("double free");
        }

        Ok(())
    }

    /// Marks `block` free and merges it with whichever neighbours are free,
    /// then links the result into the free list. Returns the merged block.
    ///
    /// ```text
    ///  left     block    right
    /// +------+ +------+ +------+
    /// | used | | this | | used |   -> this
    /// | used | | this | | free |   -> this + right
    /// | free | | this | | used |   -> left + this
    /// | free | | this | | free |   -> left + this + right
    /// +------+ +------+ +------+
    /// ```
    ///
    /// The fenceposts look like allocated neighbours, so there is nothing
    /// special to do at the edges of a region.
    fn coalesce(&mut self, block: BlockRef) -> BlockRef {
        let mut start = block.offset;
        let mut size = self.chunks.header(block).size();

        // Stale headers inside the merged extent keep saying "free", which is
        // what makes a second release of the same pointer a no-op.
        self.chunks.set_block(block, Header::free(size));

        let right = block.at(start + size);
        let right_header = self.chunks.header(right);
        if right_header.is_free() {
            self.free_list.remove(&mut self.chunks, right);
            size += right_header.size();
        }

        let left_footer = self.chunks.get(block.chunk).footer_before(start);
        if left_footer.is_free() {
            let left = block.at(start - left_footer.size());
            self.free_list.remove(&mut self.chunks, left);
            start = left.offset;
            size += left_footer.size();
        }

        let merged = block.at(start);
        self.chunks.set_block(merged, Header::free(size));
        self.free_list.insert(&mut self.chunks, merged);

        merged
    }

    /// Block owning the payload at `ptr`, if `ptr` lies inside one of the regions.
    /// Only the region bounds are checked.
    pub fn block_from_pointer(&self, ptr: *const u8) -> Option<BlockRef> {
        self.chunks.lookup(payload_to_block(ptr as usize))
    }

    /// Pointer to the payload of `block`.
    pub fn payload(&self, block: BlockRef) -> NonNull<u8> {
        self.chunks.get(block.chunk).ptr(block_to_payload(block.offset))
    }

    /// First block of the first region, fenceposts excluded.
    pub fn first_block(&self) -> Option<BlockRef> {
        self.chunks
            .iter()
            .next()
            .map(|(chunk, region)| BlockRef::new(chunk, region.first_block()))
    }

    /// Block right after `block` in memory, `None` at the end of its region.
    ///
    /// A block with a corrupted size of zero yields itself back.
    pub fn next_block(&self, block: BlockRef) -> Option<BlockRef> {
        let region = self.chunks.get(block.chunk);
        let next = block_end(block.offset, region.header(block.offset).size())?;

        (next < region.fencepost_end()).then(|| block.at(next))
    }

    /// Block right before `block` in memory, found through its footer.
    /// `None` for the first block of a region.
    pub fn prev_block(&self, block: BlockRef) -> Option<BlockRef> {
        let region = self.chunks.get(block.chunk);

        if block.offset <= region.first_block() {
            return None;
        }

        let footer = region.footer_before(block.offset);
        block.offset.checked_sub(footer.size()).map(|offset| block.at(offset))
    }

    pub fn is_free(&self, block: BlockRef) -> bool {
        self.chunks.header(block).is_free()
    }

    /// Total size of `block`, metadata included.
    pub fn block_size(&self, block: BlockRef) -> usize {
        self.chunks.header(block).size()
    }

    /// Every block of every region, regions in the order they were mapped.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            heap: self,
            current: self.first_block(),
        }
    }

    /// Free blocks in free list order.
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockRef> + '_ {
        self.free_list.iter(&self.chunks)
    }

    pub fn count_all_blocks(&self) -> usize {
        self.blocks().count()
    }

    pub fn count_free_blocks(&self) -> usize {
        self.blocks().filter(|block| self.is_free(*block)).count()
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            regions: self.chunks.len(),
            ..HeapStats::default()
        };

        for block in self.blocks() {
            let size = self.block_size(block);
            stats.blocks += 1;

            if self.is_free(block) {
                stats.free_blocks += 1;
                stats.free_bytes += size;
                stats.largest_free = cmp::max(stats.largest_free, size);
            } else {
                stats.allocated_bytes += size;
            }
        }

        stats
    }

    /// Walks every region and the free list checking the heap invariants:
    ///
    /// - fenceposts are intact and blocks exactly cover the space between them
    /// - every header matches its footer and has a sane size
    /// - no two free blocks are adjacent
    /// - every free block is in the free list exactly once, and nothing else is
    /// - the list links agree in both directions (and are sorted by address when
    ///   [`InsertOrder::Address`] is used)
    pub fn check_integrity(&self) -> Result<(), CorruptionError> {
        let mut free_in_regions = 0;

        for (chunk, region) in self.chunks.iter() {
            for fencepost in [region.fencepost_start(), region.fencepost_end()] {
                if region.header(fencepost) != Header::allocated(METADATA_SIZE) {
                    return Err(CorruptionError::BadSize {
                        chunk,
                        offset: fencepost,
                        size: region.header(fencepost).size(),
                    });
                }
            }

            let end = region.fencepost_end();
            let mut offset = region.first_block();
            let mut prev_free = false;

            while offset < end {
                let header = region.header(offset);
                let size = header.size();

                if size < MIN_BLOCK_SIZE
                    || size % ALIGNMENT != 0
                    || block_end(offset, size).is_none_or(|block_end| block_end > end)
                {
                    return Err(CorruptionError::BadSize { chunk, offset, size });
                }

                if region.read::<Header>(footer_of(offset, size)) != header {
                    return Err(CorruptionError::FooterMismatch { chunk, offset });
                }

                if header.is_free() {
                    if prev_free {
                        return Err(CorruptionError::Uncoalesced { chunk, offset });
                    }

                    let block = BlockRef::new(chunk, offset);
                    if !self.free_blocks().take(self.free_list.len()).any(|free| free == block) {
                        return Err(CorruptionError::MissingFromFreeList { chunk, offset });
                    }

                    free_in_regions += 1;
                }

                prev_free = header.is_free();
                offset += size;
            }

            if offset != end {
                return Err(CorruptionError::RegionNotCovered {
                    chunk,
                    covered: offset - region.first_block(),
                    expected: end - region.first_block(),
                });
            }
        }

        self.check_free_list(free_in_regions)
    }

    fn check_free_list(&self, free_in_regions: usize) -> Result<(), CorruptionError> {
        let mut prev = Link::Head;
        let mut prev_addr = 0;
        let mut counted = 0;

        // One extra step so a cycle shows up as a length mismatch.
        for block in self.free_blocks().take(self.free_list.len() + 1) {
            let BlockRef { chunk, offset } = block;

            let in_bounds = chunk < self.chunks.len()
                && offset >= self.chunks.get(chunk).first_block()
                && offset < self.chunks.get(chunk).fencepost_end();
            if !in_bounds {
                return Err(CorruptionError::BrokenLinks { chunk, offset });
            }

            if !self.is_free(block) {
                return Err(CorruptionError::ListedNotFree { chunk, offset });
            }

            if FreeList::links(&self.chunks, block).prev() != prev {
                return Err(CorruptionError::BrokenLinks { chunk, offset });
            }

            let addr = self.chunks.address_of(block);
            if self.config.order == InsertOrder::Address && addr < prev_addr {
                return Err(CorruptionError::OutOfOrder { chunk, offset });
            }

            prev = Link::Block(block);
            prev_addr = addr;
            counted += 1;
        }

        if counted != self.free_list.len() || counted != free_in_regions {
            return Err(CorruptionError::LengthMismatch {
                counted,
                recorded: self.free_list.len(),
            });
        }

        if self.free_list.last() != prev {
            let (chunk, offset) = prev.block().map_or((0, 0), |block| (block.chunk, block.offset));
            return Err(CorruptionError::BrokenLinks { chunk, offset });
        }

        Ok(())
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        for mapping in self.chunks.take_mappings() {
            unsafe { kernel::release(mapping) };
        }
    }
}

impl Iterator for Blocks<'_> {
    type Item = BlockRef;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;

        self.current = self.heap.next_block(block).or_else(|| {
            let next_chunk = block.chunk + 1;
            (next_chunk < self.heap.chunks.len())
                .then(|| BlockRef::new(next_chunk, self.heap.chunks.get(next_chunk).first_block()))
        });

        Some(block)
    }
}
