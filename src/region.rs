use std::{mem, ptr::{self, NonNull}};

use crate::{
    block::{BlockRef, Header, METADATA_SIZE, footer_of},
    error::AllocError,
    kernel::Mapping,
};

/// Maximum number of regions a heap can hold.
pub const MAX_CHUNKS: usize = 128;

/// One mapping obtained from the kernel, seen as a sequence of blocks between
/// two fenceposts.
///
/// Mappings are not adjacent to each other, so every region is closed at both
/// ends by a header-only block permanently marked as allocated:
///
/// ```text
/// offset 0        METADATA_SIZE                      len - METADATA_SIZE   len
/// +-------------+------------+------------+-----+-------------+
/// | fencepost   |   Block    |   Block    | ... |  fencepost  |
/// | (allocated) |            |            |     | (allocated) |
/// +-------------+------------+------------+-----+-------------+
/// ```
///
/// The start fencepost is exactly one header long, which makes it double as
/// the footer of the (non existing) block on the left of the first block. The
/// end fencepost is what `first + size` lands on after the last block. Neither
/// neighbour lookup ever has to check whether it is at the edge.
///
/// All accesses go through byte offsets that are checked against the mapping
/// length, a bad offset is a corrupted heap and panics instead of touching
/// memory we don't own.
#[derive(Debug)]
pub(crate) struct Region {
    mapping: Mapping,
}

impl Region {
    /// Lays out the fenceposts and a single free block spanning the rest of `mapping`.
    pub fn carve(mapping: Mapping) -> Self {
        let mut region = Self { mapping };

        let end = region.fencepost_end();
        region.write(region.fencepost_start(), Header::allocated(METADATA_SIZE));
        region.write(end, Header::allocated(METADATA_SIZE));
        region.set_block(region.first_block(), Header::free(end - region.first_block()));

        region
    }

    #[inline]
    pub fn mapping(&self) -> Mapping {
        self.mapping
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mapping.len
    }

    #[inline]
    pub fn base_addr(&self) -> usize {
        self.mapping.base.as_ptr() as usize
    }

    #[inline]
    pub const fn fencepost_start(&self) -> usize {
        0
    }

    #[inline]
    pub fn fencepost_end(&self) -> usize {
        self.mapping.len - METADATA_SIZE
    }

    #[inline]
    pub const fn first_block(&self) -> usize {
        METADATA_SIZE
    }

    /// Offset of the block header at absolute address `addr`, if that address
    /// lies between this region's fenceposts.
    pub fn block_offset(&self, addr: usize) -> Option<usize> {
        let base = self.base_addr();

        if addr >= base + self.first_block() && addr < base + self.fencepost_end() {
            Some(addr - base)
        } else {
            None
        }
    }

    #[inline]
    fn check(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.mapping.len),
            "offset {offset:#x} (+{len}) outside region of {} bytes",
            self.mapping.len
        );
    }

    /// Pointer to the byte at `offset`.
    #[inline]
    pub fn ptr(&self, offset: usize) -> NonNull<u8> {
        self.check(offset, 0);
        unsafe { self.mapping.base.add(offset) }
    }

    pub fn read<T: Copy>(&self, offset: usize) -> T {
        self.check(offset, mem::size_of::<T>());
        unsafe { ptr::read_unaligned(self.mapping.base.as_ptr().add(offset).cast::<T>()) }
    }

    pub fn write<T: Copy>(&mut self, offset: usize, value: T) {
        self.check(offset, mem::size_of::<T>());
        unsafe { ptr::write_unaligned(self.mapping.base.as_ptr().add(offset).cast::<T>(), value) }
    }

    /// Fills `len` bytes starting at `offset` with zeros.
    pub fn zero(&mut self, offset: usize, len: usize) {
        self.check(offset, len);
        unsafe { ptr::write_bytes(self.mapping.base.as_ptr().add(offset), 0, len) }
    }

    #[inline]
    pub fn header(&self, offset: usize) -> Header {
        self.read(offset)
    }

    /// Footer of the block that ends right where `offset` starts.
    #[inline]
    pub fn footer_before(&self, offset: usize) -> Header {
        self.read(offset - METADATA_SIZE)
    }

    /// Writes `header` both at `offset` and as the footer of the block.
    pub fn set_block(&mut self, offset: usize, header: Header) {
        self.write(offset, header);
        self.write(footer_of(offset, header.size()), header);
    }
}

/// Fixed size table of every region the heap obtained.
///
/// Regions are kept in the order they were mapped and are never removed
/// while the heap is alive. The table lives inside the heap itself, the
/// allocator can't allocate its own bookkeeping.
pub(crate) struct ChunkRegistry {
    chunks: [Option<Region>; MAX_CHUNKS],
    len: usize,
}

impl ChunkRegistry {
    pub const fn new() -> Self {
        Self {
            chunks: [const { None }; MAX_CHUNKS],
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == MAX_CHUNKS
    }

    /// Carves `mapping` into a region and appends it. Returns the region index.
    pub fn register(&mut self, mapping: Mapping) -> Result<usize, AllocError> {
        if self.is_full() {
            return Err(AllocError::RegistryFull { capacity: MAX_CHUNKS });
        }

        let index = self.len;
        self.chunks[index] = Some(Region::carve(mapping));
        self.len += 1;

        Ok(index)
    }

    pub fn get(&self, chunk: usize) -> &Region {
        match self.chunks.get(chunk) {
            Some(Some(region)) => region,
            _ => panic!("chunk {chunk} is not registered"),
        }
    }

    pub fn get_mut(&mut self, chunk: usize) -> &mut Region {
        match self.chunks.get_mut(chunk) {
            Some(Some(region)) => region,
            _ => panic!("chunk {chunk} is not registered"),
        }
    }

    /// Regions in mapping order, with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Region)> {
        self.chunks[..self.len]
            .iter()
            .enumerate()
            .filter_map(|(index, region)| region.as_ref().map(|region| (index, region)))
    }

    /// Finds the block whose header is at absolute address `addr`. Only the
    /// region bounds are checked, not whether a block actually starts there.
    pub fn lookup(&self, addr: usize) -> Option<BlockRef> {
        self.iter()
            .find_map(|(index, region)| region.block_offset(addr).map(|offset| BlockRef::new(index, offset)))
    }

    /// Absolute address of the header of `block`.
    #[inline]
    pub fn address_of(&self, block: BlockRef) -> usize {
        self.get(block.chunk).base_addr() + block.offset
    }

    #[inline]
    pub fn header(&self, block: BlockRef) -> Header {
        self.get(block.chunk).header(block.offset)
    }

    #[inline]
    pub fn set_block(&mut self, block: BlockRef, header: Header) {
        self.get_mut(block.chunk).set_block(block.offset, header);
    }

    /// Empties the registry, handing back every mapping it held.
    pub fn take_mappings(&mut self) -> impl Iterator<Item = Mapping> + '_ {
        self.len = 0;
        self.chunks.iter_mut().filter_map(|region| region.take().map(|region| region.mapping()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel;

    fn mapping(len: usize) -> Mapping {
        kernel::acquire(len).expect("mmap failed")
    }

    #[test]
    fn carve_lays_out_fenceposts_and_one_free_block() {
        let map = mapping(kernel::page_size());
        let region = Region::carve(map);

        let start = region.header(region.fencepost_start());
        let end = region.header(region.fencepost_end());
        let first = region.header(region.first_block());

        assert!(!start.is_free());
        assert!(!end.is_free());
        assert_eq!(METADATA_SIZE, start.size());
        assert!(first.is_free());
        assert_eq!(map.len - 2 * METADATA_SIZE, first.size());
        assert_eq!(region.fencepost_end(), region.first_block() + first.size());

        // Footer of the only block sits right before the end fencepost.
        assert_eq!(first, region.footer_before(region.fencepost_end()));
        // And the start fencepost reads as an allocated footer for the first block.
        assert!(!region.footer_before(region.first_block()).is_free());

        unsafe { kernel::release(map) };
    }

    #[test]
    fn block_offset_excludes_fenceposts() {
        let map = mapping(kernel::page_size());
        let region = Region::carve(map);
        let base = region.base_addr();

        assert_eq!(None, region.block_offset(base));
        assert_eq!(Some(METADATA_SIZE), region.block_offset(base + METADATA_SIZE));
        assert_eq!(None, region.block_offset(base + region.fencepost_end()));
        assert_eq!(None, region.block_offset(base + map.len + 64));

        unsafe { kernel::release(map) };
    }

    #[test]
    #[should_panic]
    fn reads_past_the_mapping_panic() {
        let map = mapping(kernel::page_size());
        let region = Region::carve(map);

        let _: Header = region.read(map.len - 1);
    }

    #[test]
    fn registry_lookup_finds_owning_region() {
        let mut registry = ChunkRegistry::new();
        let first = registry.register(mapping(kernel::page_size())).unwrap();
        let second = registry.register(mapping(2 * kernel::page_size())).unwrap();

        assert_eq!(2, registry.len());

        let addr = registry.get(second).base_addr() + 2 * METADATA_SIZE;
        assert_eq!(Some(BlockRef::new(second, 2 * METADATA_SIZE)), registry.lookup(addr));

        let addr = registry.get(first).base_addr() + METADATA_SIZE;
        assert_eq!(Some(BlockRef::new(first, METADATA_SIZE)), registry.lookup(addr));

        let foreign = Box::new(0u64);
        assert_eq!(None, registry.lookup(&*foreign as *const u64 as usize));

        for map in registry.take_mappings().collect::<Vec<_>>() {
            unsafe { kernel::release(map) };
        }
        assert!(registry.is_empty());
    }
}
