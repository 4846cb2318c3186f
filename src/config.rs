/// Memory size requested from the kernel per chunk (64 MiB). Regions are
/// always a whole number of chunks.
pub const CHUNK_SIZE: usize = 64 << 20;

/// Placement policy used when searching the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitPolicy {
    /// Smallest free block that still fits. Ties go to the block found first.
    /// Costs a full scan of the free list, keeps external fragmentation lower.
    #[default]
    Best,
    /// First free block that fits.
    First,
}

/// Where freed blocks are linked into the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertOrder {
    /// Keep the list sorted by block address. O(n) insertion, deterministic
    /// iteration order.
    #[default]
    Address,
    /// Push at the front of the list. O(1).
    Lifo,
}

/// What to do with a pointer released before the heap ever mapped memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForeignRelease {
    /// Hand it to the platform allocator: such a pointer can only have come
    /// from there.
    #[default]
    Platform,
    /// Drop it on the floor.
    Ignore,
}

/// Tunables of a [`crate::Heap`].
///
/// ```
/// use fenceheap::{FitPolicy, Heap, HeapConfig, InsertOrder};
///
/// const CONFIG: HeapConfig = HeapConfig::new()
///     .chunk_size(1 << 20)
///     .fit(FitPolicy::First)
///     .order(InsertOrder::Lifo);
///
/// let heap = Heap::with_config(CONFIG);
/// assert_eq!(1 << 20, heap.config().chunk_size);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Size of one chunk. Rounded up to the page size when memory is requested.
    pub chunk_size: usize,
    pub fit: FitPolicy,
    pub order: InsertOrder,
    pub foreign: ForeignRelease,
}

impl HeapConfig {
    pub const fn new() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            fit: FitPolicy::Best,
            order: InsertOrder::Address,
            foreign: ForeignRelease::Platform,
        }
    }

    pub const fn chunk_size(self, chunk_size: usize) -> Self {
        Self { chunk_size, ..self }
    }

    pub const fn fit(self, fit: FitPolicy) -> Self {
        Self { fit, ..self }
    }

    pub const fn order(self, order: InsertOrder) -> Self {
        Self { order, ..self }
    }

    pub const fn foreign(self, foreign: ForeignRelease) -> Self {
        Self { foreign, ..self }
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_classic_design() {
        let config = HeapConfig::default();

        assert_eq!(64 << 20, config.chunk_size);
        assert_eq!(FitPolicy::Best, config.fit);
        assert_eq!(InsertOrder::Address, config.order);
        assert_eq!(ForeignRelease::Platform, config.foreign);
    }

    #[test]
    fn builder_only_touches_its_field() {
        let config = HeapConfig::new().foreign(ForeignRelease::Ignore);

        assert_eq!(ForeignRelease::Ignore, config.foreign);
        assert_eq!(CHUNK_SIZE, config.chunk_size);
        assert_eq!(FitPolicy::Best, config.fit);
    }
}
