//! # fenceheap - an explicit free list allocator
//!
//! Memory is obtained from the kernel in big regions (64 MiB chunks by
//! default) and handed out in blocks. Each block carries its size and status
//! twice, in a header and in a footer, so both neighbours of any block can be
//! found in constant time:
//!
//! ```text
//!   One region:
//!
//!   +----+--------------------+-----------------+--------------------+----+
//!   | FP | H |   free     | F | H | payload | F | H |    free    | F | FP |
//!   +----+--------------------+-----------------+--------------------+----+
//!     ^                                                                ^
//!     +-- fencepost (always allocated)             fencepost ----------+
//! ```
//!
//! Free blocks are chained in a doubly linked list stored inside their own
//! payloads, sorted by address. An allocation takes the best fitting free
//! block and splits it when the leftover is big enough to be a block of its
//! own. A release merges the block with free neighbours on either side.
//!
//! ## Crate Structure
//!
//! ```text
//!   fenceheap
//!   ├── kernel    - mmap / VirtualAlloc, page size
//!   ├── region    - regions with fenceposts, chunk registry
//!   ├── block     - header / footer layout and offset arithmetic
//!   ├── list      - free list links stored in free payloads
//!   ├── freelist  - the free list: search, insert, remove
//!   ├── heap      - Heap: allocate, release, introspection
//!   ├── global    - process-wide default heap
//!   ├── config    - HeapConfig and policies
//!   └── error     - AllocError, CorruptionError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use fenceheap::Heap;
//!
//! let mut heap = Heap::new();
//!
//! let ptr = heap.allocate(64).unwrap();
//! unsafe {
//!     ptr.as_ptr().write(42);
//!     assert_eq!(42, *ptr.as_ptr());
//!     heap.release(ptr.as_ptr());
//! }
//!
//! assert!(heap.check_integrity().is_ok());
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives.
//! - **Word alignment**: payloads are aligned to `size_of::<usize>()`, nothing more.
//! - **Regions are never trimmed**: memory goes back to the kernel only when a
//!   [`Heap`] is dropped.

mod block;
mod config;
mod error;
mod freelist;
mod global;
mod heap;
mod kernel;
mod list;
mod region;
mod utils;

pub use block::{ALIGNMENT, BlockRef, METADATA_SIZE, MIN_ALLOCATION_SIZE, MIN_BLOCK_SIZE};
pub use config::{CHUNK_SIZE, FitPolicy, ForeignRelease, HeapConfig, InsertOrder};
pub use error::{AllocError, CorruptionError};
pub use global::{allocate, release, with_default_heap};
pub use heap::{Blocks, Heap, HeapStats, MAX_ALLOCATION_SIZE};
pub use region::MAX_CHUNKS;
