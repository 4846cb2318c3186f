//! Process-wide default heap, for callers that want plain `malloc`/`free`
//! style entry points instead of carrying a [`Heap`] around.

use std::{cell::UnsafeCell, process, ptr};

use log::{error, trace};

use crate::{error::AllocError, heap::Heap};

struct DefaultHeap(UnsafeCell<Heap>);

// Not actually thread safe: every function touching the cell is `unsafe` and
// requires callers to stay on a single thread.
unsafe impl Sync for DefaultHeap {}

static DEFAULT_HEAP: DefaultHeap = DefaultHeap(UnsafeCell::new(Heap::new()));

/// Allocates `size` zero-filled bytes from the default heap.
///
/// Returns null for `0` and for requests above [`crate::MAX_ALLOCATION_SIZE`].
/// If the operating system refuses to give us more memory the process is
/// aborted with a diagnostic, there is nothing sensible to return.
///
/// # Safety
///
/// The default heap is not synchronized: [`allocate`], [`release`] and
/// [`with_default_heap`] must only ever be called from one thread.
pub unsafe fn allocate(size: usize) -> *mut u8 {
    let heap = unsafe { &mut *DEFAULT_HEAP.0.get() };

    match heap.allocate(size) {
        Ok(ptr) => ptr.as_ptr(),
        Err(err) if !err.is_fatal() => {
            trace!("allocate({size}) -> null: {err}");
            ptr::null_mut()
        }
        Err(err) => fatal(err),
    }
}

/// Returns `ptr` to the default heap. Null, foreign and already released
/// pointers are ignored, see [`Heap::release`].
///
/// # Safety
///
/// Same single thread contract as [`allocate`], and the pointer requirements
/// of [`Heap::release`].
pub unsafe fn release(ptr: *mut u8) {
    let heap = unsafe { &mut *DEFAULT_HEAP.0.get() };

    unsafe { heap.release(ptr) }
}

/// Runs `f` with the default heap, mostly useful for introspection.
///
/// # Safety
///
/// Same single thread contract as [`allocate`]. `f` must not call [`allocate`],
/// [`release`] or [`with_default_heap`] itself.
pub unsafe fn with_default_heap<R>(f: impl FnOnce(&mut Heap) -> R) -> R {
    let heap = unsafe { &mut *DEFAULT_HEAP.0.get() };

    f(heap)
}

#[cold]
fn fatal(err: AllocError) -> ! {
    error!("unrecoverable allocator failure: {err}");
    eprintln!("fenceheap: {err}, aborting");
    process::abort()
}
