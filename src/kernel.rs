use std::{ptr::NonNull, sync::OnceLock};

use log::debug;

use crate::{error::AllocError, utils::align};

/// Virtual memory page size of the computer. This is usually 4096.
/// It would be a constant, but we don't know the value at compile time.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Low level memory requests and other platform-dependant stuff live here.
/// This is the only part of the allocator that talks to the operating system.
pub(crate) struct Kernel;

/// A span of memory obtained from the operating system. It is page aligned,
/// zero-initialized and readable/writable for `len` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Mapping {
    pub base: NonNull<u8>,
    pub len: usize,
}

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);

    /// Hands `addr` to the platform's own allocator.
    unsafe fn release_foreign(addr: *mut u8);

    /// Returns the virtual memory page size of the computer in bytes.
    fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size once.
#[inline]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(Kernel::page_size)
}

/// Obtains a fresh region of at least `len` bytes, rounded up to the page size.
///
/// There is no smaller fallback request: if the kernel says no we report
/// [`AllocError::ResourceExhausted`] and leave the decision to abort to
/// whoever is on top of us.
pub(crate) fn acquire(len: usize) -> Result<Mapping, AllocError> {
    let len = align(len, page_size());

    match unsafe { Kernel::request_memory(len) } {
        Some(base) => {
            debug!("mapped region of {len} bytes at {base:p}");
            Ok(Mapping { base, len })
        }
        None => Err(AllocError::ResourceExhausted { bytes: len }),
    }
}

/// Gives `mapping` back to the kernel.
///
/// **SAFETY**: nothing may touch the mapping afterwards.
pub(crate) unsafe fn release(mapping: Mapping) {
    debug!("unmapping region of {} bytes at {:p}", mapping.len, mapping.base);
    unsafe { Kernel::return_memory(mapping.base.as_ptr(), mapping.len) }
}

/// Wrapper to use [`PlatformMemory::release_foreign`].
///
/// **SAFETY**: `addr` must come from the platform allocator and be live.
#[inline]
pub(crate) unsafe fn release_foreign(addr: *mut u8) {
    unsafe { Kernel::release_foreign(addr) }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr as *mut c_void, len as size_t);
            }
        }

        unsafe fn release_foreign(addr: *mut u8) {
            unsafe { libc::free(addr as *mut c_void) }
        }

        fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use crate::kernel::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }

        unsafe fn release_foreign(addr: *mut u8) {
            unsafe {
                if let Ok(heap) = Memory::GetProcessHeap() {
                    let _ = Memory::HeapFree(
                        heap,
                        Memory::HEAP_FLAGS(0),
                        Some(addr as *const c_void),
                    );
                }
            }
        }

        fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}
