use std::{ptr::NonNull, slice, sync::OnceLock};

use tracing::{debug, warn};

use crate::{
    error::{AllocError, AllocResult},
    utils::align,
};

/// Virtual memory page size of the computer. This is usually 4096 but we
/// can't know it at compile time.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// This trait provides an abstraction over the low level memory syscalls.
/// The pool itself has nothing to do with the concrete API each kernel
/// offers, it only ever sees a byte slice.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    /// Returns false if the kernel refused to take it back.
    unsafe fn return_memory(addr: NonNull<u8>, len: usize) -> bool;

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Zero sized type the platform specific implementations hang from.
struct Kernel;

/// Computer's page size, queried once.
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { Kernel::page_size() })
}

/// Page aligned, zero filled memory obtained straight from the operating
/// system. It is meant to be the buffer handed to [`crate::Pool::initialize`]
/// when no static array is at hand and the global allocator must not be
/// involved.
///
/// ```no_run
/// use poolalloc::{MappedRegion, Pool};
///
/// let mut region = MappedRegion::new(64 * 1024)?;
/// let mut pool = Pool::initialize(region.as_mut_slice())?;
/// let ptr = pool.allocate(128)?;
/// # let _ = ptr;
/// # Ok::<(), poolalloc::AllocError>(())
/// ```
///
/// The memory goes back to the kernel on drop.
pub struct MappedRegion {
    addr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is exclusively owned, like a `Box<[u8]>`.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Maps at least `len` bytes, rounded up to a whole number of pages.
    ///
    /// # Errors
    ///
    /// [`AllocError::MapFailed`] if `len` is zero, overflows once rounded, or
    /// the kernel refuses the request.
    pub fn new(len: usize) -> AllocResult<Self> {
        let page = page_size();

        if len == 0 || len > usize::MAX - page {
            return Err(AllocError::MapFailed { len });
        }
        let len = align(len, page);

        let addr = unsafe { Kernel::request_memory(len) }.ok_or(AllocError::MapFailed { len })?;

        debug!(len, page, "mapped region");
        Ok(Self { addr, len })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.addr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.addr.as_ptr(), self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if unsafe { Kernel::return_memory(self.addr, self.len) } {
            debug!(len = self.len, "unmapped region");
        } else {
            warn!(len = self.len, addr = ?self.addr, "failed to unmap region");
        }
    }
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
                match mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, len: usize) -> bool {
            unsafe { munmap(addr.as_ptr().cast::<c_void>(), len as size_t) == 0 }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use ::windows::Win32::System::{Memory, SystemInformation};

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

        unsafe fn return_memory(addr: NonNull<u8>, _len: usize) -> bool {
            unsafe {
                Memory::VirtualFree(addr.as_ptr() as *mut c_void, 0, Memory::MEM_RELEASE).is_ok()
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pool;

    #[test]
    fn page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
        assert_eq!(page_size(), page_size());
    }

    #[test]
    fn region_is_page_rounded_and_zeroed() {
        let region = MappedRegion::new(100).unwrap();

        assert_eq!(region.len(), page_size());
        assert!(region.as_slice().iter().all(|&byte| byte == 0));
    }

    #[test]
    fn zero_length_is_rejected() {
        assert_eq!(MappedRegion::new(0).err(), Some(AllocError::MapFailed { len: 0 }));
    }

    #[cfg(unix)]
    #[test]
    fn unmapping_a_misaligned_address_reports_failure() {
        let region = MappedRegion::new(page_size()).unwrap();
        let inside = unsafe { region.addr.add(1) };

        assert!(!unsafe { Kernel::return_memory(inside, region.len()) });
    }

    #[test]
    fn pool_over_mapped_region() {
        let mut region = MappedRegion::new(8192).unwrap();
        let capacity = region.len();
        let mut pool = Pool::initialize(region.as_mut_slice()).unwrap();

        assert_eq!(pool.capacity(), capacity);

        let ptr = pool.allocate(1000).unwrap();
        pool.payload_mut(ptr).unwrap().fill(0xEE);
        pool.free(Some(ptr)).unwrap();
        assert!(pool.is_empty());
    }
}
