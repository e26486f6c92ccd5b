//! Backing memory for ring buffer storage.
//!
//! On Linux the region is an anonymous private mapping: 2 MiB huge pages are
//! requested first and plain pages are the fallback, the mapping is `mlock`ed
//! when allowed, and placement on a preferred NUMA node uses the `mbind`
//! syscall. Every one of those is best-effort; only the base allocation
//! failing is an error. Other platforms use a page-aligned heap allocation.

use std::ptr::NonNull;

use tracing::{debug, warn};

use crate::config::RingConfig;
use crate::error::CreateError;

const PAGE_ALIGN: usize = 4096;

enum Backing {
    #[cfg(unix)]
    Mapped,
    #[cfg(not(unix))]
    Heap { layout: std::alloc::Layout },
}

/// An owned, zero-initialized, page-aligned byte region.
pub(crate) struct Region {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// SAFETY: the region is a plain byte allocation; all synchronization over
// its contents is the ring buffer's responsibility.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Allocates `len` bytes (a power of two) per the configuration.
    pub(crate) fn allocate(len: usize, config: &RingConfig) -> Result<Self, CreateError> {
        debug_assert!(len.is_power_of_two());

        #[cfg(unix)]
        {
            Self::map(len, config)
        }
        #[cfg(not(unix))]
        {
            let _ = config;
            Self::heap(len)
        }
    }

    #[cfg(unix)]
    fn map(len: usize, config: &RingConfig) -> Result<Self, CreateError> {
        let mut huge = false;
        let mut ptr = std::ptr::null_mut();

        #[cfg(target_os = "linux")]
        if config.huge_pages {
            // SAFETY: anonymous mapping with no file descriptor.
            ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB,
                    -1,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                debug!(len, "huge-page mapping unavailable, using regular pages");
                ptr = std::ptr::null_mut();
            } else {
                huge = true;
            }
        }

        if ptr.is_null() {
            // SAFETY: anonymous mapping with no file descriptor.
            ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(CreateError::OutOfMemory("mmap failed"));
            }

            #[cfg(target_os = "linux")]
            if config.huge_pages {
                // Ask THP to back the range with huge pages if it can.
                // SAFETY: ptr/len describe the mapping created above.
                unsafe {
                    libc::madvise(ptr, len, libc::MADV_HUGEPAGE);
                }
            }
        }

        debug!(len, huge, "ring region mapped");
        debug_assert_eq!(ptr as usize % PAGE_ALIGN, 0);
        let region = Self {
            // SAFETY: mmap success was checked against MAP_FAILED.
            ptr: unsafe { NonNull::new_unchecked(ptr.cast::<u8>()) },
            len,
            backing: Backing::Mapped,
        };

        if config.lock_memory {
            // SAFETY: ptr/len describe the mapping owned by `region`.
            let rc = unsafe { libc::mlock(region.ptr.as_ptr().cast(), len) };
            if rc != 0 {
                warn!(len, "mlock failed, queue memory stays pageable");
            }
        }

        #[cfg(target_os = "linux")]
        if let Some(node) = config.numa_node {
            bind_to_node(region.ptr.as_ptr().cast(), len, node);
        }

        Ok(region)
    }

    #[cfg(not(unix))]
    fn heap(len: usize) -> Result<Self, CreateError> {
        let layout = std::alloc::Layout::from_size_align(len, PAGE_ALIGN)
            .map_err(|_| CreateError::InvalidArgument("capacity overflows a layout"))?;
        // SAFETY: layout has non-zero size (MIN_CLASS_CAPACITY > 0).
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            return Err(CreateError::OutOfMemory("alloc_zeroed failed"));
        };
        Ok(Self {
            ptr,
            len,
            backing: Backing::Heap { layout },
        })
    }

    /// Base pointer of the region.
    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Region length in bytes.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        match self.backing {
            #[cfg(unix)]
            Backing::Mapped => {
                // SAFETY: ptr/len describe a mapping this Region owns.
                unsafe {
                    libc::munmap(self.ptr.as_ptr().cast(), self.len);
                }
            }
            #[cfg(not(unix))]
            Backing::Heap { layout } => {
                // SAFETY: allocated in Self::heap with the same layout.
                unsafe {
                    std::alloc::dealloc(self.ptr.as_ptr(), layout);
                }
            }
        }
    }
}

/// Best-effort `mbind(MPOL_PREFERRED)` of the range onto `node`.
#[cfg(target_os = "linux")]
fn bind_to_node(addr: *mut libc::c_void, len: usize, node: u32) {
    const MPOL_PREFERRED: libc::c_long = 1;

    if node >= 64 {
        warn!(node, "numa node out of nodemask range, skipping mbind");
        return;
    }
    let nodemask: u64 = 1 << node;
    // SAFETY: addr/len describe a live mapping; the nodemask is one u64.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_mbind,
            addr,
            len,
            MPOL_PREFERRED,
            std::ptr::addr_of!(nodemask),
            64usize,
            0usize,
        )
    };
    if rc != 0 {
        warn!(node, "mbind failed, leaving placement to first touch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RingConfig {
        RingConfig::new(4096).huge_pages(false).lock_memory(false)
    }

    #[test]
    fn test_allocate_zeroed_and_aligned() {
        let region = Region::allocate(4096, &test_config()).unwrap();
        assert_eq!(region.len(), 4096);
        assert_eq!(region.as_ptr() as usize % PAGE_ALIGN, 0);

        // mmap and alloc_zeroed both hand back zeroed memory.
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), 4096) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_region_is_writable() {
        let region = Region::allocate(4096, &test_config()).unwrap();
        unsafe {
            region.as_ptr().write(0xAB);
            region.as_ptr().add(4095).write(0xCD);
            assert_eq!(region.as_ptr().read(), 0xAB);
            assert_eq!(region.as_ptr().add(4095).read(), 0xCD);
        }
    }

    #[test]
    fn test_huge_page_request_falls_back() {
        // Must succeed whether or not the machine has a hugetlb pool.
        let config = RingConfig::new(4096).lock_memory(false);
        let region = Region::allocate(2 * 1024 * 1024, &config).unwrap();
        assert_eq!(region.len(), 2 * 1024 * 1024);
    }
}
