use std::ffi::c_void;
use std::sync::OnceLock;

/// Cached page size to avoid repeated sysconf calls
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

#[cfg(target_os = "macos")]
pub fn get_page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { libc::vm_page_size })
}

#[cfg(target_os = "linux")]
pub fn get_page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize })
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub fn get_page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| 4096)
}

/// An anonymous read-write mapping. Fresh pages read as zero.
pub struct MappedRegion {
    ptr: *mut u8,
    size: usize,
}

impl MappedRegion {
    /// Maps at least `size` bytes, rounded up to whole pages.
    pub fn alloc_rw(size: usize) -> Result<Self, std::io::Error> {
        let page = get_page_size();
        let size = size.max(1).div_ceil(page) * page;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            size,
        })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut c_void, self.size);
        }
    }
}

unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_page_rounded_and_zeroed() {
        let region = MappedRegion::alloc_rw(10).unwrap();
        assert_eq!(region.size(), get_page_size());
        assert_eq!(region.as_mut_ptr() as usize % get_page_size(), 0);
        let bytes = unsafe { std::slice::from_raw_parts(region.as_mut_ptr(), region.size()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
