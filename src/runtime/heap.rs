use std::alloc::Layout;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::mmap::MappedRegion;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub allocations: u64,
    pub frees: u64,
    pub bytes_allocated: u64,
}

/// Backing store for every buffer the containers own: slot groups, slice
/// buffers and boxed keys/elements.
///
/// Zero-byte requests return a dangling, aligned pointer that is never handed
/// back to the allocator.
pub trait Allocator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns `bytes` zeroed bytes aligned to `align`.
    fn allocate_zeroed(&self, bytes: usize, align: usize) -> Result<*mut u8>;

    /// Resizes an allocation. The first `min(old_bytes, new_bytes)` bytes are
    /// preserved and any new tail is zeroed.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator with the same `old_bytes` and `align`.
    unsafe fn reallocate(
        &self,
        ptr: *mut u8,
        old_bytes: usize,
        new_bytes: usize,
        align: usize,
    ) -> Result<*mut u8>;

    /// # Safety
    ///
    /// `ptr` must come from this allocator with the same `bytes` and `align`,
    /// and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: *mut u8, bytes: usize, align: usize);

    /// Called for every pointer word written by a typed copy, before the write.
    fn write_barrier(&self, _slot: *mut u8, _value: usize) {}

    fn stats(&self) -> HeapStats {
        HeapStats::default()
    }
}

fn dangling(align: usize) -> *mut u8 {
    align.max(1) as *mut u8
}

#[derive(Default)]
struct Counters {
    allocations: AtomicU64,
    frees: AtomicU64,
    bytes_allocated: AtomicU64,
}

impl Counters {
    fn record_alloc(&self, bytes: usize) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_free(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HeapStats {
        HeapStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
        }
    }
}

/// The global allocator of the process.
#[derive(Default)]
pub struct SystemHeap {
    counters: Counters,
}

impl SystemHeap {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Allocator for SystemHeap {
    fn name(&self) -> &'static str {
        "system"
    }

    fn allocate_zeroed(&self, bytes: usize, align: usize) -> Result<*mut u8> {
        if bytes == 0 {
            return Ok(dangling(align));
        }
        let layout =
            Layout::from_size_align(bytes, align.max(1)).map_err(|_| Error::OutOfMemory { bytes })?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(Error::OutOfMemory { bytes });
        }
        self.counters.record_alloc(bytes);
        Ok(ptr)
    }

    unsafe fn reallocate(
        &self,
        ptr: *mut u8,
        old_bytes: usize,
        new_bytes: usize,
        align: usize,
    ) -> Result<*mut u8> {
        if old_bytes == 0 {
            return self.allocate_zeroed(new_bytes, align);
        }
        if new_bytes == 0 {
            unsafe { self.deallocate(ptr, old_bytes, align) };
            return Ok(dangling(align));
        }
        let layout = Layout::from_size_align(old_bytes, align.max(1))
            .map_err(|_| Error::OutOfMemory { bytes: new_bytes })?;
        let grown = unsafe { std::alloc::realloc(ptr, layout, new_bytes) };
        if grown.is_null() {
            return Err(Error::OutOfMemory { bytes: new_bytes });
        }
        if new_bytes > old_bytes {
            unsafe { grown.add(old_bytes).write_bytes(0, new_bytes - old_bytes) };
        }
        self.counters.record_alloc(new_bytes);
        self.counters.record_free();
        Ok(grown)
    }

    unsafe fn deallocate(&self, ptr: *mut u8, bytes: usize, align: usize) {
        if bytes == 0 || ptr.is_null() {
            return;
        }
        if let Ok(layout) = Layout::from_size_align(bytes, align.max(1)) {
            unsafe { std::alloc::dealloc(ptr, layout) };
            self.counters.record_free();
        }
    }

    fn stats(&self) -> HeapStats {
        self.counters.snapshot()
    }
}

pub const DEFAULT_ARENA_CHUNK: usize = 4 * 1024 * 1024;

struct ArenaState {
    regions: Vec<MappedRegion>,
    offset: usize,
}

/// Bump allocation out of anonymous mappings. Memory is returned to the
/// system only when the arena is dropped.
pub struct ArenaHeap {
    state: Mutex<ArenaState>,
    chunk_size: usize,
    counters: Counters,
}

impl ArenaHeap {
    pub fn new(chunk_size: usize) -> Result<Self> {
        let first = MappedRegion::alloc_rw(chunk_size).map_err(|_| Error::OutOfMemory {
            bytes: chunk_size,
        })?;
        Ok(Self {
            state: Mutex::new(ArenaState {
                regions: vec![first],
                offset: 0,
            }),
            chunk_size,
            counters: Counters::default(),
        })
    }

    pub fn region_count(&self) -> usize {
        self.lock().regions.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ArenaState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Allocator for ArenaHeap {
    fn name(&self) -> &'static str {
        "arena"
    }

    fn allocate_zeroed(&self, bytes: usize, align: usize) -> Result<*mut u8> {
        if bytes == 0 {
            return Ok(dangling(align));
        }
        let align = align.max(1);
        let mut state = self.lock();
        let fits = state.regions.last().is_some_and(|region| {
            let start = crate::abi::align_up(state.offset, align);
            start + bytes <= region.size()
        });
        if !fits {
            let region = MappedRegion::alloc_rw(self.chunk_size.max(bytes + align))
                .map_err(|_| Error::OutOfMemory { bytes })?;
            debug!(
                size = region.size(),
                regions = state.regions.len() + 1,
                "arena mapped a new region"
            );
            state.regions.push(region);
            state.offset = 0;
        }
        let start = crate::abi::align_up(state.offset, align);
        let base = match state.regions.last() {
            Some(region) => region.as_mut_ptr(),
            None => return Err(Error::OutOfMemory { bytes }),
        };
        state.offset = start + bytes;
        self.counters.record_alloc(bytes);
        Ok(unsafe { base.add(start) })
    }

    unsafe fn reallocate(
        &self,
        ptr: *mut u8,
        old_bytes: usize,
        new_bytes: usize,
        align: usize,
    ) -> Result<*mut u8> {
        let fresh = self.allocate_zeroed(new_bytes, align)?;
        let keep = old_bytes.min(new_bytes);
        if keep > 0 {
            unsafe { std::ptr::copy_nonoverlapping(ptr, fresh, keep) };
        }
        unsafe { self.deallocate(ptr, old_bytes, align) };
        Ok(fresh)
    }

    unsafe fn deallocate(&self, _ptr: *mut u8, bytes: usize, _align: usize) {
        if bytes != 0 {
            self.counters.record_free();
        }
    }

    fn stats(&self) -> HeapStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_heap_round_trip() {
        let heap = SystemHeap::new();
        let p = heap.allocate_zeroed(64, 8).unwrap();
        assert_eq!(p as usize % 8, 0);
        unsafe {
            assert!(std::slice::from_raw_parts(p, 64).iter().all(|&b| b == 0));
            p.write_bytes(0xAB, 64);
            let q = heap.reallocate(p, 64, 128, 8).unwrap();
            let bytes = std::slice::from_raw_parts(q, 128);
            assert!(bytes[..64].iter().all(|&b| b == 0xAB));
            assert!(bytes[64..].iter().all(|&b| b == 0));
            heap.deallocate(q, 128, 8);
        }
        let stats = heap.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.frees, 2);
    }

    #[test]
    fn zero_sized_requests_are_dangling() {
        let heap = SystemHeap::new();
        let p = heap.allocate_zeroed(0, 16).unwrap();
        assert_eq!(p as usize, 16);
        unsafe { heap.deallocate(p, 0, 16) };
        assert_eq!(heap.stats(), HeapStats::default());
    }

    #[test]
    fn arena_chains_regions() {
        let arena = ArenaHeap::new(4096).unwrap();
        let a = arena.allocate_zeroed(3000, 8).unwrap();
        let b = arena.allocate_zeroed(3000, 8).unwrap();
        assert_ne!(a, b);
        assert!(arena.region_count() >= 2);
        let big = arena.allocate_zeroed(1 << 20, 64).unwrap();
        assert_eq!(big as usize % 64, 0);
        unsafe {
            a.write_bytes(7, 3000);
            let moved = arena.reallocate(a, 3000, 6000, 8).unwrap();
            let bytes = std::slice::from_raw_parts(moved, 6000);
            assert!(bytes[..3000].iter().all(|&x| x == 7));
            assert!(bytes[3000..].iter().all(|&x| x == 0));
        }
    }
}
