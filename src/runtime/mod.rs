//! Services the containers are built on: the heap, typed memory moves,
//! hashing and randomness.

pub mod alg;
mod heap;
pub mod mem;
mod mmap;

use std::sync::OnceLock;

use tracing::{debug, error};

use crate::error::Error;

pub use heap::{Allocator, ArenaHeap, DEFAULT_ARENA_CHUNK, HeapStats, SystemHeap};
pub use mmap::{MappedRegion, get_page_size};

static HEAP: OnceLock<Box<dyn Allocator>> = OnceLock::new();

/// Installs the process-wide heap. Only the first call wins; later calls (or
/// any call after the default heap was already used) hand the allocator back.
pub fn install_allocator(heap: Box<dyn Allocator>) -> Result<(), Box<dyn Allocator>> {
    let name = heap.name();
    HEAP.set(heap)?;
    debug!(heap = name, "installed allocator");
    Ok(())
}

pub fn heap() -> &'static dyn Allocator {
    HEAP.get_or_init(|| Box::new(SystemHeap::new())).as_ref()
}

/// Aborts the current operation on a broken caller contract.
#[track_caller]
pub fn fatal(err: Error) -> ! {
    error!(%err, "fatal");
    panic!("{err}")
}

pub fn rand_u64() -> u64 {
    rand::random()
}
