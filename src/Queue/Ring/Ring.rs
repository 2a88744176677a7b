// Lock-protected circular FIFO of block references.
// Payload bytes never pass through the ring: nodes carry offsets into a
// slab pool and push/pop move ownership of those blocks.

use super::layout::{RingHeader, RingNode};
use crate::Core::SharedMemory::SharedMemoryBackend;
use std::ptr::NonNull;
use std::sync::Arc;
use thiserror::Error;

/// Returned by `push` when `num == max`; the ring is left untouched.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("ring queue is full ({max} entries)")]
pub struct RingFull {
    pub max: usize,
}

/// A view of a ring living inside a memory region.
///
/// The header and nodes are stored in the region, so the same ring may be
/// opened by several threads or processes. The view itself is cheap and
/// keeps the region mapped.
///
/// ### Concurrency Design:
/// - Every push and pop takes the single region lock stored in the header.
/// - Any number of producers and consumers may share the ring.
/// - FIFO order holds across all of them, as observed under the lock.
pub struct RingQueue {
    /// Keeps the mapping alive
    pub(crate) region: Arc<dyn SharedMemoryBackend>,

    /// Pointer to the control block in the region.
    pub(crate) header: NonNull<RingHeader>,

    /// Pointer to the first node.
    pub(crate) nodes: NonNull<RingNode>,

    /// Capacity, cached from the header.
    pub(crate) max: usize,
}

unsafe impl Send for RingQueue {}
unsafe impl Sync for RingQueue {}
