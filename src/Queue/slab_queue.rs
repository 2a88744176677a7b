// A ring of block references paired with the slab pool the blocks come from.
//
// Region layout:
//   [RingHeader | RingNode * max] [pad to 128] [SlabPool]
//
// Producers alloc a block, fill it and push it; consumers pop it, read it
// and dealloc it. Ownership of the bytes follows the Block handle.

use crate::Core::alloc::{AllocError, Block, SlabPool};
use crate::Core::SharedMemory::{
    attach_shared_memory, create_heap_memory, create_shared_memory, unlink_shared_memory,
    SharedMemoryBackend,
};
use crate::Queue::Ring::layout::RingHeader;
use crate::Queue::Ring::{RingFull, RingQueue};
use log::{debug, warn};
use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue capacity and item size must be non-zero (max {max}, size {size})")]
    BadDimensions { max: usize, size: usize },
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error("queue region: {0}")]
    Io(#[from] io::Error),
}

/// `push` on a full queue hands the block back to the caller.
#[derive(Debug, Error)]
#[error("queue is full")]
pub struct QueueFull(pub Block);

/// Fixed-capacity queue of slab blocks.
pub struct SlabQueue {
    ring: RingQueue,
    pool: SlabPool,
    item_size: usize,
    /// Set when this handle created a named segment and should unlink it
    owned_name: Option<String>,
}

impl SlabQueue {
    fn pool_offset(max: usize) -> usize {
        (RingQueue::footprint(max) + 127) & !127
    }

    /// Bytes of region a queue of `max` items of `size` bytes needs
    pub fn region_size(max: usize, size: usize) -> usize {
        Self::pool_offset(max) + SlabPool::required_size(max, size)
    }

    fn format(
        region: Arc<dyn SharedMemoryBackend>,
        max: usize,
        size: usize,
    ) -> Result<Self, QueueError> {
        let offset = Self::pool_offset(max);
        let ring = RingQueue::init(region.clone(), 0, max, size)?;
        let pool_size = region.size() - offset;
        let pool = SlabPool::init(region, offset, pool_size)?;
        Ok(Self {
            ring,
            pool,
            item_size: size,
            owned_name: None,
        })
    }

    fn check(max: usize, size: usize) -> Result<(), QueueError> {
        if max == 0 || size == 0 {
            return Err(QueueError::BadDimensions { max, size });
        }
        Ok(())
    }

    /// Queue over private memory, for hand-off between threads
    pub fn in_process(max: usize, size: usize) -> Result<Self, QueueError> {
        Self::check(max, size)?;
        let region = create_heap_memory(Self::region_size(max, size))?;
        Self::format(region, max, size)
    }

    /// Create a queue in the named shared-memory segment `name`.
    /// The segment is unlinked when this handle is dropped.
    pub fn create(name: &str, max: usize, size: usize) -> Result<Self, QueueError> {
        Self::check(max, size)?;
        let region = create_shared_memory(Self::region_size(max, size), name)?;
        let mut queue = Self::format(region, max, size)?;
        queue.owned_name = Some(name.to_string());
        debug!("Created shared queue {} (max {}, size {})", name, max, size);
        Ok(queue)
    }

    /// Attach to a queue created by another process with [`SlabQueue::create`]
    pub fn attach(name: &str) -> Result<Self, QueueError> {
        let region = attach_shared_memory(name)?;
        let ring = RingQueue::open(region.clone(), 0)?;
        let pool = SlabPool::open(region, Self::pool_offset(ring.capacity()))?;
        let item_size = ring.item_size();
        Ok(Self {
            ring,
            pool,
            item_size,
            owned_name: None,
        })
    }

    /// Allocate a zeroed block of `item_size` bytes
    pub fn alloc(&self) -> Result<Block, AllocError> {
        self.pool.alloc(self.item_size)
    }

    /// Return a block to the queue's pool
    pub fn dealloc(&self, block: Block) {
        if let Err(e) = self.pool.dealloc(block) {
            // Only reachable with a handle from another pool
            warn!("SlabQueue::dealloc(): {}", e);
        }
    }

    /// Hand a filled block to the consumer side
    pub fn push(&self, block: Block) -> Result<(), QueueFull> {
        match self.ring.push(block.offset() as u64) {
            Ok(()) => {
                // The ring now holds the only reference
                let _ = block.into_raw();
                Ok(())
            }
            Err(RingFull { .. }) => Err(QueueFull(block)),
        }
    }

    /// Take the oldest block, or `None` when the queue is empty
    pub fn pop(&self) -> Option<Block> {
        let raw = self.ring.pop()?;
        match unsafe { self.pool.from_raw(raw) } {
            Ok(block) => Some(block),
            Err(e) => panic!("queue node references a dead block: {}", e),
        }
    }

    pub fn bytes<'a>(&'a self, block: &'a Block) -> &'a [u8] {
        self.pool.bytes(block)
    }

    pub fn bytes_mut<'a>(&'a self, block: &'a mut Block) -> &'a mut [u8] {
        self.pool.bytes_mut(block)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    pub fn pool(&self) -> &SlabPool {
        &self.pool
    }

    pub fn ring(&self) -> &RingQueue {
        &self.ring
    }

    /// Size of the ring control block, for layout checks
    pub fn ring_header_size() -> usize {
        std::mem::size_of::<RingHeader>()
    }
}

impl Drop for SlabQueue {
    fn drop(&mut self) {
        if let Some(name) = self.owned_name.take() {
            if let Err(e) = unlink_shared_memory(&name) {
                warn!("Failed to unlink shared queue {}: {}", name, e);
            }
        }
    }
}
