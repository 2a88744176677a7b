use crate::Core::alloc::SlabPool;
use crate::Queue::Ring::RingQueue;
use crate::Queue::SlabQueue;
use std::fmt;

/// Debug function for SlabPool
///
/// Shows page accounting only; block contents are never read.
pub fn debug_slab_pool(pool: &SlabPool, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SlabPool")
        .field("region", &"<opaque>")
        .field("header", &format_args!("{:p}", pool.header_ptr()))
        .field("pages", &pool.page_count())
        .field("free_pages", &pool.free_pages())
        .field("used_blocks", &pool.used_blocks())
        .field("data", &format_args!("[{}, {})", pool.data_offset(), pool.end_offset()))
        .field("initialized", &pool.is_initialized())
        .finish()
}

/// Debug function for RingQueue
pub fn debug_ring_queue(ring: &RingQueue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (head, tail) = ring.cursors();
    f.debug_struct("RingQueue")
        .field("header", &format_args!("0x{:x}", ring.header.as_ptr() as usize))
        .field("len", &ring.len())
        .field("max", &ring.capacity())
        .field("head", &head)
        .field("tail", &tail)
        .finish()
}

/// Debug function for SlabQueue
pub fn debug_slab_queue(queue: &SlabQueue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SlabQueue")
        .field("ring", queue.ring())
        .field("pool", queue.pool())
        .field("item_size", &queue.item_size())
        .finish()
}

// Debug proxies that call the functions above
impl fmt::Debug for RingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_ring_queue(self, f)
    }
}

impl fmt::Debug for SlabQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_slab_queue(self, f)
    }
}
