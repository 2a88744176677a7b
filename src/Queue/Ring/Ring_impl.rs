use std::io;
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use super::layout::{NodeState, RingHeader, RingNode, RING_MAGIC};
use super::Ring::{RingFull, RingQueue};
use crate::Core::lock::RegionLock;
use crate::Core::SharedMemory::SharedMemoryBackend;

impl RingQueue {
    /// Bytes a ring of `max` nodes occupies (header plus nodes)
    #[inline]
    pub fn footprint(max: usize) -> usize {
        size_of::<RingHeader>() + max * size_of::<RingNode>()
    }

    /// Format a ring at `offset` inside `region`.
    /// This should ONLY be called by the creator of the region.
    ///
    /// # Arguments
    /// * `region` - Backing memory
    /// * `offset` - Start of the ring (128-byte aligned)
    /// * `max` - Capacity in nodes, fixed for the ring's lifetime
    /// * `item_size` - Largest payload behind one node, recorded for attachers
    pub fn init(
        region: Arc<dyn SharedMemoryBackend>,
        offset: usize,
        max: usize,
        item_size: usize,
    ) -> io::Result<Self> {
        if max == 0 || max > u32::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("RingQueue::init(): capacity must be in 1..=u32::MAX, got {}", max),
            ));
        }
        if offset % 128 != 0 || offset + Self::footprint(max) > region.size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "RingQueue::init(): region of {} bytes cannot hold {} nodes at offset {}",
                    region.size(),
                    max,
                    offset
                ),
            ));
        }

        let header = unsafe { region.as_ptr().add(offset) } as *mut RingHeader;
        let nodes = unsafe { (header as *mut u8).add(size_of::<RingHeader>()) } as *mut RingNode;

        unsafe {
            ptr::write(
                header,
                RingHeader {
                    magic: 0,
                    lock: RegionLock::new(),
                    max: max as u32,
                    num: 0,
                    head: 0,
                    tail: 0,
                    item_size: item_size as u32,
                    reserved: 0,
                },
            );
            for k in 0..max {
                ptr::write(
                    nodes.add(k),
                    RingNode {
                        state: NodeState::Idle as u32,
                        next: ((k + 1) % max) as u32,
                        data: 0,
                    },
                );
            }
            ptr::write_volatile(ptr::addr_of_mut!((*header).magic), RING_MAGIC);
        }

        Self::view(region, header, nodes, max)
    }

    /// Open a ring formatted by [`RingQueue::init`]
    pub fn open(region: Arc<dyn SharedMemoryBackend>, offset: usize) -> io::Result<Self> {
        if offset % 128 != 0 || offset + size_of::<RingHeader>() > region.size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "RingQueue::open(): region too small for a ring header",
            ));
        }
        let header = unsafe { region.as_ptr().add(offset) } as *mut RingHeader;
        let (magic, max) = unsafe {
            (
                ptr::read_volatile(ptr::addr_of!((*header).magic)),
                (*header).max as usize,
            )
        };
        if magic != RING_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid magic number - ring queue not properly initialized",
            ));
        }
        if offset + Self::footprint(max) > region.size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Ring of {} nodes does not fit its region", max),
            ));
        }
        let nodes = unsafe { (header as *mut u8).add(size_of::<RingHeader>()) } as *mut RingNode;
        Self::view(region, header, nodes, max)
    }

    fn view(
        region: Arc<dyn SharedMemoryBackend>,
        header: *mut RingHeader,
        nodes: *mut RingNode,
        max: usize,
    ) -> io::Result<Self> {
        let null = || io::Error::new(io::ErrorKind::InvalidData, "ring pointer is null");
        Ok(Self {
            region,
            header: NonNull::new(header).ok_or_else(null)?,
            nodes: NonNull::new(nodes).ok_or_else(null)?,
            max,
        })
    }

    #[inline]
    fn lock(&self) -> crate::Core::lock::RegionLockGuard<'_> {
        unsafe { (*self.header.as_ptr()).lock.lock() }
    }

    #[inline]
    unsafe fn node(&self, index: u32) -> *mut RingNode {
        debug_assert!((index as usize) < self.max);
        self.nodes.as_ptr().add(index as usize)
    }

    /// Append `data` at the tail.
    ///
    /// # Returns
    /// * `Ok(())` once the node is published
    /// * `Err(RingFull)` if `num == max`, without touching the ring
    pub fn push(&self, data: u64) -> Result<(), RingFull> {
        let _guard = self.lock();
        let h = self.header.as_ptr();
        unsafe {
            if (*h).num >= (*h).max {
                return Err(RingFull { max: self.max });
            }
            let node = self.node((*h).tail);
            debug_assert_eq!((*node).state, NodeState::Idle as u32, "push onto a used node");
            (*node).data = data;
            (*node).state = NodeState::Used as u32;
            (*h).tail = (*node).next;
            (*h).num += 1;
        }
        Ok(())
    }

    /// Remove the entry at the head, or `None` when empty.
    ///
    /// # Panics
    /// A non-empty ring whose head node is not `Used` is corrupted; that is
    /// reported with a panic rather than returned as an error.
    pub fn pop(&self) -> Option<u64> {
        let _guard = self.lock();
        let h = self.header.as_ptr();
        unsafe {
            if (*h).num == 0 {
                return None;
            }
            let node = self.node((*h).head);
            assert_eq!(
                (*node).state,
                NodeState::Used as u32,
                "ring queue corrupted: head node {} is not in use",
                (*h).head
            );
            let data = (*node).data;
            (*node).state = NodeState::Idle as u32;
            (*node).data = 0;
            (*h).head = (*node).next;
            (*h).num -= 1;
            Some(data)
        }
    }

    /// Current number of entries
    pub fn len(&self) -> usize {
        let _guard = self.lock();
        unsafe { (*self.header.as_ptr()).num as usize }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max
    }

    /// Fixed capacity in entries
    pub fn capacity(&self) -> usize {
        self.max
    }

    /// Payload size recorded when the ring was formatted
    pub fn item_size(&self) -> usize {
        unsafe { (*self.header.as_ptr()).item_size as usize }
    }

    /// Head and tail node indices, for diagnostics
    pub fn cursors(&self) -> (u32, u32) {
        let _guard = self.lock();
        unsafe { ((*self.header.as_ptr()).head, (*self.header.as_ptr()).tail) }
    }

    pub fn region(&self) -> &Arc<dyn SharedMemoryBackend> {
        &self.region
    }
}
