use crate::Core::lock::RegionLock;

/// "DMXP_RNG"
pub const RING_MAGIC: u64 = 0x444D_5850_5F52_4E47;

/// State of one ring node.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Unowned, free for the next push
    Idle = 0,
    /// Holds a block reference owned by exactly one in-flight message
    Used = 1,
}

/// One entry of the ring. `next` is fixed at creation.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RingNode {
    pub state: u32,
    pub next: u32,
    pub data: u64,
}

/// Control block at the start of a ring; the node array follows it.
///
/// Everything after `lock` is only read or written with `lock` held.
#[repr(C, align(128))]
pub struct RingHeader {
    /// Identifies the region as a ring queue.
    pub magic: u64,

    /// Queue-wide lock; there is no per-node locking.
    pub lock: RegionLock,

    /// Capacity in nodes.
    pub max: u32,

    /// Occupied nodes, `0 <= num <= max`.
    pub num: u32,

    /// Next node to pop.
    pub head: u32,

    /// Next node to push.
    pub tail: u32,

    /// Largest payload a producer may place behind one node.
    pub item_size: u32,

    pub reserved: u32,
}
