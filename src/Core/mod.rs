pub mod SharedMemory;
pub mod affinity;
pub mod alloc;
pub mod lock;

pub use SharedMemory::{
    attach_shared_memory, create_heap_memory, create_shared_memory, unlink_shared_memory,
    RawHandle, SharedMemoryBackend,
};
pub use alloc::{AllocError, Block, SizeClass, SlabPool};
pub use lock::{RegionLock, RegionLockGuard};
