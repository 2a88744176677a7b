use super::slab_queue::{QueueError, SlabQueue};
use std::io;

pub struct QueueBuilder {
    name: Option<String>,
    capacity: usize,
    item_size: usize,
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self {
            name: None,
            capacity: 1024,  // 1024 items
            item_size: 4096, // one page per item
        }
    }
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the /dev/shm segment, required for shared queues
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_item_size(mut self, item_size: usize) -> Self {
        self.item_size = item_size;
        self
    }

    /// Queue private to this process
    pub fn build_in_process(self) -> Result<SlabQueue, QueueError> {
        SlabQueue::in_process(self.capacity, self.item_size)
    }

    /// Create the named shared queue; this handle owns the segment
    pub fn build_shared(self) -> Result<SlabQueue, QueueError> {
        let name = self.require_name()?;
        SlabQueue::create(&name, self.capacity, self.item_size)
    }

    /// Attach to a named queue created elsewhere.
    /// Capacity and item size are read from the segment.
    pub fn attach(self) -> Result<SlabQueue, QueueError> {
        let name = self.require_name()?;
        SlabQueue::attach(&name)
    }

    fn require_name(&self) -> Result<String, QueueError> {
        self.name.clone().ok_or_else(|| {
            QueueError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "QueueBuilder: shared queues need a name",
            ))
        })
    }
}
