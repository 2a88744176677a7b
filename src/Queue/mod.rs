mod builder;
mod slab_queue;

pub use builder::QueueBuilder;
pub use slab_queue::{QueueError, QueueFull, SlabQueue};

pub mod Ring {
    pub mod Ring;
    pub mod Ring_impl;
    pub mod layout;
    pub use Ring::{RingFull, RingQueue}; // re-export for stable path
}
