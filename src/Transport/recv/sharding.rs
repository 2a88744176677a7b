use crate::Transport::config::ShardingKind;

/// Maps a receive queue to the worker thread that drains it.
pub trait QueueSharding: Send + Sync {
    fn worker_for(&self, queue: usize) -> usize;

    /// Queues drained by `worker`, given `queues` in total
    fn queues_of(&self, worker: usize, queues: usize) -> Vec<usize> {
        (0..queues).filter(|&q| self.worker_for(q) == worker).collect()
    }
}

/// Contiguous blocks: worker `w` owns queues `w*per .. (w+1)*per`.
pub struct BlockSharding {
    pub per_worker: usize,
}

impl QueueSharding for BlockSharding {
    fn worker_for(&self, queue: usize) -> usize {
        queue / self.per_worker.max(1)
    }
}

/// Interleaved: worker `w` owns every queue `q` with `q % workers == w`.
pub struct ModuloSharding {
    pub workers: usize,
}

impl QueueSharding for ModuloSharding {
    fn worker_for(&self, queue: usize) -> usize {
        queue % self.workers.max(1)
    }
}

pub fn sharding_for(kind: ShardingKind, workers: usize, per_worker: usize) -> Box<dyn QueueSharding> {
    match kind {
        ShardingKind::Block => Box::new(BlockSharding { per_worker }),
        ShardingKind::Modulo => Box::new(ModuloSharding { workers }),
    }
}
