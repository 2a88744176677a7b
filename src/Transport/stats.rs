// Per-thread counters. Each reactor or worker owns one set and is the only
// writer; readers take relaxed snapshots.

use crossbeam_utils::CachePadded;
use std::ops::Add;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::Relaxed};

/// Snapshot of one receiver's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvStat {
    /// Live connections
    pub connections: u64,
    /// Application frames received
    pub recv_total: u64,
    /// Frames dropped on the null-buffer path
    pub drop_total: u64,
    /// Protocol and I/O errors
    pub err_total: u64,
}

impl Add for RecvStat {
    type Output = RecvStat;

    fn add(self, o: RecvStat) -> RecvStat {
        RecvStat {
            connections: self.connections + o.connections,
            recv_total: self.recv_total + o.recv_total,
            drop_total: self.drop_total + o.drop_total,
            err_total: self.err_total + o.err_total,
        }
    }
}

#[derive(Default)]
pub struct RecvCounters {
    pub connections: CachePadded<AtomicU64>,
    pub recv_total: CachePadded<AtomicU64>,
    pub drop_total: CachePadded<AtomicU64>,
    pub err_total: CachePadded<AtomicU64>,
}

impl RecvCounters {
    pub fn snapshot(&self) -> RecvStat {
        RecvStat {
            connections: self.connections.load(Relaxed),
            recv_total: self.recv_total.load(Relaxed),
            drop_total: self.drop_total.load(Relaxed),
            err_total: self.err_total.load(Relaxed),
        }
    }
}

/// Snapshot of one worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkStat {
    /// Frames handed to a handler
    pub proc_total: u64,
    /// Frames popped but not dispatched
    pub drop_total: u64,
    pub err_total: u64,
}

impl Add for WorkStat {
    type Output = WorkStat;

    fn add(self, o: WorkStat) -> WorkStat {
        WorkStat {
            proc_total: self.proc_total + o.proc_total,
            drop_total: self.drop_total + o.drop_total,
            err_total: self.err_total + o.err_total,
        }
    }
}

#[derive(Default)]
pub struct WorkCounters {
    pub proc_total: CachePadded<AtomicU64>,
    pub drop_total: CachePadded<AtomicU64>,
    pub err_total: CachePadded<AtomicU64>,
}

impl WorkCounters {
    pub fn snapshot(&self) -> WorkStat {
        WorkStat {
            proc_total: self.proc_total.load(Relaxed),
            drop_total: self.drop_total.load(Relaxed),
            err_total: self.err_total.load(Relaxed),
        }
    }
}

/// Snapshot of one sender's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendStat {
    pub connected: bool,
    /// Application frames fully written
    pub send_total: u64,
    pub err_total: u64,
    /// Successful connects, the first one included
    pub reconn_total: u64,
    /// Keepalive requests written
    pub kpalive_total: u64,
}

#[derive(Default)]
pub struct SendCounters {
    pub connected: AtomicBool,
    pub send_total: CachePadded<AtomicU64>,
    pub err_total: CachePadded<AtomicU64>,
    pub reconn_total: CachePadded<AtomicU64>,
    pub kpalive_total: CachePadded<AtomicU64>,
}

impl SendCounters {
    pub fn snapshot(&self) -> SendStat {
        SendStat {
            connected: self.connected.load(Relaxed),
            send_total: self.send_total.load(Relaxed),
            err_total: self.err_total.load(Relaxed),
            reconn_total: self.reconn_total.load(Relaxed),
            kpalive_total: self.kpalive_total.load(Relaxed),
        }
    }
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Relaxed);
}
