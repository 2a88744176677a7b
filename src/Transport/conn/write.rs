// src/Transport/conn/write.rs

use crate::Core::alloc::{Block, SlabPool};
use crate::Transport::frame::{local_to_wire, FrameFlag};
use log::warn;
use std::collections::VecDeque;
use std::io::{self, Write};

/// A host-order frame waiting to be written, with the pool that owns it.
pub struct Outbound {
    pool: SlabPool,
    block: Block,
}

impl Outbound {
    pub fn new(pool: SlabPool, block: Block) -> Self {
        Self { pool, block }
    }

    fn release(self) {
        if let Err(e) = self.pool.dealloc(self.block) {
            warn!("Outbound frame release failed: {}", e);
        }
    }
}

struct InFlight {
    item: Outbound,
    flag: FrameFlag,
    off: usize,
    total: usize,
}

pub enum WriteStep {
    /// Nothing left to write
    Drained,
    /// Socket would block with data still pending
    Again,
    Failed(io::Error),
}

pub struct Flushed {
    pub step: WriteStep,
    /// Frames completely written by this flush
    pub frames: usize,
    /// Of which application frames
    pub app_frames: usize,
    /// Whether any byte went out
    pub progressed: bool,
}

/// Outbound frames of one connection plus the one being written.
#[derive(Default)]
pub struct FrameWriter {
    pending: VecDeque<Outbound>,
    inflight: Option<InFlight>,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, item: Outbound) {
        self.pending.push_back(item);
    }

    /// Frames waiting, in flight included
    pub fn len(&self) -> usize {
        self.pending.len() + self.inflight.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of the in-flight frame already written
    pub fn inflight_offset(&self) -> Option<usize> {
        self.inflight.as_ref().map(|f| f.off)
    }

    // Make the next frame in-flight, converting its header to wire order
    fn start(&mut self, mut item: Outbound) -> bool {
        let bytes = item.pool.bytes_mut(&mut item.block);
        match local_to_wire(bytes) {
            Ok(header) if header.frame_len() <= bytes.len() => {
                self.inflight = Some(InFlight {
                    flag: header.flag,
                    total: header.frame_len(),
                    off: 0,
                    item,
                });
                true
            }
            Ok(header) => {
                warn!(
                    "Dropping outbound frame: {} bytes do not fit its {}-byte block",
                    header.frame_len(),
                    bytes.len()
                );
                item.release();
                false
            }
            Err(e) => {
                warn!("Dropping outbound frame: {}", e);
                item.release();
                false
            }
        }
    }

    /// Write queued frames until done or the socket pushes back.
    ///
    /// `refill` is asked for more frames once the local list is empty; the
    /// sender uses it to pull from its send queue so system frames always go
    /// out first.
    pub fn flush<W, F>(&mut self, dst: &mut W, mut refill: F) -> Flushed
    where
        W: Write,
        F: FnMut() -> Option<Outbound>,
    {
        let mut out = Flushed {
            step: WriteStep::Drained,
            frames: 0,
            app_frames: 0,
            progressed: false,
        };
        loop {
            if self.inflight.is_none() {
                let Some(next) = self.pending.pop_front().or_else(&mut refill) else {
                    return out;
                };
                if !self.start(next) {
                    continue;
                }
            }

            let Some(cur) = self.inflight.as_mut() else {
                continue;
            };
            let bytes = cur.item.pool.bytes(&cur.item.block);
            match dst.write(&bytes[cur.off..cur.total]) {
                Ok(0) => {
                    out.step = WriteStep::Failed(io::ErrorKind::WriteZero.into());
                    return out;
                }
                Ok(n) => {
                    out.progressed = true;
                    cur.off += n;
                    if cur.off == cur.total {
                        if let Some(done) = self.inflight.take() {
                            out.frames += 1;
                            if done.flag == FrameFlag::Application {
                                out.app_frames += 1;
                            }
                            done.item.release();
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    out.step = WriteStep::Again;
                    return out;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    out.step = WriteStep::Failed(e);
                    return out;
                }
            }
        }
    }

    /// Release every pending frame; returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        if let Some(cur) = self.inflight.take() {
            cur.item.release();
            dropped += 1;
        }
        while let Some(item) = self.pending.pop_front() {
            item.release();
            dropped += 1;
        }
        dropped
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        self.clear();
    }
}
