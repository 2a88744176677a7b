// src/Transport/conn/read.rs

use crate::Core::alloc::Block;
use crate::Queue::SlabQueue;
use crate::Transport::error::FrameError;
use crate::Transport::frame::{wire_to_local, FrameHeader, HEADER_LEN};
use log::trace;
use std::io::{self, Read};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
    #[error("invalid header: {0}")]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPhase {
    Init,
    ReadHeader,
    ReadBody,
    Post,
}

/// A receive-queue block a frame is being read into.
pub struct Slot {
    pub queue_idx: usize,
    pub queue: Arc<SlabQueue>,
    pub block: Block,
}

impl Slot {
    /// Give the block back to its queue's pool
    pub fn release(self) {
        self.queue.dealloc(self.block);
    }
}

/// Where the bytes of the current frame land.
pub enum Dest {
    Slot(Slot),
    /// The connection's scratch buffer. Application frames read here are
    /// counted and dropped by the receiver.
    Scratch,
}

impl Dest {
    pub fn is_scratch(&self) -> bool {
        matches!(self, Dest::Scratch)
    }

    fn release(self) {
        if let Dest::Slot(slot) = self {
            slot.release();
        }
    }
}

/// A completely read frame. The header in the buffer is in host order.
pub struct Frame {
    pub header: FrameHeader,
    pub dest: Dest,
}

pub enum ReadStep {
    /// Socket would block; wait for the next readiness event
    Again,
    /// Peer closed the connection
    Closed,
    Failed(ReadError),
    Complete(Frame),
}

enum Fill {
    Done,
    Again,
    Closed,
    Failed(io::Error),
}

/// Resumable frame reader for one connection.
///
/// `Init` picks a destination buffer, `ReadHeader` and `ReadBody` collect
/// bytes across as many readiness events as the peer needs, and `Post`
/// hands the frame out and returns to `Init`.
pub struct FrameReader {
    phase: ReadPhase,
    dest: Dest,
    header: Option<FrameHeader>,
    scratch: Vec<u8>,
    got: usize,
    want: usize,
    max_body: usize,
}

impl FrameReader {
    pub fn new(max_body: usize) -> Self {
        Self {
            phase: ReadPhase::Init,
            dest: Dest::Scratch,
            header: None,
            scratch: vec![0u8; HEADER_LEN + max_body],
            got: 0,
            want: 0,
            max_body,
        }
    }

    pub fn phase(&self) -> ReadPhase {
        self.phase
    }

    /// Bytes of the current frame collected so far
    pub fn received(&self) -> usize {
        self.got
    }

    fn buf(&mut self) -> &mut [u8] {
        match &mut self.dest {
            Dest::Slot(slot) => slot.queue.bytes_mut(&mut slot.block),
            Dest::Scratch => &mut self.scratch,
        }
    }

    fn fill<R: Read>(&mut self, src: &mut R) -> Fill {
        while self.got < self.want {
            let (got, want) = (self.got, self.want);
            match src.read(&mut self.buf()[got..want]) {
                Ok(0) => return Fill::Closed,
                Ok(n) => self.got += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Fill::Again,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Fill::Failed(e),
            }
        }
        Fill::Done
    }

    fn reset(&mut self) {
        std::mem::replace(&mut self.dest, Dest::Scratch).release();
        self.header = None;
        self.got = 0;
        self.want = 0;
        self.phase = ReadPhase::Init;
    }

    /// Drive the machine until a frame completes or the socket stops it.
    ///
    /// # Arguments
    /// * `src` - Non-blocking byte source
    /// * `acquire` - Called in `Init` for a queue block; `None` selects the
    ///   scratch buffer
    ///
    /// # Returns
    /// `Complete` hands the frame's buffer to the caller. On `Closed` and
    /// `Failed` the current buffer has already been released.
    pub fn advance<R, F>(&mut self, src: &mut R, mut acquire: F) -> ReadStep
    where
        R: Read,
        F: FnMut() -> Option<Slot>,
    {
        loop {
            match self.phase {
                ReadPhase::Init => {
                    self.dest = acquire().map_or(Dest::Scratch, Dest::Slot);
                    self.got = 0;
                    self.want = HEADER_LEN;
                    self.phase = ReadPhase::ReadHeader;
                }
                ReadPhase::ReadHeader => {
                    match self.fill(src) {
                        Fill::Done => {}
                        Fill::Again => {
                            // Nothing of the next frame yet: do not sit on a queue block
                            if self.got == 0 {
                                self.reset();
                            }
                            return ReadStep::Again;
                        }
                        Fill::Closed => {
                            self.reset();
                            return ReadStep::Closed;
                        }
                        Fill::Failed(e) => {
                            self.reset();
                            return ReadStep::Failed(e.into());
                        }
                    }
                    let max_body = self.max_body;
                    let checked = wire_to_local(&mut self.buf()[..HEADER_LEN])
                        .and_then(|h| h.validate(max_body).map(|_| h));
                    let header = match checked {
                        Ok(h) => h,
                        Err(e) => {
                            self.reset();
                            return ReadStep::Failed(e.into());
                        }
                    };
                    trace!(
                        "Header type {} body {} flag {:?}",
                        header.msg_type,
                        header.body_len,
                        header.flag
                    );
                    self.header = Some(header);
                    if header.body_len == 0 {
                        self.phase = ReadPhase::Post;
                    } else {
                        self.want = header.frame_len();
                        self.phase = ReadPhase::ReadBody;
                    }
                }
                ReadPhase::ReadBody => match self.fill(src) {
                    Fill::Done => self.phase = ReadPhase::Post,
                    Fill::Again => return ReadStep::Again,
                    Fill::Closed => {
                        self.reset();
                        return ReadStep::Closed;
                    }
                    Fill::Failed(e) => {
                        self.reset();
                        return ReadStep::Failed(e.into());
                    }
                },
                ReadPhase::Post => {
                    let Some(header) = self.header.take() else {
                        self.reset();
                        continue;
                    };
                    let dest = std::mem::replace(&mut self.dest, Dest::Scratch);
                    self.got = 0;
                    self.want = 0;
                    self.phase = ReadPhase::Init;
                    return ReadStep::Complete(Frame { header, dest });
                }
            }
        }
    }

    /// Body of a frame just returned by `advance`. Scratch bodies are only
    /// valid until the next call to `advance`.
    pub fn body<'a>(&'a self, frame: &'a Frame) -> &'a [u8] {
        let end = frame.header.frame_len();
        match &frame.dest {
            Dest::Slot(slot) => &slot.queue.bytes(&slot.block)[HEADER_LEN..end],
            Dest::Scratch => &self.scratch[HEADER_LEN..end],
        }
    }

    /// Drop any partially read frame, releasing its buffer
    pub fn clear(&mut self) {
        self.reset();
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        self.reset();
    }
}
