// A TCP connection owned by exactly one reactor thread.

mod read;
mod write;

pub use read::{Dest, Frame, FrameReader, ReadError, ReadPhase, ReadStep, Slot};
pub use write::{FrameWriter, Flushed, Outbound, WriteStep};

use crate::Core::alloc::SlabPool;
use crate::Transport::error::FrameError;
use crate::Transport::frame::{write_local_frame, FrameHeader, SystemType};
use log::trace;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;

pub struct Connection {
    pub stream: TcpStream,
    pub token: Token,
    pub peer: String,
    pub created: Instant,
    pub last_read: Instant,
    pub last_write: Instant,
    pub reader: FrameReader,
    pub writer: FrameWriter,
    /// Set from the peer's `LinkInfoReport`
    pub is_primary: bool,
    writable: bool,
}

impl Connection {
    /// Wrap `stream` and register it for reading
    pub fn register(
        registry: &Registry,
        mut stream: TcpStream,
        token: Token,
        peer: String,
        max_body: usize,
    ) -> io::Result<Self> {
        registry.register(&mut stream, token, Interest::READABLE)?;
        let now = Instant::now();
        Ok(Self {
            stream,
            token,
            peer,
            created: now,
            last_read: now,
            last_write: now,
            reader: FrameReader::new(max_body),
            writer: FrameWriter::new(),
            is_primary: false,
            writable: false,
        })
    }

    /// Neither read nor written for longer than `idle`
    pub fn is_stale(&self, now: Instant, idle: Duration) -> bool {
        now.saturating_duration_since(self.last_read) > idle
            && now.saturating_duration_since(self.last_write) > idle
    }

    /// Build a system frame in `pool` and queue it for writing
    pub fn queue_system(
        &mut self,
        pool: &SlabPool,
        kind: SystemType,
        body: &[u8],
    ) -> Result<(), QueueSystemError> {
        let header = FrameHeader::system(kind, body.len() as u32);
        let mut block = pool.alloc(header.frame_len())?;
        if let Err(e) = write_local_frame(pool.bytes_mut(&mut block), &header, body) {
            let _ = pool.dealloc(block);
            return Err(e.into());
        }
        trace!("{}: queued {:?}", self.peer, kind);
        self.writer.enqueue(Outbound::new(pool.clone(), block));
        Ok(())
    }

    /// Only ask for WRITABLE while output is pending
    pub fn sync_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let want = !self.writer.is_empty();
        if want != self.writable {
            let interest = if want {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            registry.reregister(&mut self.stream, self.token, interest)?;
            self.writable = want;
        }
        Ok(())
    }

    /// Release buffers and deregister; the socket closes on drop
    pub fn close(mut self, registry: &Registry) -> usize {
        let _ = registry.deregister(&mut self.stream);
        self.reader.clear();
        self.writer.clear()
    }
}

#[derive(Debug, Error)]
pub enum QueueSystemError {
    #[error(transparent)]
    Alloc(#[from] crate::Core::alloc::AllocError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}
