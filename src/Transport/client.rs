// src/Transport/client.rs

use crate::Queue::{QueueBuilder, QueueFull, SlabQueue};
use crate::Transport::command::{CmdPaths, Command, CommandSocket};
use crate::Transport::config::SendConfig;
use crate::Transport::error::{SendError, TransportError};
use crate::Transport::frame::{write_local_frame, FrameHeader, HEADER_LEN, TYPE_MAX};
use log::{debug, trace};

/// Application-side handle onto a send service's queues.
///
/// Messages are framed straight into a send-queue block and picked up by
/// the sender thread owning that queue; nothing is copied through the
/// kernel until the sender writes the frame to its socket.
pub struct Client {
    queues: Vec<SlabQueue>,
    paths: CmdPaths,
    cmd: CommandSocket,
    next: usize,
    /// Pushes per queue since the last notification
    pushed: Vec<u32>,
    notify_interval: u32,
}

impl Client {
    /// Attach to the send queues named by `conf`.
    ///
    /// # Arguments
    /// * `conf` - Same configuration the send service was started with
    /// * `index` - Instance number; spreads instances over the queues
    pub fn init(conf: &SendConfig, index: usize) -> Result<Self, TransportError> {
        conf.validate()?;
        let queues = (0..conf.send_threads)
            .map(|idx| QueueBuilder::new().with_name(conf.sendq_name(idx)).attach())
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Client {} attached to {} send queues", index, queues.len());
        Ok(Self {
            pushed: vec![0; queues.len()],
            next: index % queues.len(),
            queues,
            paths: CmdPaths::new(&conf.cmd_dir, &conf.name),
            cmd: CommandSocket::unbound()?,
            notify_interval: conf.notify_interval,
        })
    }

    /// Largest body `send` accepts
    pub fn max_body(&self) -> usize {
        self.queues
            .iter()
            .map(SlabQueue::item_size)
            .min()
            .unwrap_or(0)
            .saturating_sub(HEADER_LEN)
    }

    fn poke(&self, idx: usize) {
        if let Err(e) = self.cmd.send_to(&Command::Send, self.paths.send(idx)) {
            debug!("Notify of sender {} failed: {}", idx, e);
        }
    }

    /// Frame `data` as a message of `msg_type` and queue it.
    ///
    /// # Returns
    /// * `TooLarge` - `data` plus header exceeds a queue item
    /// * `BadType` - `msg_type >= TYPE_MAX`
    /// * `QueueAllocFailed` - the chosen queue has no free block; its sender
    ///   has been asked to drain and the call may be retried
    /// * `QueueFull` - the queue ring is full
    pub fn send(&mut self, msg_type: u32, data: &[u8]) -> Result<(), SendError> {
        let max = self.max_body();
        if data.len() > max {
            return Err(SendError::TooLarge {
                size: data.len(),
                max,
            });
        }
        if msg_type >= TYPE_MAX {
            return Err(SendError::BadType(msg_type));
        }

        let idx = self.next;
        self.next = (self.next + 1) % self.queues.len();
        let queue = &self.queues[idx];

        let Ok(mut block) = queue.alloc() else {
            self.poke(idx);
            return Err(SendError::QueueAllocFailed);
        };
        let header = FrameHeader::application(msg_type, data.len() as u32);
        if write_local_frame(queue.bytes_mut(&mut block), &header, data).is_err() {
            queue.dealloc(block);
            return Err(SendError::TooLarge {
                size: data.len(),
                max,
            });
        }
        if let Err(QueueFull(block)) = queue.push(block) {
            queue.dealloc(block);
            self.poke(idx);
            return Err(SendError::QueueFull);
        }
        trace!("Queued type {} ({} bytes) on send queue {}", msg_type, data.len(), idx);

        self.pushed[idx] += 1;
        if self.pushed[idx] >= self.notify_interval {
            self.pushed[idx] = 0;
            self.poke(idx);
        }
        Ok(())
    }
}
