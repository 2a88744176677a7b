// src/Transport/recv/worker.rs

use super::RecvShared;
use crate::Transport::command::{Command, CommandSocket, WORK_ALL};
use crate::Transport::error::ReactorError;
use crate::Transport::frame::{FrameHeader, HEADER_LEN};
use crate::Transport::stats::bump;
use log::{debug, error, info, trace, warn};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

const CMD: Token = Token(0);

/// Drains receive queues and hands each frame to its registered handler.
pub(crate) struct Worker {
    idx: usize,
    name: String,
    shared: Arc<RecvShared>,
    poll: Poll,
    cmd: CommandSocket,
    /// Queues this worker drains on its own when idle
    owned: Vec<usize>,
}

impl Worker {
    pub fn new(idx: usize, shared: Arc<RecvShared>, mut cmd: CommandSocket) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(cmd.source(), CMD, Interest::READABLE)?;
        let owned = shared.sharding.queues_of(idx, shared.queues.len());
        Ok(Self {
            name: format!("{}-work-{}", shared.conf.name, idx),
            idx,
            shared,
            poll,
            cmd,
            owned,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.idx
    }

    pub fn run(mut self) -> Result<(), ReactorError> {
        let timeout = self.shared.conf.poll_timeout();
        let mut events = Events::with_capacity(16);
        debug!("{} started, owns queues {:?}", self.name, self.owned);

        while !self.shared.is_shutdown() {
            match self.poll.poll(&mut events, Some(timeout)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ReactorError::fatal(&self.name, e)),
            }
            if events.is_empty() {
                // Idle: pick up anything a lost notification left behind
                for q in self.owned.clone() {
                    self.process(q, WORK_ALL);
                }
                continue;
            }
            self.handle_commands();
        }

        info!("{} stopped", self.name);
        Ok(())
    }

    fn handle_commands(&mut self) {
        loop {
            match self.cmd.recv() {
                Ok(Some((cmd, from))) => self.on_command(cmd, from),
                Ok(None) => break,
                Err(e) => {
                    error!("{}: command socket: {}", self.name, e);
                    bump(&self.shared.work_counters[self.idx].err_total);
                    break;
                }
            }
        }
    }

    fn on_command(&mut self, cmd: Command, from: Option<PathBuf>) {
        let reply = match cmd {
            Command::Work {
                origin,
                queue,
                count,
            } => {
                trace!(
                    "{}: work on queue {} ({} items) from receiver {}",
                    self.name,
                    queue,
                    count,
                    origin
                );
                self.process(queue as usize, count);
                None
            }
            Command::QueryWorkStat => Some(Command::WorkStatReply(
                self.shared.work_counters[self.idx].snapshot(),
            )),
            Command::QueryConf => Some(Command::ConfReply(self.shared.conf_report())),
            Command::Shutdown => None,
            other => {
                debug!("{}: ignoring {:?}", self.name, other);
                None
            }
        };
        if let (Some(reply), Some(to)) = (reply, from) {
            if let Err(e) = self.cmd.send_to(&reply, &to) {
                warn!("{}: reply to {} failed: {}", self.name, to.display(), e);
            }
        }
    }

    /// Pop up to `count` frames from queue `queue` and dispatch them.
    ///
    /// # Returns
    /// Frames popped.
    pub(crate) fn process(&self, queue: usize, count: u32) -> usize {
        let counters = &self.shared.work_counters[self.idx];
        let Some(rq) = self.shared.queues.get(queue) else {
            warn!("{}: work for unknown queue {}", self.name, queue);
            bump(&counters.err_total);
            return 0;
        };

        let limit = if count == WORK_ALL { usize::MAX } else { count as usize };
        let mut done = 0;
        while done < limit {
            let Some(block) = rq.pop() else {
                trace!("{}: queue {} empty", self.name, queue);
                break;
            };
            done += 1;

            let bytes = rq.bytes(&block);
            match FrameHeader::decode_local(bytes) {
                Ok(header) if header.frame_len() <= bytes.len() => {
                    let body = &bytes[HEADER_LEN..header.frame_len()];
                    if self.shared.registry.dispatch(header.msg_type, body) {
                        bump(&counters.proc_total);
                    } else {
                        bump(&counters.drop_total);
                    }
                }
                Ok(header) => {
                    warn!(
                        "{}: frame of {} bytes overruns its block, dropped",
                        self.name,
                        header.frame_len()
                    );
                    bump(&counters.err_total);
                }
                Err(e) => {
                    warn!("{}: undecodable frame in queue {}: {}", self.name, queue, e);
                    bump(&counters.err_total);
                }
            }
            rq.dealloc(block);
        }
        done
    }
}
