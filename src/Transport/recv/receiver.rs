// src/Transport/recv/receiver.rs

use super::RecvShared;
use crate::Core::alloc::SlabPool;
use crate::Queue::QueueFull;
use crate::Transport::command::{Command, CommandSocket, WORK_ALL};
use crate::Transport::conn::{Connection, Dest, Frame, ReadStep, Slot, WriteStep};
use crate::Transport::error::ReactorError;
use crate::Transport::frame::{LinkInfo, SystemType, HEADER_LEN};
use crate::Transport::stats::bump;
use log::{debug, error, info, trace, warn};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io;
use std::os::fd::{FromRawFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Instant;

const CMD: Token = Token(0);

/// Extra allocation attempts after the first fails, each preceded by a
/// drain request to the workers.
const ACQUIRE_RETRIES: usize = 3;

/// System replies held at once by one receiver.
const REPLY_FRAMES: usize = 4096;

/// Receiver reactor: owns a disjoint set of accepted connections.
pub(crate) struct Receiver {
    idx: usize,
    name: String,
    shared: Arc<RecvShared>,
    poll: Poll,
    cmd: CommandSocket,
    conns: HashMap<Token, Connection>,
    next_token: usize,
    /// Local pool for keepalive replies
    pool: SlabPool,
    /// Frames pushed per queue since the last Work notification
    delay: Vec<u32>,
    next_queue: usize,
    last_timeout: Instant,
}

impl Receiver {
    pub fn new(idx: usize, shared: Arc<RecvShared>, mut cmd: CommandSocket) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(cmd.source(), CMD, Interest::READABLE)?;
        let pool = SlabPool::heap(SlabPool::required_size(REPLY_FRAMES, HEADER_LEN))
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        Ok(Self {
            name: format!("{}-recv-{}", shared.conf.name, idx),
            delay: vec![0; shared.queues.len()],
            // Spread receivers over the queues from the start
            next_queue: idx,
            idx,
            shared,
            poll,
            cmd,
            conns: HashMap::new(),
            next_token: 1,
            pool,
            last_timeout: Instant::now(),
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
        let mut events = Events::with_capacity(256);
        debug!("{} started", self.name);

        while !self.shared.is_shutdown() {
            match self.poll.poll(&mut events, Some(timeout)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ReactorError::fatal(&self.name, e)),
            }

            if events.is_empty() {
                self.on_timeout();
                continue;
            }

            for event in events.iter() {
                match event.token() {
                    CMD => self.handle_commands(),
                    token => {
                        let readable = event.is_readable() || event.is_read_closed() || event.is_error();
                        self.on_conn_event(token, readable, event.is_writable());
                    }
                }
            }

            // Busy receivers still need their periodic housekeeping
            if self.last_timeout.elapsed() >= timeout {
                self.on_timeout();
            }
        }

        let tokens: Vec<Token> = self.conns.keys().copied().collect();
        for token in tokens {
            self.close(token, "shutdown");
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
                    bump(&self.shared.recv_counters[self.idx].err_total);
                    break;
                }
            }
        }
    }

    fn on_command(&mut self, cmd: Command, from: Option<PathBuf>) {
        let reply = match cmd {
            Command::AddSocket { fd, peer } => {
                if let Err(e) = self.add_socket(fd, peer) {
                    error!("{}: adding connection failed: {}", self.name, e);
                    bump(&self.shared.recv_counters[self.idx].err_total);
                }
                None
            }
            Command::QueryRecvStat => Some(Command::RecvStatReply(
                self.shared.recv_counters[self.idx].snapshot(),
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

    fn add_socket(&mut self, fd: RawFd, peer: String) -> io::Result<()> {
        // The listener gave up ownership of fd when it sent the command
        let stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
        stream.set_nonblocking(true)?;
        let _ = stream.set_nodelay(true);
        let token = Token(self.next_token);
        self.next_token += 1;
        let conn = Connection::register(
            self.poll.registry(),
            TcpStream::from_std(stream),
            token,
            peer,
            self.shared.conf.max_body(),
        )?;
        debug!("{}: accepted {} as {:?}", self.name, conn.peer, token);
        self.conns.insert(token, conn);
        self.shared.recv_counters[self.idx]
            .connections
            .fetch_add(1, Relaxed);
        Ok(())
    }

    fn close(&mut self, token: Token, why: &str) {
        if let Some(conn) = self.conns.remove(&token) {
            self.release(conn, why);
        }
    }

    fn release(&mut self, conn: Connection, why: &str) {
        debug!("{}: closing {} ({})", self.name, conn.peer, why);
        let dropped = conn.close(self.poll.registry());
        if dropped > 0 {
            trace!("{}: {} outbound frames discarded", self.name, dropped);
        }
        self.shared.recv_counters[self.idx]
            .connections
            .fetch_sub(1, Relaxed);
    }

    // Connections with neither reads nor writes for the idle timeout
    fn drop_stale(&mut self, now: Instant, idle: std::time::Duration) {
        let stale: Vec<Token> = self
            .conns
            .iter()
            .filter(|(_, c)| c.is_stale(now, idle))
            .map(|(t, _)| *t)
            .collect();
        for token in stale {
            self.close(token, "stale");
        }
    }

    fn on_timeout(&mut self) {
        let now = Instant::now();
        self.drop_stale(now, self.shared.conf.idle_timeout());

        for q in 0..self.delay.len() {
            if self.delay[q] > 0 {
                self.notify(q);
            }
        }
        self.last_timeout = now;
    }

    fn on_conn_event(&mut self, token: Token, readable: bool, writable: bool) {
        // Taken out of the map so the connection and the reactor can be
        // borrowed separately
        let Some(mut conn) = self.conns.remove(&token) else {
            return;
        };
        match self.service(&mut conn, readable, writable) {
            Ok(()) => {
                self.conns.insert(token, conn);
            }
            Err(why) => self.release(conn, why),
        }
    }

    fn service(&mut self, conn: &mut Connection, readable: bool, writable: bool) -> Result<(), &'static str> {
        let shared = self.shared.clone();
        let counters = &shared.recv_counters[self.idx];

        if readable {
            conn.last_read = Instant::now();
            loop {
                let step = conn.reader.advance(&mut conn.stream, || self.acquire());
                match step {
                    ReadStep::Again => break,
                    ReadStep::Closed => return Err("peer closed"),
                    ReadStep::Failed(e) => {
                        warn!("{}: {}: {}", self.name, conn.peer, e);
                        bump(&counters.err_total);
                        return Err("read error");
                    }
                    ReadStep::Complete(frame) => self.post(conn, frame),
                }
            }
        }

        if writable || !conn.writer.is_empty() {
            let flushed = conn.writer.flush(&mut conn.stream, || None);
            if flushed.progressed {
                conn.last_write = Instant::now();
            }
            match flushed.step {
                WriteStep::Drained | WriteStep::Again => {}
                WriteStep::Failed(e) => {
                    warn!("{}: write to {} failed: {}", self.name, conn.peer, e);
                    bump(&counters.err_total);
                    return Err("write error");
                }
            }
        }

        conn.sync_interest(self.poll.registry()).map_err(|e| {
            error!("{}: reregister {} failed: {}", self.name, conn.peer, e);
            "reregister failed"
        })
    }

    // Init-phase buffer: a block from the next receive queue, or None for
    // the scratch buffer once every retry has failed
    fn acquire(&mut self) -> Option<Slot> {
        let n = self.shared.queues.len();
        for attempt in 0..=ACQUIRE_RETRIES {
            let q = self.next_queue % n;
            self.next_queue = self.next_queue.wrapping_add(1);
            match self.shared.queues[q].alloc() {
                Ok(block) => {
                    return Some(Slot {
                        queue_idx: q,
                        queue: self.shared.queues[q].clone(),
                        block,
                    })
                }
                Err(e) => {
                    trace!("{}: queue {} alloc attempt {}: {}", self.name, q, attempt, e);
                    self.drain_all();
                }
            }
        }
        let st = self.shared.recv_counters[self.idx].snapshot();
        warn!(
            "{}: receive queues exhausted, reading into scratch (recv {} drop {} err {})",
            self.name, st.recv_total, st.drop_total, st.err_total
        );
        None
    }

    // Completed frame: system frames are answered here, application frames
    // go to their receive queue
    fn post(&mut self, conn: &mut Connection, frame: Frame) {
        let shared = self.shared.clone();
        let counters = &shared.recv_counters[self.idx];
        if frame.header.is_system() {
            let kind = SystemType::from_u32(frame.header.msg_type);
            match kind {
                SystemType::KeepaliveRequest => {
                    if let Err(e) = conn.queue_system(&self.pool, SystemType::KeepaliveReply, &[]) {
                        warn!("{}: keepalive reply to {} failed: {}", self.name, conn.peer, e);
                        bump(&counters.err_total);
                    }
                }
                SystemType::LinkInfoReport => match LinkInfo::decode(conn.reader.body(&frame)) {
                    Ok(info) => {
                        debug!("{}: {} primary={}", self.name, conn.peer, info.is_primary);
                        conn.is_primary = info.is_primary;
                    }
                    Err(e) => warn!("{}: bad link info from {}: {}", self.name, conn.peer, e),
                },
                SystemType::KeepaliveReply | SystemType::Unknown => {
                    debug!(
                        "{}: discarding system frame type {} from {}",
                        self.name, frame.header.msg_type, conn.peer
                    );
                }
            }
            if let Dest::Slot(slot) = frame.dest {
                slot.release();
            }
            return;
        }

        bump(&counters.recv_total);
        match frame.dest {
            Dest::Scratch => {
                bump(&counters.drop_total);
                warn!(
                    "{}: dropped type {} from {} (recv {} drop {})",
                    self.name,
                    frame.header.msg_type,
                    conn.peer,
                    counters.recv_total.load(Relaxed),
                    counters.drop_total.load(Relaxed)
                );
            }
            Dest::Slot(Slot {
                queue_idx,
                queue,
                block,
            }) => match queue.push(block) {
                Ok(()) => {
                    self.delay[queue_idx] += 1;
                    if self.delay[queue_idx] >= self.shared.conf.notify_interval {
                        self.notify(queue_idx);
                    }
                }
                Err(QueueFull(block)) => {
                    queue.dealloc(block);
                    bump(&counters.drop_total);
                    warn!("{}: receive queue {} full, frame dropped", self.name, queue_idx);
                }
            },
        }
    }

    // Tell the owning worker about the frames pushed to queue `q`
    fn notify(&mut self, q: usize) {
        let count = self.delay[q];
        let cmd = Command::Work {
            origin: self.idx as u32,
            queue: q as u32,
            count,
        };
        let worker = self.shared.sharding.worker_for(q);
        match self.cmd.send_to(&cmd, self.shared.paths.work(worker)) {
            Ok(()) => self.delay[q] = 0,
            // Kept in `delay` and resent from the timeout handler
            Err(e) => debug!("{}: work notify for queue {} failed: {}", self.name, q, e),
        }
    }

    // Ask every worker to empty its queues
    fn drain_all(&mut self) {
        for q in 0..self.shared.queues.len() {
            let cmd = Command::Work {
                origin: self.idx as u32,
                queue: q as u32,
                count: WORK_ALL,
            };
            let worker = self.shared.sharding.worker_for(q);
            match self.cmd.send_to(&cmd, self.shared.paths.work(worker)) {
                Ok(()) => self.delay[q] = 0,
                Err(e) => debug!("{}: drain request for queue {} failed: {}", self.name, q, e),
            }
        }
    }
}
