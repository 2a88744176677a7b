// src/Transport/send/sender.rs

use super::backoff::{Backoff, LinkAction, LinkMonitor};
use super::SendShared;
use crate::Core::alloc::SlabPool;
use crate::Queue::SlabQueue;
use crate::Transport::command::{Command, CommandSocket};
use crate::Transport::conn::{Connection, Outbound, ReadStep, WriteStep};
use crate::Transport::error::ReactorError;
use crate::Transport::frame::{LinkInfo, SystemType, HEADER_LEN};
use crate::Transport::stats::bump;
use log::{debug, error, info, trace, warn};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CMD: Token = Token(0);
const LINK: Token = Token(1);

/// System frames (keepalives, link reports) held at once.
const SYSTEM_FRAMES: usize = 256;

/// Largest reply body the sender expects from the receiver.
const REPLY_MAX_BODY: usize = 64;

/// Sender reactor: one outbound link fed by one send queue.
pub(crate) struct Sender {
    idx: usize,
    name: String,
    shared: Arc<SendShared>,
    addr: SocketAddr,
    poll: Poll,
    cmd: CommandSocket,
    queue: Arc<SlabQueue>,
    /// Local pool for system frames
    pool: SlabPool,
    link: Option<Connection>,
    backoff: Backoff,
    monitor: LinkMonitor,
    next_attempt: Instant,
    last_tick: Instant,
}

impl Sender {
    pub fn new(
        idx: usize,
        shared: Arc<SendShared>,
        addr: SocketAddr,
        mut cmd: CommandSocket,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(cmd.source(), CMD, Interest::READABLE)?;
        let pool = SlabPool::heap(SlabPool::required_size(SYSTEM_FRAMES, HEADER_LEN + LinkInfo::LEN))
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        let conf = &shared.conf;
        let now = Instant::now();
        Ok(Self {
            name: format!("{}-send-{}", conf.name, idx),
            queue: shared.queues[idx].clone(),
            backoff: Backoff::new(conf.reconnect_min(), conf.reconnect_max()),
            monitor: LinkMonitor::new(conf.keepalive()),
            idx,
            addr,
            poll,
            cmd,
            pool,
            link: None,
            next_attempt: now,
            last_tick: now,
            shared,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.idx
    }

    pub fn run(mut self) -> Result<(), ReactorError> {
        let poll_timeout = self.shared.conf.poll_timeout();
        let mut events = Events::with_capacity(16);
        debug!("{} started, target {}", self.name, self.addr);

        while !self.shared.is_shutdown() {
            let now = Instant::now();
            if self.link.is_none() {
                if now >= self.next_attempt {
                    self.connect();
                }
                if self.link.is_none() {
                    // Queued data is stale once the link is gone
                    self.discard_queued();
                }
            }
            self.flush();

            let timeout = match self.link {
                Some(_) => poll_timeout,
                None => poll_timeout.min(self.next_attempt.saturating_duration_since(Instant::now())),
            };
            match self.poll.poll(&mut events, Some(timeout)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ReactorError::fatal(&self.name, e)),
            }

            if events.is_empty() {
                self.on_tick();
                continue;
            }
            for event in events.iter() {
                match event.token() {
                    CMD => self.handle_commands(),
                    LINK => {
                        if event.is_readable() || event.is_read_closed() || event.is_error() {
                            self.read_replies();
                        }
                    }
                    _ => {}
                }
            }
            if self.last_tick.elapsed() >= poll_timeout {
                self.on_tick();
            }
        }

        if let Some(conn) = self.link.take() {
            conn.close(self.poll.registry());
        }
        self.shared.counters[self.idx].connected.store(false, Relaxed);
        info!("{} stopped", self.name);
        Ok(())
    }

    fn open_stream(&self, timeout: Duration) -> io::Result<TcpStream> {
        let socket = Socket::new(Domain::for_address(self.addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.connect_timeout(&self.addr.into(), timeout)?;
        socket.set_nonblocking(true)?;
        let _ = socket.set_nodelay(true);
        Ok(TcpStream::from_std(socket.into()))
    }

    fn connect(&mut self) {
        let counters = &self.shared.counters[self.idx];
        let attempt = self.open_stream(self.shared.conf.connect_timeout()).and_then(|stream| {
            Connection::register(
                self.poll.registry(),
                stream,
                LINK,
                self.addr.to_string(),
                REPLY_MAX_BODY,
            )
        });
        match attempt {
            Ok(mut conn) => {
                info!("{}: connected to {}", self.name, self.addr);
                self.backoff.reset();
                self.monitor.reset();
                counters.connected.store(true, Relaxed);
                bump(&counters.reconn_total);

                let report = LinkInfo {
                    is_primary: self.idx == 0,
                };
                if let Err(e) = conn.queue_system(&self.pool, SystemType::LinkInfoReport, &report.encode()) {
                    warn!("{}: link report not queued: {}", self.name, e);
                }
                self.link = Some(conn);
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                self.next_attempt = Instant::now() + delay;
                bump(&counters.err_total);
                warn!(
                    "{}: connect to {} failed: {}, retry in {:?}",
                    self.name, self.addr, e, delay
                );
            }
        }
    }

    fn disconnect(&mut self, why: &str) {
        let Some(conn) = self.link.take() else {
            return;
        };
        let dropped = conn.close(self.poll.registry());
        let delay = self.backoff.next_delay();
        self.next_attempt = Instant::now() + delay;
        self.monitor.reset();
        self.shared.counters[self.idx].connected.store(false, Relaxed);
        warn!(
            "{}: link to {} closed ({}), {} frames dropped, reconnect in {:?}",
            self.name, self.addr, why, dropped, delay
        );
        self.discard_queued();
    }

    fn discard_queued(&self) {
        let mut n = 0;
        while let Some(block) = self.queue.pop() {
            self.queue.dealloc(block);
            n += 1;
        }
        if n > 0 {
            warn!("{}: discarded {} queued frames while disconnected", self.name, n);
        }
    }

    // System frames first, then the send queue
    fn flush(&mut self) {
        let Some(conn) = self.link.as_mut() else {
            return;
        };
        let queue = self.queue.clone();
        let flushed = conn.writer.flush(&mut conn.stream, || {
            queue
                .pop()
                .map(|block| Outbound::new(queue.pool().clone(), block))
        });
        let counters = &self.shared.counters[self.idx];
        counters.send_total.fetch_add(flushed.app_frames as u64, Relaxed);
        if flushed.progressed {
            conn.last_write = Instant::now();
        }

        let failed = match flushed.step {
            WriteStep::Drained | WriteStep::Again => conn.sync_interest(self.poll.registry()).err(),
            WriteStep::Failed(e) => Some(e),
        };
        if let Some(e) = failed {
            error!("{}: write to {} failed: {}", self.name, self.addr, e);
            bump(&counters.err_total);
            self.disconnect("write error");
        }
    }

    fn read_replies(&mut self) {
        let Some(conn) = self.link.as_mut() else {
            return;
        };
        conn.last_read = Instant::now();
        let outcome = loop {
            match conn.reader.advance(&mut conn.stream, || None) {
                ReadStep::Again => break None,
                ReadStep::Closed => break Some("peer closed".to_string()),
                ReadStep::Failed(e) => {
                    bump(&self.shared.counters[self.idx].err_total);
                    break Some(e.to_string());
                }
                ReadStep::Complete(frame) => {
                    let kind = SystemType::from_u32(frame.header.msg_type);
                    if frame.header.is_system() && kind == SystemType::KeepaliveReply {
                        trace!("{}: keepalive acknowledged", self.name);
                        self.monitor.on_reply();
                    } else {
                        debug!(
                            "{}: discarding reply type {} flag {:?}",
                            self.name, frame.header.msg_type, frame.header.flag
                        );
                    }
                }
            }
        };
        if let Some(why) = outcome {
            self.disconnect(&why);
        }
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        self.last_tick = now;
        let Some(conn) = self.link.as_mut() else {
            return;
        };
        match self.monitor.on_tick(now, conn.last_write) {
            LinkAction::None => {}
            LinkAction::SendRequest => {
                match conn.queue_system(&self.pool, SystemType::KeepaliveRequest, &[]) {
                    Ok(()) => bump(&self.shared.counters[self.idx].kpalive_total),
                    Err(e) => warn!("{}: keepalive not queued: {}", self.name, e),
                }
                self.flush();
            }
            LinkAction::Dead => self.disconnect("keepalive unanswered"),
        }
    }

    fn handle_commands(&mut self) {
        loop {
            match self.cmd.recv() {
                Ok(Some((cmd, from))) => self.on_command(cmd, from),
                Ok(None) => break,
                Err(e) => {
                    error!("{}: command socket: {}", self.name, e);
                    break;
                }
            }
        }
    }

    fn on_command(&mut self, cmd: Command, from: Option<PathBuf>) {
        match cmd {
            Command::Send | Command::SendAll => self.flush(),
            Command::Shutdown => {}
            other => debug!(
                "{}: ignoring {:?} from {:?}",
                self.name,
                other,
                from.as_deref().map(|p| p.display().to_string())
            ),
        }
    }
}
