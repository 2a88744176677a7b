// Local control plane: fixed-size command records over Unix datagram
// sockets. Commands only wake threads up and hand over descriptors; data
// always travels through the queues.

use super::stats::{RecvStat, WorkStat};
use log::{debug, warn};
use mio::net::UnixDatagram;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Size of every command record.
pub const CMD_LEN: usize = 128;

/// `Work::count` meaning "everything queued".
pub const WORK_ALL: u32 = u32::MAX;

/// Longest peer address carried by `AddSocket`.
pub const PEER_MAX: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command record of {0} bytes is truncated")]
    Truncated(usize),
    #[error("unknown command tag {0}")]
    UnknownTag(u32),
    #[error("peer address is not valid UTF-8")]
    BadPeer,
}

/// Configuration summary answered to `QueryConf`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfReport {
    pub recv_threads: u32,
    pub work_threads: u32,
    pub queue_count: u32,
    pub queue_max: u32,
    pub queue_size: u32,
    pub keepalive_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Listener hands an accepted connection to a receiver
    AddSocket { fd: RawFd, peer: String },
    /// Queue `queue` holds up to `count` undelivered frames from receiver `origin`
    Work { origin: u32, queue: u32, count: u32 },
    /// Send queue has data
    Send,
    /// Flush everything queued
    SendAll,
    QueryConf,
    ConfReply(ConfReport),
    QueryRecvStat,
    RecvStatReply(RecvStat),
    QueryWorkStat,
    WorkStatReply(WorkStat),
    /// Wake a thread so it notices the shutdown flag
    Shutdown,
}

struct Writer {
    buf: [u8; CMD_LEN],
    at: usize,
}

impl Writer {
    fn new(tag: u32) -> Self {
        let mut w = Self {
            buf: [0u8; CMD_LEN],
            at: 0,
        };
        w.u32(tag);
        w
    }

    fn u32(&mut self, v: u32) -> &mut Self {
        self.buf[self.at..self.at + 4].copy_from_slice(&v.to_le_bytes());
        self.at += 4;
        self
    }

    fn u64(&mut self, v: u64) -> &mut Self {
        self.buf[self.at..self.at + 8].copy_from_slice(&v.to_le_bytes());
        self.at += 8;
        self
    }

    fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf[self.at..self.at + v.len()].copy_from_slice(v);
        self.at += v.len();
        self
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CommandError> {
        let out = self
            .buf
            .get(self.at..self.at + n)
            .ok_or(CommandError::Truncated(self.buf.len()))?;
        self.at += n;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, CommandError> {
        let mut w = [0u8; 4];
        w.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(w))
    }

    fn u64(&mut self) -> Result<u64, CommandError> {
        let mut w = [0u8; 8];
        w.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(w))
    }
}

impl Command {
    fn tag(&self) -> u32 {
        match self {
            Command::AddSocket { .. } => 1,
            Command::Work { .. } => 2,
            Command::Send => 3,
            Command::SendAll => 4,
            Command::QueryConf => 5,
            Command::ConfReply(_) => 6,
            Command::QueryRecvStat => 7,
            Command::RecvStatReply(_) => 8,
            Command::QueryWorkStat => 9,
            Command::WorkStatReply(_) => 10,
            Command::Shutdown => 11,
        }
    }

    pub fn encode(&self) -> [u8; CMD_LEN] {
        let mut w = Writer::new(self.tag());
        match self {
            Command::AddSocket { fd, peer } => {
                let peer = &peer.as_bytes()[..peer.len().min(PEER_MAX)];
                w.u32(*fd as u32).u32(peer.len() as u32).bytes(peer);
            }
            Command::Work {
                origin,
                queue,
                count,
            } => {
                w.u32(*origin).u32(*queue).u32(*count);
            }
            Command::ConfReply(c) => {
                w.u32(c.recv_threads)
                    .u32(c.work_threads)
                    .u32(c.queue_count)
                    .u32(c.queue_max)
                    .u32(c.queue_size)
                    .u64(c.keepalive_ms);
            }
            Command::RecvStatReply(s) => {
                w.u64(s.connections)
                    .u64(s.recv_total)
                    .u64(s.drop_total)
                    .u64(s.err_total);
            }
            Command::WorkStatReply(s) => {
                w.u64(s.proc_total).u64(s.drop_total).u64(s.err_total);
            }
            Command::Send
            | Command::SendAll
            | Command::QueryConf
            | Command::QueryRecvStat
            | Command::QueryWorkStat
            | Command::Shutdown => {}
        }
        w.buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CommandError> {
        let mut r = Reader { buf, at: 0 };
        let tag = r.u32()?;
        let cmd = match tag {
            1 => {
                let fd = r.u32()? as RawFd;
                let len = (r.u32()? as usize).min(PEER_MAX);
                let peer = std::str::from_utf8(r.take(len)?)
                    .map_err(|_| CommandError::BadPeer)?
                    .to_string();
                Command::AddSocket { fd, peer }
            }
            2 => Command::Work {
                origin: r.u32()?,
                queue: r.u32()?,
                count: r.u32()?,
            },
            3 => Command::Send,
            4 => Command::SendAll,
            5 => Command::QueryConf,
            6 => Command::ConfReply(ConfReport {
                recv_threads: r.u32()?,
                work_threads: r.u32()?,
                queue_count: r.u32()?,
                queue_max: r.u32()?,
                queue_size: r.u32()?,
                keepalive_ms: r.u64()?,
            }),
            7 => Command::QueryRecvStat,
            8 => Command::RecvStatReply(RecvStat {
                connections: r.u64()?,
                recv_total: r.u64()?,
                drop_total: r.u64()?,
                err_total: r.u64()?,
            }),
            9 => Command::QueryWorkStat,
            10 => Command::WorkStatReply(WorkStat {
                proc_total: r.u64()?,
                drop_total: r.u64()?,
                err_total: r.u64()?,
            }),
            11 => Command::Shutdown,
            other => return Err(CommandError::UnknownTag(other)),
        };
        Ok(cmd)
    }
}

/// Deterministic command-socket paths of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdPaths {
    dir: PathBuf,
}

impl CmdPaths {
    pub fn new(cmd_dir: impl AsRef<Path>, service: &str) -> Self {
        Self {
            dir: cmd_dir.as_ref().join(service),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn listen(&self) -> PathBuf {
        self.dir.join("listen.usck")
    }

    pub fn recv(&self, idx: usize) -> PathBuf {
        self.dir.join(format!("recv_{}.usck", idx))
    }

    pub fn work(&self, idx: usize) -> PathBuf {
        self.dir.join(format!("work_{}.usck", idx))
    }

    pub fn send(&self, idx: usize) -> PathBuf {
        self.dir.join(format!("send_{}.usck", idx))
    }

    pub fn client(&self, idx: usize) -> PathBuf {
        self.dir.join(format!("cli_{}.usck", idx))
    }

    /// One-off path for a query issued by this process
    pub fn query(&self, tag: usize) -> PathBuf {
        self.dir
            .join(format!("query_{}_{}.usck", std::process::id(), tag))
    }
}

/// Non-blocking datagram endpoint for command records.
pub struct CommandSocket {
    sock: UnixDatagram,
    path: Option<PathBuf>,
}

impl CommandSocket {
    /// Bind at `path`, creating parent directories and removing a stale file
    pub fn bind(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed stale command socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let sock = UnixDatagram::bind(path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to bind command socket {}: {}", path.display(), e),
            )
        })?;
        Ok(Self {
            sock,
            path: Some(path.to_path_buf()),
        })
    }

    /// Send-only endpoint
    pub fn unbound() -> io::Result<Self> {
        Ok(Self {
            sock: UnixDatagram::unbound()?,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn send_to(&self, cmd: &Command, path: impl AsRef<Path>) -> io::Result<()> {
        let record = cmd.encode();
        let n = self.sock.send_to(&record, path.as_ref())?;
        if n != CMD_LEN {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short command write: {} of {} bytes", n, CMD_LEN),
            ));
        }
        Ok(())
    }

    /// Next command, or `None` once the socket would block.
    /// Undecodable records are logged and skipped.
    pub fn recv(&self) -> io::Result<Option<(Command, Option<PathBuf>)>> {
        let mut buf = [0u8; CMD_LEN];
        loop {
            match self.sock.recv_from(&mut buf) {
                Ok((n, addr)) => match Command::decode(&buf[..n]) {
                    Ok(cmd) => {
                        let from = addr.as_pathname().map(Path::to_path_buf);
                        return Ok(Some((cmd, from)));
                    }
                    Err(e) => warn!("Dropping command record: {}", e),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Registration handle for a mio poll
    pub fn source(&mut self) -> &mut UnixDatagram {
        &mut self.sock
    }
}

impl Drop for CommandSocket {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Send `cmd` to the socket at `target` and wait up to `timeout` for the
/// reply, received on a temporary socket bound at `reply_at`.
pub fn request(
    target: &Path,
    reply_at: &Path,
    cmd: &Command,
    timeout: Duration,
) -> io::Result<Command> {
    let mut sock = CommandSocket::bind(reply_at)?;
    let mut poll = Poll::new()?;
    poll.registry()
        .register(sock.source(), Token(0), Interest::READABLE)?;
    sock.send_to(cmd, target)?;

    let deadline = Instant::now() + timeout;
    let mut events = Events::with_capacity(4);
    loop {
        if let Some((reply, _)) = sock.recv()? {
            return Ok(reply);
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no reply from {}", target.display()),
            ));
        }
        match poll.poll(&mut events, Some(left)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}
