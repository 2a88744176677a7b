use super::RecvShared;
use crate::Transport::command::{Command, CommandSocket};
use crate::Transport::error::ReactorError;
use log::{debug, error, info, warn};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::os::fd::{FromRawFd, IntoRawFd};
use std::sync::Arc;

const LISTEN: Token = Token(0);
const CMD: Token = Token(1);

const BACKLOG: i32 = 1024;

/// Accepts connections and deals them out to receivers round-robin.
pub(crate) struct Listener {
    name: String,
    shared: Arc<RecvShared>,
    poll: Poll,
    listener: TcpListener,
    cmd: CommandSocket,
    next: usize,
}

impl Listener {
    pub fn bind(addr: SocketAddr, shared: Arc<RecvShared>) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(BACKLOG)?;
        socket.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(socket.into());

        let mut cmd = CommandSocket::bind(shared.paths.listen())?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTEN, Interest::READABLE)?;
        poll.registry()
            .register(cmd.source(), CMD, Interest::READABLE)?;

        Ok(Self {
            name: format!("{}-listen", shared.conf.name),
            shared,
            poll,
            listener,
            cmd,
            next: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn run(mut self) -> Result<(), ReactorError> {
        let timeout = self.shared.conf.poll_timeout();
        let mut events = Events::with_capacity(64);

        while !self.shared.is_shutdown() {
            match self.poll.poll(&mut events, Some(timeout)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ReactorError::fatal(&self.name, e)),
            }
            for event in events.iter() {
                match event.token() {
                    LISTEN => self.accept_all(),
                    CMD => self.handle_commands(),
                    _ => {}
                }
            }
        }
        info!("{} stopped", self.name);
        Ok(())
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.hand_off(stream.into_raw_fd(), peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Typically EMFILE; leave the rest for the next event
                    error!("{}: accept failed: {}", self.name, e);
                    return;
                }
            }
        }
    }

    fn hand_off(&mut self, fd: i32, peer: SocketAddr) {
        let receivers = self.shared.conf.recv_threads;
        let idx = self.next % receivers;
        self.next = self.next.wrapping_add(1);
        let cmd = Command::AddSocket {
            fd,
            peer: peer.to_string(),
        };
        match self.cmd.send_to(&cmd, self.shared.paths.recv(idx)) {
            Ok(()) => debug!("{}: {} handed to receiver {}", self.name, peer, idx),
            Err(e) => {
                warn!("{}: hand-off of {} failed: {}", self.name, peer, e);
                drop(unsafe { std::net::TcpStream::from_raw_fd(fd) });
            }
        }
    }

    fn handle_commands(&mut self) {
        loop {
            match self.cmd.recv() {
                Ok(Some((Command::QueryConf, Some(from)))) => {
                    let reply = Command::ConfReply(self.shared.conf_report());
                    if let Err(e) = self.cmd.send_to(&reply, &from) {
                        warn!("{}: reply to {} failed: {}", self.name, from.display(), e);
                    }
                }
                Ok(Some((Command::Shutdown, _))) => {}
                Ok(Some((other, _))) => debug!("{}: ignoring {:?}", self.name, other),
                Ok(None) => return,
                Err(e) => {
                    error!("{}: command socket: {}", self.name, e);
                    return;
                }
            }
        }
    }
}
