// Receive side: listener, receiver reactors and the worker pool, tied
// together by a `Transport` context.

mod listener;
mod receiver;
pub mod sharding;
mod worker;

use crate::Queue::{QueueBuilder, SlabQueue};
use crate::Transport::command::{request, CmdPaths, Command, CommandSocket, ConfReport};
use crate::Transport::config::RecvConfig;
use crate::Transport::error::{RegisterError, TransportError};
use crate::Transport::registry::{Handler, Registry};
use crate::Transport::stats::{RecvCounters, RecvStat, WorkCounters, WorkStat};
use crate::Transport::thread::spawn_reactor;
use listener::Listener;
use log::{debug, info, warn};
use receiver::Receiver;
use sharding::{sharding_for, QueueSharding};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use worker::Worker;

/// State shared by every thread of one receive service.
pub(crate) struct RecvShared {
    pub conf: RecvConfig,
    pub paths: CmdPaths,
    pub queues: Vec<Arc<SlabQueue>>,
    pub registry: Registry,
    pub sharding: Box<dyn QueueSharding>,
    pub recv_counters: Vec<RecvCounters>,
    pub work_counters: Vec<WorkCounters>,
    pub shutdown: AtomicBool,
}

impl RecvShared {
    pub fn conf_report(&self) -> ConfReport {
        ConfReport {
            recv_threads: self.conf.recv_threads as u32,
            work_threads: self.conf.work_threads as u32,
            queue_count: self.queues.len() as u32,
            queue_max: self.conf.recvq.max as u32,
            queue_size: self.conf.recvq.size as u32,
            keepalive_ms: self.conf.keepalive_ms,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

pub(crate) fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{}:{} did not resolve", host, port),
        )
    })
}

/// Receive service context.
///
/// ```no_run
/// use dmxp_transport::Transport::{RecvConfig, Transport};
///
/// let mut t = Transport::init(RecvConfig::default()).unwrap();
/// t.register(5, |_ty: u32, body: &[u8]| println!("{} bytes", body.len())).unwrap();
/// t.startup().unwrap();
/// ```
pub struct Transport {
    shared: Arc<RecvShared>,
    threads: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    queries: AtomicUsize,
}

impl Transport {
    /// Validate `conf` and create the receive queues and handler table
    pub fn init(conf: RecvConfig) -> Result<Self, TransportError> {
        conf.validate()?;
        let queues = (0..conf.queue_count())
            .map(|_| {
                QueueBuilder::new()
                    .with_capacity(conf.recvq.max)
                    .with_item_size(conf.recvq.size)
                    .build_in_process()
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let shared = RecvShared {
            paths: CmdPaths::new(&conf.cmd_dir, &conf.name),
            sharding: sharding_for(conf.sharding, conf.work_threads, conf.queues_per_worker),
            recv_counters: (0..conf.recv_threads).map(|_| RecvCounters::default()).collect(),
            work_counters: (0..conf.work_threads).map(|_| WorkCounters::default()).collect(),
            registry: Registry::new(),
            shutdown: AtomicBool::new(false),
            queues,
            conf,
        };
        debug!(
            "Transport {} initialised with {} receive queues",
            shared.conf.name,
            shared.queues.len()
        );
        Ok(Self {
            shared: Arc::new(shared),
            threads: Vec::new(),
            local_addr: None,
            queries: AtomicUsize::new(0),
        })
    }

    /// Install the handler for `msg_type`. Each type can be registered once.
    pub fn register<H: Handler + 'static>(&self, msg_type: u32, handler: H) -> Result<(), RegisterError> {
        self.shared.registry.register(msg_type, handler)
    }

    /// Bind every socket, then spawn workers, receivers and the listener.
    ///
    /// All binding happens on the calling thread so configuration errors
    /// surface here rather than in a background thread.
    pub fn startup(&mut self) -> Result<(), TransportError> {
        if !self.threads.is_empty() {
            return Err(TransportError::AlreadyStarted);
        }
        let shared = &self.shared;
        let conf = &shared.conf;

        let mut workers = Vec::with_capacity(conf.work_threads);
        for idx in 0..conf.work_threads {
            let cmd = CommandSocket::bind(shared.paths.work(idx))?;
            workers.push(Worker::new(idx, shared.clone(), cmd)?);
        }
        let mut receivers = Vec::with_capacity(conf.recv_threads);
        for idx in 0..conf.recv_threads {
            let cmd = CommandSocket::bind(shared.paths.recv(idx))?;
            receivers.push(Receiver::new(idx, shared.clone(), cmd)?);
        }
        let addr = resolve(&conf.bind_addr, conf.port)?;
        let listener = Listener::bind(addr, shared.clone())?;
        self.local_addr = Some(listener.local_addr()?);

        for worker in workers {
            let (name, idx) = (worker.name().to_string(), worker.index());
            self.threads
                .push(spawn_reactor(name, &conf.cpu, idx, move || worker.run())?);
        }
        for receiver in receivers {
            let (name, idx) = (receiver.name().to_string(), receiver.index());
            self.threads.push(spawn_reactor(
                name,
                &conf.cpu,
                conf.work_threads + idx,
                move || receiver.run(),
            )?);
        }
        let name = format!("{}-listen", conf.name);
        self.threads
            .push(spawn_reactor(name, &conf.cpu, 0, move || listener.run())?);

        info!(
            "Transport {} listening on {:?} ({} receivers, {} workers)",
            conf.name, self.local_addr, conf.recv_threads, conf.work_threads
        );
        Ok(())
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &RecvConfig {
        &self.shared.conf
    }

    pub fn queue(&self, idx: usize) -> Option<&Arc<SlabQueue>> {
        self.shared.queues.get(idx)
    }

    /// Counters of receiver `idx`
    pub fn recv_stat(&self, idx: usize) -> Option<RecvStat> {
        self.shared.recv_counters.get(idx).map(RecvCounters::snapshot)
    }

    /// Counters summed over every receiver
    pub fn recv_stats(&self) -> RecvStat {
        self.shared
            .recv_counters
            .iter()
            .map(RecvCounters::snapshot)
            .fold(RecvStat::default(), |a, b| a + b)
    }

    pub fn work_stat(&self, idx: usize) -> Option<WorkStat> {
        self.shared.work_counters.get(idx).map(WorkCounters::snapshot)
    }

    /// Counters summed over every worker
    pub fn work_stats(&self) -> WorkStat {
        self.shared
            .work_counters
            .iter()
            .map(WorkCounters::snapshot)
            .fold(WorkStat::default(), |a, b| a + b)
    }

    fn ask(&self, target: PathBuf, cmd: Command, timeout: Duration) -> io::Result<Command> {
        let tag = self.queries.fetch_add(1, Ordering::Relaxed);
        request(&target, &self.shared.paths.query(tag), &cmd, timeout)
    }

    fn unexpected(reply: Command) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected reply {:?}", reply),
        )
    }

    /// Ask receiver `idx` for its counters over its command socket
    pub fn query_recv_stat(&self, idx: usize, timeout: Duration) -> io::Result<RecvStat> {
        match self.ask(self.shared.paths.recv(idx), Command::QueryRecvStat, timeout)? {
            Command::RecvStatReply(stat) => Ok(stat),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Ask worker `idx` for its counters over its command socket
    pub fn query_work_stat(&self, idx: usize, timeout: Duration) -> io::Result<WorkStat> {
        match self.ask(self.shared.paths.work(idx), Command::QueryWorkStat, timeout)? {
            Command::WorkStatReply(stat) => Ok(stat),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Ask the listener for the running configuration
    pub fn query_conf(&self, timeout: Duration) -> io::Result<ConfReport> {
        match self.ask(self.shared.paths.listen(), Command::QueryConf, timeout)? {
            Command::ConfReply(report) => Ok(report),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Stop and join every thread. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.threads.is_empty() {
            let conf = &self.shared.conf;
            let paths = &self.shared.paths;
            let mut targets = vec![paths.listen()];
            targets.extend((0..conf.recv_threads).map(|i| paths.recv(i)));
            targets.extend((0..conf.work_threads).map(|i| paths.work(i)));
            match CommandSocket::unbound() {
                Ok(sock) => {
                    for target in targets {
                        // Threads also notice the flag on their next poll timeout
                        let _ = sock.send_to(&Command::Shutdown, target);
                    }
                }
                Err(e) => warn!("Shutdown wake-up skipped: {}", e),
            }
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        let _ = std::fs::remove_dir(self.shared.paths.dir());
        info!("Transport {} stopped", self.shared.conf.name);
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.destroy();
    }
}
