// Send side: sender reactors draining named shared-memory send queues.

pub mod backoff;
mod sender;

use crate::Queue::{QueueBuilder, SlabQueue};
use crate::Transport::command::{CmdPaths, Command, CommandSocket};
use crate::Transport::config::SendConfig;
use crate::Transport::error::TransportError;
use crate::Transport::recv::resolve;
use crate::Transport::stats::{SendCounters, SendStat};
use crate::Transport::thread::spawn_reactor;
use log::{info, warn};
use sender::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

pub(crate) struct SendShared {
    pub conf: SendConfig,
    pub paths: CmdPaths,
    pub queues: Vec<Arc<SlabQueue>>,
    pub counters: Vec<SendCounters>,
    pub shutdown: AtomicBool,
}

impl SendShared {
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Owns the send queues and the sender threads draining them.
///
/// Clients in this or other processes attach to the queues by name with
/// [`crate::Transport::Client::init`].
pub struct SendService {
    shared: Arc<SendShared>,
    threads: Vec<JoinHandle<()>>,
}

impl SendService {
    /// Validate `conf` and create one named send queue per sender thread
    pub fn init(conf: SendConfig) -> Result<Self, TransportError> {
        conf.validate()?;
        let queues = (0..conf.send_threads)
            .map(|idx| {
                QueueBuilder::new()
                    .with_name(conf.sendq_name(idx))
                    .with_capacity(conf.sendq.max)
                    .with_item_size(conf.sendq.size)
                    .build_shared()
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let shared = SendShared {
            paths: CmdPaths::new(&conf.cmd_dir, &conf.name),
            counters: (0..conf.send_threads).map(|_| SendCounters::default()).collect(),
            shutdown: AtomicBool::new(false),
            queues,
            conf,
        };
        Ok(Self {
            shared: Arc::new(shared),
            threads: Vec::new(),
        })
    }

    /// Bind the command sockets and spawn the sender threads
    pub fn startup(&mut self) -> Result<(), TransportError> {
        if !self.threads.is_empty() {
            return Err(TransportError::AlreadyStarted);
        }
        let conf = &self.shared.conf;
        let addr = resolve(&conf.server_addr, conf.port)?;

        let mut senders = Vec::with_capacity(conf.send_threads);
        for idx in 0..conf.send_threads {
            let cmd = CommandSocket::bind(self.shared.paths.send(idx))?;
            senders.push(Sender::new(idx, self.shared.clone(), addr, cmd)?);
        }
        for sender in senders {
            let (name, idx) = (sender.name().to_string(), sender.index());
            self.threads
                .push(spawn_reactor(name, &conf.cpu, idx, move || sender.run())?);
        }
        info!(
            "Send service {} started: {} senders to {}",
            conf.name, conf.send_threads, addr
        );
        Ok(())
    }

    pub fn config(&self) -> &SendConfig {
        &self.shared.conf
    }

    /// Counters of sender `idx`
    pub fn send_stat(&self, idx: usize) -> Option<SendStat> {
        self.shared.counters.get(idx).map(SendCounters::snapshot)
    }

    /// Whether every sender currently holds a link
    pub fn is_connected(&self) -> bool {
        self.shared
            .counters
            .iter()
            .all(|c| c.connected.load(Ordering::Relaxed))
    }

    pub fn destroy(&mut self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.threads.is_empty() {
            match CommandSocket::unbound() {
                Ok(sock) => {
                    for idx in 0..self.shared.conf.send_threads {
                        let _ = sock.send_to(&Command::Shutdown, self.shared.paths.send(idx));
                    }
                }
                Err(e) => warn!("Shutdown wake-up skipped: {}", e),
            }
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        let _ = std::fs::remove_dir(self.shared.paths.dir());
        info!("Send service {} stopped", self.shared.conf.name);
    }
}

impl Drop for SendService {
    fn drop(&mut self) {
        self.destroy();
    }
}
