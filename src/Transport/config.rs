// Receiver and sender configuration.
//
// Both structs deserialize from TOML with every field optional; missing
// fields take the defaults below. Durations are given in milliseconds.
//
//   name = "crawler"
//   port = 9000
//   recv_threads = 4
//   keepalive_ms = 30000
//   [recvq]
//   max = 2048
//   size = 8192

use super::error::ConfigError;
use super::frame::HEADER_LEN;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConf {
    /// Items the queue holds
    pub max: usize,
    /// Bytes per item, header included
    pub size: usize,
}

impl Default for QueueConf {
    fn default() -> Self {
        Self {
            max: 1024,
            size: 4096,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CpuConf {
    pub enabled: bool,
    /// First CPU; thread i of a pool goes to (start + i) % ncpus
    pub start: usize,
}

/// How receive queues are assigned to worker threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardingKind {
    /// Worker `q / queues_per_worker` owns queue `q`
    #[default]
    Block,
    /// Worker `q % work_threads` owns queue `q`
    Modulo,
}

fn default_cmd_dir() -> PathBuf {
    PathBuf::from("/tmp/dmxp")
}

fn check_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.contains('/') {
        return Err(ConfigError::Invalid(format!(
            "service name {:?} must be non-empty and contain no '/'",
            name
        )));
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn check_queue(what: &str, q: &QueueConf) -> Result<(), ConfigError> {
    if q.max == 0 || q.size <= HEADER_LEN {
        return Err(ConfigError::Invalid(format!(
            "{} needs max > 0 and size > {} (got max {}, size {})",
            what, HEADER_LEN, q.max, q.size
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecvConfig {
    /// Unique per deployment; namespaces command sockets
    pub name: String,
    pub bind_addr: String,
    /// 0 picks an ephemeral port
    pub port: u16,
    pub recv_threads: usize,
    pub work_threads: usize,
    pub queues_per_worker: usize,
    pub sharding: ShardingKind,
    pub recvq: QueueConf,
    pub cpu: CpuConf,
    pub keepalive_ms: u64,
    /// Idle timeout is keepalive * idle_multiplier
    pub idle_multiplier: u32,
    /// Notify a worker after this many queued messages
    pub notify_interval: u32,
    pub poll_timeout_ms: u64,
    pub cmd_dir: PathBuf,
}

impl Default for RecvConfig {
    fn default() -> Self {
        Self {
            name: "dmxp".to_string(),
            bind_addr: "0.0.0.0".to_string(),
            port: 8888,
            recv_threads: 2,
            work_threads: 2,
            queues_per_worker: 2,
            sharding: ShardingKind::Block,
            recvq: QueueConf::default(),
            cpu: CpuConf::default(),
            keepalive_ms: 30_000,
            idle_multiplier: 2,
            notify_interval: 100,
            poll_timeout_ms: 2_000,
            cmd_dir: default_cmd_dir(),
        }
    }
}

impl RecvConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let conf: Self = toml::from_str(text)?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&read_file(path.as_ref())?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_name(&self.name)?;
        if self.recv_threads == 0 || self.work_threads == 0 || self.queues_per_worker == 0 {
            return Err(ConfigError::Invalid(
                "recv_threads, work_threads and queues_per_worker must be at least 1".into(),
            ));
        }
        check_queue("recvq", &self.recvq)?;
        if self.notify_interval == 0 || self.idle_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "notify_interval and idle_multiplier must be at least 1".into(),
            ));
        }
        if self.keepalive_ms == 0 || self.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "keepalive_ms and poll_timeout_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Total receive queues
    pub fn queue_count(&self) -> usize {
        self.work_threads * self.queues_per_worker
    }

    /// Largest body that fits a receive-queue item
    pub fn max_body(&self) -> usize {
        self.recvq.size - HEADER_LEN
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        self.keepalive() * self.idle_multiplier
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SendConfig {
    /// Unique per deployment; namespaces command sockets and send queues
    pub name: String,
    pub server_addr: String,
    pub port: u16,
    pub send_threads: usize,
    pub sendq: QueueConf,
    pub cpu: CpuConf,
    pub keepalive_ms: u64,
    pub notify_interval: u32,
    pub poll_timeout_ms: u64,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
    pub connect_timeout_ms: u64,
    pub cmd_dir: PathBuf,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            name: "dmxp".to_string(),
            server_addr: "127.0.0.1".to_string(),
            port: 8888,
            send_threads: 1,
            sendq: QueueConf::default(),
            cpu: CpuConf::default(),
            keepalive_ms: 30_000,
            notify_interval: 100,
            poll_timeout_ms: 1_000,
            reconnect_min_ms: 2_000,
            reconnect_max_ms: 30_000,
            connect_timeout_ms: 3_000,
            cmd_dir: default_cmd_dir(),
        }
    }
}

impl SendConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let conf: Self = toml::from_str(text)?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&read_file(path.as_ref())?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_name(&self.name)?;
        if self.send_threads == 0 {
            return Err(ConfigError::Invalid("send_threads must be at least 1".into()));
        }
        check_queue("sendq", &self.sendq)?;
        if self.notify_interval == 0 {
            return Err(ConfigError::Invalid("notify_interval must be at least 1".into()));
        }
        if self.reconnect_min_ms == 0 || self.reconnect_min_ms > self.reconnect_max_ms {
            return Err(ConfigError::Invalid(format!(
                "reconnect interval must satisfy 0 < min <= max (min {}, max {})",
                self.reconnect_min_ms, self.reconnect_max_ms
            )));
        }
        if self.keepalive_ms == 0 || self.poll_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "keepalive_ms, poll_timeout_ms and connect_timeout_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Largest body a client may send
    pub fn max_body(&self) -> usize {
        self.sendq.size - HEADER_LEN
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Name of the shared-memory segment holding send queue `idx`
    pub fn sendq_name(&self, idx: usize) -> String {
        format!("{}-sendq-{}", self.name, idx)
    }
}
