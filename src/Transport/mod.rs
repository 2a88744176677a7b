pub mod client;
pub mod command;
pub mod config;
pub mod conn;
pub mod error;
pub mod frame;
mod recv;
pub mod registry;
mod send;
pub mod stats;
mod thread;

pub use client::Client;
pub use command::{CmdPaths, Command, CommandSocket, ConfReport, CMD_LEN, WORK_ALL};
pub use config::{CpuConf, QueueConf, RecvConfig, SendConfig, ShardingKind};
pub use error::{ConfigError, FrameError, ReactorError, RegisterError, SendError, TransportError};
pub use frame::{FrameFlag, FrameHeader, LinkInfo, SystemType, HEADER_LEN, MAGIC, TYPE_MAX};
pub use recv::sharding::{BlockSharding, ModuloSharding, QueueSharding};
pub use recv::Transport;
pub use registry::{Handler, Registry};
pub use send::backoff::{Backoff, KeepaliveStatus, LinkAction, LinkMonitor};
pub use send::SendService;
pub use stats::{RecvStat, SendStat, WorkStat};
