use crate::Queue::QueueError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Header rejected by validation or decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad checksum {found:#010x}")]
    BadChecksum { found: u32 },
    #[error("message type {msg_type} out of range (max {max})")]
    TypeOutOfRange { msg_type: u32, max: u32 },
    #[error("body of {len} bytes exceeds limit of {max}")]
    BodyTooLarge { len: u32, max: u32 },
    #[error("unknown frame flag {0}")]
    BadFlag(u8),
    #[error("need {needed} bytes, got {len}")]
    Truncated { len: usize, needed: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("message type {msg_type} out of range (max {max})")]
    OutOfRange { msg_type: u32, max: u32 },
    #[error("message type {0} is already registered")]
    AlreadyRegistered(u32),
}

/// Errors reported to `Client::send` callers.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("message of {size} bytes exceeds slot capacity of {max}")]
    TooLarge { size: usize, max: usize },
    #[error("message type {0} out of range")]
    BadType(u32),
    #[error("send queue allocation failed")]
    QueueAllocFailed,
    #[error("send queue is full")]
    QueueFull,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("transport already started")]
    AlreadyStarted,
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Failure that ends a reactor thread and, with it, the process.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("{thread}: poll failed: {source}")]
    Fatal {
        thread: String,
        #[source]
        source: io::Error,
    },
}

impl ReactorError {
    pub fn fatal(thread: &str, source: io::Error) -> Self {
        ReactorError::Fatal {
            thread: thread.to_string(),
            source,
        }
    }
}
