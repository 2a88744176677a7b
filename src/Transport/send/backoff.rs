use std::time::{Duration, Instant};

/// Capped exponential reconnect delay: `min, 2*min, 4*min, ... max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self { min, max, next: min }
    }

    /// Delay before the next attempt; doubles the one after it
    pub fn next_delay(&mut self) -> Duration {
        let cur = self.next;
        self.next = (cur * 2).min(self.max);
        cur
    }

    /// Delay the next call to `next_delay` will return
    pub fn peek(&self) -> Duration {
        self.next
    }

    /// Back to `min` after a successful connect
    pub fn reset(&mut self) {
        self.next = self.min;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveStatus {
    Unknown,
    Sent,
    Acked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Link active recently enough
    None,
    /// Queue a keepalive request
    SendRequest,
    /// Last request was never answered
    Dead,
}

/// Keepalive bookkeeping of one outbound link.
#[derive(Debug, Clone)]
pub struct LinkMonitor {
    interval: Duration,
    status: KeepaliveStatus,
}

impl LinkMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            status: KeepaliveStatus::Unknown,
        }
    }

    pub fn status(&self) -> KeepaliveStatus {
        self.status
    }

    /// Decide what an idle tick means for a link last written at `last_write`
    pub fn on_tick(&mut self, now: Instant, last_write: Instant) -> LinkAction {
        if now.saturating_duration_since(last_write) < self.interval {
            return LinkAction::None;
        }
        match self.status {
            KeepaliveStatus::Sent => LinkAction::Dead,
            KeepaliveStatus::Unknown | KeepaliveStatus::Acked => {
                self.status = KeepaliveStatus::Sent;
                LinkAction::SendRequest
            }
        }
    }

    /// A `KeepaliveReply` arrived
    pub fn on_reply(&mut self) {
        self.status = KeepaliveStatus::Acked;
    }

    /// Fresh connection
    pub fn reset(&mut self) {
        self.status = KeepaliveStatus::Unknown;
    }
}
