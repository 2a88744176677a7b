use super::error::RegisterError;
use super::frame::TYPE_MAX;
use log::debug;
use parking_lot::RwLock;
use std::sync::Arc;

/// Consumer of application frames of one message type.
///
/// Closures taking `(msg_type, body)` implement this directly; state the
/// handler needs is captured by the closure.
pub trait Handler: Send + Sync {
    fn handle(&self, msg_type: u32, body: &[u8]);
}

impl<F> Handler for F
where
    F: Fn(u32, &[u8]) + Send + Sync,
{
    fn handle(&self, msg_type: u32, body: &[u8]) {
        self(msg_type, body)
    }
}

/// Message type to handler table. Each slot is written at most once.
pub struct Registry {
    slots: RwLock<Vec<Option<Arc<dyn Handler>>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(vec![None; TYPE_MAX as usize]),
        }
    }

    pub fn register<H: Handler + 'static>(&self, msg_type: u32, handler: H) -> Result<(), RegisterError> {
        if msg_type >= TYPE_MAX {
            return Err(RegisterError::OutOfRange {
                msg_type,
                max: TYPE_MAX,
            });
        }
        let mut slots = self.slots.write();
        let slot = &mut slots[msg_type as usize];
        if slot.is_some() {
            return Err(RegisterError::AlreadyRegistered(msg_type));
        }
        *slot = Some(Arc::new(handler));
        debug!("Registered handler for type {}", msg_type);
        Ok(())
    }

    pub fn is_registered(&self, msg_type: u32) -> bool {
        self.slots
            .read()
            .get(msg_type as usize)
            .is_some_and(Option::is_some)
    }

    /// Run the handler for `msg_type`, or the no-op default when none is
    /// registered. Returns whether a registered handler ran.
    pub fn dispatch(&self, msg_type: u32, body: &[u8]) -> bool {
        let handler = self.slots.read().get(msg_type as usize).cloned().flatten();
        match handler {
            Some(h) => {
                h.handle(msg_type, body);
                true
            }
            None => {
                debug!(
                    "No handler for type {}, {} bytes discarded",
                    msg_type,
                    body.len()
                );
                false
            }
        }
    }
}
