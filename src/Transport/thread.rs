use crate::Core::affinity::bind_current_thread;
use crate::Transport::config::CpuConf;
use crate::Transport::error::{ReactorError, TransportError};
use log::{debug, error, warn};
use std::thread::{self, JoinHandle};

/// Spawn a named reactor thread.
///
/// A reactor that returns `Err` has lost its event loop; the error is
/// logged and the process aborts so a supervisor can restart it.
pub(crate) fn spawn_reactor<F>(
    name: String,
    cpu: &CpuConf,
    index: usize,
    body: F,
) -> Result<JoinHandle<()>, TransportError>
where
    F: FnOnce() -> Result<(), ReactorError> + Send + 'static,
{
    let pin = cpu.enabled.then_some(cpu.start);
    let thread_name = name.clone();
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            if let Some(start) = pin {
                match bind_current_thread(start, index) {
                    Ok(cpu) => debug!("{} bound to CPU {}", thread_name, cpu),
                    Err(e) => warn!("{}: CPU affinity not applied: {}", thread_name, e),
                }
            }
            if let Err(e) = body() {
                error!("{}", e);
                std::process::abort();
            }
        })
        .map_err(|source| TransportError::Spawn { name, source })
}
