use std::io;

/// Number of CPUs currently online.
pub fn online_cpus() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 {
        1
    } else {
        n as usize
    }
}

/// Pin the calling thread to CPU `(start + index) % online_cpus()`.
///
/// # Returns
/// The CPU the thread was bound to.
#[cfg(target_os = "linux")]
pub fn bind_current_thread(start: usize, index: usize) -> io::Result<usize> {
    let cpu = (start + index) % online_cpus();
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(cpu)
}

#[cfg(not(target_os = "linux"))]
pub fn bind_current_thread(_start: usize, _index: usize) -> io::Result<usize> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "CPU affinity only supported on Linux",
    ))
}
