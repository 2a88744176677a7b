// Memory backends for slab regions on Linux.
// Named regions live in /dev/shm so other processes can attach by name;
// anonymous regions never leave the process.

use std::fmt::Debug;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, IntoRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::ptr::{self, NonNull};
use std::sync::Arc;

/// Alignment every region base is checked against.
pub const REGION_ALIGN: usize = 128;

/// Memory backend trait shared by named and anonymous regions
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Get a pointer to the mapped memory region
    fn as_ptr(&self) -> *mut u8;

    /// Get the size of the mapped region in bytes
    fn size(&self) -> usize;

    /// Get the underlying handle
    fn raw_handle(&self) -> RawHandle;
}

/// Platform-specific handle type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawHandle {
    /// Unix file descriptor backing a named region
    Fd(i32),
    /// Private anonymous mapping
    Anonymous,
}

/// Create a named shared memory region with the specified size
///
/// # Arguments
/// * `size` - Size of the region in bytes
/// * `name` - Name of the region under /dev/shm
///
/// # Returns
/// A shared trait object implementing SharedMemoryBackend
pub fn create_shared_memory(size: usize, name: &str) -> io::Result<Arc<dyn SharedMemoryBackend>> {
    Ok(Arc::new(LinuxSharedMemory::create(size, name)?))
}

/// Attach to an existing named region; the size is taken from the segment itself
pub fn attach_shared_memory(name: &str) -> io::Result<Arc<dyn SharedMemoryBackend>> {
    Ok(Arc::new(LinuxSharedMemory::attach(name)?))
}

/// Map an anonymous region private to this process
pub fn create_heap_memory(size: usize) -> io::Result<Arc<dyn SharedMemoryBackend>> {
    Ok(Arc::new(HeapMemory::new(size)?))
}

/// Remove a named region. Existing mappings stay valid until dropped.
pub fn unlink_shared_memory(name: &str) -> io::Result<()> {
    match std::fs::remove_file(shm_path(name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn shm_path(name: &str) -> String {
    format!("/dev/shm/{}", name)
}

// Map `size` bytes of `fd` (or anonymous memory when fd is -1)
unsafe fn map_region(size: usize, fd: i32) -> io::Result<NonNull<u8>> {
    let flags = if fd < 0 {
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS
    } else {
        libc::MAP_SHARED
    };
    let ptr = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        flags,
        fd,
        0,
    );
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    if (ptr as usize) % REGION_ALIGN != 0 {
        libc::munmap(ptr, size);
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Mapped region not properly aligned",
        ));
    }
    NonNull::new(ptr as *mut u8)
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned a null mapping"))
}

/// Region backed by a file in /dev/shm
#[derive(Debug)]
pub struct LinuxSharedMemory {
    ptr: NonNull<u8>,
    size: usize,
    fd: i32,
    name: String,
}

unsafe impl Send for LinuxSharedMemory {}
unsafe impl Sync for LinuxSharedMemory {}

impl LinuxSharedMemory {
    /// Create (or truncate) /dev/shm/<name> and map it
    pub fn create(size: usize, name: &str) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "LinuxSharedMemory::create(): size must be non-zero",
            ));
        }
        let path = shm_path(name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("Failed to create shared memory file at {}: {}", path, e),
                )
            })?;

        // Set size
        if unsafe { libc::ftruncate(file.as_raw_fd(), size as libc::off_t) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let fd = file.into_raw_fd();
        let ptr = match unsafe { map_region(size, fd) } {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        Ok(Self {
            ptr,
            size,
            fd,
            name: name.to_string(),
        })
    }

    /// Map an existing /dev/shm/<name> at its current size
    pub fn attach(name: &str) -> io::Result<Self> {
        let path = shm_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("Failed to open shared memory at {}: {}", path, e),
                )
            })?;

        let size = file.metadata()?.len() as usize;
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Shared memory at {} is empty", path),
            ));
        }

        let fd = file.into_raw_fd();
        let ptr = match unsafe { map_region(size, fd) } {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        Ok(Self {
            ptr,
            size,
            fd,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LinuxSharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
            libc::close(self.fd);
        }
    }
}

impl SharedMemoryBackend for LinuxSharedMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Fd(self.fd)
    }
}

/// Anonymous private mapping, zero-filled by the kernel
#[derive(Debug)]
pub struct HeapMemory {
    ptr: NonNull<u8>,
    size: usize,
}

unsafe impl Send for HeapMemory {}
unsafe impl Sync for HeapMemory {}

impl HeapMemory {
    pub fn new(size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "HeapMemory::new(): size must be non-zero",
            ));
        }
        let ptr = unsafe { map_region(size, -1)? };
        Ok(Self { ptr, size })
    }
}

impl Drop for HeapMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

impl SharedMemoryBackend for HeapMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Anonymous
    }
}
