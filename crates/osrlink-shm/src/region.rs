use std::cell::UnsafeCell;

use crate::error::{Result, ShmError};

/// A byte region shared between one producer and one consumer.
///
/// # Safety
///
/// `as_ptr()` must stay valid for reads and writes of `len()` bytes for the
/// lifetime of the value, be at least 4-byte aligned, and tolerate
/// concurrent access from other threads or processes.
pub unsafe trait SharedRegion: Send + Sync {
    fn as_ptr(&self) -> *mut u8;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Zeroed, 8-byte aligned in-process region.
///
/// Stands in for [`ShmRegion`] where both ends live in one process.
pub struct HeapRegion {
    words: Box<[UnsafeCell<u64>]>,
    len: usize,
}

// SAFETY: all access goes through raw pointers; synchronization is the
// channel protocol's job, as it is for a real shared mapping.
unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl HeapRegion {
    pub fn new(len: usize) -> Self {
        let words = (0..len.div_ceil(8)).map(|_| UnsafeCell::new(0)).collect();
        Self { words, len }
    }
}

unsafe impl SharedRegion for HeapRegion {
    fn as_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.words.as_ptr()).cast::<u8>()
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(unix)]
pub use posix::ShmRegion;

#[cfg(unix)]
mod posix {
    use std::ffi::CString;
    use std::io;
    use std::ptr;

    use super::SharedRegion;
    use crate::error::{Result, ShmError};

    const SHM_MODE: libc::mode_t = 0o600;

    /// A named POSIX shared memory mapping.
    ///
    /// The host creates the region and owns its name: dropping the owner
    /// unmaps and unlinks it. The remote opens the same name and only unmaps.
    #[derive(Debug)]
    pub struct ShmRegion {
        ptr: *mut u8,
        len: usize,
        name: String,
        owner: bool,
    }

    // SAFETY: the mapping is process-shared; the channel protocol orders access.
    unsafe impl Send for ShmRegion {}
    unsafe impl Sync for ShmRegion {}

    impl ShmRegion {
        /// Create a new region of exactly `len` bytes.
        ///
        /// A stale object left under `name` by a crashed owner is unlinked
        /// first; the caller owns the name.
        pub fn create(name: &str, len: usize) -> Result<Self> {
            let c_name = c_name(name)?;
            let create_err = |source| ShmError::Create {
                name: name.to_string(),
                source,
            };

            // SAFETY: valid NUL-terminated name.
            if unsafe { libc::shm_unlink(c_name.as_ptr()) } == 0 {
                tracing::warn!(name, "removed stale shared memory region");
            }

            // SAFETY: valid NUL-terminated name; flags and mode are plain integers.
            let fd = unsafe {
                libc::shm_open(
                    c_name.as_ptr(),
                    libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                    SHM_MODE as libc::c_uint,
                )
            };
            if fd == -1 {
                return Err(create_err(io::Error::last_os_error()));
            }

            let sized = off_t(len).and_then(|size| {
                // SAFETY: fd is a freshly opened shm descriptor.
                if unsafe { libc::ftruncate(fd, size) } != 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(())
                }
            });
            let mapped = sized.and_then(|()| map(fd, len));
            // SAFETY: fd is ours; the mapping (if any) keeps the object alive.
            unsafe { libc::close(fd) };

            match mapped {
                Ok(ptr) => {
                    tracing::debug!(name, len, "created shared memory region");
                    Ok(Self {
                        ptr,
                        len,
                        name: name.to_string(),
                        owner: true,
                    })
                }
                Err(err) => {
                    // SAFETY: we created this name above and nobody else may keep it.
                    unsafe { libc::shm_unlink(c_name.as_ptr()) };
                    Err(create_err(err))
                }
            }
        }

        /// Open an existing region and map `len` bytes of it.
        ///
        /// The object must be at least `len` bytes long.
        pub fn open(name: &str, len: usize) -> Result<Self> {
            let c_name = c_name(name)?;
            let open_err = |source| ShmError::Open {
                name: name.to_string(),
                source,
            };

            // SAFETY: valid NUL-terminated name.
            let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
            if fd == -1 {
                return Err(open_err(io::Error::last_os_error()));
            }

            let size = object_size(fd);
            let mapped = match size {
                Ok(size) if size < len => Err(ShmError::RegionTooSmall { size, needed: len }),
                Ok(_) => map(fd, len).map_err(open_err),
                Err(err) => Err(open_err(err)),
            };
            // SAFETY: fd is ours.
            unsafe { libc::close(fd) };

            let ptr = mapped?;
            tracing::debug!(name, len, "opened shared memory region");
            Ok(Self {
                ptr,
                len,
                name: name.to_string(),
                owner: false,
            })
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        pub fn is_owner(&self) -> bool {
            self.owner
        }
    }

    unsafe impl SharedRegion for ShmRegion {
        fn as_ptr(&self) -> *mut u8 {
            self.ptr
        }

        fn len(&self) -> usize {
            self.len
        }
    }

    impl Drop for ShmRegion {
        fn drop(&mut self) {
            // SAFETY: ptr/len come from a successful mmap and are unmapped once.
            unsafe { libc::munmap(self.ptr.cast::<libc::c_void>(), self.len) };
            if self.owner {
                if let Ok(c_name) = CString::new(self.name.as_bytes()) {
                    // SAFETY: valid NUL-terminated name.
                    unsafe { libc::shm_unlink(c_name.as_ptr()) };
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    const MAX_NAME_LEN: usize = 31;
    #[cfg(not(target_os = "macos"))]
    const MAX_NAME_LEN: usize = 255;

    fn c_name(name: &str) -> Result<CString> {
        let valid = name.len() > 1
            && name.len() <= MAX_NAME_LEN
            && name.starts_with('/')
            && !name[1..].contains('/');
        if !valid {
            return Err(ShmError::InvalidName(name.to_string()));
        }
        CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))
    }

    fn off_t(len: usize) -> io::Result<libc::off_t> {
        libc::off_t::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "region size overflows off_t"))
    }

    fn object_size(fd: libc::c_int) -> io::Result<usize> {
        // SAFETY: zeroed stat is a valid out-parameter for fstat.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: fd is open; stat is a valid pointer.
        if unsafe { libc::fstat(fd, &mut stat) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(usize::try_from(stat.st_size).unwrap_or(0))
    }

    fn map(fd: libc::c_int, len: usize) -> io::Result<*mut u8> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty region",
            ));
        }
        // SAFETY: fd refers to an object of at least len bytes.
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(mem.cast::<u8>())
    }
}

/// Check that `region` can hold `needed` bytes.
pub(crate) fn require_len<R: SharedRegion>(region: &R, needed: usize) -> Result<()> {
    if region.len() < needed {
        return Err(ShmError::RegionTooSmall {
            size: region.len(),
            needed,
        });
    }
    Ok(())
}
