//! Kernel DRM device backend.
//!
//! Talks to the Exynos DRM driver through ioctls on the device node and maps
//! GEM objects with `mmap` on the same descriptor.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use bytemuck::Pod;
use parking_lot::Mutex;

use crate::error::{DriverError, Result};

use super::protocol::{
    self, G3dRequest, G3dStatus, G3dSubmit, GemClose, GemCreate, GemMapOffset, PrimeHandle,
};
use super::{
    DeviceBackend, MappedRegion, ObjectHandle, PipelineStages, SharedHandle, SubmitKind,
    SubmitRequest,
};

/// Open kernel device channel.
pub struct DrmBackend {
    fd: OwnedFd,
    path: PathBuf,
    /// Shareable descriptors exported through this channel and not yet released.
    exported: Mutex<HashSet<RawFd>>,
}

impl DrmBackend {
    /// Open the device node read/write with synchronous I/O.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|source| {
                log::error!("Couldn't open {} ({})", path.display(), source);
                DriverError::DeviceUnavailable {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        let fd = OwnedFd::from(file);

        log::debug!("Opened {} ({})", path.display(), fd.as_raw_fd());

        Ok(Self {
            fd,
            path: path.to_path_buf(),
            exported: Mutex::new(HashSet::new()),
        })
    }

    /// Path of the device node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ioctl<T: Pod>(&self, request: u32, arg: &mut T) -> io::Result<()> {
        loop {
            // SAFETY: arg is a live, correctly sized #[repr(C)] struct for this request
            let ret =
                unsafe { libc::ioctl(self.fd.as_raw_fd(), request as _, arg as *mut T) };
            if ret != -1 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn close_shared(fd: RawFd) {
        // SAFETY: fd was returned by PRIME export and is owned by this backend
        drop(unsafe { OwnedFd::from_raw_fd(fd) });
    }
}

/// Payload length as carried in a [`G3dRequest`].
fn request_length(kind: SubmitKind, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        DriverError::SubmissionFailed(format!(
            "{kind:?} request of {len} bytes exceeds the request length field"
        ))
    })
}

impl DeviceBackend for DrmBackend {
    fn name(&self) -> &'static str {
        "DRM"
    }

    fn submit(&self, request: &SubmitRequest<'_>) -> Result<()> {
        let payload = request.bytes();
        let length = request_length(request.kind(), payload.len())?;
        let mut req = G3dRequest {
            kind: request.kind().code(),
            length,
            data: payload.as_ptr() as u64,
        };
        let mut submit = G3dSubmit {
            requests: &mut req as *mut G3dRequest as u64,
            nr_requests: 1,
            reserved: 0,
        };

        self.ioctl(protocol::DRM_IOCTL_EXYNOS_G3D_SUBMIT, &mut submit)
            .map_err(|e| {
                DriverError::SubmissionFailed(format!("{:?} request: {}", request.kind(), e))
            })
    }

    fn pipeline_status(&self) -> Result<PipelineStages> {
        let mut status = G3dStatus::default();
        self.ioctl(protocol::DRM_IOCTL_EXYNOS_G3D_STATUS, &mut status)?;
        Ok(PipelineStages::from_bits_truncate(status.busy))
    }

    fn create_object(&self, size: u64) -> Result<ObjectHandle> {
        let mut create = GemCreate {
            size,
            ..Default::default()
        };
        self.ioctl(protocol::DRM_IOCTL_EXYNOS_GEM_CREATE, &mut create)
            .map_err(|e| DriverError::AllocationFailed(format!("GEM create ({size} bytes): {e}")))?;

        log::trace!("DrmBackend: created gem:{} ({} bytes)", create.handle, size);
        Ok(ObjectHandle(create.handle))
    }

    fn export_object(&self, handle: ObjectHandle) -> Result<SharedHandle> {
        let mut prime = PrimeHandle {
            handle: handle.0,
            flags: protocol::PRIME_EXPORT_FLAGS,
            fd: -1,
        };
        self.ioctl(protocol::DRM_IOCTL_PRIME_HANDLE_TO_FD, &mut prime)
            .map_err(|e| DriverError::AllocationFailed(format!("PRIME export of {handle}: {e}")))?;

        self.exported.lock().insert(prime.fd);
        Ok(SharedHandle(prime.fd))
    }

    fn import_object(&self, shared: SharedHandle) -> Result<ObjectHandle> {
        let mut prime = PrimeHandle {
            handle: 0,
            flags: 0,
            fd: shared.0,
        };
        self.ioctl(protocol::DRM_IOCTL_PRIME_FD_TO_HANDLE, &mut prime)
            .map_err(|e| DriverError::AllocationFailed(format!("PRIME import of {shared}: {e}")))?;

        Ok(ObjectHandle(prime.handle))
    }

    fn map_object(&self, handle: ObjectHandle, offset: u64, size: u64) -> Result<MappedRegion> {
        if size == 0 {
            return Err(DriverError::InvalidParameter("empty mapping".to_string()));
        }
        let mapped_len = offset
            .checked_add(size)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or_else(|| DriverError::InvalidParameter(format!("mapping of {size} bytes")))?;

        let mut map = GemMapOffset {
            handle: handle.0,
            ..Default::default()
        };
        self.ioctl(protocol::DRM_IOCTL_EXYNOS_GEM_MAP, &mut map)
            .map_err(|e| DriverError::AllocationFailed(format!("map offset of {handle}: {e}")))?;

        // SAFETY: mapping a kernel-provided fake offset of the DRM descriptor;
        // the result is checked against MAP_FAILED
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapped_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd.as_raw_fd(),
                map.offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(DriverError::AllocationFailed(format!(
                "mmap of {handle} ({mapped_len} bytes): {}",
                io::Error::last_os_error()
            )));
        }
        let base = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| DriverError::AllocationFailed("mmap returned null".to_string()))?;

        Ok(MappedRegion::Mmap {
            base,
            mapped_len,
            offset: offset as usize,
        })
    }

    fn destroy_object(&self, handle: ObjectHandle) {
        let mut close = GemClose {
            handle: handle.0,
            pad: 0,
        };
        if let Err(e) = self.ioctl(protocol::DRM_IOCTL_GEM_CLOSE, &mut close) {
            log::error!("GEM close of {} failed: {}", handle, e);
        }
    }

    fn release_shared(&self, shared: SharedHandle) {
        if self.exported.lock().remove(&shared.0) {
            Self::close_shared(shared.0);
        } else {
            log::warn!("DrmBackend: {} was not exported here, ignoring release", shared);
        }
    }
}

impl Drop for DrmBackend {
    fn drop(&mut self) {
        let leftovers: Vec<RawFd> = self.exported.get_mut().drain().collect();
        for fd in leftovers {
            log::debug!("DrmBackend: releasing prime:{} with the channel", fd);
            Self::close_shared(fd);
        }
        log::debug!("Closed {} ({})", self.path.display(), self.fd.as_raw_fd());
    }
}

impl std::fmt::Debug for DrmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrmBackend")
            .field("path", &self.path)
            .field("fd", &self.fd.as_raw_fd())
            .finish_non_exhaustive()
    }
}
