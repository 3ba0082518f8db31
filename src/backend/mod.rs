//! Device channel abstraction.
//!
//! Everything the driver asks of the kernel goes through the [`DeviceBackend`]
//! trait: register-state submission, pipeline status queries and the GEM
//! object lifecycle (create, export, import, map, destroy).
//!
//! # Available Backends
//!
//! - `drm-backend` (default): the kernel device node, driven through ioctl/mmap
//! - `dummy`: in-process device that records every request, used for testing
//!   and for running without hardware
//!
//! # Handle ownership
//!
//! Object handles ([`ObjectHandle`]) are local to one open channel and are
//! released either explicitly with [`DeviceBackend::destroy_object`] or by the
//! kernel when the channel closes. Shareable handles ([`SharedHandle`]) are
//! tracked by the backend that exported them: they are released exactly once,
//! either by [`DeviceBackend::release_shared`] or when the backend itself is
//! dropped.

#[cfg(all(unix, feature = "drm-backend"))]
pub mod drm;

pub mod dummy;
pub mod protocol;

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::Result;
use crate::params::ContextParameters;

pub use dummy::{DummyBackend, DummyFault, SubmitRecord};

/// Handle of a GPU memory object, valid on one device channel only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u32);

/// Shareable handle of a GPU memory object, importable into any channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedHandle(pub i32);

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gem:{}", self.0)
    }
}

impl fmt::Display for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prime:{}", self.0)
    }
}

bitflags! {
    /// Pipeline stages, as reported by the pipeline status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const HOST_FIFO = 1 << 0;
        const HOST_INTERFACE = 1 << 1;
        const VERTEX_CACHE = 1 << 3;
        const VERTEX_SHADER = 1 << 8;
        const PRIMITIVE_ENGINE = 1 << 9;
        const TRIANGLE_SETUP = 1 << 10;
        const RASTER_ENGINE = 1 << 12;
        const PIXEL_SHADER = 1 << 16;
        const PER_FRAGMENT = 1 << 19;
        const COLOR_CACHE = 1 << 20;
        const ALL = Self::HOST_FIFO.bits()
            | Self::HOST_INTERFACE.bits()
            | Self::VERTEX_CACHE.bits()
            | Self::VERTEX_SHADER.bits()
            | Self::PRIMITIVE_ENGINE.bits()
            | Self::TRIANGLE_SETUP.bits()
            | Self::RASTER_ENGINE.bits()
            | Self::PIXEL_SHADER.bits()
            | Self::PER_FRAGMENT.bits()
            | Self::COLOR_CACHE.bits();
    }
}

/// Kind of a register-state submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitKind {
    /// Whole hardware state snapshot.
    StateInit,
    /// Buffered `(address, value)` pairs.
    StateBuffer,
}

impl SubmitKind {
    /// Request type code on the wire.
    pub fn code(self) -> u32 {
        match self {
            Self::StateInit => protocol::REQUEST_STATE_INIT,
            Self::StateBuffer => protocol::REQUEST_STATE_BUFFER,
        }
    }
}

/// A single submission request and its payload.
#[derive(Debug, Clone, Copy)]
pub enum SubmitRequest<'a> {
    /// Full state snapshot, sent verbatim.
    StateInit(&'a [u8]),
    /// Register pairs, two words each.
    StateBuffer(&'a [u32]),
}

impl SubmitRequest<'_> {
    pub fn kind(&self) -> SubmitKind {
        match self {
            Self::StateInit(_) => SubmitKind::StateInit,
            Self::StateBuffer(_) => SubmitKind::StateBuffer,
        }
    }

    /// Payload bytes.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::StateInit(bytes) => bytes,
            Self::StateBuffer(words) => bytemuck::cast_slice(words),
        }
    }

    /// Payload length in bytes.
    pub fn byte_len(&self) -> usize {
        self.bytes().len()
    }
}

/// CPU mapping of a GPU memory object.
///
/// The mapping is released when the region is dropped, independently of the
/// channel that produced it.
pub enum MappedRegion {
    /// Memory mapped from the kernel device.
    #[cfg(all(unix, feature = "drm-backend"))]
    Mmap {
        base: NonNull<u8>,
        mapped_len: usize,
        offset: usize,
    },
    /// Memory owned by the process (dummy backend).
    Host(Box<[u8]>),
}

impl MappedRegion {
    /// Length of the visible region in bytes.
    pub fn len(&self) -> usize {
        match self {
            #[cfg(all(unix, feature = "drm-backend"))]
            Self::Mmap {
                mapped_len, offset, ..
            } => mapped_len - offset,
            Self::Host(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start of the visible region.
    pub fn as_ptr(&self) -> NonNull<u8> {
        match self {
            #[cfg(all(unix, feature = "drm-backend"))]
            // SAFETY: offset < mapped_len, checked when the mapping was created
            Self::Mmap { base, offset, .. } => unsafe {
                NonNull::new_unchecked(base.as_ptr().add(*offset))
            },
            Self::Host(bytes) => NonNull::from(&bytes[..]).cast(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            #[cfg(all(unix, feature = "drm-backend"))]
            // SAFETY: the mapping stays valid until self is dropped
            Self::Mmap { .. } => unsafe {
                std::slice::from_raw_parts(self.as_ptr().as_ptr(), self.len())
            },
            Self::Host(bytes) => bytes,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            #[cfg(all(unix, feature = "drm-backend"))]
            // SAFETY: the mapping stays valid until self is dropped and is
            // only reachable through this region
            Self::Mmap { .. } => unsafe {
                std::slice::from_raw_parts_mut(self.as_ptr().as_ptr(), self.len())
            },
            Self::Host(bytes) => bytes,
        }
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(all(unix, feature = "drm-backend"))]
            Self::Mmap {
                base,
                mapped_len,
                offset,
            } => f
                .debug_struct("MappedRegion::Mmap")
                .field("base", base)
                .field("mapped_len", mapped_len)
                .field("offset", offset)
                .finish(),
            Self::Host(bytes) => f
                .debug_struct("MappedRegion::Host")
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

#[cfg(all(unix, feature = "drm-backend"))]
impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Self::Mmap {
            base, mapped_len, ..
        } = self
        {
            // SAFETY: base/mapped_len come from a successful mmap
            let ret = unsafe { libc::munmap(base.as_ptr().cast(), *mapped_len) };
            if ret != 0 {
                log::error!(
                    "munmap of {} bytes failed: {}",
                    mapped_len,
                    std::io::Error::last_os_error()
                );
            }
        }
    }
}

/// Device channel trait, implemented by each backend.
pub trait DeviceBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Issue one register-state submission. Blocks until the device accepted
    /// or rejected it.
    fn submit(&self, request: &SubmitRequest<'_>) -> Result<()>;

    /// Stages that still have outstanding work.
    fn pipeline_status(&self) -> Result<PipelineStages>;

    /// Create a GPU memory object of `size` bytes.
    fn create_object(&self, size: u64) -> Result<ObjectHandle>;

    /// Export an object as a shareable handle.
    fn export_object(&self, handle: ObjectHandle) -> Result<SharedHandle>;

    /// Import a shareable handle into this channel.
    fn import_object(&self, shared: SharedHandle) -> Result<ObjectHandle>;

    /// Map `size` bytes of an object, starting at `offset`, into process memory.
    fn map_object(&self, handle: ObjectHandle, offset: u64, size: u64) -> Result<MappedRegion>;

    /// Release a channel-local handle. Failures are logged.
    fn destroy_object(&self, handle: ObjectHandle);

    /// Release a shareable handle exported by this backend. Releasing a
    /// handle this backend does not track is logged and ignored.
    fn release_shared(&self, shared: SharedHandle);
}

/// Backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// Kernel DRM device.
    #[default]
    Drm,
    /// In-process recording device.
    Dummy,
}

/// Opens the backend selected by the parameters.
pub fn open_backend(params: &ContextParameters) -> Result<Arc<dyn DeviceBackend>> {
    match params.backend {
        #[cfg(all(unix, feature = "drm-backend"))]
        BackendType::Drm => {
            let backend = drm::DrmBackend::open(&params.device_path)?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(all(unix, feature = "drm-backend")))]
        BackendType::Drm => Err(crate::error::DriverError::DeviceUnavailable {
            path: params.device_path.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "built without the drm-backend feature",
            ),
        }),
        BackendType::Dummy => {
            log::info!("Using dummy device backend");
            Ok(Arc::new(DummyBackend::new()))
        }
    }
}

static_assertions::assert_impl_all!(DummyBackend: Send, Sync);
