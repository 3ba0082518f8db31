//! GPU memory objects backing render targets.
//!
//! A [`SurfaceBuffer`] is either *local* (allocated by this driver and
//! exported as a shareable handle) or *external* (allocated elsewhere and
//! handed over as a shareable handle). Binding a buffer to a
//! [`HardwareContext`] imports it into that context's device channel and maps
//! it into process memory; unbinding undoes both.
//!
//! Ownership is exclusive: a buffer is bound to at most one context at a time,
//! and every handle is released exactly once. Dropping a buffer unbinds it
//! before releasing its local shareable handle.

mod render;
mod window;

use std::fmt;
use std::sync::{Arc, Weak};

use bitflags::bitflags;

use crate::backend::{DeviceBackend, MappedRegion, ObjectHandle, SharedHandle};
use crate::context::{ContextId, HardwareContext};
use crate::error::{DriverError, Result};

pub use render::{DisplayId, RenderSurface, SurfaceKind, SwapBehavior};
pub use window::{create_window_surface, NativeWindow};
#[cfg(all(unix, feature = "drm-backend"))]
pub use window::{FbBitfield, FbVarScreeninfo, FramebufferWindow};

bitflags! {
    /// Intended CPU access while a buffer is locked.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LockUsage: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// A shareable handle exported by this driver, released when dropped.
struct Export {
    shared: SharedHandle,
    exporter: Weak<dyn DeviceBackend>,
}

impl Export {
    /// Create an object of `size` bytes and export it. The creator handle is
    /// released once exported; the shareable handle keeps the object alive.
    fn allocate(backend: &Arc<dyn DeviceBackend>, size: u64) -> Result<Self> {
        let handle = backend.create_object(size).map_err(allocation_error)?;
        let shared = match backend.export_object(handle) {
            Ok(shared) => shared,
            Err(e) => {
                backend.destroy_object(handle);
                return Err(allocation_error(e));
            }
        };
        backend.destroy_object(handle);

        log::trace!("Allocated {} ({} bytes) on {}", shared, size, backend.name());
        Ok(Self {
            shared,
            exporter: Arc::downgrade(backend),
        })
    }

    /// Whether the handle is still open. It is released together with the
    /// channel that exported it.
    fn is_live(&self) -> bool {
        self.exporter.strong_count() > 0
    }
}

impl Drop for Export {
    fn drop(&mut self) {
        match self.exporter.upgrade() {
            Some(backend) => backend.release_shared(self.shared),
            None => log::trace!("{} already released with its channel", self.shared),
        }
    }
}

/// Residency of a context: import handle and CPU mapping.
struct Binding {
    context: ContextId,
    device: Weak<dyn DeviceBackend>,
    handle: ObjectHandle,
    mapping: Option<MappedRegion>,
}

impl Binding {
    /// Import `shared` into the context's channel and map `size` bytes at
    /// `offset`. A failed mapping destroys the import handle.
    fn attach(
        ctx: &HardwareContext,
        shared: SharedHandle,
        offset: u64,
        size: u64,
    ) -> Result<Self> {
        let backend = ctx.device().backend()?;
        let handle = backend.import_object(shared).map_err(allocation_error)?;
        let mapping = match backend.map_object(handle, offset, size) {
            Ok(mapping) => mapping,
            Err(e) => {
                backend.destroy_object(handle);
                return Err(allocation_error(e));
            }
        };

        log::trace!("Bound {} as {} to {}", shared, handle, ctx.id());
        Ok(Self {
            context: ctx.id(),
            device: Arc::downgrade(backend),
            handle,
            mapping: Some(mapping),
        })
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        drop(self.mapping.take());
        match self.device.upgrade() {
            Some(backend) => backend.destroy_object(self.handle),
            // The kernel released it when the channel closed
            None => log::trace!("{} of {} outlived its channel", self.handle, self.context),
        }
    }
}

enum Residency {
    Unbacked,
    Backed(Export),
    Bound(Export, Binding),
}

enum Storage {
    Local(Residency),
    External {
        shared: SharedHandle,
        offset: u64,
        binding: Option<Binding>,
    },
}

/// GPU memory object backing a render target or depth buffer.
pub struct SurfaceBuffer {
    size: u64,
    storage: Storage,
    lock_depth: u32,
}

fn allocation_error(err: DriverError) -> DriverError {
    match err {
        DriverError::AllocationFailed(_) | DriverError::DeviceClosed => err,
        other => DriverError::AllocationFailed(other.to_string()),
    }
}

impl SurfaceBuffer {
    /// A local buffer of `size` bytes. Nothing is allocated until the first bind.
    pub fn local(size: u64) -> Self {
        Self {
            size,
            storage: Storage::Local(Residency::Unbacked),
            lock_depth: 0,
        }
    }

    /// A buffer over `size` bytes at `offset` of an externally allocated
    /// object. The handle stays owned by the caller.
    pub fn external(shared: SharedHandle, offset: u64, size: u64) -> Self {
        Self {
            size,
            storage: Storage::External {
                shared,
                offset,
                binding: None,
            },
            lock_depth: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_local(&self) -> bool {
        matches!(self.storage, Storage::Local(_))
    }

    /// Shareable handle, once one exists.
    pub fn shared_handle(&self) -> Option<SharedHandle> {
        match &self.storage {
            Storage::Local(Residency::Backed(export) | Residency::Bound(export, _))
                if export.is_live() =>
            {
                Some(export.shared)
            }
            Storage::Local(_) => None,
            Storage::External { shared, .. } => Some(*shared),
        }
    }

    /// Nonzero size and a shareable handle.
    pub fn is_valid(&self) -> bool {
        self.size > 0 && self.shared_handle().is_some()
    }

    fn binding(&self) -> Option<&Binding> {
        match &self.storage {
            Storage::Local(Residency::Bound(_, binding)) => Some(binding),
            Storage::External { binding, .. } => binding.as_ref(),
            _ => None,
        }
    }

    fn binding_mut(&mut self) -> Option<&mut Binding> {
        match &mut self.storage {
            Storage::Local(Residency::Bound(_, binding)) => Some(binding),
            Storage::External { binding, .. } => binding.as_mut(),
            _ => None,
        }
    }

    /// Context the buffer is bound to.
    pub fn owner(&self) -> Option<ContextId> {
        self.binding().map(|b| b.context)
    }

    pub fn is_bound(&self) -> bool {
        self.binding().is_some()
    }

    /// Context-local handle while bound.
    pub fn object_handle(&self) -> Option<ObjectHandle> {
        self.binding().map(|b| b.handle)
    }

    /// Mapped contents while bound.
    pub fn mapped(&self) -> Result<&[u8]> {
        self.binding()
            .and_then(|b| b.mapping.as_ref())
            .map(MappedRegion::as_slice)
            .ok_or(DriverError::NotBound)
    }

    pub fn mapped_mut(&mut self) -> Result<&mut [u8]> {
        self.binding_mut()
            .and_then(|b| b.mapping.as_mut())
            .map(MappedRegion::as_mut_slice)
            .ok_or(DriverError::NotBound)
    }

    /// Make the buffer resident in `ctx` and map it.
    ///
    /// A local buffer without storage allocates and exports it first. Fails
    /// with `AlreadyBound` before touching the device if the buffer is bound
    /// to any context.
    pub fn bind_context(&mut self, ctx: &HardwareContext) -> Result<()> {
        if let Some(owner) = self.owner() {
            return Err(DriverError::AlreadyBound(owner.get()));
        }
        let size = self.size;

        match &mut self.storage {
            Storage::Local(residency) => {
                let backend = ctx.device().backend()?;
                let export = match std::mem::replace(residency, Residency::Unbacked) {
                    Residency::Backed(export) if export.is_live() => export,
                    Residency::Backed(stale) => {
                        log::debug!("{} was released with its channel, reallocating", stale.shared);
                        Export::allocate(backend, size)?
                    }
                    Residency::Unbacked => Export::allocate(backend, size)?,
                    Residency::Bound(export, binding) => {
                        let owner = binding.context;
                        *residency = Residency::Bound(export, binding);
                        return Err(DriverError::AlreadyBound(owner.get()));
                    }
                };
                match Binding::attach(ctx, export.shared, 0, size) {
                    Ok(binding) => {
                        *residency = Residency::Bound(export, binding);
                        Ok(())
                    }
                    Err(e) => {
                        *residency = Residency::Backed(export);
                        Err(e)
                    }
                }
            }
            Storage::External {
                shared,
                offset,
                binding,
            } => {
                *binding = Some(Binding::attach(ctx, *shared, *offset, size)?);
                Ok(())
            }
        }
    }

    /// Unmap the buffer and release its context-local handle. Does nothing
    /// when unbound.
    pub fn unbind_context(&mut self) {
        let binding = match &mut self.storage {
            Storage::Local(residency) => match std::mem::replace(residency, Residency::Unbacked) {
                Residency::Bound(export, binding) => {
                    *residency = Residency::Backed(export);
                    Some(binding)
                }
                other => {
                    *residency = other;
                    None
                }
            },
            Storage::External { binding, .. } => binding.take(),
        };
        if let Some(binding) = binding {
            log::trace!("Unbinding {} from {}", binding.handle, binding.context);
            drop(binding);
        }
    }

    /// Begin CPU access to the mapped contents.
    pub fn lock(&mut self, usage: LockUsage) -> Result<()> {
        self.lock_depth += 1;
        log::trace!("Locked surface buffer for {:?} (depth {})", usage, self.lock_depth);
        Ok(())
    }

    /// End CPU access started by [`lock`](Self::lock).
    pub fn unlock(&mut self) -> Result<()> {
        if self.lock_depth == 0 {
            return Err(DriverError::NotLocked);
        }
        self.lock_depth -= 1;
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.lock_depth > 0
    }

    /// Make CPU writes visible to the GPU.
    pub fn flush(&mut self) {}
}

impl Drop for SurfaceBuffer {
    fn drop(&mut self) {
        // Unmap and drop the import handle before the shareable handle goes
        self.unbind_context();
    }
}

impl fmt::Debug for SurfaceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceBuffer")
            .field("local", &self.is_local())
            .field("size", &self.size)
            .field("shared", &self.shared_handle())
            .field("owner", &self.owner())
            .field("handle", &self.object_handle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, DummyFault};
    use crate::params::ContextParameters;

    fn context() -> (Arc<DummyBackend>, HardwareContext) {
        let backend = Arc::new(DummyBackend::new());
        let ctx = HardwareContext::with_backend(&ContextParameters::new(), backend.clone()).unwrap();
        (backend, ctx)
    }

    #[test]
    fn test_local_starts_unbacked() {
        let buffer = SurfaceBuffer::local(4096);
        assert!(!buffer.is_valid());
        assert!(!buffer.is_bound());
        assert!(matches!(buffer.mapped(), Err(DriverError::NotBound)));
    }

    #[test]
    fn test_bind_releases_creator_handle() {
        let (backend, ctx) = context();
        let mut buffer = SurfaceBuffer::local(4096);
        buffer.bind_context(&ctx).unwrap();

        // One import handle, one shareable handle
        assert_eq!(backend.live_handles(), 1);
        assert_eq!(backend.live_shared_handles(), 1);
        assert_eq!(buffer.mapped().unwrap().len(), 4096);
        assert_eq!(buffer.owner(), Some(ctx.id()));
    }

    #[test]
    fn test_export_failure_destroys_created_object() {
        let (backend, ctx) = context();
        backend.inject_fault(DummyFault::Export, 1);
        let mut buffer = SurfaceBuffer::local(4096);

        assert!(matches!(
            buffer.bind_context(&ctx),
            Err(DriverError::AllocationFailed(_))
        ));
        assert_eq!(backend.live_objects(), 0);
        assert!(!buffer.is_valid());
    }

    #[test]
    fn test_map_failure_unwinds_import() {
        let (backend, ctx) = context();
        backend.inject_fault(DummyFault::Map, 1);
        let mut buffer = SurfaceBuffer::local(4096);

        assert!(buffer.bind_context(&ctx).is_err());
        assert_eq!(backend.live_handles(), 0);
        // Storage survives for the next attempt
        assert!(buffer.is_valid());
        assert!(!buffer.is_bound());

        buffer.bind_context(&ctx).unwrap();
        assert!(buffer.is_bound());
    }

    #[test]
    fn test_drop_releases_everything() {
        let (backend, ctx) = context();
        let mut buffer = SurfaceBuffer::local(4096);
        buffer.bind_context(&ctx).unwrap();
        drop(buffer);

        assert_eq!(backend.live_handles(), 0);
        assert_eq!(backend.live_shared_handles(), 0);
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn test_storage_dies_with_exporting_context() {
        let (backend, ctx) = context();
        let mut buffer = SurfaceBuffer::local(64);
        buffer.bind_context(&ctx).unwrap();
        buffer.unbind_context();
        drop(ctx);
        drop(backend);
        assert!(!buffer.is_valid());

        let (_, other) = context();
        buffer.bind_context(&other).unwrap();
        assert!(buffer.is_valid());
    }

    #[test]
    fn test_external_never_releases_shared() {
        let (backend, ctx) = context();
        let shared = backend.adopt_external(8192);
        let mut buffer = SurfaceBuffer::external(shared, 4096, 4096);
        assert!(buffer.is_valid());

        buffer.bind_context(&ctx).unwrap();
        assert_eq!(buffer.mapped().unwrap().len(), 4096);
        drop(buffer);

        assert_eq!(backend.live_handles(), 0);
        assert_eq!(backend.live_shared_handles(), 1);
    }

    #[test]
    fn test_lock_nesting() {
        let mut buffer = SurfaceBuffer::local(16);
        buffer.lock(LockUsage::READ | LockUsage::WRITE).unwrap();
        buffer.lock(LockUsage::READ).unwrap();
        buffer.flush();
        buffer.unlock().unwrap();
        assert!(buffer.is_locked());
        buffer.unlock().unwrap();
        assert!(matches!(buffer.unlock(), Err(DriverError::NotLocked)));
    }
}
