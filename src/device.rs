//! Device channel owned by one hardware context.

use std::sync::{Arc, Weak};

use crate::backend::{self, DeviceBackend, SubmitRequest};
use crate::error::{DriverError, Result};
use crate::params::ContextParameters;

/// Handle to an open device channel.
///
/// Each context opens its own channel; handles are never shared between
/// contexts. The channel is closed exactly once, by [`close`](Self::close) or
/// when the handle is dropped.
pub struct DeviceHandle {
    backend: Option<Arc<dyn DeviceBackend>>,
}

impl DeviceHandle {
    /// Open the backend selected by `params`.
    pub fn open(params: &ContextParameters) -> Result<Self> {
        let backend = backend::open_backend(params)?;
        log::debug!("Device channel open ({})", backend.name());
        Ok(Self {
            backend: Some(backend),
        })
    }

    /// Wrap an already-open channel.
    pub fn with_backend(backend: Arc<dyn DeviceBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    /// Close the channel. Closing a closed handle does nothing.
    pub fn close(&mut self) {
        if let Some(backend) = self.backend.take() {
            log::debug!("Device channel closed ({})", backend.name());
        }
    }

    /// The open channel.
    pub fn backend(&self) -> Result<&Arc<dyn DeviceBackend>> {
        self.backend.as_ref().ok_or(DriverError::DeviceClosed)
    }

    /// Weak reference to the channel, for objects that must not keep it open.
    pub fn downgrade(&self) -> Result<Weak<dyn DeviceBackend>> {
        self.backend().map(Arc::downgrade)
    }

    /// Issue one submission.
    pub fn submit(&self, request: &SubmitRequest<'_>) -> Result<()> {
        let backend = self.backend()?;
        log::trace!(
            "Submitting {:?} ({} bytes) to {}",
            request.kind(),
            request.byte_len(),
            backend.name()
        );
        backend.submit(request)
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .finish()
    }
}
