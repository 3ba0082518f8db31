//! Hardware context.
//!
//! A [`HardwareContext`] owns everything one rendering context needs to drive
//! the 3D block: its own device channel, the register queue and the shadow
//! register state. State changes go through [`HardwareContext::write_register`]
//! (or the typed per-block setters built on top of it), which updates the
//! shadow copy and buffers the write until the next flush.
//!
//! # Example
//!
//! ```ignore
//! let params = ContextParameters::new();
//! let mut ctx = HardwareContext::create(&params)?;
//! ctx.set_scissor(Some(Rect::new(0, 0, 640, 480)))?;
//! ctx.flush_context();
//! ctx.finish()?;
//! ```

mod blocks;
#[cfg(feature = "fixed-pipeline")]
pub mod compat;
pub mod state;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytemuck::Zeroable;

use crate::backend::{DeviceBackend, PipelineStages};
use crate::device::DeviceHandle;
use crate::error::{DriverError, Result};
use crate::params::ContextParameters;
use crate::queue::{CommandQueue, FlushReport, QueueStats};

pub use blocks::{
    CacheControl, CompareFunc, DepthOffset, Rect, StencilFace, StencilOp, StencilState,
};
#[cfg(feature = "fixed-pipeline")]
pub use compat::CompatState;
pub use state::HardwareState;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique context identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Per-context driver state.
pub struct HardwareContext {
    id: ContextId,
    params: ContextParameters,
    device: DeviceHandle,
    queue: CommandQueue,
    state: Box<HardwareState>,
    vertex_data: Vec<u8>,
    #[cfg(feature = "fixed-pipeline")]
    compat: CompatState,
}

impl HardwareContext {
    /// Create a context on the device selected by `params`.
    pub fn create(params: &ContextParameters) -> Result<Self> {
        params.validate()?;
        let queue = CommandQueue::new(params.queue_capacity)?;
        let device = DeviceHandle::open(params)?;
        Ok(Self::assemble(params, device, queue))
    }

    /// Create a context on an already-open device channel.
    pub fn with_backend(params: &ContextParameters, backend: Arc<dyn DeviceBackend>) -> Result<Self> {
        params.validate()?;
        let queue = CommandQueue::new(params.queue_capacity)?;
        Ok(Self::assemble(params, DeviceHandle::with_backend(backend), queue))
    }

    fn assemble(params: &ContextParameters, device: DeviceHandle, queue: CommandQueue) -> Self {
        let mut state = Box::new(HardwareState::zeroed());
        state::create_global_state(&mut state.global);
        state::create_host_state(&mut state.host);
        state::create_primitive_state(&mut state.primitive);
        state::create_rasterizer_state(&mut state.rasterizer);
        state::create_fragment_state(&mut state.fragment);

        let ctx = Self {
            id: ContextId::next(),
            params: params.clone(),
            device,
            queue,
            state,
            vertex_data: Vec::new(),
            #[cfg(feature = "fixed-pipeline")]
            compat: CompatState::new(),
        };
        log::debug!(
            "Created hardware context {} (queue of {} pairs)",
            ctx.id,
            ctx.queue.capacity()
        );
        ctx
    }

    /// Tear the context down. Equivalent to dropping it.
    pub fn destroy(self) {
        drop(self);
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn params(&self) -> &ContextParameters {
        &self.params
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Shadow register state.
    pub fn state(&self) -> &HardwareState {
        &self.state
    }

    /// Register writes buffered since the last flush.
    pub fn pending_writes(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Buffer a register write.
    ///
    /// The shadow state is updated first; when the queue is already full it is
    /// flushed before the pair is buffered. Returns the report of that flush.
    /// Writes to registers outside the shadow state are always submitted as
    /// pairs, never folded into a state snapshot.
    pub fn write_register(&mut self, address: u32, value: u32) -> Option<FlushReport> {
        let shadowed = self.state.store(address, value);

        let report = if self.queue.is_full() {
            self.queue.flush(&self.device, self.state.as_bytes())
        } else {
            None
        };
        match self.queue.append(address, value) {
            Ok(()) if !shadowed => {
                log::trace!("Register {:#07x} is not shadowed", address);
                self.queue.mark_unshadowed();
            }
            Ok(()) => {}
            Err(e) => log::error!("Register write {:#07x} lost: {}", address, e),
        }
        report
    }

    /// Submit the buffered register writes.
    pub fn flush_queue(&mut self) -> Option<FlushReport> {
        self.queue.flush(&self.device, self.state.as_bytes())
    }

    /// Flush the queue, then upload dirty compatibility programs.
    ///
    /// Returns the first failed submission of either step, otherwise the
    /// report of the queue flush (or of the upload when the queue was empty).
    pub fn flush_context(&mut self) -> Option<FlushReport> {
        let report = self.flush_queue();
        #[cfg(feature = "fixed-pipeline")]
        let report = FlushReport::merge(report, self.flush_compat());
        report
    }

    #[cfg(feature = "fixed-pipeline")]
    fn flush_compat(&mut self) -> Option<FlushReport> {
        let writes = self.compat.take_upload();
        if writes.is_empty() {
            return None;
        }
        log::trace!("Uploading {} compatibility program words", writes.len());
        let mut report = None;
        for (address, value) in writes {
            report = FlushReport::merge(report, self.write_register(address, value));
        }
        FlushReport::merge(report, self.flush_queue())
    }

    /// Compatibility block of the fixed-function pipeline.
    #[cfg(feature = "fixed-pipeline")]
    pub fn compat(&self) -> &CompatState {
        &self.compat
    }

    #[cfg(feature = "fixed-pipeline")]
    pub fn compat_mut(&mut self) -> &mut CompatState {
        &mut self.compat
    }

    /// Scratch buffer for vertex data, grown to at least `size` bytes.
    pub fn vertex_buffer(&mut self, size: usize) -> Result<&mut [u8]> {
        if self.vertex_data.len() < size {
            self.vertex_data
                .try_reserve_exact(size - self.vertex_data.len())
                .map_err(|_| DriverError::OutOfMemory)?;
            self.vertex_data.resize(size, 0);
        }
        Ok(&mut self.vertex_data[..size])
    }

    /// Block until every stage in `target` is idle.
    ///
    /// Polls the pipeline status every `poll_interval`. Without a
    /// `finish_timeout` this waits as long as the hardware stays busy.
    pub fn wait_for_flush(&self, target: PipelineStages) -> Result<()> {
        let backend = self.device.backend()?;
        let deadline = self
            .params
            .finish_timeout
            .and_then(|t| Instant::now().checked_add(t));

        loop {
            let busy = backend.pipeline_status()? & target;
            if busy.is_empty() {
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                log::warn!("{}: pipeline still busy ({:?})", self.id, busy);
                return Err(DriverError::Timeout);
            }
            std::thread::sleep(self.params.poll_interval);
        }
    }

    /// Wait until all rendering has finished and caches are written back.
    pub fn finish(&self) -> Result<()> {
        self.wait_for_flush(PipelineStages::ALL)
    }
}

impl Drop for HardwareContext {
    fn drop(&mut self) {
        if !self.queue.is_empty() {
            log::debug!(
                "{}: discarding {} unflushed register writes",
                self.id,
                self.queue.len()
            );
        }
        self.device.close();
        log::debug!("Destroyed hardware context {}", self.id);
    }
}

impl fmt::Debug for HardwareContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareContext")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
