//! Render surfaces: the color and depth/stencil buffers a draw targets.

use std::fmt;

use super::window::NativeWindow;
use super::SurfaceBuffer;
use crate::context::HardwareContext;
use crate::error::{DriverError, Result};
use crate::format::PixelFormat;

/// Bytes per depth/stencil pixel (24-bit depth with 8-bit stencil).
const DEPTH_BYTES_PER_PIXEL: u64 = 4;

/// Opaque display the surface belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DisplayId(pub u32);

/// What happens to the color buffer contents after a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwapBehavior {
    BufferPreserved,
    BufferDestroyed,
}

pub enum SurfaceKind {
    /// Renders directly into a native framebuffer.
    FramebufferWindow(Box<dyn NativeWindow>),
    /// No presentation target.
    Offscreen,
}

impl fmt::Debug for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FramebufferWindow(_) => f.write_str("FramebufferWindow"),
            Self::Offscreen => f.write_str("Offscreen"),
        }
    }
}

/// Color and depth/stencil buffers of one drawable.
///
/// The depth buffer is local storage of `width * height * 4` bytes created by
/// [`allocate`](Self::allocate) when a depth format was requested. Color
/// storage belongs to the platform.
#[derive(Debug)]
pub struct RenderSurface {
    display: DisplayId,
    config: usize,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    depth_format: Option<u32>,
    depth: Option<SurfaceBuffer>,
    kind: SurfaceKind,
}

impl RenderSurface {
    pub fn new(
        display: DisplayId,
        config: usize,
        pixel_format: PixelFormat,
        depth_format: Option<u32>,
        width: u32,
        height: u32,
        kind: SurfaceKind,
    ) -> Self {
        log::debug!(
            "Creating {:?} render surface {}x{} ({:?}, depth {:?})",
            kind,
            width,
            height,
            pixel_format,
            depth_format
        );
        Self {
            display,
            config,
            width,
            height,
            pixel_format,
            depth_format,
            depth: None,
            kind,
        }
    }

    pub fn display(&self) -> DisplayId {
        self.display
    }

    pub fn config(&self) -> usize {
        self.config
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn depth_format(&self) -> Option<u32> {
        self.depth_format
    }

    pub fn kind(&self) -> &SurfaceKind {
        &self.kind
    }

    pub fn depth_buffer(&self) -> Option<&SurfaceBuffer> {
        self.depth.as_ref()
    }

    pub fn depth_buffer_mut(&mut self) -> Option<&mut SurfaceBuffer> {
        self.depth.as_mut()
    }

    fn depth_size(&self) -> Option<u64> {
        u64::from(self.width)
            .checked_mul(u64::from(self.height))?
            .checked_mul(DEPTH_BYTES_PER_PIXEL)
    }

    /// (Re)create the depth buffer and bind it to `ctx`.
    ///
    /// Any previous depth buffer is released first. Without a depth format,
    /// or with depth format 0, the surface ends up with no depth buffer. Fails with `OutOfMemory`
    /// when the buffer cannot be backed.
    pub fn allocate(&mut self, ctx: &HardwareContext) -> Result<()> {
        self.depth = None;
        if self.depth_format.map_or(true, |format| format == 0) {
            return Ok(());
        }

        let size = self.depth_size().ok_or(DriverError::OutOfMemory)?;
        let mut depth = SurfaceBuffer::local(size);
        if let Err(e) = depth.bind_context(ctx) {
            log::error!(
                "Couldn't allocate {}x{} depth buffer: {}",
                self.width,
                self.height,
                e
            );
            return Err(DriverError::OutOfMemory);
        }
        if !depth.is_valid() {
            return Err(DriverError::OutOfMemory);
        }

        self.depth = Some(depth);
        Ok(())
    }

    /// Release the depth buffer.
    pub fn free(&mut self) {
        self.depth = None;
    }

    /// Present the frame. Pending state is flushed first; no contents are
    /// copied.
    pub fn swap_buffers(&mut self, ctx: &mut HardwareContext) -> Result<()> {
        match ctx.flush_context() {
            Some(report) => report.error.map_or(Ok(()), Err),
            None => Ok(()),
        }
    }

    pub fn swap_behavior(&self) -> SwapBehavior {
        SwapBehavior::BufferDestroyed
    }

    /// Whether the surface can be rendered to.
    pub fn init_check(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}
