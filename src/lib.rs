//! # fimg-driver
//!
//! User-space driver for the FIMG-3DSE 3D block.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`HardwareContext`] - per-context device channel, register queue and
//!   shadow register state
//! - [`CommandQueue`] - batching of register writes into incremental or
//!   full-state submissions
//! - [`SurfaceBuffer`] - GPU memory objects with exactly-once release across
//!   the driver and the kernel
//! - [`RenderSurface`] - color and depth/stencil buffers of a drawable
//! - [`backend`] - the kernel DRM channel and a Dummy channel for testing
//!
//! ## Example
//!
//! ```ignore
//! use fimg_driver::surface::FramebufferWindow;
//! use fimg_driver::{create_window_surface, ContextParameters, DisplayId, HardwareContext, PixelFormat};
//!
//! let mut ctx = HardwareContext::create(&ContextParameters::from_env()?)?;
//! let window = Box::new(FramebufferWindow::open("/dev/fb0")?);
//! let mut surface = create_window_surface(DisplayId(0), 6, PixelFormat::Xrgb8888, Some(24), window)?;
//! surface.allocate(&ctx)?;
//! // Mutate state...
//! surface.swap_buffers(&mut ctx)?;
//! ctx.finish()?;
//! ```

pub mod backend;
pub mod configs;
pub mod context;
pub mod device;
pub mod error;
pub mod format;
pub mod params;
pub mod queue;
pub mod surface;

// Re-export main types for convenience
pub use backend::{BackendType, DeviceBackend, DummyBackend, PipelineStages};
pub use context::{ContextId, HardwareContext, HardwareState};
pub use device::DeviceHandle;
pub use error::{DriverError, Result, SurfaceError};
pub use format::{find_compatible_format, native_to_pixel_format, NativeLayout, PixelFormat};
pub use params::{ContextParameters, DEFAULT_QUEUE_CAPACITY};
pub use queue::{CommandQueue, FlushReport, QueueStats};
pub use surface::{
    create_window_surface, DisplayId, LockUsage, NativeWindow, RenderSurface, SurfaceBuffer,
    SurfaceKind, SwapBehavior,
};

/// Driver version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the driver.
pub fn init() {
    log::info!("fimg-driver v{} initialized", VERSION);
}
