//! Common utilities for driver integration tests.
//!
//! Tests run against the Dummy backend, which records every submission and
//! tracks every handle, so ownership can be checked without hardware.

use std::sync::{Arc, Once};

use fimg_driver::backend::DummyBackend;
use fimg_driver::{
    BackendType, ContextParameters, DriverError, HardwareContext, NativeLayout, NativeWindow,
    PixelFormat, Result,
};

static LOGGER: Once = Once::new();

/// Install a test logger once per process. `RUST_LOG` controls verbosity.
pub fn init_logging() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

// ============================================================================
// Test Context
// ============================================================================

/// A hardware context on a fresh Dummy backend.
pub struct TestContext {
    pub backend: Arc<DummyBackend>,
    pub ctx: HardwareContext,
}

impl TestContext {
    /// Context with the default queue capacity.
    pub fn new() -> Self {
        Self::with_capacity(fimg_driver::DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        init_logging();
        let params = ContextParameters::new()
            .with_backend(BackendType::Dummy)
            .with_queue_capacity(capacity);
        let backend = Arc::new(DummyBackend::new());
        let ctx = HardwareContext::with_backend(&params, backend.clone())
            .expect("dummy context creation cannot fail");
        Self { backend, ctx }
    }

    /// A second context sharing this context's backend, as two contexts of
    /// one process would share the kernel device.
    #[allow(dead_code)]
    pub fn sibling(&self) -> HardwareContext {
        HardwareContext::with_backend(self.ctx.params(), self.backend.clone())
            .expect("dummy context creation cannot fail")
    }

    /// Append `count` distinct register writes.
    pub fn write_pairs(&mut self, count: usize) {
        for i in 0..count {
            self.ctx.write_register(0x7_0000 + 4 * (i as u32 % 15), i as u32);
        }
    }
}

// ============================================================================
// Native Windows
// ============================================================================

/// Window with a fixed layout and size.
#[allow(dead_code)]
pub struct FixedWindow {
    pub layout: NativeLayout,
    pub width: u32,
    pub height: u32,
}

#[allow(dead_code)]
impl FixedWindow {
    pub fn with_format(format: PixelFormat, width: u32, height: u32) -> Box<Self> {
        Box::new(Self {
            layout: format.layout(),
            width,
            height,
        })
    }
}

impl NativeWindow for FixedWindow {
    fn native_layout(&self) -> Result<NativeLayout> {
        if self.layout.bits_per_pixel == 0 {
            return Err(DriverError::InvalidParameter("window without layout".into()));
        }
        Ok(self.layout)
    }

    fn size(&self) -> Result<(u32, u32)> {
        Ok((self.width, self.height))
    }
}
