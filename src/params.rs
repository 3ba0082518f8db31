//! Context creation parameters.

use std::path::PathBuf;
use std::time::Duration;

use crate::backend::BackendType;
use crate::error::{DriverError, Result};

/// Default device node of the 3D block.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/dri/card0";

/// Default register queue capacity, in `(address, value)` pairs.
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// Parameters for creating a [`HardwareContext`](crate::HardwareContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextParameters {
    /// Device backend to open.
    pub backend: BackendType,
    /// Device node opened by the DRM backend.
    pub device_path: PathBuf,
    /// Register queue capacity in pairs.
    pub queue_capacity: usize,
    /// Upper bound for `finish`. `None` waits as long as the pipeline stays busy.
    pub finish_timeout: Option<Duration>,
    /// Poll interval used while waiting for the pipeline.
    pub poll_interval: Duration,
}

impl Default for ContextParameters {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            finish_timeout: None,
            poll_interval: Duration::from_micros(100),
        }
    }
}

impl ContextParameters {
    /// Create parameters with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `FIMG_BACKEND`, `FIMG_DEVICE`, `FIMG_QUEUE_LEN`
    /// and `FIMG_FINISH_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut params = Self::new();

        if let Some(backend) = lookup("FIMG_BACKEND") {
            params.backend = match backend.to_ascii_lowercase().as_str() {
                "drm" => BackendType::Drm,
                "dummy" => BackendType::Dummy,
                other => {
                    return Err(DriverError::InvalidParameter(format!(
                        "FIMG_BACKEND={other}"
                    )))
                }
            };
        }
        if let Some(path) = lookup("FIMG_DEVICE") {
            params.device_path = PathBuf::from(path);
        }
        if let Some(len) = lookup("FIMG_QUEUE_LEN") {
            let len = len
                .parse()
                .map_err(|_| DriverError::InvalidParameter(format!("FIMG_QUEUE_LEN={len}")))?;
            params = params.with_queue_capacity(len);
        }
        if let Some(ms) = lookup("FIMG_FINISH_TIMEOUT_MS") {
            let ms: u64 = ms.parse().map_err(|_| {
                DriverError::InvalidParameter(format!("FIMG_FINISH_TIMEOUT_MS={ms}"))
            })?;
            params.finish_timeout = Some(Duration::from_millis(ms));
        }

        params.validate()?;
        log::debug!("Context parameters from environment: {:?}", params);
        Ok(params)
    }

    /// Set the device backend.
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Set the device node path.
    pub fn with_device_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_path = path.into();
        self
    }

    /// Set the register queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Bound the time `finish` may wait.
    pub fn with_finish_timeout(mut self, timeout: Duration) -> Self {
        self.finish_timeout = Some(timeout);
        self
    }

    /// Set the pipeline status poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Check the parameters before a context is created.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(DriverError::InvalidParameter(
                "queue capacity must be at least one pair".to_string(),
            ));
        }
        Ok(())
    }
}
