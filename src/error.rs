//! Driver error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by the driver core.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("cannot open device {}: {source}", path.display())]
    DeviceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("device channel is closed")]
    DeviceClosed,
    #[error("GPU memory allocation failed: {0}")]
    AllocationFailed(String),
    #[error("surface buffer is already bound to context {0}")]
    AlreadyBound(u64),
    #[error("surface buffer is not bound to a context")]
    NotBound,
    #[error("surface buffer is not locked")]
    NotLocked,
    #[error("no compatible pixel format for the native layout")]
    NoCompatibleFormat,
    #[error("pixel format does not match the requested configuration")]
    BadMatch,
    #[error("out of memory")]
    OutOfMemory,
    #[error("device rejected submission: {0}")]
    SubmissionFailed(String),
    #[error("register queue is full ({0} pairs)")]
    QueueFull(usize),
    #[error("timed out waiting for the pipeline to drain")]
    Timeout,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("device request failed: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Error codes reported to the EGL layer when a surface cannot be created.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceError {
    /// No pixel format satisfies the native window and the configuration.
    #[error("EGL_BAD_MATCH")]
    BadMatch,
    /// Backing storage could not be allocated.
    #[error("EGL_BAD_ALLOC")]
    BadAlloc,
}

impl SurfaceError {
    /// Numeric EGL error code.
    pub fn code(self) -> i32 {
        match self {
            Self::BadMatch => 0x3009,
            Self::BadAlloc => 0x3003,
        }
    }
}

impl From<DriverError> for SurfaceError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::NoCompatibleFormat | DriverError::BadMatch => Self::BadMatch,
            _ => Self::BadAlloc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DriverError::QueueFull(512);
        assert_eq!(err.to_string(), "register queue is full (512 pairs)");

        let err = DriverError::DeviceUnavailable {
            path: PathBuf::from("/dev/dri/card0"),
            source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
        };
        assert!(err.to_string().starts_with("cannot open device /dev/dri/card0"));
    }

    #[test]
    fn test_surface_error_mapping() {
        assert_eq!(
            SurfaceError::from(DriverError::NoCompatibleFormat),
            SurfaceError::BadMatch
        );
        assert_eq!(SurfaceError::from(DriverError::BadMatch), SurfaceError::BadMatch);
        assert_eq!(SurfaceError::from(DriverError::OutOfMemory), SurfaceError::BadAlloc);
        assert_eq!(
            SurfaceError::from(DriverError::AllocationFailed("export".into())),
            SurfaceError::BadAlloc
        );
        assert_eq!(SurfaceError::BadMatch.code(), 0x3009);
        assert_eq!(SurfaceError::BadAlloc.code(), 0x3003);
    }
}
