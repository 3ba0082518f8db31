//! Native windows and window surface creation.

use super::render::{DisplayId, RenderSurface, SurfaceKind};
use crate::configs;
use crate::error::{Result, SurfaceError};
use crate::format::{self, NativeLayout, PixelFormat};

/// A native window the platform layer hands to surface creation.
pub trait NativeWindow: Send {
    /// Pixel layout of the window's buffer.
    fn native_layout(&self) -> Result<NativeLayout>;

    /// Visible size in pixels.
    fn size(&self) -> Result<(u32, u32)>;
}

/// Create a render surface drawing into `window`.
///
/// The color format is taken from the window's layout; `preferred` only
/// matters when it agrees. Fails with `BadMatch` when no supported format
/// matches the window or the match is not valid for `config`.
pub fn create_window_surface(
    display: DisplayId,
    config: usize,
    preferred: PixelFormat,
    depth_format: Option<u32>,
    window: Box<dyn NativeWindow>,
) -> std::result::Result<RenderSurface, SurfaceError> {
    let layout = window.native_layout().map_err(|e| {
        log::error!("Couldn't query native window layout: {}", e);
        SurfaceError::BadMatch
    })?;
    let pixel_format = format::native_to_pixel_format(&layout)?;
    if pixel_format != preferred {
        log::debug!(
            "Window uses {:?} instead of preferred {:?}",
            pixel_format,
            preferred
        );
    }

    if !configs::validate_pixel_format(config, pixel_format) {
        log::debug!("{:?} is not valid for config {}", pixel_format, config);
        return Err(SurfaceError::BadMatch);
    }

    let (width, height) = window.size().map_err(|e| {
        log::error!("Couldn't query native window size: {}", e);
        SurfaceError::BadMatch
    })?;

    Ok(RenderSurface::new(
        display,
        config,
        pixel_format,
        depth_format,
        width,
        height,
        SurfaceKind::FramebufferWindow(window),
    ))
}

#[cfg(all(unix, feature = "drm-backend"))]
pub use fbdev::{FbBitfield, FbVarScreeninfo, FramebufferWindow};

#[cfg(all(unix, feature = "drm-backend"))]
mod fbdev {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::fd::AsRawFd;
    use std::path::{Path, PathBuf};

    use bytemuck::{Pod, Zeroable};

    use super::NativeWindow;
    use crate::error::{DriverError, Result};
    use crate::format::{Component, NativeLayout};

    const FBIOGET_VSCREENINFO: libc::c_ulong = 0x4600;

    /// `struct fb_bitfield`
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
    pub struct FbBitfield {
        pub offset: u32,
        pub length: u32,
        pub msb_right: u32,
    }

    /// `struct fb_var_screeninfo`
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
    pub struct FbVarScreeninfo {
        pub xres: u32,
        pub yres: u32,
        pub xres_virtual: u32,
        pub yres_virtual: u32,
        pub xoffset: u32,
        pub yoffset: u32,
        pub bits_per_pixel: u32,
        pub grayscale: u32,
        pub red: FbBitfield,
        pub green: FbBitfield,
        pub blue: FbBitfield,
        pub transp: FbBitfield,
        pub nonstd: u32,
        pub activate: u32,
        pub height: u32,
        pub width: u32,
        pub accel_flags: u32,
        pub pixclock: u32,
        pub left_margin: u32,
        pub right_margin: u32,
        pub upper_margin: u32,
        pub lower_margin: u32,
        pub hsync_len: u32,
        pub vsync_len: u32,
        pub sync: u32,
        pub vmode: u32,
        pub rotate: u32,
        pub colorspace: u32,
        pub reserved: [u32; 4],
    }

    static_assertions::assert_eq_size!(FbVarScreeninfo, [u8; 160]);

    impl FbVarScreeninfo {
        pub fn layout(&self) -> NativeLayout {
            let component = |b: FbBitfield| Component::new(b.offset, b.length);
            NativeLayout {
                bits_per_pixel: self.bits_per_pixel,
                red: component(self.red),
                green: component(self.green),
                blue: component(self.blue),
                alpha: component(self.transp),
            }
        }
    }

    /// Linux framebuffer device used as a native window.
    #[derive(Debug)]
    pub struct FramebufferWindow {
        file: File,
        path: PathBuf,
    }

    impl FramebufferWindow {
        pub const DEFAULT_PATH: &'static str = "/dev/fb0";

        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|source| DriverError::DeviceUnavailable {
                    path: path.to_path_buf(),
                    source,
                })?;
            log::debug!("Opened framebuffer {}", path.display());
            Ok(Self {
                file,
                path: path.to_path_buf(),
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Current variable screen information.
        pub fn screen_info(&self) -> Result<FbVarScreeninfo> {
            let mut info = FbVarScreeninfo::default();
            // SAFETY: info is a correctly sized fb_var_screeninfo
            let ret = unsafe {
                libc::ioctl(
                    self.file.as_raw_fd(),
                    FBIOGET_VSCREENINFO as _,
                    &mut info as *mut FbVarScreeninfo,
                )
            };
            if ret < 0 {
                return Err(io::Error::last_os_error().into());
            }
            Ok(info)
        }
    }

    impl NativeWindow for FramebufferWindow {
        fn native_layout(&self) -> Result<NativeLayout> {
            self.screen_info().map(|info| info.layout())
        }

        fn size(&self) -> Result<(u32, u32)> {
            self.screen_info().map(|info| (info.xres, info.yres))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;

    struct FixedWindow(NativeLayout);

    impl NativeWindow for FixedWindow {
        fn native_layout(&self) -> Result<NativeLayout> {
            Ok(self.0)
        }

        fn size(&self) -> Result<(u32, u32)> {
            Ok((320, 240))
        }
    }

    struct BrokenWindow;

    impl NativeWindow for BrokenWindow {
        fn native_layout(&self) -> Result<NativeLayout> {
            Err(DriverError::Io(std::io::Error::other("no screen")))
        }

        fn size(&self) -> Result<(u32, u32)> {
            Ok((0, 0))
        }
    }

    #[test]
    fn test_window_format_overrides_preference() {
        let window = Box::new(FixedWindow(PixelFormat::Rgb565.layout()));
        let surface =
            create_window_surface(DisplayId(0), 0, PixelFormat::Xrgb8888, None, window).unwrap();
        assert_eq!(surface.pixel_format(), PixelFormat::Rgb565);
        assert_eq!((surface.width(), surface.height()), (320, 240));
    }

    #[test]
    fn test_config_mismatch_is_bad_match() {
        let window = Box::new(FixedWindow(PixelFormat::Rgb565.layout()));
        let err = create_window_surface(DisplayId(0), 8, PixelFormat::Argb8888, None, window)
            .unwrap_err();
        assert_eq!(err, SurfaceError::BadMatch);
    }

    #[test]
    fn test_query_failure_is_bad_match() {
        let err =
            create_window_surface(DisplayId(0), 0, PixelFormat::Rgb565, None, Box::new(BrokenWindow))
                .unwrap_err();
        assert_eq!(err, SurfaceError::BadMatch);
    }

    #[cfg(all(unix, feature = "drm-backend"))]
    #[test]
    fn test_screeninfo_layout() {
        let info = FbVarScreeninfo {
            bits_per_pixel: 16,
            red: FbBitfield { offset: 11, length: 5, msb_right: 0 },
            green: FbBitfield { offset: 5, length: 6, msb_right: 0 },
            blue: FbBitfield { offset: 0, length: 5, msb_right: 0 },
            ..Default::default()
        };
        assert_eq!(format::native_to_pixel_format(&info.layout()).unwrap(), PixelFormat::Rgb565);
    }
}
