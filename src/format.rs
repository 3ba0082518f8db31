//! Pixel formats and native layout matching.
//!
//! Every internal format is described by the position and width of its red,
//! green, blue and alpha components inside one pixel. Formats without alpha
//! report an alpha component of offset 0 and length 0, the way framebuffer
//! drivers describe padding bits.

use crate::error::{DriverError, Result};

/// Position and width of one color component, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Component {
    pub offset: u32,
    pub length: u32,
}

impl Component {
    pub const NONE: Self = Self::new(0, 0);

    pub const fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }
}

/// Pixel layout of a native buffer, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NativeLayout {
    pub bits_per_pixel: u32,
    pub red: Component,
    pub green: Component,
    pub blue: Component,
    pub alpha: Component,
}

/// Internal pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb565,
    Xrgb1555,
    Argb1555,
    Argb4444,
    Xrgb8888,
    Argb8888,
    Xbgr8888,
    Abgr8888,
}

/// Candidate order for 32-bit native buffers, most preferred first.
pub const FRAMEBUFFER_FORMATS_32BPP: [PixelFormat; 4] = [
    PixelFormat::Xrgb8888,
    PixelFormat::Argb8888,
    PixelFormat::Xbgr8888,
    PixelFormat::Abgr8888,
];

/// Candidate order for 16-bit native buffers, most preferred first.
pub const FRAMEBUFFER_FORMATS_16BPP: [PixelFormat; 4] = [
    PixelFormat::Xrgb1555,
    PixelFormat::Rgb565,
    PixelFormat::Argb4444,
    PixelFormat::Argb1555,
];

impl PixelFormat {
    pub const ALL: [PixelFormat; 8] = [
        Self::Rgb565,
        Self::Xrgb1555,
        Self::Argb1555,
        Self::Argb4444,
        Self::Xrgb8888,
        Self::Argb8888,
        Self::Xbgr8888,
        Self::Abgr8888,
    ];

    pub fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Rgb565 | Self::Xrgb1555 | Self::Argb1555 | Self::Argb4444 => 16,
            Self::Xrgb8888 | Self::Argb8888 | Self::Xbgr8888 | Self::Abgr8888 => 32,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        self.bits_per_pixel() / 8
    }

    /// Component layout of the format.
    pub fn layout(self) -> NativeLayout {
        let c = Component::new;
        let (red, green, blue, alpha) = match self {
            Self::Rgb565 => (c(11, 5), c(5, 6), c(0, 5), Component::NONE),
            Self::Xrgb1555 => (c(10, 5), c(5, 5), c(0, 5), Component::NONE),
            Self::Argb1555 => (c(10, 5), c(5, 5), c(0, 5), c(15, 1)),
            Self::Argb4444 => (c(8, 4), c(4, 4), c(0, 4), c(12, 4)),
            Self::Xrgb8888 => (c(16, 8), c(8, 8), c(0, 8), Component::NONE),
            Self::Argb8888 => (c(16, 8), c(8, 8), c(0, 8), c(24, 8)),
            Self::Xbgr8888 => (c(0, 8), c(8, 8), c(16, 8), Component::NONE),
            Self::Abgr8888 => (c(0, 8), c(8, 8), c(16, 8), c(24, 8)),
        };
        NativeLayout {
            bits_per_pixel: self.bits_per_pixel(),
            red,
            green,
            blue,
            alpha,
        }
    }

    pub fn has_alpha(self) -> bool {
        self.layout().alpha.length > 0
    }

    /// Color buffer format code of the per-fragment unit, if the unit can
    /// render to this format directly.
    pub fn framebuffer_code(self) -> Option<u32> {
        match self {
            Self::Xrgb1555 => Some(0),
            Self::Rgb565 => Some(1),
            Self::Argb4444 => Some(2),
            Self::Argb1555 => Some(3),
            Self::Xrgb8888 => Some(4),
            Self::Argb8888 => Some(5),
            Self::Xbgr8888 | Self::Abgr8888 => None,
        }
    }

    /// Whether the color components sit where `native` says they do.
    pub fn matches(self, native: &NativeLayout) -> bool {
        let own = self.layout();
        own.red == native.red
            && own.green == native.green
            && own.blue == native.blue
            && own.alpha == native.alpha
    }
}

/// First candidate whose red, green, blue and alpha components match `native`
/// exactly.
pub fn find_compatible_format(
    native: &NativeLayout,
    candidates: &[PixelFormat],
) -> Result<PixelFormat> {
    candidates
        .iter()
        .copied()
        .find(|format| format.matches(native))
        .ok_or(DriverError::NoCompatibleFormat)
}

/// Internal format for a native buffer, chosen from the framebuffer candidate
/// list of its pixel depth.
pub fn native_to_pixel_format(native: &NativeLayout) -> Result<PixelFormat> {
    let candidates: &[PixelFormat] = match native.bits_per_pixel {
        32 => &FRAMEBUFFER_FORMATS_32BPP,
        16 => &FRAMEBUFFER_FORMATS_16BPP,
        bpp => {
            log::debug!("No framebuffer formats with {} bits per pixel", bpp);
            return Err(DriverError::NoCompatibleFormat);
        }
    };
    let format = find_compatible_format(native, candidates)?;
    log::trace!("Native layout {:?} matched {:?}", native, format);
    Ok(format)
}
