//! Framebuffer configurations.
//!
//! The configurations offered for direct rendering into the framebuffer, in
//! EGL sort order. Each entry pairs a color format with a depth and stencil
//! size.

use crate::format::PixelFormat;

/// One framebuffer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferConfig {
    pub buffer_size: u32,
    pub red_size: u32,
    pub green_size: u32,
    pub blue_size: u32,
    pub alpha_size: u32,
    pub depth_size: u32,
    pub stencil_size: u32,
}

const fn config(color: (u32, u32, u32, u32, u32), depth: u32, stencil: u32) -> FramebufferConfig {
    FramebufferConfig {
        buffer_size: color.0,
        red_size: color.1,
        green_size: color.2,
        blue_size: color.3,
        alpha_size: color.4,
        depth_size: depth,
        stencil_size: stencil,
    }
}

const RGB565: (u32, u32, u32, u32, u32) = (16, 5, 6, 5, 0);
const XRGB8888: (u32, u32, u32, u32, u32) = (32, 8, 8, 8, 0);
const ARGB8888: (u32, u32, u32, u32, u32) = (32, 8, 8, 8, 8);

/// Supported configurations. The index is the configuration id.
pub const FRAMEBUFFER_CONFIGS: [FramebufferConfig; 12] = [
    config(RGB565, 0, 0),
    config(RGB565, 0, 8),
    config(RGB565, 24, 0),
    config(RGB565, 24, 8),
    config(XRGB8888, 0, 0),
    config(XRGB8888, 0, 8),
    config(XRGB8888, 24, 0),
    config(XRGB8888, 24, 8),
    config(ARGB8888, 0, 0),
    config(ARGB8888, 0, 8),
    config(ARGB8888, 24, 0),
    config(ARGB8888, 24, 8),
];

impl FramebufferConfig {
    /// Whether a depth or stencil buffer is part of the configuration.
    pub fn needs_depth_buffer(&self) -> bool {
        self.depth_size > 0 || self.stencil_size > 0
    }

    fn color_matches(&self, format: PixelFormat) -> bool {
        let layout = format.layout();
        self.buffer_size == format.bits_per_pixel()
            && self.red_size == layout.red.length
            && self.green_size == layout.green.length
            && self.blue_size == layout.blue.length
            && self.alpha_size == layout.alpha.length
    }
}

/// Configuration by id.
pub fn get_config(config: usize) -> Option<&'static FramebufferConfig> {
    FRAMEBUFFER_CONFIGS.get(config)
}

/// Whether `format` can back the color buffer of configuration `config`.
/// Unknown configuration ids never validate.
pub fn validate_pixel_format(config: usize, format: PixelFormat) -> bool {
    get_config(config).is_some_and(|c| c.color_matches(format))
}

/// Id of the first configuration with the given color format, depth and
/// stencil sizes.
pub fn find_config(format: PixelFormat, depth_size: u32, stencil_size: u32) -> Option<usize> {
    FRAMEBUFFER_CONFIGS.iter().position(|c| {
        c.color_matches(format) && c.depth_size == depth_size && c.stencil_size == stencil_size
    })
}
