//! Framebuffer presentation loop.
//!
//! Opens the G3D device and the Linux framebuffer, creates a window surface
//! with a depth/stencil buffer and presents a frame once per second, changing
//! the per-fragment state between frames.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: /dev/dri/card0 and /dev/fb0
//! cargo run --example clear_loop
//!
//! # Other device, bounded glFinish, verbose logging
//! RUST_LOG=trace FIMG_DEVICE=/dev/dri/card1 FIMG_FINISH_TIMEOUT_MS=500 \
//!     cargo run --example clear_loop -- /dev/fb1 10
//! ```
//!
//! Arguments are the framebuffer path and the number of frames (default 1000).

use std::error::Error;
use std::thread;
use std::time::Duration;

use fimg_driver::configs;
use fimg_driver::context::{CompareFunc, Rect};
use fimg_driver::surface::FramebufferWindow;
use fimg_driver::{
    create_window_surface, native_to_pixel_format, ContextParameters, DisplayId, HardwareContext,
    NativeWindow,
};

const DEFAULT_FRAMES: u32 = 1000;
const FRAME_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    fimg_driver::init();

    let mut args = std::env::args().skip(1);
    let fb_path = args
        .next()
        .unwrap_or_else(|| FramebufferWindow::DEFAULT_PATH.to_string());
    let frames = match args.next() {
        Some(n) => n.parse()?,
        None => DEFAULT_FRAMES,
    };

    let params = ContextParameters::from_env()?;
    let mut ctx = HardwareContext::create(&params)?;

    let window = FramebufferWindow::open(&fb_path)?;
    let format = native_to_pixel_format(&window.native_layout()?)?;
    let config = configs::find_config(format, 24, 8)
        .ok_or_else(|| format!("no framebuffer configuration for {format:?}"))?;

    let mut surface =
        create_window_surface(DisplayId(0), config, format, Some(24), Box::new(window))?;
    surface.allocate(&ctx)?;
    log::info!(
        "Presenting {}x{} {:?} (config {}) on {}",
        surface.width(),
        surface.height(),
        format,
        config,
        fb_path
    );

    let (width, height) = (surface.width(), surface.height());
    ctx.set_viewport(0.0, 0.0, width as f32, height as f32);
    ctx.set_x_clip(0, width)?;
    ctx.set_y_clip(0, height)?;
    ctx.set_color_buffer(0, width, format)?;
    ctx.set_depth_test(Some(CompareFunc::Less));
    surface.swap_buffers(&mut ctx)?;

    for frame in 0..frames {
        thread::sleep(FRAME_INTERVAL);

        // Shrink the scissor box a little every frame
        let inset = (frame * 8) % (width.min(height) / 2).max(1);
        ctx.set_scissor(Some(Rect::new(
            inset,
            inset,
            width - 2 * inset,
            height - 2 * inset,
        )))?;
        ctx.set_dither(frame % 2 == 0);

        if let Err(e) = surface.swap_buffers(&mut ctx) {
            log::warn!("Frame {} was not presented: {}", frame, e);
        }
        ctx.finish()?;
    }

    log::info!("Submission stats: {:?}", ctx.queue_stats());
    surface.free();
    ctx.destroy();
    Ok(())
}
