//! Typed state setters, one group per hardware block.
//!
//! Each setter encodes its arguments into register values and goes through
//! [`HardwareContext::write_register`], so the shadow state and the queue stay
//! in step.

use bitflags::bitflags;

use super::state::{registers::*, ATTRIB_COUNT, MAX_CLIP_COORD};
use super::HardwareContext;
use crate::backend::PipelineStages;
use crate::error::{DriverError, Result};
use crate::format::PixelFormat;

bitflags! {
    /// Cache flush/invalidate requests of the global block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CacheControl: u32 {
        const FLUSH_ZBUFFER = 1 << 0;
        const FLUSH_COLOR = 1 << 1;
        const CLEAR_TEXTURE0 = 1 << 8;
        const CLEAR_TEXTURE1 = 1 << 9;
        const CLEAR_VERTEX_TEXTURE = 1 << 12;
    }
}

/// Comparison function, in hardware encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CompareFunc {
    Never = 0,
    Always = 1,
    Less = 2,
    LessEqual = 3,
    Equal = 4,
    Greater = 5,
    GreaterEqual = 6,
    NotEqual = 7,
}

/// Stencil buffer update operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StencilOp {
    Keep = 0,
    Zero = 1,
    Replace = 2,
    Increment = 3,
    Decrement = 4,
    Invert = 5,
    IncrementWrap = 6,
    DecrementWrap = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilFace {
    Front,
    Back,
}

/// Stencil test configuration of one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilState {
    pub func: CompareFunc,
    pub reference: u8,
    pub mask: u8,
    pub stencil_fail: StencilOp,
    pub depth_fail: StencilOp,
    pub depth_pass: StencilOp,
}

impl StencilState {
    fn encode(&self) -> u32 {
        (self.stencil_fail as u32) << 29
            | (self.depth_fail as u32) << 26
            | (self.depth_pass as u32) << 23
            | u32::from(self.mask) << 12
            | u32::from(self.reference) << 4
            | (self.func as u32) << 1
    }
}

/// Polygon depth offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthOffset {
    pub factor: f32,
    pub units: f32,
}

/// Screen-space rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

const SCISSOR_ENABLE: u32 = 1 << 31;
const TEST_ENABLE: u32 = 1 << 0;
const FB_DITHER: u32 = 1 << 3;
const FB_FORMAT_MASK: u32 = 0x7;
const SAMPLE_CORNER: u32 = 1 << 0;

fn clip_range(min: u32, max: u32) -> Result<u32> {
    if min > max || max > MAX_CLIP_COORD {
        return Err(DriverError::InvalidParameter(format!(
            "clip range {min}..{max} outside 0..{MAX_CLIP_COORD}"
        )));
    }
    Ok(max << 16 | min)
}

impl HardwareContext {
    // Global block

    /// Select the stages whose completion raises the pipeline interrupt.
    pub fn set_pipeline_target(&mut self, target: PipelineStages) {
        self.write_register(GLOBAL_PIPE_MASK, target.bits());
        self.write_register(GLOBAL_PIPE_TARGET, target.bits());
    }

    pub fn set_cache_control(&mut self, control: CacheControl) {
        self.write_register(GLOBAL_CACHE_CTL, control.bits());
    }

    // Host interface

    /// Program one vertex attribute and its vertex buffer.
    pub fn set_attribute(
        &mut self,
        index: usize,
        attrib: u32,
        vb_control: u32,
        vb_base: u32,
    ) -> Result<()> {
        if index >= ATTRIB_COUNT {
            return Err(DriverError::InvalidParameter(format!(
                "attribute {index} out of {ATTRIB_COUNT}"
            )));
        }
        let offset = 4 * index as u32;
        self.write_register(HOST_ATTRIB_BASE + offset, attrib);
        self.write_register(HOST_VB_CTRL_BASE + offset, vb_control);
        self.write_register(HOST_VB_BASE_BASE + offset, vb_base);
        Ok(())
    }

    pub fn set_host_control(&mut self, control: u32) {
        self.write_register(HOST_CONTROL, control);
    }

    pub fn set_index_offset(&mut self, offset: u32) {
        self.write_register(HOST_INDEX_OFFSET, offset);
    }

    // Primitive engine

    pub fn set_vertex_context(&mut self, context: u32) {
        self.write_register(PRIM_VERTEX_CONTEXT, context);
    }

    pub fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        let half_w = width / 2.0;
        let half_h = height / 2.0;
        self.write_register(PRIM_VIEWPORT_OX, (x + half_w).to_bits());
        self.write_register(PRIM_VIEWPORT_OY, (y + half_h).to_bits());
        self.write_register(PRIM_VIEWPORT_HALF_PX, half_w.to_bits());
        self.write_register(PRIM_VIEWPORT_HALF_PY, half_h.to_bits());
    }

    pub fn set_depth_range(&mut self, near: f32, far: f32) {
        self.write_register(PRIM_DEPTH_HALF_SUB, ((far - near) / 2.0).to_bits());
        self.write_register(PRIM_DEPTH_HALF_ADD, ((far + near) / 2.0).to_bits());
    }

    // Raster engine

    /// Sample pixels at their corner instead of their center.
    pub fn set_sampling_corner(&mut self, corner: bool) {
        self.write_register(RASTER_PIX_SAMP, if corner { SAMPLE_CORNER } else { 0 });
    }

    pub fn set_depth_offset(&mut self, offset: Option<DepthOffset>) {
        match offset {
            Some(offset) => {
                self.write_register(RASTER_DOFF_FACTOR, offset.factor.to_bits());
                self.write_register(RASTER_DOFF_UNITS, offset.units.to_bits());
                self.write_register(RASTER_DOFF_ENABLE, TEST_ENABLE);
            }
            None => {
                self.write_register(RASTER_DOFF_ENABLE, 0);
            }
        }
    }

    /// Horizontal clipping, independent of the viewport.
    pub fn set_x_clip(&mut self, min: u32, max: u32) -> Result<()> {
        let value = clip_range(min, max)?;
        self.write_register(RASTER_XCLIP, value);
        Ok(())
    }

    pub fn set_y_clip(&mut self, min: u32, max: u32) -> Result<()> {
        let value = clip_range(min, max)?;
        self.write_register(RASTER_YCLIP, value);
        Ok(())
    }

    pub fn set_point_size(&mut self, size: f32) {
        let min = f32::from_bits(self.state.rasterizer.point_size_min);
        let max = f32::from_bits(self.state.rasterizer.point_size_max);
        self.write_register(RASTER_POINT_WIDTH, size.clamp(min, max).to_bits());
    }

    pub fn set_line_width(&mut self, width: f32) {
        self.write_register(RASTER_LINE_WIDTH, width.to_bits());
    }

    // Per-fragment unit

    /// Enable the scissor test with `rect`, or disable it.
    pub fn set_scissor(&mut self, rect: Option<Rect>) -> Result<()> {
        let (x, y) = match rect {
            Some(r) => {
                let x = clip_range(r.x, r.x.saturating_add(r.width).saturating_sub(1))?;
                let y = clip_range(r.y, r.y.saturating_add(r.height).saturating_sub(1))?;
                (x | SCISSOR_ENABLE, y)
            }
            None => (MAX_CLIP_COORD << 16, MAX_CLIP_COORD << 16),
        };
        self.write_register(FRAG_SCISSOR_X, x);
        self.write_register(FRAG_SCISSOR_Y, y);
        Ok(())
    }

    pub fn set_alpha_test(&mut self, test: Option<(CompareFunc, u8)>) {
        let value = match test {
            Some((func, reference)) => (func as u32) << 12 | u32::from(reference) << 4 | TEST_ENABLE,
            None => 0,
        };
        self.write_register(FRAG_ALPHA_TEST, value);
    }

    pub fn set_depth_test(&mut self, func: Option<CompareFunc>) {
        let value = func.map_or(0, |f| (f as u32) << 1 | TEST_ENABLE);
        self.write_register(FRAG_DEPTH_TEST, value);
    }

    /// Configure the stencil test of one face. The enable bit lives in the
    /// front face register and follows the front configuration.
    pub fn set_stencil(&mut self, face: StencilFace, state: Option<StencilState>) {
        let encoded = state.map_or(0, |s| s.encode());
        match face {
            StencilFace::Front => {
                let enable = if state.is_some() { TEST_ENABLE } else { 0 };
                self.write_register(FRAG_FRONT_STENCIL, encoded | enable);
            }
            StencilFace::Back => {
                self.write_register(FRAG_BACK_STENCIL, encoded);
            }
        }
    }

    pub fn set_dither(&mut self, enable: bool) {
        let control = self.state.fragment.fb_control & !FB_DITHER;
        self.write_register(FRAG_FB_CONTROL, control | if enable { FB_DITHER } else { 0 });
    }

    /// Point the color buffer at `address`, `width` pixels per line.
    pub fn set_color_buffer(&mut self, address: u32, width: u32, format: PixelFormat) -> Result<()> {
        let code = format.framebuffer_code().ok_or_else(|| {
            DriverError::InvalidParameter(format!("{format:?} cannot be a color buffer"))
        })?;
        let control = self.state.fragment.fb_control & !FB_FORMAT_MASK;
        self.write_register(FRAG_FB_CONTROL, control | code);
        self.write_register(FRAG_COLOR_ADDR, address);
        self.write_register(FRAG_FB_WIDTH, width);
        Ok(())
    }

    pub fn set_depth_buffer(&mut self, address: u32) {
        self.write_register(FRAG_DEPTH_ADDR, address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::params::ContextParameters;
    use std::sync::Arc;

    fn context() -> HardwareContext {
        HardwareContext::with_backend(&ContextParameters::new(), Arc::new(DummyBackend::new()))
            .unwrap()
    }

    #[test]
    fn test_scissor_encoding() {
        let mut ctx = context();
        ctx.set_scissor(Some(Rect::new(10, 20, 100, 50))).unwrap();
        let frag = ctx.state().fragment;
        assert_eq!(frag.scissor_x, SCISSOR_ENABLE | 109 << 16 | 10);
        assert_eq!(frag.scissor_y, 69 << 16 | 20);
        assert_eq!(ctx.pending_writes(), 2);

        ctx.set_scissor(None).unwrap();
        assert_eq!(ctx.state().fragment.scissor_x & SCISSOR_ENABLE, 0);
    }

    #[test]
    fn test_scissor_out_of_range() {
        let mut ctx = context();
        assert!(ctx.set_scissor(Some(Rect::new(2000, 0, 100, 10))).is_err());
        assert_eq!(ctx.pending_writes(), 0);
    }

    #[test]
    fn test_dither_keeps_format() {
        let mut ctx = context();
        ctx.set_color_buffer(0x1000, 640, PixelFormat::Rgb565).unwrap();
        ctx.set_dither(true);
        let control = ctx.state().fragment.fb_control;
        assert_eq!(control & FB_FORMAT_MASK, 1);
        assert_ne!(control & FB_DITHER, 0);
        assert_eq!(ctx.state().fragment.fb_width, 640);
    }

    #[test]
    fn test_stencil_front_carries_enable() {
        let mut ctx = context();
        let state = StencilState {
            func: CompareFunc::Equal,
            reference: 1,
            mask: 0xff,
            stencil_fail: StencilOp::Keep,
            depth_fail: StencilOp::Keep,
            depth_pass: StencilOp::Replace,
        };
        ctx.set_stencil(StencilFace::Front, Some(state));
        ctx.set_stencil(StencilFace::Back, Some(state));
        let frag = ctx.state().fragment;
        assert_eq!(frag.front_stencil & TEST_ENABLE, TEST_ENABLE);
        assert_eq!(frag.back_stencil & TEST_ENABLE, 0);
        assert_eq!(frag.front_stencil >> 23 & 0x7, StencilOp::Replace as u32);
    }

    #[test]
    fn test_attribute_index_checked() {
        let mut ctx = context();
        ctx.set_attribute(9, 1, 2, 3).unwrap();
        assert_eq!(ctx.state().host.vb_base[9], 3);
        assert!(ctx.set_attribute(ATTRIB_COUNT, 1, 2, 3).is_err());
    }

    #[test]
    fn test_depth_range_and_test() {
        let mut ctx = context();
        ctx.set_depth_range(0.0, 1.0);
        ctx.set_depth_test(Some(CompareFunc::Less));
        let state = ctx.state();
        assert_eq!(f32::from_bits(state.primitive.depth_half_sub), 0.5);
        assert_eq!(state.fragment.depth_test, (CompareFunc::Less as u32) << 1 | 1);
    }
}
