//! Shadow copy of the hardware register state.
//!
//! [`HardwareState`] mirrors every register the driver programs, block by
//! block, in the layout the kernel expects for a state-init request. The
//! struct is plain old data and is submitted verbatim.

use bytemuck::{Pod, Zeroable};

/// Register addresses, relative to the 3D block base.
pub mod registers {
    // Global block
    pub const GLOBAL_PIPE_STATE: u32 = 0x0_0000;
    pub const GLOBAL_CACHE_CTL: u32 = 0x0_0004;
    pub const GLOBAL_PIPE_MASK: u32 = 0x0_0048;
    pub const GLOBAL_PIPE_TARGET: u32 = 0x0_004c;

    // Host interface
    pub const HOST_CONTROL: u32 = 0x0_8008;
    pub const HOST_INDEX_OFFSET: u32 = 0x0_800c;
    pub const HOST_VB_ADDR: u32 = 0x0_8010;
    pub const HOST_ATTRIB_BASE: u32 = 0x0_8040;
    pub const HOST_VB_CTRL_BASE: u32 = 0x0_8080;
    pub const HOST_VB_BASE_BASE: u32 = 0x0_80c0;

    // Primitive engine
    pub const PRIM_VERTEX_CONTEXT: u32 = 0x3_0000;
    pub const PRIM_VIEWPORT_OX: u32 = 0x3_0004;
    pub const PRIM_VIEWPORT_OY: u32 = 0x3_0008;
    pub const PRIM_VIEWPORT_HALF_PX: u32 = 0x3_000c;
    pub const PRIM_VIEWPORT_HALF_PY: u32 = 0x3_0010;
    pub const PRIM_DEPTH_HALF_SUB: u32 = 0x3_0014;
    pub const PRIM_DEPTH_HALF_ADD: u32 = 0x3_0018;

    // Raster engine
    pub const RASTER_PIX_SAMP: u32 = 0x3_8000;
    pub const RASTER_DOFF_ENABLE: u32 = 0x3_8004;
    pub const RASTER_DOFF_FACTOR: u32 = 0x3_8008;
    pub const RASTER_DOFF_UNITS: u32 = 0x3_800c;
    pub const RASTER_BACKFACE_CULL: u32 = 0x3_8010;
    pub const RASTER_YCLIP: u32 = 0x3_8014;
    pub const RASTER_POINT_WIDTH: u32 = 0x3_801c;
    pub const RASTER_POINT_SIZE_MIN: u32 = 0x3_8020;
    pub const RASTER_POINT_SIZE_MAX: u32 = 0x3_8024;
    pub const RASTER_COORD_REPLACE: u32 = 0x3_8028;
    pub const RASTER_LINE_WIDTH: u32 = 0x3_802c;
    pub const RASTER_LOD_CTL: u32 = 0x3_c000;
    pub const RASTER_XCLIP: u32 = 0x3_c004;

    // Per-fragment unit
    pub const FRAG_SCISSOR_X: u32 = 0x7_0000;
    pub const FRAG_SCISSOR_Y: u32 = 0x7_0004;
    pub const FRAG_ALPHA_TEST: u32 = 0x7_0008;
    pub const FRAG_FRONT_STENCIL: u32 = 0x7_000c;
    pub const FRAG_BACK_STENCIL: u32 = 0x7_0010;
    pub const FRAG_DEPTH_TEST: u32 = 0x7_0014;
    pub const FRAG_BLEND_COLOR: u32 = 0x7_0018;
    pub const FRAG_BLEND: u32 = 0x7_001c;
    pub const FRAG_LOGIC_OP: u32 = 0x7_0020;
    pub const FRAG_COLOR_MASK: u32 = 0x7_0024;
    pub const FRAG_DEPTH_MASK: u32 = 0x7_0028;
    pub const FRAG_FB_CONTROL: u32 = 0x7_002c;
    pub const FRAG_DEPTH_ADDR: u32 = 0x7_0030;
    pub const FRAG_COLOR_ADDR: u32 = 0x7_0034;
    pub const FRAG_FB_WIDTH: u32 = 0x7_0038;
}

use registers::*;

/// Vertex attributes handled by the host interface.
pub const ATTRIB_COUNT: usize = 10;

/// Largest coordinate the clipping registers accept.
pub const MAX_CLIP_COORD: u32 = 2048;

/// A register block stored as consecutive 32-bit words.
pub(crate) trait RegisterBlock: Pod {
    /// Word index of `address` inside the block.
    fn index_of(address: u32) -> Option<usize>;

    fn slot(&self, address: u32) -> Option<u32> {
        let index = Self::index_of(address)?;
        bytemuck::try_cast_slice::<u8, u32>(bytemuck::bytes_of(self))
            .ok()?
            .get(index)
            .copied()
    }

    fn slot_mut(&mut self, address: u32) -> Option<&mut u32> {
        let index = Self::index_of(address)?;
        bytemuck::try_cast_slice_mut::<u8, u32>(bytemuck::bytes_of_mut(self))
            .ok()?
            .get_mut(index)
    }
}

fn position(table: &[u32], address: u32) -> Option<usize> {
    table.iter().position(|&a| a == address)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GlobalState {
    pub pipe_state: u32,
    pub cache_control: u32,
    pub pipe_mask: u32,
    pub pipe_target: u32,
}

impl GlobalState {
    const ADDRESSES: [u32; 4] = [
        GLOBAL_PIPE_STATE,
        GLOBAL_CACHE_CTL,
        GLOBAL_PIPE_MASK,
        GLOBAL_PIPE_TARGET,
    ];
}

impl RegisterBlock for GlobalState {
    fn index_of(address: u32) -> Option<usize> {
        position(&Self::ADDRESSES, address)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct HostState {
    pub control: u32,
    pub index_offset: u32,
    pub vb_addr: u32,
    pub attrib: [u32; ATTRIB_COUNT],
    pub vb_control: [u32; ATTRIB_COUNT],
    pub vb_base: [u32; ATTRIB_COUNT],
}

impl RegisterBlock for HostState {
    fn index_of(address: u32) -> Option<usize> {
        let array = |base: u32| {
            let offset = address.checked_sub(base)?;
            let slot = (offset / 4) as usize;
            (offset % 4 == 0 && slot < ATTRIB_COUNT).then_some(slot)
        };
        match address {
            HOST_CONTROL => Some(0),
            HOST_INDEX_OFFSET => Some(1),
            HOST_VB_ADDR => Some(2),
            _ => array(HOST_ATTRIB_BASE)
                .map(|i| 3 + i)
                .or_else(|| array(HOST_VB_CTRL_BASE).map(|i| 3 + ATTRIB_COUNT + i))
                .or_else(|| array(HOST_VB_BASE_BASE).map(|i| 3 + 2 * ATTRIB_COUNT + i)),
        }
    }
}

/// Primitive engine state. Viewport and depth range values are `f32` bits.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PrimitiveState {
    pub vertex_context: u32,
    pub viewport_ox: u32,
    pub viewport_oy: u32,
    pub viewport_half_px: u32,
    pub viewport_half_py: u32,
    pub depth_half_sub: u32,
    pub depth_half_add: u32,
}

impl PrimitiveState {
    const ADDRESSES: [u32; 7] = [
        PRIM_VERTEX_CONTEXT,
        PRIM_VIEWPORT_OX,
        PRIM_VIEWPORT_OY,
        PRIM_VIEWPORT_HALF_PX,
        PRIM_VIEWPORT_HALF_PY,
        PRIM_DEPTH_HALF_SUB,
        PRIM_DEPTH_HALF_ADD,
    ];
}

impl RegisterBlock for PrimitiveState {
    fn index_of(address: u32) -> Option<usize> {
        position(&Self::ADDRESSES, address)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RasterizerState {
    pub sampling: u32,
    pub depth_offset_enable: u32,
    pub depth_offset_factor: u32,
    pub depth_offset_units: u32,
    pub backface_cull: u32,
    pub y_clip: u32,
    pub point_width: u32,
    pub point_size_min: u32,
    pub point_size_max: u32,
    pub coord_replace: u32,
    pub line_width: u32,
    pub lod_control: u32,
    pub x_clip: u32,
}

impl RasterizerState {
    const ADDRESSES: [u32; 13] = [
        RASTER_PIX_SAMP,
        RASTER_DOFF_ENABLE,
        RASTER_DOFF_FACTOR,
        RASTER_DOFF_UNITS,
        RASTER_BACKFACE_CULL,
        RASTER_YCLIP,
        RASTER_POINT_WIDTH,
        RASTER_POINT_SIZE_MIN,
        RASTER_POINT_SIZE_MAX,
        RASTER_COORD_REPLACE,
        RASTER_LINE_WIDTH,
        RASTER_LOD_CTL,
        RASTER_XCLIP,
    ];
}

impl RegisterBlock for RasterizerState {
    fn index_of(address: u32) -> Option<usize> {
        position(&Self::ADDRESSES, address)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct FragmentState {
    pub scissor_x: u32,
    pub scissor_y: u32,
    pub alpha_test: u32,
    pub front_stencil: u32,
    pub back_stencil: u32,
    pub depth_test: u32,
    pub blend_color: u32,
    pub blend: u32,
    pub logic_op: u32,
    pub color_mask: u32,
    pub depth_mask: u32,
    pub fb_control: u32,
    pub depth_addr: u32,
    pub color_addr: u32,
    pub fb_width: u32,
}

impl FragmentState {
    const ADDRESSES: [u32; 15] = [
        FRAG_SCISSOR_X,
        FRAG_SCISSOR_Y,
        FRAG_ALPHA_TEST,
        FRAG_FRONT_STENCIL,
        FRAG_BACK_STENCIL,
        FRAG_DEPTH_TEST,
        FRAG_BLEND_COLOR,
        FRAG_BLEND,
        FRAG_LOGIC_OP,
        FRAG_COLOR_MASK,
        FRAG_DEPTH_MASK,
        FRAG_FB_CONTROL,
        FRAG_DEPTH_ADDR,
        FRAG_COLOR_ADDR,
        FRAG_FB_WIDTH,
    ];
}

impl RegisterBlock for FragmentState {
    fn index_of(address: u32) -> Option<usize> {
        position(&Self::ADDRESSES, address)
    }
}

/// Complete shadow state, in state-init request layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct HardwareState {
    pub global: GlobalState,
    pub host: HostState,
    pub primitive: PrimitiveState,
    pub rasterizer: RasterizerState,
    pub fragment: FragmentState,
}

static_assertions::assert_eq_size!(HardwareState, [u32; 4 + 33 + 7 + 13 + 15]);

impl HardwareState {
    /// Record a register write. Returns `false` for addresses the shadow
    /// state does not track.
    pub fn store(&mut self, address: u32, value: u32) -> bool {
        let slot = self
            .global
            .slot_mut(address)
            .or_else(|| self.host.slot_mut(address))
            .or_else(|| self.primitive.slot_mut(address))
            .or_else(|| self.rasterizer.slot_mut(address))
            .or_else(|| self.fragment.slot_mut(address));
        match slot {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Current value of a tracked register.
    pub fn load(&self, address: u32) -> Option<u32> {
        self.global
            .slot(address)
            .or_else(|| self.host.slot(address))
            .or_else(|| self.primitive.slot(address))
            .or_else(|| self.rasterizer.slot(address))
            .or_else(|| self.fragment.slot(address))
    }

    /// State bytes sent with a state-init request.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Reset values of the global block.
pub fn create_global_state(state: &mut GlobalState) {
    *state = GlobalState::zeroed();
    log::trace!("Global block initialized");
}

/// Reset values of the host interface: no attributes enabled.
pub fn create_host_state(state: &mut HostState) {
    *state = HostState::zeroed();
    log::trace!("Host interface block initialized");
}

/// Reset values of the primitive engine: identity depth range.
pub fn create_primitive_state(state: &mut PrimitiveState) {
    *state = PrimitiveState {
        depth_half_sub: 0.5f32.to_bits(),
        depth_half_add: 0.5f32.to_bits(),
        ..PrimitiveState::zeroed()
    };
    log::trace!("Primitive engine block initialized");
}

/// Reset values of the raster engine: unit point and line sizes, clipping
/// open to the full coordinate range.
pub fn create_rasterizer_state(state: &mut RasterizerState) {
    *state = RasterizerState {
        point_width: 1.0f32.to_bits(),
        point_size_min: 1.0f32.to_bits(),
        point_size_max: (MAX_CLIP_COORD as f32).to_bits(),
        line_width: 1.0f32.to_bits(),
        x_clip: MAX_CLIP_COORD << 16,
        y_clip: MAX_CLIP_COORD << 16,
        ..RasterizerState::zeroed()
    };
    log::trace!("Raster engine block initialized");
}

/// Reset values of the per-fragment unit: scissor open, all color channels
/// writable.
pub fn create_fragment_state(state: &mut FragmentState) {
    *state = FragmentState {
        scissor_x: MAX_CLIP_COORD << 16,
        scissor_y: MAX_CLIP_COORD << 16,
        ..FragmentState::zeroed()
    };
    log::trace!("Per-fragment block initialized");
}
