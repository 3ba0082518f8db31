//! Binary layout of requests exchanged with the kernel device.
//!
//! All structures are `#[repr(C)]` and mirror the DRM/Exynos ioctl ABI. The
//! G3D submit request carries either a full register-state snapshot
//! ([`REQUEST_STATE_INIT`]) or an ordered list of `(address, value)` pairs
//! ([`REQUEST_STATE_BUFFER`]).

use bytemuck::{Pod, Zeroable};

/// Request kind: restore the whole hardware state from a snapshot.
pub const REQUEST_STATE_INIT: u32 = 0;
/// Request kind: apply a list of register writes.
pub const REQUEST_STATE_BUFFER: u32 = 1;

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const DRM_IOCTL_BASE: u32 = b'd' as u32;
const DRM_COMMAND_BASE: u32 = 0x40;

const DRM_EXYNOS_GEM_CREATE: u32 = 0x00;
const DRM_EXYNOS_GEM_MAP: u32 = 0x01;
const DRM_EXYNOS_G3D_SUBMIT: u32 = 0x20;
const DRM_EXYNOS_G3D_STATUS: u32 = 0x21;

/// Flags passed to PRIME export (`DRM_CLOEXEC | DRM_RDWR`).
pub const PRIME_EXPORT_FLAGS: u32 = 0o2000000 | 0o2;

const fn ioc(dir: u32, nr: u32, size: usize) -> u32 {
    (dir << 30) | ((size as u32) << 16) | (DRM_IOCTL_BASE << 8) | nr
}

const fn iow<T>(nr: u32) -> u32 {
    ioc(IOC_WRITE, nr, std::mem::size_of::<T>())
}

const fn iowr<T>(nr: u32) -> u32 {
    ioc(IOC_READ | IOC_WRITE, nr, std::mem::size_of::<T>())
}

pub const DRM_IOCTL_GEM_CLOSE: u32 = iow::<GemClose>(0x09);
pub const DRM_IOCTL_PRIME_HANDLE_TO_FD: u32 = iowr::<PrimeHandle>(0x2d);
pub const DRM_IOCTL_PRIME_FD_TO_HANDLE: u32 = iowr::<PrimeHandle>(0x2e);
pub const DRM_IOCTL_EXYNOS_GEM_CREATE: u32 =
    iowr::<GemCreate>(DRM_COMMAND_BASE + DRM_EXYNOS_GEM_CREATE);
pub const DRM_IOCTL_EXYNOS_GEM_MAP: u32 =
    iowr::<GemMapOffset>(DRM_COMMAND_BASE + DRM_EXYNOS_GEM_MAP);
pub const DRM_IOCTL_EXYNOS_G3D_SUBMIT: u32 =
    iow::<G3dSubmit>(DRM_COMMAND_BASE + DRM_EXYNOS_G3D_SUBMIT);
pub const DRM_IOCTL_EXYNOS_G3D_STATUS: u32 =
    iowr::<G3dStatus>(DRM_COMMAND_BASE + DRM_EXYNOS_G3D_STATUS);

/// `struct drm_exynos_gem_create`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct GemCreate {
    pub size: u64,
    pub flags: u32,
    pub handle: u32,
}

/// `struct drm_exynos_gem_map`: fake mmap offset of a GEM object.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct GemMapOffset {
    pub handle: u32,
    pub reserved: u32,
    pub offset: u64,
}

/// `struct drm_gem_close`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct GemClose {
    pub handle: u32,
    pub pad: u32,
}

/// `struct drm_prime_handle`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct PrimeHandle {
    pub handle: u32,
    pub flags: u32,
    pub fd: i32,
}

/// One G3D request: a typed payload and its length in bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct G3dRequest {
    pub kind: u32,
    pub length: u32,
    pub data: u64,
}

/// G3D submit header pointing at an array of [`G3dRequest`]s.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct G3dSubmit {
    pub requests: u64,
    pub nr_requests: u32,
    pub reserved: u32,
}

/// Pipeline status query: the kernel fills `busy` with the stages that still
/// have outstanding work (see [`PipelineStages`](super::PipelineStages)).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct G3dStatus {
    pub busy: u32,
    pub reserved: u32,
}

static_assertions::assert_eq_size!(GemCreate, [u8; 16]);
static_assertions::assert_eq_size!(GemMapOffset, [u8; 16]);
static_assertions::assert_eq_size!(GemClose, [u8; 8]);
static_assertions::assert_eq_size!(PrimeHandle, [u8; 12]);
static_assertions::assert_eq_size!(G3dRequest, [u8; 16]);
static_assertions::assert_eq_size!(G3dSubmit, [u8; 16]);
