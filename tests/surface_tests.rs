//! Surface buffer and render surface integration tests.
//!
//! # Test Categories
//!
//! - **Binding Tests**: bind/unbind state machine of local and external buffers
//! - **Release Tests**: every handle is released exactly once
//! - **Render Surface Tests**: depth buffer allocation and window surfaces

mod common;

use rstest::rstest;

use common::{FixedWindow, TestContext};
use fimg_driver::backend::DummyFault;
use fimg_driver::{
    create_window_surface, DisplayId, DriverError, NativeLayout, PixelFormat, RenderSurface,
    SurfaceBuffer, SurfaceError, SurfaceKind,
};

// ============================================================================
// Binding Tests
// ============================================================================

#[test]
fn test_bind_unbind_keeps_buffer_valid() {
    let t = TestContext::new();
    let mut buffer = SurfaceBuffer::local(4096);

    buffer.bind_context(&t.ctx).unwrap();
    assert!(buffer.is_valid());
    assert_eq!(buffer.owner(), Some(t.ctx.id()));

    buffer.unbind_context();
    assert!(buffer.is_valid());
    assert_eq!(buffer.owner(), None);

    // Second unbind is a no-op
    buffer.unbind_context();
    assert!(buffer.is_valid());
    assert_eq!(t.backend.live_handles(), 0);
    assert_eq!(t.backend.live_shared_handles(), 1);
}

#[rstest]
#[case::same_context(false)]
#[case::other_context(true)]
fn test_rebind_fails_without_allocation(#[case] other: bool) {
    let t = TestContext::new();
    let sibling = t.sibling();
    let mut buffer = SurfaceBuffer::local(4096);
    buffer.bind_context(&t.ctx).unwrap();
    let objects = t.backend.live_objects();
    let handles = t.backend.live_handles();

    let target = if other { &sibling } else { &t.ctx };
    match buffer.bind_context(target) {
        Err(DriverError::AlreadyBound(owner)) => assert_eq!(owner, t.ctx.id().get()),
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(t.backend.live_objects(), objects);
    assert_eq!(t.backend.live_handles(), handles);
    assert_eq!(buffer.owner(), Some(t.ctx.id()));
}

#[test]
fn test_rebind_after_unbind_reuses_storage() {
    let t = TestContext::new();
    let sibling = t.sibling();
    let mut buffer = SurfaceBuffer::local(256);
    buffer.bind_context(&t.ctx).unwrap();
    let shared = buffer.shared_handle();
    buffer.unbind_context();

    buffer.bind_context(&sibling).unwrap();
    assert_eq!(buffer.shared_handle(), shared);
    assert_eq!(buffer.owner(), Some(sibling.id()));
    assert_eq!(t.backend.live_objects(), 1);
}

#[rstest]
#[case::create(DummyFault::Create)]
#[case::export(DummyFault::Export)]
fn test_allocation_failure_leaves_nothing(#[case] fault: DummyFault) {
    let t = TestContext::new();
    t.backend.inject_fault(fault, 1);
    let mut buffer = SurfaceBuffer::local(4096);

    assert!(matches!(
        buffer.bind_context(&t.ctx),
        Err(DriverError::AllocationFailed(_))
    ));
    assert!(!buffer.is_valid());
    assert_eq!(t.backend.live_objects(), 0);
    assert_eq!(t.backend.live_handles(), 0);
}

#[rstest]
#[case::import(DummyFault::Import)]
#[case::map(DummyFault::Map)]
fn test_residency_failure_keeps_storage(#[case] fault: DummyFault) {
    let t = TestContext::new();
    t.backend.inject_fault(fault, 1);
    let mut buffer = SurfaceBuffer::local(4096);

    assert!(matches!(
        buffer.bind_context(&t.ctx),
        Err(DriverError::AllocationFailed(_))
    ));
    assert!(buffer.is_valid());
    assert!(!buffer.is_bound());
    assert_eq!(t.backend.live_handles(), 0);
}

#[test]
fn test_mapping_is_writable_while_bound() {
    let t = TestContext::new();
    let mut buffer = SurfaceBuffer::local(64);
    buffer.bind_context(&t.ctx).unwrap();

    buffer.mapped_mut().unwrap()[0..4].copy_from_slice(&[1, 2, 3, 4]);
    assert_eq!(&buffer.mapped().unwrap()[0..4], &[1, 2, 3, 4]);

    buffer.unbind_context();
    assert!(matches!(buffer.mapped(), Err(DriverError::NotBound)));
}

// ============================================================================
// Release Tests
// ============================================================================

#[test]
fn test_drop_while_bound_unbinds_first() {
    let t = TestContext::new();
    let mut buffer = SurfaceBuffer::local(4096);
    buffer.bind_context(&t.ctx).unwrap();
    let handle = buffer.object_handle().unwrap();
    drop(buffer);

    assert!(t.backend.destroyed_handles().contains(&handle));
    assert_eq!(t.backend.live_handles(), 0);
    assert_eq!(t.backend.live_shared_handles(), 0);
    assert_eq!(t.backend.live_objects(), 0);
}

#[test]
fn test_unbacked_drop_touches_nothing() {
    let t = TestContext::new();
    drop(SurfaceBuffer::local(4096));
    assert!(t.backend.destroyed_handles().is_empty());
}

#[test]
fn test_external_buffer_keeps_foreign_handle() {
    let t = TestContext::new();
    let shared = t.backend.adopt_external(2 * 4096);
    let mut buffer = SurfaceBuffer::external(shared, 4096, 4096);
    assert!(!buffer.is_local());
    assert!(buffer.is_valid());

    buffer.bind_context(&t.ctx).unwrap();
    assert!(matches!(
        buffer.bind_context(&t.ctx),
        Err(DriverError::AlreadyBound(_))
    ));
    buffer.unbind_context();
    buffer.unbind_context();
    drop(buffer);

    assert_eq!(t.backend.live_handles(), 0);
    assert_eq!(t.backend.live_shared_handles(), 1);
    assert_eq!(t.backend.shared_object_size(shared), Some(2 * 4096));
}

// ============================================================================
// Render Surface Tests
// ============================================================================

#[test]
fn test_depth_buffer_for_vga_surface() {
    let t = TestContext::new();
    let mut surface = RenderSurface::new(
        DisplayId(0),
        7,
        PixelFormat::Xrgb8888,
        Some(24),
        640,
        480,
        SurfaceKind::Offscreen,
    );
    surface.allocate(&t.ctx).unwrap();

    let depth = surface.depth_buffer().unwrap();
    assert_eq!(depth.size(), 1_228_800);
    assert!(depth.is_valid());
}

#[rstest]
#[case::with_depth(Some(24), true)]
#[case::without_depth(None, false)]
#[case::zero_format(Some(0), false)]
fn test_allocate_follows_depth_format(#[case] depth_format: Option<u32>, #[case] expected: bool) {
    let t = TestContext::new();
    let mut surface = RenderSurface::new(
        DisplayId(0),
        0,
        PixelFormat::Rgb565,
        depth_format,
        32,
        16,
        SurfaceKind::Offscreen,
    );
    surface.allocate(&t.ctx).unwrap();
    assert_eq!(surface.depth_buffer().is_some(), expected);
    if let Some(depth) = surface.depth_buffer() {
        assert_eq!(depth.size(), 32 * 16 * 4);
    }
}

#[rstest]
#[case::rgb565(PixelFormat::Rgb565, 0)]
#[case::xrgb8888(PixelFormat::Xrgb8888, 4)]
#[case::argb8888(PixelFormat::Argb8888, 11)]
fn test_window_surface_matches_native_format(#[case] format: PixelFormat, #[case] config: usize) {
    let t = TestContext::new();
    let window = FixedWindow::with_format(format, 800, 480);
    let mut surface =
        create_window_surface(DisplayId(0), config, format, Some(24), window).unwrap();

    assert_eq!(surface.pixel_format(), format);
    assert_eq!((surface.width(), surface.height()), (800, 480));
    assert!(matches!(surface.kind(), SurfaceKind::FramebufferWindow(_)));

    surface.allocate(&t.ctx).unwrap();
    assert_eq!(surface.depth_buffer().unwrap().size(), 800 * 480 * 4);
}

#[rstest]
#[case::config_mismatch(PixelFormat::Argb8888, 0)]
#[case::no_alpha_in_config(PixelFormat::Argb4444, 0)]
fn test_window_surface_bad_match(#[case] format: PixelFormat, #[case] config: usize) {
    let window = FixedWindow::with_format(format, 64, 64);
    let err = create_window_surface(DisplayId(0), config, format, None, window).unwrap_err();
    assert_eq!(err, SurfaceError::BadMatch);
}

#[test]
fn test_window_without_compatible_format() {
    // Packed 24-bit pixels are not a framebuffer format
    let window = Box::new(FixedWindow {
        layout: NativeLayout {
            bits_per_pixel: 24,
            ..PixelFormat::Xrgb8888.layout()
        },
        width: 64,
        height: 64,
    });
    let err = create_window_surface(DisplayId(0), 4, PixelFormat::Xrgb8888, None, window)
        .unwrap_err();
    assert_eq!(err, SurfaceError::BadMatch);
}

#[test]
fn test_out_of_memory_is_bad_alloc() {
    let t = TestContext::new();
    t.backend.inject_fault(DummyFault::Create, 1);
    let window = FixedWindow::with_format(PixelFormat::Rgb565, 64, 64);
    let mut surface = create_window_surface(DisplayId(0), 2, PixelFormat::Rgb565, Some(24), window)
        .unwrap();

    let err = surface.allocate(&t.ctx).unwrap_err();
    assert!(matches!(err, DriverError::OutOfMemory));
    assert_eq!(SurfaceError::from(err), SurfaceError::BadAlloc);
}

#[test]
fn test_zero_depth_format_allocates_nothing() {
    let t = TestContext::new();
    let window = FixedWindow::with_format(PixelFormat::Rgb565, 64, 64);
    let mut surface =
        create_window_surface(DisplayId(0), 2, PixelFormat::Rgb565, Some(0), window).unwrap();
    surface.allocate(&t.ctx).unwrap();
    assert!(surface.depth_buffer().is_none());
    assert_eq!(t.backend.live_objects(), 0);
}

#[test]
fn test_oversized_buffer_fails_to_map() {
    let t = TestContext::new();
    let mut buffer = SurfaceBuffer::local(1 << 63);
    assert!(matches!(
        buffer.bind_context(&t.ctx),
        Err(DriverError::AllocationFailed(_))
    ));
    assert!(!buffer.is_bound());
    assert_eq!(t.backend.live_handles(), 0);
}

#[test]
fn test_swap_flushes_pending_state() {
    let mut t = TestContext::new();
    let mut surface = RenderSurface::new(
        DisplayId(0),
        0,
        PixelFormat::Rgb565,
        None,
        16,
        16,
        SurfaceKind::Offscreen,
    );
    t.write_pairs(4);
    surface.swap_buffers(&mut t.ctx).unwrap();
    assert_eq!(t.ctx.pending_writes(), 0);
    assert_eq!(t.backend.submission_count(), 1);
}
