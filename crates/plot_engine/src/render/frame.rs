//! Frame lifecycle driver
//!
//! Orchestrates begin/end of a frame for the backend's active surface and
//! absorbs transient swapchain failures so the render loop only ever sees
//! "frame rendered" or "frame skipped". Device loss is the one terminal
//! condition and is reported as such.

use crate::render::api::{FrameStatus, RenderBackend};

/// Result of attempting to start a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginFrame {
    /// Image acquired; the caller may record and submit.
    Ready,
    /// Transient failure (out-of-date swapchain that could not be recovered
    /// within one retry, or a zero-sized framebuffer). Invisible to the end
    /// user; try again next tick.
    Skipped,
    /// Fatal. The caller must stop rendering on this surface.
    DeviceLost,
}

/// Result of finishing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFrame {
    Presented,
    /// Present reported out-of-date/suboptimal; the surface is marked
    /// invalidated and will be recreated at the start of the next frame,
    /// never mid-submission.
    Invalidated,
    DeviceLost,
}

/// Wait for the in-flight fence and acquire the next image.
///
/// If acquisition reports out-of-date, recreates the swapchain at the
/// best-known target size (the actual framebuffer size, not the
/// last-remembered one) and retries exactly once. A second failure is
/// surfaced as [`BeginFrame::Skipped`], not an error.
pub fn begin_frame(backend: &mut dyn RenderBackend) -> BeginFrame {
    if backend.is_device_lost() {
        return BeginFrame::DeviceLost;
    }

    match backend.begin_frame() {
        FrameStatus::Ready => BeginFrame::Ready,
        FrameStatus::DeviceLost => BeginFrame::DeviceLost,
        FrameStatus::OutOfDate => {
            let (width, height) = backend.framebuffer_extent();
            log::warn!(
                "swapchain out of date on acquire; recreating at {}x{}",
                width,
                height
            );
            if !backend.recreate_swapchain(width, height) {
                return BeginFrame::Skipped;
            }
            match backend.begin_frame() {
                FrameStatus::Ready => BeginFrame::Ready,
                FrameStatus::DeviceLost => BeginFrame::DeviceLost,
                FrameStatus::OutOfDate => {
                    log::warn!("swapchain still out of date after recreation; skipping frame");
                    BeginFrame::Skipped
                }
            }
        }
    }
}

/// Submit and present the frame recorded since [`begin_frame`].
pub fn end_frame(backend: &mut dyn RenderBackend) -> EndFrame {
    match backend.end_frame() {
        FrameStatus::Ready => EndFrame::Presented,
        FrameStatus::DeviceLost => EndFrame::DeviceLost,
        FrameStatus::OutOfDate => {
            log::debug!("present reported out of date; surface invalidated for next frame");
            EndFrame::Invalidated
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::MockBackend;

    #[test]
    fn clean_acquire_needs_no_recreation() {
        let mut backend = MockBackend::new();
        assert_eq!(begin_frame(&mut backend), BeginFrame::Ready);
        assert_eq!(backend.recreation_count(), 0);
    }

    #[test]
    fn single_acquire_failure_recovers_with_one_retry() {
        let mut backend = MockBackend::new();
        backend.fail_next_acquires(1);
        backend.set_framebuffer_extent(1024, 768);

        assert_eq!(begin_frame(&mut backend), BeginFrame::Ready);
        assert_eq!(backend.recreation_count(), 1);
        // Recreation targeted the actual framebuffer size.
        assert_eq!(backend.last_recreation_target(), Some((1024, 768)));
        assert_eq!(backend.begin_frame_calls(), 2);
    }

    #[test]
    fn double_acquire_failure_skips_without_panicking() {
        let mut backend = MockBackend::new();
        backend.fail_next_acquires(2);

        assert_eq!(begin_frame(&mut backend), BeginFrame::Skipped);
        // Exactly one retry: two acquire attempts, one recreation.
        assert_eq!(backend.begin_frame_calls(), 2);
        assert_eq!(backend.recreation_count(), 1);
    }

    #[test]
    fn failed_recreation_skips_without_second_acquire() {
        let mut backend = MockBackend::new();
        backend.fail_next_acquires(1);
        backend.fail_recreation(true);

        assert_eq!(begin_frame(&mut backend), BeginFrame::Skipped);
        assert_eq!(backend.begin_frame_calls(), 1);
    }

    #[test]
    fn device_lost_short_circuits() {
        let mut backend = MockBackend::new();
        backend.set_device_lost();

        assert_eq!(begin_frame(&mut backend), BeginFrame::DeviceLost);
        assert_eq!(backend.begin_frame_calls(), 0);
    }

    #[test]
    fn present_failure_defers_recreation() {
        let mut backend = MockBackend::new();
        assert_eq!(begin_frame(&mut backend), BeginFrame::Ready);
        backend.fail_next_present();

        assert_eq!(end_frame(&mut backend), EndFrame::Invalidated);
        // Recreation does not happen inside end_frame.
        assert_eq!(backend.recreation_count(), 0);
        assert!(backend.surface_invalidated());
    }
}
