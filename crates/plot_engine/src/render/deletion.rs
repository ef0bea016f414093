//! Deferred deletion ring for GPU buffers
//!
//! Destroying a buffer the GPU might still be reading is made impossible
//! without a global stall: retired handles are stamped with the frame
//! counter and only freed once enough frames have elapsed that no in-flight
//! command buffer can reference them.

use crate::render::api::{BufferHandle, RenderBackend};

/// Frames whose GPU work may be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Extra ring slots beyond the in-flight depth. Two slots of headroom are
/// sufficient because `begin_frame` has already waited on the fence for
/// frame `N - frames_in_flight` before the ring is flushed.
const RING_HEADROOM: usize = 2;

#[derive(Debug)]
struct PendingDelete {
    handle: BufferHandle,
    frame_stamp: u64,
}

/// Fixed-depth delay queue for GPU buffer destruction.
///
/// Invariant: a handle retired at frame `F` is never freed before frame
/// `F + frames_in_flight`, and is always freed by frame `F + ring_size`.
pub struct DeletionRing {
    slots: Vec<Vec<PendingDelete>>,
    frames_in_flight: u64,
    current_frame: u64,
}

impl DeletionRing {
    pub fn new(frames_in_flight: usize) -> Self {
        let ring_size = frames_in_flight + RING_HEADROOM;
        Self {
            slots: (0..ring_size).map(|_| Vec::new()).collect(),
            frames_in_flight: frames_in_flight as u64,
            current_frame: 0,
        }
    }

    /// Monotonic frame counter, advanced once per `begin_frame`.
    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    /// Schedule a buffer for destruction, stamped with the current frame.
    pub fn retire(&mut self, handle: BufferHandle) {
        let slot = (self.current_frame % self.slots.len() as u64) as usize;
        self.slots[slot].push(PendingDelete {
            handle,
            frame_stamp: self.current_frame,
        });
    }

    /// Advance the frame counter and free everything that has aged out.
    /// Called once per frame, immediately after the in-flight fence wait in
    /// `begin_frame`.
    pub fn begin_frame(&mut self, backend: &mut dyn RenderBackend) {
        self.current_frame += 1;
        self.flush(backend, false);
    }

    /// Free every entry older than the in-flight depth. With
    /// `force_all = true` (shutdown only, after a device idle-wait) frees
    /// everything regardless of stamp.
    pub fn flush(&mut self, backend: &mut dyn RenderBackend, force_all: bool) {
        let current = self.current_frame;
        let depth = self.frames_in_flight;
        for slot in &mut self.slots {
            slot.retain(|entry| {
                let expired = force_all || current - entry.frame_stamp >= depth;
                if expired {
                    backend.destroy_buffer(entry.handle);
                }
                !expired
            });
        }
    }

    /// Shutdown path: idle-wait the device, then drain the whole ring.
    pub fn drain(&mut self, backend: &mut dyn RenderBackend) {
        backend.wait_idle();
        self.flush(backend, true);
    }

    /// Number of handles still waiting to be freed.
    pub fn pending(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::MockBackend;
    use crate::render::api::BufferUsage;

    fn make_buffer(backend: &mut MockBackend) -> BufferHandle {
        backend.create_buffer_direct(BufferUsage::Vertex, 64)
    }

    #[test]
    fn retired_handle_survives_in_flight_window() {
        let mut backend = MockBackend::new();
        let mut ring = DeletionRing::new(MAX_FRAMES_IN_FLIGHT);

        let handle = make_buffer(&mut backend);
        ring.retire(handle); // frame 0

        // Frames 1 within the in-flight window: must not be freed.
        ring.begin_frame(&mut backend);
        assert!(backend.is_buffer_alive(handle));
        assert_eq!(ring.pending(), 1);

        // Frame 2 = F + frames_in_flight: now eligible.
        ring.begin_frame(&mut backend);
        assert!(!backend.is_buffer_alive(handle));
        assert_eq!(ring.pending(), 0);
    }

    #[test]
    fn freed_by_ring_size_frames() {
        let mut backend = MockBackend::new();
        let mut ring = DeletionRing::new(MAX_FRAMES_IN_FLIGHT);
        let ring_size = MAX_FRAMES_IN_FLIGHT + RING_HEADROOM;

        let handle = make_buffer(&mut backend);
        ring.retire(handle);
        for _ in 0..ring_size {
            ring.begin_frame(&mut backend);
        }
        assert!(!backend.is_buffer_alive(handle));
    }

    #[test]
    fn stamps_are_per_entry_not_per_slot() {
        let mut backend = MockBackend::new();
        let mut ring = DeletionRing::new(MAX_FRAMES_IN_FLIGHT);

        let first = make_buffer(&mut backend);
        ring.retire(first); // frame 0
        ring.begin_frame(&mut backend); // frame 1
        let second = make_buffer(&mut backend);
        ring.retire(second); // frame 1

        ring.begin_frame(&mut backend); // frame 2: first expires, second does not
        assert!(!backend.is_buffer_alive(first));
        assert!(backend.is_buffer_alive(second));

        ring.begin_frame(&mut backend); // frame 3: second expires
        assert!(!backend.is_buffer_alive(second));
    }

    #[test]
    fn drain_idle_waits_then_frees_everything() {
        let mut backend = MockBackend::new();
        let mut ring = DeletionRing::new(MAX_FRAMES_IN_FLIGHT);

        let a = make_buffer(&mut backend);
        let b = make_buffer(&mut backend);
        ring.retire(a);
        ring.begin_frame(&mut backend);
        ring.retire(b);

        ring.drain(&mut backend);
        assert_eq!(backend.wait_idle_calls(), 1);
        assert!(!backend.is_buffer_alive(a));
        assert!(!backend.is_buffer_alive(b));
        assert_eq!(ring.pending(), 0);
    }
}
