//! Time-based resize debounce
//!
//! An interactive drag produces a storm of resize events; recreating the
//! swapchain on every intermediate size is wasteful and visibly janky. A
//! resize callback only records the latest target size and a timestamp;
//! recreation fires once no new event has arrived for the quiescence
//! window.

use std::time::{Duration, Instant};

/// Default quiescence window before a recorded resize is acted on.
pub const DEFAULT_QUIESCENCE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
struct PendingResize {
    width: u32,
    height: u32,
    requested_at: Instant,
}

/// Per-window resize debounce state.
#[derive(Debug)]
pub struct ResizeDebounce {
    quiescence: Duration,
    pending: Option<PendingResize>,
}

impl ResizeDebounce {
    pub fn new(quiescence: Duration) -> Self {
        Self {
            quiescence,
            pending: None,
        }
    }

    /// Record a resize event. Later events overwrite earlier ones and
    /// restart the quiescence timer.
    pub fn record(&mut self, width: u32, height: u32, now: Instant) {
        self.pending = Some(PendingResize {
            width,
            height,
            requested_at: now,
        });
    }

    /// Returns the final target size once the quiescence window has elapsed
    /// with no further events, clearing the pending state.
    pub fn poll(&mut self, now: Instant) -> Option<(u32, u32)> {
        let pending = self.pending?;
        if now.duration_since(pending.requested_at) >= self.quiescence {
            self.pending = None;
            Some((pending.width, pending.height))
        } else {
            None
        }
    }

    /// A resize has been recorded and not yet acted on.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop any pending resize without acting on it (e.g. the swapchain was
    /// already recreated through the invalidation path).
    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

impl Default for ResizeDebounce {
    fn default() -> Self {
        Self::new(DEFAULT_QUIESCENCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_only_after_quiescence() {
        let mut debounce = ResizeDebounce::default();
        let start = Instant::now();

        debounce.record(400, 300, start);
        assert_eq!(debounce.poll(start + Duration::from_millis(10)), None);
        assert!(debounce.is_pending());
        assert_eq!(
            debounce.poll(start + Duration::from_millis(60)),
            Some((400, 300))
        );
        assert!(!debounce.is_pending());
    }

    #[test]
    fn storm_collapses_to_last_target() {
        let mut debounce = ResizeDebounce::default();
        let start = Instant::now();

        debounce.record(400, 300, start);
        debounce.record(1200, 900, start + Duration::from_millis(10));

        // 60 ms after the first event but only 50 ms after the last: the
        // timer restarted, so nothing fires yet.
        assert_eq!(debounce.poll(start + Duration::from_millis(55)), None);
        assert_eq!(
            debounce.poll(start + Duration::from_millis(61)),
            Some((1200, 900))
        );
        // Exactly one recreation target is ever produced.
        assert_eq!(debounce.poll(start + Duration::from_millis(200)), None);
    }

    #[test]
    fn cancel_discards_pending() {
        let mut debounce = ResizeDebounce::default();
        let start = Instant::now();
        debounce.record(800, 600, start);
        debounce.cancel();
        assert_eq!(debounce.poll(start + Duration::from_millis(100)), None);
    }
}
