//! Monotonic-time driven interpolation helpers.
//!
//! Every animated value in the compositor (view focus borders, map-in,
//! viewport snaps) is a [`Timeline`]: a start timestamp plus a cached
//! progress in `[0, 1]`. The frame loop ticks all timelines once per
//! frame with the same `now` so that animations started in the same
//! callback share a start time.

/// Cubic ease-out: fast start, settles smoothly.
pub fn ease_out_cubic(t: f64) -> f64 {
    let inv = 1.0 - t;
    1.0 - inv * inv * inv
}

/// Duration of the focus border fade and the map-in animation.
pub const VIEW_ANIM_MS: u64 = 200;
/// Duration of a viewport snap.
pub const SNAP_ANIM_MS: u64 = 800;

/// A single animation record.
///
/// `progress` is the raw linear progress; callers apply the easing
/// themselves so the same record can drive differently-eased values.
#[derive(Debug, Default, Clone, Copy)]
pub struct Timeline {
    pub active: bool,
    pub start_ms: u64,
    pub progress: f64,
}

impl Timeline {
    /// (Re)start the timeline at `now_ms` with progress 0.
    pub fn start(&mut self, now_ms: u64) {
        self.active = true;
        self.start_ms = now_ms;
        self.progress = 0.0;
    }

    /// Finish immediately, leaving the value at its end state.
    pub fn finish(&mut self) {
        self.active = false;
        self.progress = 1.0;
    }

    /// Reset to the inactive, never-started state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Advance to `now_ms`. Inactive or completed records are skipped.
    /// Returns true while the record still animates after this tick.
    pub fn tick(&mut self, now_ms: u64, duration_ms: u64) -> bool {
        if !self.active {
            return false;
        }
        let elapsed = now_ms.saturating_sub(self.start_ms) as f64;
        let t = (elapsed / duration_ms as f64).clamp(0.0, 1.0);
        self.progress = t;
        if t >= 1.0 {
            self.active = false;
        }
        self.active
    }

    /// Eased progress, for consumers that want the default curve.
    pub fn eased(&self) -> f64 {
        ease_out_cubic(self.progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ease_endpoints() {
        assert_eq!(ease_out_cubic(0.0), 0.0);
        assert_eq!(ease_out_cubic(1.0), 1.0);
    }

    #[test]
    fn ease_is_monotonic() {
        let mut last = 0.0;
        for i in 0..=100 {
            let v = ease_out_cubic(i as f64 / 100.0);
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn tick_clamps_and_completes() {
        let mut tl = Timeline::default();
        tl.start(1_000);
        assert!(tl.tick(1_100, VIEW_ANIM_MS));
        assert!((tl.progress - 0.5).abs() < 1e-9);
        // Far past the end: clamped to 1 and deactivated.
        assert!(!tl.tick(10_000, VIEW_ANIM_MS));
        assert_eq!(tl.progress, 1.0);
        // Completed records stay inert.
        assert!(!tl.tick(20_000, VIEW_ANIM_MS));
    }

    #[test]
    fn inactive_records_are_skipped() {
        let mut tl = Timeline {
            active: false,
            start_ms: 0,
            progress: 0.25,
        };
        assert!(!tl.tick(5_000, VIEW_ANIM_MS));
        assert_eq!(tl.progress, 0.25);
    }
}
