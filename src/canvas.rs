//! The infinite canvas and its viewport.
//!
//! Views and annotation strokes live at coordinates in an unbounded 2D
//! canvas space. What ends up on screen is governed by two values: the
//! viewport top-left (in canvas units) and a zoom scale. The whole
//! transform algebra is
//!
//! ```text
//! screen = (canvas - viewport) * scale
//! canvas = screen / scale + viewport
//! ```
//!
//! Both spaces use `Point<f64, Logical>`: "screen" here means the
//! output's logical pixels, the same space the pointer location lives
//! in. The output's HiDPI factor is applied later by the render
//! pipeline.

use smithay::utils::{Logical, Point, Size};

use crate::animation::{ease_out_cubic, Timeline, SNAP_ANIM_MS};

pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 4.0;
/// Zoom factor applied per scroll notch.
pub const ZOOM_STEP: f64 = 1.03;

/// An in-flight viewport snap.
#[derive(Debug, Clone, Copy)]
struct Snap {
    timeline: Timeline,
    from: Point<f64, Logical>,
    to: Point<f64, Logical>,
}

/// A motion-driven pan gesture, recorded at gesture start.
#[derive(Debug, Clone, Copy)]
struct PanGesture {
    start_cursor: Point<f64, Logical>,
    start_viewport: Point<f64, Logical>,
}

#[derive(Debug)]
pub struct Canvas {
    /// Canvas coordinates of the screen's top-left corner.
    pub viewport: Point<f64, Logical>,
    /// Zoom level, always within [`MIN_SCALE`, `MAX_SCALE`].
    scale: f64,
    snap: Option<Snap>,
    pan: Option<PanGesture>,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            viewport: (0.0, 0.0).into(),
            scale: 1.0,
            snap: None,
            pan: None,
        }
    }
}

impl Canvas {
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn to_screen(&self, canvas: Point<f64, Logical>) -> Point<f64, Logical> {
        Point::from((
            (canvas.x - self.viewport.x) * self.scale,
            (canvas.y - self.viewport.y) * self.scale,
        ))
    }

    pub fn to_canvas(&self, screen: Point<f64, Logical>) -> Point<f64, Logical> {
        Point::from((
            screen.x / self.scale + self.viewport.x,
            screen.y / self.scale + self.viewport.y,
        ))
    }

    /// Zoom by `factor` keeping the canvas point under `focus_screen`
    /// exactly where it is on screen.
    pub fn zoom(&mut self, factor: f64, focus_screen: Point<f64, Logical>) {
        let new_scale = (self.scale * factor).clamp(MIN_SCALE, MAX_SCALE);
        if new_scale == self.scale {
            // Already saturated at this boundary.
            return;
        }
        let focus_canvas = self.to_canvas(focus_screen);
        self.scale = new_scale;
        self.viewport = Point::from((
            focus_canvas.x - focus_screen.x / new_scale,
            focus_canvas.y - focus_screen.y / new_scale,
        ));
    }

    pub fn pan_begin(&mut self, cursor: Point<f64, Logical>) {
        // A new drag takes over from any running snap.
        self.snap = None;
        self.pan = Some(PanGesture {
            start_cursor: cursor,
            start_viewport: self.viewport,
        });
    }

    pub fn pan_update(&mut self, cursor: Point<f64, Logical>) {
        if let Some(pan) = self.pan {
            self.viewport = Point::from((
                pan.start_viewport.x - (cursor.x - pan.start_cursor.x) / self.scale,
                pan.start_viewport.y - (cursor.y - pan.start_cursor.y) / self.scale,
            ));
        }
    }

    pub fn pan_end(&mut self) {
        self.pan = None;
    }

    /// Scroll-wheel panning: the screen-space delta divided by the scale.
    pub fn pan_delta(&mut self, dx: f64, dy: f64) {
        self.snap = None;
        self.viewport.x += dx / self.scale;
        self.viewport.y += dy / self.scale;
    }

    /// The canvas point currently at the centre of the screen.
    pub fn viewport_centre(&self, out_size: Size<i32, Logical>) -> Point<f64, Logical> {
        self.to_canvas(Point::from((
            out_size.w as f64 / 2.0,
            out_size.h as f64 / 2.0,
        )))
    }

    /// Start an animated pan so that `target` (canvas units) ends up at
    /// the centre of the screen.
    pub fn snap_to(&mut self, target: Point<f64, Logical>, out_size: Size<i32, Logical>, now_ms: u64) {
        let to = Point::from((
            target.x - out_size.w as f64 / 2.0 / self.scale,
            target.y - out_size.h as f64 / 2.0 / self.scale,
        ));
        let mut timeline = Timeline::default();
        timeline.start(now_ms);
        self.snap = Some(Snap {
            timeline,
            from: self.viewport,
            to,
        });
    }

    pub fn is_snapping(&self) -> bool {
        self.snap.is_some()
    }

    /// Advance the snap animation. Returns true while still animating.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        let Some(snap) = self.snap.as_mut() else {
            return false;
        };
        let animating = snap.timeline.tick(now_ms, SNAP_ANIM_MS);
        let t = ease_out_cubic(snap.timeline.progress);
        self.viewport = Point::from((
            snap.from.x + (snap.to.x - snap.from.x) * t,
            snap.from.y + (snap.to.y - snap.from.y) * t,
        ));
        if !animating {
            self.snap = None;
        }
        animating
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn pt(x: f64, y: f64) -> Point<f64, Logical> {
        (x, y).into()
    }

    #[test]
    fn transform_round_trip() {
        let mut canvas = Canvas::default();
        canvas.viewport = pt(123.5, -42.25);
        canvas.scale = 1.7;
        for &p in &[pt(0.0, 0.0), pt(400.0, 300.0), pt(-999.75, 12345.5)] {
            let rt = canvas.to_canvas(canvas.to_screen(p));
            assert!((rt.x - p.x).abs() < EPS && (rt.y - p.y).abs() < EPS);
            let rt = canvas.to_screen(canvas.to_canvas(p));
            assert!((rt.x - p.x).abs() < EPS && (rt.y - p.y).abs() < EPS);
        }
    }

    #[test]
    fn zoom_about_cursor() {
        // Viewport (0,0), scale 1, cursor (400,300), zoom by 2 ->
        // scale 2, viewport (200,150).
        let mut canvas = Canvas::default();
        canvas.zoom(2.0, pt(400.0, 300.0));
        assert!((canvas.scale - 2.0).abs() < EPS);
        assert!((canvas.viewport.x - 200.0).abs() < EPS);
        assert!((canvas.viewport.y - 150.0).abs() < EPS);
        let s = canvas.to_screen(pt(200.0, 150.0));
        assert!(s.x.abs() < EPS && s.y.abs() < EPS);
        let s = canvas.to_screen(pt(400.0, 300.0));
        assert!((s.x - 400.0).abs() < EPS && (s.y - 300.0).abs() < EPS);
    }

    #[test]
    fn zoom_keeps_focus_invariant() {
        let mut canvas = Canvas::default();
        canvas.viewport = pt(-50.0, 80.0);
        canvas.scale = 0.8;
        let focus = pt(640.0, 360.0);
        let before = canvas.to_canvas(focus);
        canvas.zoom(ZOOM_STEP, focus);
        let after = canvas.to_screen(before);
        assert!((after.x - focus.x).abs() < 1e-6);
        assert!((after.y - focus.y).abs() < 1e-6);
    }

    #[test]
    fn zoom_clamps_and_saturates() {
        let mut canvas = Canvas::default();
        canvas.zoom(100.0, pt(100.0, 100.0));
        assert_eq!(canvas.scale, MAX_SCALE);
        // Saturated boundary: a further zoom-in is a no-op, including
        // the viewport.
        let viewport = canvas.viewport;
        canvas.zoom(1.5, pt(500.0, 0.0));
        assert_eq!(canvas.scale, MAX_SCALE);
        assert_eq!(canvas.viewport, viewport);

        canvas.zoom(1e-6, pt(0.0, 0.0));
        assert_eq!(canvas.scale, MIN_SCALE);
    }

    #[test]
    fn pan_gesture_tracks_cursor() {
        let mut canvas = Canvas::default();
        canvas.scale = 2.0;
        canvas.pan_begin(pt(100.0, 100.0));
        canvas.pan_update(pt(150.0, 80.0));
        // Dragging right moves the viewport left, divided by the scale.
        assert!((canvas.viewport.x - -25.0).abs() < EPS);
        assert!((canvas.viewport.y - 10.0).abs() < EPS);
        canvas.pan_end();
        // pan_end is idempotent; further updates do nothing.
        canvas.pan_end();
        canvas.pan_update(pt(500.0, 500.0));
        assert!((canvas.viewport.x - -25.0).abs() < EPS);
    }

    #[test]
    fn scroll_pan_is_scale_compensated() {
        let mut canvas = Canvas::default();
        canvas.scale = 0.5;
        canvas.pan_delta(0.0, 15.0);
        assert!((canvas.viewport.y - 30.0).abs() < EPS);
    }

    #[test]
    fn snap_centres_target() {
        let mut canvas = Canvas::default();
        canvas.scale = 2.0;
        let out = Size::from((1920, 1080));
        canvas.snap_to(pt(100.0, 200.0), out, 0);
        // Drive to completion.
        assert!(!canvas.tick(SNAP_ANIM_MS));
        assert!(!canvas.is_snapping());
        let centre = canvas.viewport_centre(out);
        assert!((centre.x - 100.0).abs() < EPS);
        assert!((centre.y - 200.0).abs() < EPS);
    }

    #[test]
    fn snap_eases_out() {
        let mut canvas = Canvas::default();
        let out = Size::from((800, 600));
        canvas.snap_to(pt(1000.0, 0.0), out, 0);
        assert!(canvas.tick(SNAP_ANIM_MS / 2));
        // Cubic ease-out is past the halfway point at t = 0.5.
        let halfway_expected = 1.0 - 0.5f64.powi(3);
        let target_x = 1000.0 - 400.0;
        assert!((canvas.viewport.x - target_x * halfway_expected).abs() < 1e-6);
    }
}
