//! Freehand annotation over the canvas.
//!
//! Strokes are polylines in canvas space, so they pan and zoom with the
//! world. The module owns the committed/redo stacks and the little
//! colour palette shown while drawing mode is active; turning either
//! into pixels is the render pipeline's job, via [`stroke_squares`] and
//! the palette geometry helpers.

use smithay::utils::{Logical, Point, Rectangle};

use crate::canvas::Canvas;

/// Points closer than this (canvas units) to the last kept point are
/// dropped while drawing.
pub const MIN_POINT_DISTANCE: f64 = 2.0;
/// Stroke width in canvas units.
pub const LINE_WIDTH: f64 = 4.0;
/// Screen-space step between the squares stamped along a segment.
const SEGMENT_STEP: f64 = 2.0;

/// The selectable palette, RGB.
pub const PALETTE: [[f32; 3]; 6] = [
    [0.89, 0.18, 0.20], // red
    [0.98, 0.63, 0.12], // orange
    [0.96, 0.87, 0.26], // yellow
    [0.30, 0.75, 0.36], // green
    [0.26, 0.52, 0.96], // blue
    [0.95, 0.95, 0.95], // white
];

const SWATCH_SIZE: i32 = 32;
const SWATCH_PAD: i32 = 8;
/// Screen position of the palette panel.
const PANEL_POS: (i32, i32) = (16, 16);

#[derive(Debug, Clone)]
pub struct Stroke {
    pub points: Vec<Point<f64, Logical>>,
    pub color: [f32; 3],
}

#[derive(Debug)]
pub struct DrawingState {
    /// Drawing mode toggled by the keybind; gates pointer behaviour.
    pub mode_active: bool,
    current: Option<Stroke>,
    strokes: Vec<Stroke>,
    redo: Vec<Stroke>,
    pub color: [f32; 3],
    /// Palette swatch currently under the cursor, for hover feedback.
    pub hovered_swatch: Option<usize>,
}

impl Default for DrawingState {
    fn default() -> Self {
        Self {
            mode_active: false,
            current: None,
            strokes: Vec::new(),
            redo: Vec::new(),
            color: PALETTE[0],
            hovered_swatch: None,
        }
    }
}

impl DrawingState {
    pub fn toggle_mode(&mut self) {
        self.mode_active = !self.mode_active;
        self.hovered_swatch = None;
        if !self.mode_active && self.is_drawing() {
            // Leaving drawing mode mid-stroke commits what we have.
            self.end_stroke();
        }
    }

    pub fn is_drawing(&self) -> bool {
        self.current.is_some()
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn current_stroke(&self) -> Option<&Stroke> {
        self.current.as_ref()
    }

    pub fn begin_stroke(&mut self, point: Point<f64, Logical>) {
        self.current = Some(Stroke {
            points: vec![point],
            color: self.color,
        });
    }

    /// Append a point, dropping it if it is within
    /// [`MIN_POINT_DISTANCE`] of the last kept one.
    pub fn add_point(&mut self, point: Point<f64, Logical>) {
        let Some(stroke) = self.current.as_mut() else {
            return;
        };
        let last = stroke.points[stroke.points.len() - 1];
        let dx = point.x - last.x;
        let dy = point.y - last.y;
        if (dx * dx + dy * dy).sqrt() > MIN_POINT_DISTANCE {
            stroke.points.push(point);
        }
    }

    /// Commit the in-progress stroke. Strokes with fewer than two kept
    /// points are discarded; a successful commit clears the redo stack.
    pub fn end_stroke(&mut self) {
        if let Some(stroke) = self.current.take() {
            if stroke.points.len() >= 2 {
                self.strokes.push(stroke);
                self.redo.clear();
            }
        }
    }

    /// Undo the newest stroke, or discard an in-progress one.
    pub fn undo(&mut self) {
        if self.current.take().is_some() {
            return;
        }
        if let Some(stroke) = self.strokes.pop() {
            self.redo.push(stroke);
        }
    }

    pub fn redo(&mut self) {
        if let Some(stroke) = self.redo.pop() {
            self.strokes.push(stroke);
        }
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.strokes.clear();
        self.redo.clear();
    }

    pub fn set_color(&mut self, index: usize) {
        if let Some(color) = PALETTE.get(index) {
            self.color = *color;
        }
    }

    /// Bounding rectangle of the palette panel, screen space.
    pub fn panel_rect() -> Rectangle<i32, Logical> {
        let w = SWATCH_PAD + PALETTE.len() as i32 * (SWATCH_SIZE + SWATCH_PAD);
        let h = SWATCH_SIZE + 2 * SWATCH_PAD;
        Rectangle::from_loc_and_size(PANEL_POS, (w, h))
    }

    pub fn swatch_rect(index: usize) -> Rectangle<i32, Logical> {
        Rectangle::from_loc_and_size(
            (
                PANEL_POS.0 + SWATCH_PAD + index as i32 * (SWATCH_SIZE + SWATCH_PAD),
                PANEL_POS.1 + SWATCH_PAD,
            ),
            (SWATCH_SIZE, SWATCH_SIZE),
        )
    }

    /// Palette swatch under a screen point, if any.
    pub fn swatch_at(point: Point<f64, Logical>) -> Option<usize> {
        (0..PALETTE.len()).find(|&i| Self::swatch_rect(i).to_f64().contains(point))
    }
}

/// Rasterise one stroke as screen-space squares: every segment is
/// sampled at uniform parameter steps (about [`SEGMENT_STEP`] screen
/// pixels apart) and a square of side `LINE_WIDTH * scale` is stamped
/// at each sample.
pub fn stroke_squares(stroke: &Stroke, canvas: &Canvas) -> Vec<Rectangle<f64, Logical>> {
    let side = LINE_WIDTH * canvas.scale();
    let half = side / 2.0;
    let mut squares = Vec::new();
    let mut stamp = |p: Point<f64, Logical>| {
        squares.push(Rectangle::from_loc_and_size(
            (p.x - half, p.y - half),
            (side, side),
        ));
    };

    let screen: Vec<Point<f64, Logical>> =
        stroke.points.iter().map(|&p| canvas.to_screen(p)).collect();
    for pair in screen.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let len = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
        let steps = (len / SEGMENT_STEP).ceil().max(1.0) as usize;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            stamp(Point::from((a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t)));
        }
    }
    squares
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f64, y: f64) -> Point<f64, Logical> {
        (x, y).into()
    }

    fn draw(state: &mut DrawingState, from: f64) {
        state.begin_stroke(pt(from, 0.0));
        state.add_point(pt(from + 10.0, 0.0));
        state.end_stroke();
    }

    #[test]
    fn undo_redo_ordering() {
        let mut state = DrawingState::default();
        draw(&mut state, 0.0); // A
        draw(&mut state, 100.0); // B
        draw(&mut state, 200.0); // C
        assert_eq!(state.strokes.len(), 3);

        state.undo();
        assert_eq!(state.strokes.len(), 2);
        assert_eq!(state.redo.len(), 1);

        state.undo();
        assert_eq!(state.strokes.len(), 1);
        assert_eq!(state.redo.len(), 2);

        state.redo();
        assert_eq!(state.strokes.len(), 2);
        assert_eq!(state.redo.len(), 1);
        // B came back in its original position.
        assert_eq!(state.strokes[1].points[0], pt(100.0, 0.0));

        // A new committed stroke clears the redo stack.
        draw(&mut state, 300.0);
        assert_eq!(state.strokes.len(), 3);
        assert!(state.redo.is_empty());
    }

    #[test]
    fn undo_discards_stroke_in_progress() {
        let mut state = DrawingState::default();
        draw(&mut state, 0.0);
        state.begin_stroke(pt(50.0, 50.0));
        state.undo();
        assert!(!state.is_drawing());
        // The committed stroke is untouched.
        assert_eq!(state.strokes.len(), 1);
        assert!(state.redo.is_empty());
    }

    #[test]
    fn points_are_decimated() {
        let mut state = DrawingState::default();
        state.begin_stroke(pt(0.0, 0.0));
        state.add_point(pt(1.0, 0.0)); // too close, dropped
        state.add_point(pt(1.9, 0.0)); // still too close
        state.add_point(pt(2.5, 0.0)); // kept
        state.add_point(pt(2.6, 0.0)); // close to the new anchor, dropped
        state.end_stroke();
        assert_eq!(state.strokes[0].points.len(), 2);
    }

    #[test]
    fn short_strokes_are_discarded() {
        let mut state = DrawingState::default();
        state.begin_stroke(pt(0.0, 0.0));
        state.add_point(pt(0.5, 0.5));
        state.end_stroke();
        assert!(state.strokes.is_empty());
        // Discarding must not clear redo.
        draw(&mut state, 0.0);
        state.undo();
        state.begin_stroke(pt(0.0, 0.0));
        state.end_stroke();
        assert_eq!(state.redo.len(), 1);
    }

    #[test]
    fn committed_strokes_have_at_least_two_points() {
        let mut state = DrawingState::default();
        for i in 0..5 {
            draw(&mut state, i as f64 * 30.0);
        }
        assert!(state.strokes().iter().all(|s| s.points.len() >= 2));
    }

    #[test]
    fn clear_on_empty_is_a_noop() {
        let mut state = DrawingState::default();
        state.clear();
        assert!(state.strokes.is_empty() && state.redo.is_empty());
    }

    #[test]
    fn swatch_hit_testing() {
        let rect = DrawingState::swatch_rect(2);
        let inside = pt(
            rect.loc.x as f64 + 5.0,
            rect.loc.y as f64 + 5.0,
        );
        assert_eq!(DrawingState::swatch_at(inside), Some(2));
        assert_eq!(DrawingState::swatch_at(pt(-10.0, -10.0)), None);
    }

    #[test]
    fn stroke_squares_scale_with_zoom() {
        let mut canvas = Canvas::default();
        canvas.zoom(2.0, pt(0.0, 0.0));
        let stroke = Stroke {
            points: vec![pt(0.0, 0.0), pt(10.0, 0.0)],
            color: PALETTE[0],
        };
        let squares = stroke_squares(&stroke, &canvas);
        assert!(!squares.is_empty());
        assert!((squares[0].size.w - LINE_WIDTH * 2.0).abs() < 1e-9);
    }
}
