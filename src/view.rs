//! A view: one mapped xdg toplevel placed on the canvas.
//!
//! The server owns the ordered view list (head = top of the z-stack and
//! keyboard focus target); this module is the per-view record: canvas
//! position, cached geometry offset, the focus/map animation records
//! and the interactive-move state. The list operations themselves
//! (focus, raise, create, destroy) live on the server state.

use smithay::utils::{Logical, Point, Rectangle, Size};
use smithay::wayland::compositor::with_states;
use smithay::wayland::shell::xdg::{SurfaceCachedState, ToplevelSurface};

use crate::animation::Timeline;
use crate::canvas::Canvas;

/// Border thickness in canvas units; scales with the zoom.
pub const BORDER_WIDTH: f64 = 4.0;
/// Corner radius of the border/content rounding, canvas units.
pub const CORNER_RADIUS: f64 = 12.0;

pub const FOCUSED_BORDER: [f32; 4] = [0.35, 0.55, 0.95, 1.0];
pub const UNFOCUSED_BORDER: [f32; 4] = [0.28, 0.28, 0.28, 1.0];

/// Scale the map-in animation starts from.
const MAP_START_SCALE: f64 = 0.9;

#[derive(Debug)]
pub struct View {
    /// Stable id, never reused within a session.
    pub id: u64,
    pub toplevel: ToplevelSurface,
    /// Canvas position of the top-left of the content rectangle.
    pub position: Point<f64, Logical>,
    /// Cached geometry offset; non-zero for clients drawing their own
    /// shadows around the content.
    pub geo_offset: Point<i32, Logical>,
    pub focused: bool,
    pub focus_anim: Timeline,
    pub map_anim: Timeline,
    /// Whether the client has committed its first buffer yet.
    pub mapped: bool,
    pub is_moving: bool,
    move_grab_cursor: Point<f64, Logical>,
    move_grab_position: Point<f64, Logical>,
}

impl View {
    pub fn new(id: u64, toplevel: ToplevelSurface) -> Self {
        Self {
            id,
            toplevel,
            position: (0.0, 0.0).into(),
            geo_offset: (0, 0).into(),
            focused: false,
            // Progress 1 so an unfocused view that never animated shows
            // the settled unfocused border.
            focus_anim: Timeline {
                active: false,
                start_ms: 0,
                progress: 1.0,
            },
            map_anim: Timeline::default(),
            mapped: false,
            is_moving: false,
            move_grab_cursor: (0.0, 0.0).into(),
            move_grab_position: (0.0, 0.0).into(),
        }
    }

    /// The window geometry (content rectangle) the client announced,
    /// falling back to the surface bounding box before the first
    /// xdg_surface.set_window_geometry.
    pub fn geometry(&self) -> Rectangle<i32, Logical> {
        let surface = self.toplevel.wl_surface();
        with_states(surface, |states| {
            states.cached_state.current::<SurfaceCachedState>().geometry
        })
        .unwrap_or_else(|| {
            smithay::desktop::utils::bbox_from_surface_tree(surface, (0, 0))
        })
    }

    /// Canvas coordinates of the content centre.
    pub fn centre(&self) -> Point<f64, Logical> {
        let geo = self.geometry();
        Point::from((
            self.position.x + geo.size.w as f64 / 2.0,
            self.position.y + geo.size.h as f64 / 2.0,
        ))
    }

    pub fn set_centre(&mut self, centre: Point<f64, Logical>) {
        let geo = self.geometry();
        self.position = Point::from((
            centre.x - geo.size.w as f64 / 2.0,
            centre.y - geo.size.h as f64 / 2.0,
        ));
    }

    /// Rendered bounds in screen space, used by the hit-tester.
    pub fn screen_rect(&self, canvas: &Canvas) -> Rectangle<f64, Logical> {
        let geo = self.geometry();
        let loc = canvas.to_screen(self.position);
        Rectangle::from_loc_and_size(
            loc,
            (
                geo.size.w as f64 * canvas.scale(),
                geo.size.h as f64 * canvas.scale(),
            ),
        )
    }

    pub fn move_begin(&mut self, cursor_canvas: Point<f64, Logical>) {
        self.is_moving = true;
        self.move_grab_cursor = cursor_canvas;
        self.move_grab_position = self.position;
    }

    pub fn move_update(&mut self, cursor_canvas: Point<f64, Logical>) {
        if self.is_moving {
            self.position = grabbed_position(
                self.move_grab_position,
                self.move_grab_cursor,
                cursor_canvas,
            );
        }
    }

    pub fn move_end(&mut self) {
        self.is_moving = false;
    }

    /// Mark the first buffer commit: the view becomes visible and the
    /// map-in animation starts.
    pub fn mark_mapped(&mut self, now_ms: u64) {
        self.mapped = true;
        self.map_anim.start(now_ms);
    }

    /// Unmap clears the animation immediately; there is no exit
    /// animation in this release.
    pub fn mark_unmapped(&mut self) {
        self.mapped = false;
        self.map_anim.reset();
    }

    /// Current content scale from the map-in animation (0.9 -> 1.0,
    /// about the window centre).
    pub fn map_scale(&self) -> f64 {
        if self.map_anim.active {
            MAP_START_SCALE + (1.0 - MAP_START_SCALE) * self.map_anim.eased()
        } else {
            1.0
        }
    }

    /// Current opacity from the map-in animation.
    pub fn map_alpha(&self) -> f32 {
        if self.map_anim.active {
            self.map_anim.eased() as f32
        } else {
            1.0
        }
    }

    /// Border colour, interpolating towards the focused or unfocused
    /// colour depending on the animation direction.
    pub fn border_color(&self) -> [f32; 4] {
        let t = self.focus_anim.eased() as f32;
        if self.focused {
            lerp_rgba(UNFOCUSED_BORDER, FOCUSED_BORDER, t)
        } else {
            lerp_rgba(FOCUSED_BORDER, UNFOCUSED_BORDER, t)
        }
    }

    /// Advance both animation records; true while any is still running.
    pub fn update_animations(&mut self, now_ms: u64) -> bool {
        let focus = self.focus_anim.tick(now_ms, crate::animation::VIEW_ANIM_MS);
        let map = self.map_anim.tick(now_ms, crate::animation::VIEW_ANIM_MS);
        focus || map
    }

    pub fn send_close(&self) {
        self.toplevel.send_close();
    }
}

/// Move-gesture position: the cursor delta since the grab, applied to
/// the grab-time view position. Everything in canvas units.
pub fn grabbed_position(
    grab_position: Point<f64, Logical>,
    grab_cursor: Point<f64, Logical>,
    cursor: Point<f64, Logical>,
) -> Point<f64, Logical> {
    Point::from((
        grab_position.x + (cursor.x - grab_cursor.x),
        grab_position.y + (cursor.y - grab_cursor.y),
    ))
}

/// Canvas position that puts a window of `size` centred in the
/// screen-space `usable` rectangle (the output minus panels/docks).
pub fn centred_position(
    usable: Rectangle<i32, Logical>,
    canvas: &Canvas,
    size: Size<i32, Logical>,
) -> Point<f64, Logical> {
    let centre_screen = Point::from((
        usable.loc.x as f64 + usable.size.w as f64 / 2.0,
        usable.loc.y as f64 + usable.size.h as f64 / 2.0,
    ));
    let centre_canvas = canvas.to_canvas(centre_screen);
    Point::from((
        centre_canvas.x - size.w as f64 / 2.0,
        centre_canvas.y - size.h as f64 / 2.0,
    ))
}

fn lerp_rgba(from: [f32; 4], to: [f32; 4], t: f32) -> [f32; 4] {
    let mut out = [0.0; 4];
    for i in 0..4 {
        out[i] = from[i] + (to[i] - from[i]) * t;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_centring() {
        // Usable area (0,0,1920,1080), identity canvas, 800x600
        // window -> position (560, 240).
        let canvas = Canvas::default();
        let usable = Rectangle::from_loc_and_size((0, 0), (1920, 1080));
        let pos = centred_position(usable, &canvas, Size::from((800, 600)));
        assert!((pos.x - 560.0).abs() < 1e-9);
        assert!((pos.y - 240.0).abs() < 1e-9);
    }

    #[test]
    fn map_centring_respects_panels_and_zoom() {
        let mut canvas = Canvas::default();
        canvas.zoom(2.0, (0.0, 0.0).into());
        // A 30px top panel shifts the usable area down.
        let usable = Rectangle::from_loc_and_size((0, 30), (1920, 1050));
        let pos = centred_position(usable, &canvas, Size::from((400, 400)));
        // Screen centre of the usable area is (960, 555); at scale 2
        // that is canvas (480, 277.5).
        assert!((pos.x - (480.0 - 200.0)).abs() < 1e-9);
        assert!((pos.y - (277.5 - 200.0)).abs() < 1e-9);
    }

    #[test]
    fn grab_moves_with_cursor_delta() {
        let pos = grabbed_position(
            (100.0, 100.0).into(),
            (500.0, 500.0).into(),
            (520.0, 470.0).into(),
        );
        assert_eq!(pos, Point::from((120.0, 70.0)));
    }

    #[test]
    fn border_lerp_endpoints() {
        assert_eq!(lerp_rgba(UNFOCUSED_BORDER, FOCUSED_BORDER, 0.0), UNFOCUSED_BORDER);
        assert_eq!(lerp_rgba(UNFOCUSED_BORDER, FOCUSED_BORDER, 1.0), FOCUSED_BORDER);
    }
}
