//! The spatial alt-tab switcher.
//!
//! Activation picks the second view in the current z-order (the first
//! is the one already focused); next/prev cycle with wrap-around.
//! Confirming snaps the viewport so the chosen view's centre lands at
//! screen centre, then focuses and raises it. The overlay is a CPU
//! bitmap (rounded panel, one row per view title) re-rasterised only
//! when `dirty`, uploaded once as a texture and blitted at screen
//! centre every frame while active.

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use smithay::backend::allocator::Fourcc;
use smithay::backend::renderer::gles::{GlesRenderer, GlesTexture};
use smithay::backend::renderer::ImportMem;
use smithay::utils::{Physical, Size};
use tracing::{debug, warn};

/// Common system font locations, tried in order. Without any of them
/// the overlay still renders its panel and selection bar, just without
/// glyphs.
const FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
];

const FONT_PX: f32 = 18.0;
const ROW_HEIGHT: u32 = 32;
const PANEL_PAD: u32 = 16;
const PANEL_MIN_WIDTH: u32 = 320;
const PANEL_RADIUS: u32 = 12;

const PANEL_BG: [f32; 4] = [0.12, 0.12, 0.12, 0.92];
const ROW_SELECTED: [f32; 4] = [0.35, 0.55, 0.95, 0.9];
const TEXT_COLOR: [f32; 4] = [0.95, 0.95, 0.95, 1.0];

pub struct Switcher {
    pub active: bool,
    /// Index of the selected view in the z-order snapshot.
    pub selected: usize,
    dirty: bool,
    texture: Option<(GlesTexture, Size<i32, Physical>)>,
    font: Option<Option<FontVec>>,
}

impl Default for Switcher {
    fn default() -> Self {
        Self {
            active: false,
            selected: 0,
            dirty: false,
            texture: None,
            font: None,
        }
    }
}

impl Switcher {
    /// Activate over `view_count` views. With fewer than two there is
    /// nothing to switch to and the switcher stays inactive.
    pub fn activate(&mut self, view_count: usize) -> bool {
        if view_count < 2 {
            return false;
        }
        self.active = true;
        self.selected = 1;
        self.dirty = true;
        true
    }

    pub fn next(&mut self, view_count: usize) {
        if self.active && view_count > 0 {
            self.selected = (self.selected + 1) % view_count;
            self.dirty = true;
        }
    }

    pub fn prev(&mut self, view_count: usize) {
        if self.active && view_count > 0 {
            self.selected = (self.selected + view_count - 1) % view_count;
            self.dirty = true;
        }
    }

    /// Deactivate and drop the cached overlay texture.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.selected = 0;
        self.dirty = false;
        self.texture = None;
    }

    /// The overlay texture for this frame, re-rasterised if dirty.
    /// `titles` must be in the same z-order the selection indexes.
    pub fn overlay_texture(
        &mut self,
        renderer: &mut GlesRenderer,
        titles: &[String],
        output_scale: f64,
    ) -> Option<(GlesTexture, Size<i32, Physical>)> {
        if !self.active {
            return None;
        }
        if self.dirty || self.texture.is_none() {
            let font = self.font().is_some();
            debug!(rows = titles.len(), font, "rasterising switcher overlay");
            let bitmap = rasterise_overlay(titles, self.selected, output_scale, self.font());
            match renderer.import_memory(
                &bitmap.data,
                Fourcc::Abgr8888,
                (bitmap.width as i32, bitmap.height as i32).into(),
                false,
            ) {
                Ok(texture) => {
                    let size = Size::from((bitmap.width as i32, bitmap.height as i32));
                    self.texture = Some((texture, size));
                }
                Err(err) => {
                    warn!("failed to upload switcher overlay: {err}");
                    self.texture = None;
                }
            }
            self.dirty = false;
        }
        self.texture.clone()
    }

    fn font(&mut self) -> Option<&FontVec> {
        let slot = self.font.get_or_insert_with(|| {
            for path in FONT_PATHS {
                if let Ok(data) = std::fs::read(path) {
                    match FontVec::try_from_vec(data) {
                        Ok(font) => {
                            debug!(%path, "loaded switcher font");
                            return Some(font);
                        }
                        Err(err) => warn!(%path, "unusable font: {err}"),
                    }
                }
            }
            warn!("no usable font found, switcher overlay will have no text");
            None
        });
        slot.as_ref()
    }
}

/// A plain RGBA (premultiplied) pixel buffer.
pub struct OverlayBitmap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl OverlayBitmap {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width * height * 4) as usize],
        }
    }

    fn blend(&mut self, x: i32, y: i32, color: [f32; 4], coverage: f32) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let alpha = color[3] * coverage;
        if alpha <= 0.0 {
            return;
        }
        let idx = ((y as u32 * self.width + x as u32) * 4) as usize;
        let inv = 1.0 - alpha;
        for c in 0..3 {
            let src = color[c] * alpha;
            let dst = self.data[idx + c] as f32 / 255.0;
            self.data[idx + c] = ((src + dst * inv) * 255.0) as u8;
        }
        let dst_a = self.data[idx + 3] as f32 / 255.0;
        self.data[idx + 3] = ((alpha + dst_a * inv) * 255.0) as u8;
    }

    fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: [f32; 4]) {
        for py in y..y + h {
            for px in x..x + w {
                self.blend(px, py, color, 1.0);
            }
        }
    }

    /// Rounded rectangle as per-row spans: each corner row is inset by
    /// the horizontal extent of the corner circle at that row.
    fn fill_rounded_rect(&mut self, w: i32, h: i32, radius: i32, color: [f32; 4]) {
        for row in 0..h {
            let inset = corner_inset(row, h, radius);
            self.fill_rect(inset, row, w - 2 * inset, 1, color);
        }
    }
}

/// Horizontal inset of a rounded rectangle at `row`, from the corner
/// circle evaluated at the row centre.
fn corner_inset(row: i32, height: i32, radius: i32) -> i32 {
    let from_edge = row.min(height - 1 - row);
    if from_edge >= radius {
        return 0;
    }
    let dy = radius as f64 - (from_edge as f64 + 0.5);
    let span = ((radius as f64).powi(2) - dy * dy).max(0.0).sqrt();
    (radius as f64 - span).round() as i32
}

/// Rasterise the overlay: a rounded panel with one row per view, the
/// selected row highlighted, titles drawn when a font is available.
pub fn rasterise_overlay(
    titles: &[String],
    selected: usize,
    output_scale: f64,
    font: Option<&FontVec>,
) -> OverlayBitmap {
    let scale = output_scale.max(0.5) as f32;
    let row_height = (ROW_HEIGHT as f32 * scale) as u32;
    let pad = (PANEL_PAD as f32 * scale) as u32;
    let radius = (PANEL_RADIUS as f32 * scale) as i32;
    let px = PxScale::from(FONT_PX * scale);

    let text_width = |text: &str| -> f32 {
        let Some(font) = font else { return 0.0 };
        let scaled = font.as_scaled(px);
        text.chars()
            .map(|ch| scaled.h_advance(scaled.glyph_id(ch)))
            .sum()
    };

    let max_text = titles
        .iter()
        .map(|t| text_width(t))
        .fold(0.0f32, f32::max);
    let width = ((max_text.ceil() as u32 + 2 * pad).max((PANEL_MIN_WIDTH as f32 * scale) as u32))
        .min(1600);
    let height = titles.len().max(1) as u32 * row_height + 2 * pad;

    let mut bitmap = OverlayBitmap::new(width, height);
    bitmap.fill_rounded_rect(width as i32, height as i32, radius, PANEL_BG);

    for (row, title) in titles.iter().enumerate() {
        let row_y = (pad + row as u32 * row_height) as i32;
        if row == selected {
            bitmap.fill_rect(
                (pad / 2) as i32,
                row_y,
                (width - pad) as i32,
                row_height as i32,
                ROW_SELECTED,
            );
        }
        if let Some(font) = font {
            let scaled = font.as_scaled(px);
            // descent() is negative, so this centres ascent+descent in
            // the row and lands on the baseline.
            let baseline =
                row_y as f32 + (row_height as f32 + scaled.ascent() + scaled.descent()) / 2.0;
            let mut caret = pad as f32;
            for ch in title.chars() {
                let id = scaled.glyph_id(ch);
                let glyph = id.with_scale_and_position(px, ab_glyph::point(caret, baseline));
                caret += scaled.h_advance(id);
                if let Some(outlined) = font.outline_glyph(glyph) {
                    let bounds = outlined.px_bounds();
                    outlined.draw(|gx, gy, coverage| {
                        bitmap.blend(
                            bounds.min.x as i32 + gx as i32,
                            bounds.min.y as i32 + gy as i32,
                            TEXT_COLOR,
                            coverage,
                        );
                    });
                }
                if caret > width as f32 - pad as f32 {
                    break;
                }
            }
        }
    }

    bitmap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_two_views_to_activate() {
        let mut switcher = Switcher::default();
        assert!(!switcher.activate(0));
        assert!(!switcher.activate(1));
        assert!(!switcher.active);
        assert!(switcher.activate(2));
        assert!(switcher.active);
        // The second view in z-order starts selected.
        assert_eq!(switcher.selected, 1);
    }

    #[test]
    fn cycling_wraps_both_ways() {
        let mut switcher = Switcher::default();
        switcher.activate(3);
        switcher.next(3);
        assert_eq!(switcher.selected, 2);
        switcher.next(3);
        assert_eq!(switcher.selected, 0);
        switcher.prev(3);
        assert_eq!(switcher.selected, 2);
    }

    #[test]
    fn deactivate_clears_state() {
        let mut switcher = Switcher::default();
        switcher.activate(2);
        switcher.deactivate();
        assert!(!switcher.active);
        assert!(switcher.texture.is_none());
    }

    #[test]
    fn overlay_rasterises_without_a_font() {
        let titles = vec!["one".to_owned(), "two".to_owned()];
        let bitmap = rasterise_overlay(&titles, 1, 1.0, None);
        assert!(bitmap.width >= PANEL_MIN_WIDTH);
        assert_eq!(bitmap.height, 2 * ROW_HEIGHT + 2 * PANEL_PAD);
        // The panel interior is filled.
        let centre = ((bitmap.height / 2 * bitmap.width + bitmap.width / 2) * 4) as usize;
        assert!(bitmap.data[centre + 3] > 0);
        // The rounded corners are not.
        assert_eq!(bitmap.data[3], 0);
    }

    #[test]
    fn corner_inset_shrinks_towards_corner_rows() {
        let r = 12;
        assert!(corner_inset(0, 100, r) > corner_inset(5, 100, r));
        assert_eq!(corner_inset(50, 100, r), 0);
        // Symmetric top and bottom.
        assert_eq!(corner_inset(0, 100, r), corner_inset(99, 100, r));
    }
}
