//! Layer-shell arrangement.
//!
//! Layer surfaces (wallpapers, panels, notifications) are pinned to
//! screen space, unlike views. Each output keeps four ordered stacks,
//! one per wlr-layer-shell layer; on every map/unmap/commit the
//! arranger walks them in fixed order, positions each surface from its
//! anchors and margins within the output rectangle, and shrinks the
//! usable area by positive exclusive zones. New windows spawn centred
//! in the resulting usable area.

use smithay::utils::{Logical, Rectangle, Size};
use smithay::wayland::compositor::with_states;
use smithay::wayland::shell::wlr_layer::{
    Anchor, ExclusiveZone, Layer, LayerSurface, LayerSurfaceCachedState, Margins,
};
use tracing::debug;

pub const LAYER_COUNT: usize = 4;

/// Fixed arrangement/render order of the layers.
pub const LAYER_ORDER: [Layer; LAYER_COUNT] =
    [Layer::Background, Layer::Bottom, Layer::Top, Layer::Overlay];

/// Map a layer to its stack index. Out-of-range layer values cannot
/// reach this point: the protocol conversion clamps them before the
/// typed enum exists.
pub fn layer_index(layer: Layer) -> usize {
    match layer {
        Layer::Background => 0,
        Layer::Bottom => 1,
        Layer::Top => 2,
        Layer::Overlay => 3,
    }
}

/// One mapped layer surface with its arranger-assigned geometry.
#[derive(Debug)]
pub struct LayerEntry {
    pub surface: LayerSurface,
    pub layer: Layer,
    /// Screen-space rectangle assigned by the last arrange pass.
    pub geometry: Rectangle<i32, Logical>,
}

/// The per-output layer stacks.
#[derive(Debug, Default)]
pub struct LayerStack {
    entries: Vec<LayerEntry>,
}

impl LayerStack {
    pub fn add(&mut self, surface: LayerSurface, layer: Layer) {
        self.entries.push(LayerEntry {
            surface,
            layer,
            geometry: Rectangle::default(),
        });
    }

    pub fn remove(&mut self, surface: &LayerSurface) {
        self.entries.retain(|e| &e.surface != surface);
    }

    pub fn contains(
        &self,
        wl_surface: &smithay::reexports::wayland_server::protocol::wl_surface::WlSurface,
    ) -> bool {
        self.entries
            .iter()
            .any(|e| e.surface.wl_surface() == wl_surface)
    }

    /// Entries of one layer, in mapping order.
    pub fn in_layer(&self, layer: Layer) -> impl Iterator<Item = &LayerEntry> {
        let index = layer_index(layer);
        self.entries
            .iter()
            .filter(move |e| layer_index(e.layer) == index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerEntry> {
        self.entries.iter()
    }

    /// Arrange all surfaces within `full` (the output rectangle) and
    /// return the remaining usable area. Every surface receives a
    /// configure with its computed size.
    pub fn arrange(&mut self, full: Rectangle<i32, Logical>) -> Rectangle<i32, Logical> {
        let mut usable = full;
        for order_index in 0..LAYER_COUNT {
            for entry in self
                .entries
                .iter_mut()
                .filter(|e| layer_index(e.layer) == order_index)
            {
                let (anchor, margin, exclusive, size, layer) =
                    with_states(entry.surface.wl_surface(), |states| {
                        let attrs = states.cached_state.current::<LayerSurfaceCachedState>();
                        (
                            attrs.anchor,
                            attrs.margin,
                            attrs.exclusive_zone,
                            attrs.size,
                            attrs.layer,
                        )
                    });
                entry.layer = layer;
                let geometry =
                    arrange_surface(full, &mut usable, anchor, margin, size, exclusive);
                let size_changed = geometry.size != entry.geometry.size;
                entry.geometry = geometry;
                debug!(
                    layer = ?entry.layer,
                    geometry = ?entry.geometry,
                    "arranged layer surface"
                );

                // Only a changed size warrants a configure; re-sending
                // the same one every commit would ping-pong with the
                // client.
                if size_changed {
                    entry.surface.with_pending_state(|state| {
                        state.size = Some(entry.geometry.size);
                    });
                    entry.surface.send_configure();
                }
            }
        }
        debug!(?usable, "layer arrange complete");
        usable
    }
}

/// Position one surface from its anchors and margins within `full`,
/// shrinking `usable` by a positive exclusive zone on the anchored
/// edge. Pure so the arrangement rules are testable without a client.
pub fn arrange_surface(
    full: Rectangle<i32, Logical>,
    usable: &mut Rectangle<i32, Logical>,
    anchor: Anchor,
    margin: Margins,
    size: Size<i32, Logical>,
    exclusive: ExclusiveZone,
) -> Rectangle<i32, Logical> {
    let both_horiz = Anchor::LEFT | Anchor::RIGHT;
    let both_vert = Anchor::TOP | Anchor::BOTTOM;

    let mut geo = Rectangle::from_loc_and_size(full.loc, size);

    // Horizontal axis.
    if anchor.contains(both_horiz) && geo.size.w == 0 {
        geo.loc.x = full.loc.x;
        geo.size.w = full.size.w;
    } else if anchor.contains(Anchor::LEFT) {
        geo.loc.x = full.loc.x;
    } else if anchor.contains(Anchor::RIGHT) {
        geo.loc.x = full.loc.x + full.size.w - geo.size.w;
    } else {
        geo.loc.x = full.loc.x + (full.size.w - geo.size.w) / 2;
    }
    if anchor.contains(both_horiz) {
        geo.loc.x += margin.left;
        geo.size.w -= margin.left + margin.right;
    } else if anchor.contains(Anchor::LEFT) {
        geo.loc.x += margin.left;
    } else if anchor.contains(Anchor::RIGHT) {
        geo.loc.x -= margin.right;
    }

    // Vertical axis.
    if anchor.contains(both_vert) && geo.size.h == 0 {
        geo.loc.y = full.loc.y;
        geo.size.h = full.size.h;
    } else if anchor.contains(Anchor::TOP) {
        geo.loc.y = full.loc.y;
    } else if anchor.contains(Anchor::BOTTOM) {
        geo.loc.y = full.loc.y + full.size.h - geo.size.h;
    } else {
        geo.loc.y = full.loc.y + (full.size.h - geo.size.h) / 2;
    }
    if anchor.contains(both_vert) {
        geo.loc.y += margin.top;
        geo.size.h -= margin.top + margin.bottom;
    } else if anchor.contains(Anchor::TOP) {
        geo.loc.y += margin.top;
    } else if anchor.contains(Anchor::BOTTOM) {
        geo.loc.y -= margin.bottom;
    }

    geo.size.w = geo.size.w.max(0);
    geo.size.h = geo.size.h.max(0);

    if let ExclusiveZone::Exclusive(zone) = exclusive {
        let zone = zone as i32;
        if zone > 0 {
            if let Some(edge) = exclusive_edge(anchor) {
                apply_exclusive(usable, edge, zone);
            }
        }
    }

    geo
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Edge {
    Top,
    Bottom,
    Left,
    Right,
}

/// The edge an exclusive zone applies to: the surface must be anchored
/// to exactly one edge, or to one edge plus both perpendicular ones.
fn exclusive_edge(anchor: Anchor) -> Option<Edge> {
    let horiz = Anchor::LEFT | Anchor::RIGHT;
    let vert = Anchor::TOP | Anchor::BOTTOM;
    for (edge, single, triplet) in [
        (Edge::Top, Anchor::TOP, Anchor::TOP | horiz),
        (Edge::Bottom, Anchor::BOTTOM, Anchor::BOTTOM | horiz),
        (Edge::Left, Anchor::LEFT, Anchor::LEFT | vert),
        (Edge::Right, Anchor::RIGHT, Anchor::RIGHT | vert),
    ] {
        if anchor == single || anchor == triplet {
            return Some(edge);
        }
    }
    None
}

fn apply_exclusive(usable: &mut Rectangle<i32, Logical>, edge: Edge, zone: i32) {
    match edge {
        Edge::Top => {
            usable.loc.y += zone;
            usable.size.h -= zone;
        }
        Edge::Bottom => {
            usable.size.h -= zone;
        }
        Edge::Left => {
            usable.loc.x += zone;
            usable.size.w -= zone;
        }
        Edge::Right => {
            usable.size.w -= zone;
        }
    }
    usable.size.w = usable.size.w.max(0);
    usable.size.h = usable.size.h.max(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> Rectangle<i32, Logical> {
        Rectangle::from_loc_and_size((0, 0), (1920, 1080))
    }

    fn no_margin() -> Margins {
        Margins::default()
    }

    fn contains_rect(outer: Rectangle<i32, Logical>, inner: Rectangle<i32, Logical>) -> bool {
        inner.loc.x >= outer.loc.x
            && inner.loc.y >= outer.loc.y
            && inner.loc.x + inner.size.w <= outer.loc.x + outer.size.w
            && inner.loc.y + inner.size.h <= outer.loc.y + outer.size.h
    }

    #[test]
    fn top_panel_reserves_its_zone() {
        let mut usable = full();
        let geo = arrange_surface(
            full(),
            &mut usable,
            Anchor::TOP | Anchor::LEFT | Anchor::RIGHT,
            no_margin(),
            Size::from((0, 30)),
            ExclusiveZone::Exclusive(30),
        );
        assert_eq!(geo, Rectangle::from_loc_and_size((0, 0), (1920, 30)));
        assert_eq!(usable, Rectangle::from_loc_and_size((0, 30), (1920, 1050)));
        assert!(contains_rect(full(), usable));
    }

    #[test]
    fn opposing_zones_accumulate() {
        let mut usable = full();
        arrange_surface(
            full(),
            &mut usable,
            Anchor::TOP | Anchor::LEFT | Anchor::RIGHT,
            no_margin(),
            Size::from((0, 30)),
            ExclusiveZone::Exclusive(30),
        );
        arrange_surface(
            full(),
            &mut usable,
            Anchor::BOTTOM | Anchor::LEFT | Anchor::RIGHT,
            no_margin(),
            Size::from((0, 48)),
            ExclusiveZone::Exclusive(48),
        );
        // Full minus the sum of the zones on their anchored edges.
        assert_eq!(usable, Rectangle::from_loc_and_size((0, 30), (1920, 1002)));
    }

    #[test]
    fn wallpaper_fills_output_without_reserving() {
        let mut usable = full();
        let geo = arrange_surface(
            full(),
            &mut usable,
            Anchor::TOP | Anchor::BOTTOM | Anchor::LEFT | Anchor::RIGHT,
            no_margin(),
            Size::from((0, 0)),
            ExclusiveZone::Neutral,
        );
        assert_eq!(geo, full());
        assert_eq!(usable, full());
    }

    #[test]
    fn unanchored_surfaces_are_centred() {
        let mut usable = full();
        let geo = arrange_surface(
            full(),
            &mut usable,
            Anchor::empty(),
            no_margin(),
            Size::from((400, 200)),
            ExclusiveZone::Neutral,
        );
        assert_eq!((geo.loc.x, geo.loc.y), (760, 440));
    }

    #[test]
    fn margins_offset_anchored_edges() {
        let mut usable = full();
        let geo = arrange_surface(
            full(),
            &mut usable,
            Anchor::RIGHT,
            Margins {
                right: 10,
                ..Margins::default()
            },
            Size::from((300, 100)),
            ExclusiveZone::Neutral,
        );
        assert_eq!(geo.loc.x, 1920 - 300 - 10);
        // Vertically unanchored: centred.
        assert_eq!(geo.loc.y, 490);
    }

    #[test]
    fn corner_anchored_zone_is_not_exclusive() {
        // Anchored to two adjacent edges: no single edge to reserve.
        let mut usable = full();
        arrange_surface(
            full(),
            &mut usable,
            Anchor::TOP | Anchor::LEFT,
            no_margin(),
            Size::from((100, 100)),
            ExclusiveZone::Exclusive(100),
        );
        assert_eq!(usable, full());
    }

    #[test]
    fn usable_never_outgrows_full() {
        let mut usable = full();
        arrange_surface(
            full(),
            &mut usable,
            Anchor::LEFT,
            no_margin(),
            Size::from((200, 0)),
            ExclusiveZone::Exclusive(5000),
        );
        assert!(contains_rect(full(), usable));
        assert!(usable.size.w >= 0 && usable.size.h >= 0);
    }
}
