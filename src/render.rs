//! The per-frame composition pipeline.
//!
//! Views bypass the scene graph entirely so the canvas zoom can be
//! applied as an arbitrary scale: every frame collects the surface-tree
//! render elements itself, at each view's combined scale, and draws
//! them back-to-front with background clear, layer-shell passes,
//! rounded borders, annotation strokes, the drawing UI, the switcher
//! overlay and the cursor on top. One failed frame is logged and
//! skipped; the next tick retries.

use anyhow::{Context, Result};
use smithay::{
    backend::renderer::{
        element::{surface::render_elements_from_surface_tree, AsRenderElements, Kind},
        gles::{GlesError, GlesFrame, GlesRenderer, GlesTexture},
        utils::draw_render_elements,
        Frame, Renderer, TextureFilter,
    },
    desktop::PopupManager,
    reexports::wayland_server::protocol::wl_surface::WlSurface,
    utils::{Buffer, Logical, Physical, Point, Rectangle, Size, Transform},
    wayland::compositor::{with_surface_tree_downward, SurfaceAttributes, TraversalAction},
};
use tracing::{error, trace, warn};

use crate::drawing::{stroke_squares, DrawingState, PALETTE};
use crate::pointer::PointerRenderElement;
use crate::state::InfinideskState;
use crate::view::{BORDER_WIDTH, CORNER_RADIUS};

/// Canvas background, dark grey.
const BACKGROUND: [f32; 4] = [0.18, 0.18, 0.18, 1.0];

type SurfaceElements = Vec<
    smithay::backend::renderer::element::surface::WaylandSurfaceRenderElement<GlesRenderer>,
>;

/// Everything needed to draw one view, captured before the frame
/// starts (the element collectors need the renderer, the frame borrows
/// it afterwards).
struct ViewFrame {
    elements: SurfaceElements,
    popup_elements: Vec<(SurfaceElements, f64)>,
    scale: f64,
    content: Rectangle<i32, Physical>,
    border_color: [f32; 4],
    border_width: i32,
    corner_radius: i32,
}

pub fn render_frame(state: &mut InfinideskState) -> Result<()> {
    // Step 1: one shared timestamp drives every animation this frame.
    let now = state.now_ms();
    let frame_time_ms = now as u32;
    let mut animating = state.canvas.tick(now);
    for view in &mut state.views {
        animating |= view.update_animations(now);
    }

    let output_scale = state
        .backend_data
        .output
        .current_scale()
        .fractional_scale();
    let switcher_titles = if state.switcher.active {
        state.switcher_titles()
    } else {
        Vec::new()
    };

    if let Err(err) = state.backend_data.backend.bind() {
        // Render-pass acquisition failure: skip this frame.
        error!("failed to bind backend buffer: {err}");
        return Ok(());
    }
    let physical_size = state.backend_data.backend.window_size();
    let damage = Rectangle::from_loc_and_size((0, 0), physical_size);

    // A zoomed canvas always resamples, so pick the texture filter for
    // the whole frame from the effective scale.
    let effective_scale = state.canvas.scale() * output_scale;
    let filter = if effective_scale == 1.0 {
        TextureFilter::Nearest
    } else {
        TextureFilter::Linear
    };
    let _ = state.backend_data.backend.renderer().upscale_filter(filter);
    let _ = state.backend_data.backend.renderer().downscale_filter(filter);

    // ---- pre-pass: collect every render element -------------------
    // Views back-to-front.
    let mut view_frames = Vec::new();
    for view in state.views.iter().rev().filter(|v| v.mapped) {
        let geo = view.geometry();
        if geo.size.w <= 0 || geo.size.h <= 0 {
            continue;
        }
        let canvas_scale = state.canvas.scale();
        let anim_scale = view.map_scale();
        let combined = canvas_scale * output_scale * anim_scale;

        // Physical content rectangle, with the map-in scaling anchored
        // at the window centre rather than its top-left.
        let screen_pos = state.canvas.to_screen(view.position);
        let base = Point::<i32, Physical>::from((
            (screen_pos.x * output_scale).round() as i32,
            (screen_pos.y * output_scale).round() as i32,
        ));
        let w = (geo.size.w as f64 * combined).round() as i32;
        let h = (geo.size.h as f64 * combined).round() as i32;
        let unscaled_w = (geo.size.w as f64 * canvas_scale * output_scale).round() as i32;
        let unscaled_h = (geo.size.h as f64 * canvas_scale * output_scale).round() as i32;
        let content = Rectangle::from_loc_and_size(
            (base.x + (unscaled_w - w) / 2, base.y + (unscaled_h - h) / 2),
            (w, h),
        );
        if content.size.w <= 0 || content.size.h <= 0 {
            continue;
        }

        // The tree origin backs the geometry offset out, so the content
        // rectangle is what lands at `content.loc`.
        let origin = Point::from((
            content.loc.x - (view.geo_offset.x as f64 * combined).round() as i32,
            content.loc.y - (view.geo_offset.y as f64 * combined).round() as i32,
        ));
        let alpha = view.map_alpha();
        let elements = render_elements_from_surface_tree(
            state.backend_data.backend.renderer(),
            view.toplevel.wl_surface(),
            origin,
            combined,
            alpha,
            Kind::Unspecified,
        );

        let mut popup_elements = Vec::new();
        for (popup, offset) in PopupManager::popups_for_surface(view.toplevel.wl_surface()) {
            let popup_geo = popup.geometry();
            let popup_origin = Point::from((
                content.loc.x
                    + ((offset.x - popup_geo.loc.x) as f64 * combined).round() as i32,
                content.loc.y
                    + ((offset.y - popup_geo.loc.y) as f64 * combined).round() as i32,
            ));
            popup_elements.push((
                render_elements_from_surface_tree(
                    state.backend_data.backend.renderer(),
                    popup.wl_surface(),
                    popup_origin,
                    combined,
                    alpha,
                    Kind::Unspecified,
                ),
                combined,
            ));
        }

        view_frames.push(ViewFrame {
            elements,
            popup_elements,
            scale: combined,
            content,
            border_color: view.border_color(),
            border_width: (BORDER_WIDTH * canvas_scale * output_scale).round().max(1.0) as i32,
            corner_radius: (CORNER_RADIUS * canvas_scale * output_scale).round() as i32,
        });
    }

    // Layer surfaces, one element list per entry, in stack order.
    let mut layer_elements: [Vec<SurfaceElements>; 4] = Default::default();
    for (index, layer) in crate::layers::LAYER_ORDER.iter().enumerate() {
        for entry in state.backend_data.layers.in_layer(*layer) {
            let origin = Point::<i32, Physical>::from((
                (entry.geometry.loc.x as f64 * output_scale).round() as i32,
                (entry.geometry.loc.y as f64 * output_scale).round() as i32,
            ));
            layer_elements[index].push(render_elements_from_surface_tree(
                state.backend_data.backend.renderer(),
                entry.surface.wl_surface(),
                origin,
                output_scale,
                1.0,
                Kind::Unspecified,
            ));
        }
    }

    // Annotation strokes, rasterised to physical squares.
    let mut stroke_rects: Vec<(Rectangle<i32, Physical>, [f32; 4])> = Vec::new();
    for stroke in state
        .drawing
        .strokes()
        .iter()
        .chain(state.drawing.current_stroke())
    {
        let color = [stroke.color[0], stroke.color[1], stroke.color[2], 1.0];
        for square in stroke_squares(stroke, &state.canvas) {
            stroke_rects.push((to_physical_rect(square, output_scale), color));
        }
    }

    let switcher_overlay: Option<(GlesTexture, Size<i32, Physical>)> = state
        .switcher
        .overlay_texture(
            state.backend_data.backend.renderer(),
            &switcher_titles,
            output_scale,
        );

    state
        .backend_data
        .pointer_element
        .set_status(state.cursor_status.clone());
    let cursor_pos = Point::<i32, Physical>::from((
        (state.pointer_location.x * output_scale).round() as i32,
        (state.pointer_location.y * output_scale).round() as i32,
    ));
    let cursor_elements: Vec<PointerRenderElement<GlesRenderer>> =
        state.backend_data.pointer_element.render_elements(
            state.backend_data.backend.renderer(),
            cursor_pos,
            output_scale.into(),
            1.0,
        );

    // ---- the frame ------------------------------------------------
    {
        let mut frame = match state
            .backend_data
            .backend
            .renderer()
            .render(physical_size, Transform::Flipped180)
        {
            Ok(frame) => frame,
            Err(err) => {
                error!("failed to begin render pass: {err}");
                return Ok(());
            }
        };

        // Steps 3-5: background, then the two bottom layer passes.
        frame.clear(BACKGROUND, &[damage])?;
        for elements in &layer_elements[0] {
            draw_render_elements(&mut frame, output_scale, elements, &[damage])?;
        }
        for elements in &layer_elements[1] {
            draw_render_elements(&mut frame, output_scale, elements, &[damage])?;
        }

        // Step 6: views back-to-front with masks and borders.
        for vf in &view_frames {
            draw_render_elements(&mut frame, vf.scale, &vf.elements, &[damage])?;
            for rect in corner_mask_rects(vf.content, vf.corner_radius - vf.border_width) {
                frame.draw_solid(rect, &[damage], BACKGROUND)?;
            }
            for rect in border_rects(vf.content, vf.corner_radius, vf.border_width) {
                frame.draw_solid(rect, &[damage], vf.border_color)?;
            }
        }

        // Step 7: popups above every view.
        for vf in &view_frames {
            for (elements, scale) in &vf.popup_elements {
                draw_render_elements(&mut frame, *scale, elements, &[damage])?;
            }
        }

        // Steps 8-9: top and overlay layer passes.
        for elements in &layer_elements[2] {
            draw_render_elements(&mut frame, output_scale, elements, &[damage])?;
        }
        for elements in &layer_elements[3] {
            draw_render_elements(&mut frame, output_scale, elements, &[damage])?;
        }

        // Step 10: annotation strokes (world space).
        for (rect, color) in &stroke_rects {
            frame.draw_solid(*rect, &[damage], premultiply(*color))?;
        }

        // Step 11: the drawing UI, screen space.
        if state.drawing.mode_active {
            draw_palette(&mut frame, &state.drawing, output_scale, damage)?;
        }

        // Step 12: switcher overlay, centred.
        if let Some((texture, size)) = &switcher_overlay {
            let dst = Rectangle::from_loc_and_size(
                (
                    (physical_size.w - size.w) / 2,
                    (physical_size.h - size.h) / 2,
                ),
                *size,
            );
            let src: Rectangle<f64, Buffer> =
                Rectangle::from_loc_and_size((0.0, 0.0), (size.w as f64, size.h as f64));
            frame.render_texture_from_to(
                texture,
                src,
                dst,
                &[damage],
                &[],
                Transform::Normal,
                1.0,
                None,
                &[],
            )?;
        }

        // The cursor goes on top of everything.
        draw_render_elements(&mut frame, output_scale, &cursor_elements, &[damage])?;

        // Step 13: submit.
        let sync_point = frame.finish().context("finishing render pass")?;
        if let Err(err) = sync_point.wait() {
            warn!("sync point wait failed: {err:?}");
        }
    }
    if let Err(err) = state.backend_data.backend.submit(Some(&[damage])) {
        // Commit failure is not fatal; the next frame retries.
        error!("failed to submit frame: {err}");
    }

    // Step 14: frame-done for every mapped surface, same callback
    // invocation as the render, so clients see rendered-then-notified.
    for view in state.views.iter().filter(|v| v.mapped) {
        send_frames_surface_tree(view.toplevel.wl_surface(), frame_time_ms);
        for (popup, _) in PopupManager::popups_for_surface(view.toplevel.wl_surface()) {
            send_frames_surface_tree(popup.wl_surface(), frame_time_ms);
        }
    }
    for entry in state.backend_data.layers.iter() {
        send_frames_surface_tree(entry.surface.wl_surface(), frame_time_ms);
    }

    trace!(views = view_frames.len(), animating, "frame done");
    state.needs_redraw = state.any_animating();
    Ok(())
}

/// Walk a surface tree and fire all pending frame callbacks.
pub fn send_frames_surface_tree(surface: &WlSurface, time_ms: u32) {
    with_surface_tree_downward(
        surface,
        (),
        |_, _, &()| TraversalAction::DoChildren(()),
        |_surface, states, &()| {
            for callback in states
                .cached_state
                .current::<SurfaceAttributes>()
                .frame_callbacks
                .drain(..)
            {
                callback.done(time_ms);
            }
        },
        |_, _, &()| true,
    );
}

fn to_physical_rect(rect: Rectangle<f64, Logical>, scale: f64) -> Rectangle<i32, Physical> {
    Rectangle::from_loc_and_size(
        (
            (rect.loc.x * scale).round() as i32,
            (rect.loc.y * scale).round() as i32,
        ),
        (
            (rect.size.w * scale).round().max(1.0) as i32,
            (rect.size.h * scale).round().max(1.0) as i32,
        ),
    )
}

fn premultiply(color: [f32; 4]) -> [f32; 4] {
    [
        color[0] * color[3],
        color[1] * color[3],
        color[2] * color[3],
        color[3],
    ]
}

/// Horizontal inset of a circle of `radius` at pixel row `row`,
/// evaluated at the row centre.
fn circle_inset(row: i32, radius: i32) -> i32 {
    let r = radius as f64;
    let dy = r - (row as f64 + 0.5);
    let span = (r * r - dy * dy).max(0.0).sqrt();
    (r - span).round() as i32
}

/// Background-coloured masks that visually round the content corners.
fn corner_mask_rects(
    content: Rectangle<i32, Physical>,
    radius: i32,
) -> Vec<Rectangle<i32, Physical>> {
    let mut rects = Vec::new();
    if radius <= 0 {
        return rects;
    }
    let radius = radius.min(content.size.w / 2).min(content.size.h / 2);
    let (x0, y0) = (content.loc.x, content.loc.y);
    let (x1, y1) = (x0 + content.size.w, y0 + content.size.h);
    for row in 0..radius {
        let inset = circle_inset(row, radius);
        if inset <= 0 {
            continue;
        }
        // One span per corner, top and bottom rows mirrored.
        rects.push(Rectangle::from_loc_and_size((x0, y0 + row), (inset, 1)));
        rects.push(Rectangle::from_loc_and_size((x1 - inset, y0 + row), (inset, 1)));
        rects.push(Rectangle::from_loc_and_size((x0, y1 - 1 - row), (inset, 1)));
        rects.push(Rectangle::from_loc_and_size((x1 - inset, y1 - 1 - row), (inset, 1)));
    }
    rects
}

/// The rounded border ring around the content rectangle, emitted as
/// per-row spans: within the corner region each row covers the annulus
/// between the outer circle (radius R) and the inner circle (R minus
/// the border width), outside it the straight edges.
fn border_rects(
    content: Rectangle<i32, Physical>,
    radius: i32,
    width: i32,
) -> Vec<Rectangle<i32, Physical>> {
    let mut rects = Vec::new();
    if width <= 0 {
        return rects;
    }
    let outer: Rectangle<i32, Physical> = Rectangle::from_loc_and_size(
        (content.loc.x - width, content.loc.y - width),
        (content.size.w + 2 * width, content.size.h + 2 * width),
    );
    let radius = radius
        .max(width)
        .min(outer.size.w / 2)
        .min(outer.size.h / 2);
    let (x0, y0) = (outer.loc.x, outer.loc.y);
    let (x1, y1) = (x0 + outer.size.w, y0 + outer.size.h);
    let inner_radius = radius - width;

    // Corner rows, top and bottom mirrored.
    for row in 0..radius {
        let outer_inset = circle_inset(row, radius);
        let inner_inset = if row < width {
            // The inner circle does not reach this row; the span runs
            // to the corner square's edge and meets the straight top.
            radius
        } else {
            width + circle_inset(row - width, inner_radius.max(1))
        };
        let span = inner_inset - outer_inset;
        if span <= 0 {
            continue;
        }
        for y in [y0 + row, y1 - 1 - row] {
            rects.push(Rectangle::from_loc_and_size((x0 + outer_inset, y), (span, 1)));
            rects.push(Rectangle::from_loc_and_size(
                (x1 - outer_inset - span, y),
                (span, 1),
            ));
        }
        if row < width {
            // Straight segment between the corners.
            for y in [y0 + row, y1 - 1 - row] {
                rects.push(Rectangle::from_loc_and_size(
                    (x0 + radius, y),
                    (outer.size.w - 2 * radius, 1),
                ));
            }
        }
    }
    // Straight left and right edges between the corner regions.
    let edge_height = outer.size.h - 2 * radius;
    if edge_height > 0 {
        rects.push(Rectangle::from_loc_and_size(
            (x0, y0 + radius),
            (width, edge_height),
        ));
        rects.push(Rectangle::from_loc_and_size(
            (x1 - width, y0 + radius),
            (width, edge_height),
        ));
    }
    rects
}

/// The colour palette panel shown while drawing mode is active.
fn draw_palette(
    frame: &mut GlesFrame<'_>,
    drawing: &DrawingState,
    output_scale: f64,
    damage: Rectangle<i32, Physical>,
) -> Result<(), GlesError> {
    let panel = to_physical_rect(DrawingState::panel_rect().to_f64(), output_scale);
    frame.draw_solid(panel, &[damage], premultiply([0.1, 0.1, 0.1, 0.85]))?;

    for (index, color) in PALETTE.iter().enumerate() {
        let swatch = to_physical_rect(DrawingState::swatch_rect(index).to_f64(), output_scale);
        let selected = drawing.color == *color;
        let hovered = drawing.hovered_swatch == Some(index);
        if selected || hovered {
            let ring = if selected {
                [1.0, 1.0, 1.0, 1.0]
            } else {
                [0.6, 0.6, 0.6, 1.0]
            };
            let pad = (2.0 * output_scale).round() as i32;
            let backing = Rectangle::from_loc_and_size(
                (swatch.loc.x - pad, swatch.loc.y - pad),
                (swatch.size.w + 2 * pad, swatch.size.h + 2 * pad),
            );
            frame.draw_solid(backing, &[damage], ring)?;
        }
        frame.draw_solid(swatch, &[damage], [color[0], color[1], color[2], 1.0])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corner_masks_stay_inside_the_corner_squares() {
        let content = Rectangle::from_loc_and_size((100, 100), (400, 300));
        let radius = 10;
        for rect in corner_mask_rects(content, radius) {
            assert!(rect.loc.x >= content.loc.x);
            assert!(rect.loc.x + rect.size.w <= content.loc.x + content.size.w);
            assert!(rect.size.w <= radius);
            assert_eq!(rect.size.h, 1);
        }
    }

    #[test]
    fn border_surrounds_the_content() {
        let content = Rectangle::from_loc_and_size((50, 50), (200, 150));
        let rects = border_rects(content, 12, 4);
        assert!(!rects.is_empty());
        for rect in &rects {
            // Within the outer ring...
            assert!(rect.loc.x >= content.loc.x - 4);
            assert!(rect.loc.y >= content.loc.y - 4);
            assert!(rect.loc.x + rect.size.w <= content.loc.x + content.size.w + 4);
            assert!(rect.loc.y + rect.size.h <= content.loc.y + content.size.h + 4);
        }
        // ...and never inside the inner rounded rectangle: probe the
        // content centre row.
        let centre_y = content.loc.y + content.size.h / 2;
        for rect in &rects {
            if rect.loc.y <= centre_y && centre_y < rect.loc.y + rect.size.h {
                let inside_left = rect.loc.x + rect.size.w <= content.loc.x;
                let inside_right = rect.loc.x >= content.loc.x + content.size.w;
                assert!(inside_left || inside_right);
            }
        }
    }

    #[test]
    fn zero_width_border_is_empty() {
        let content = Rectangle::from_loc_and_size((0, 0), (100, 100));
        assert!(border_rects(content, 10, 0).is_empty());
        assert!(corner_mask_rects(content, 0).is_empty());
    }
}
