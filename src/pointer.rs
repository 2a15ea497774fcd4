//! The software cursor.
//!
//! Under the nested backend we still composite our own cursor: either
//! the default image from the user's xcursor theme, or whatever surface
//! the focused client attached via wl_pointer.set_cursor.

use smithay::{
    backend::{
        allocator::Fourcc,
        renderer::{
            element::{
                surface::{render_elements_from_surface_tree, WaylandSurfaceRenderElement},
                texture::{TextureBuffer, TextureRenderElement},
                AsRenderElements, Kind,
            },
            gles::GlesTexture,
            ImportAll, ImportMem, Renderer,
        },
    },
    input::pointer::CursorImageStatus,
    render_elements,
    utils::{Physical, Point, Scale, Transform},
};
use std::{env::var, fs::File, io::Read};
use tracing::warn;
use xcursor::{parser::parse_xcursor, CursorTheme};

pub struct PointerElement {
    texture: Option<TextureBuffer<GlesTexture>>,
    hotspot: Point<i32, Physical>,
    status: CursorImageStatus,
}

impl Default for PointerElement {
    fn default() -> Self {
        Self {
            texture: None,
            hotspot: (0, 0).into(),
            status: CursorImageStatus::default_named(),
        }
    }
}

impl PointerElement {
    /// Load the default cursor from the xcursor theme. Every failure
    /// falls back to an empty element; the compositor works without a
    /// visible cursor, it is just unpleasant.
    pub fn new<R>(renderer: &mut R) -> Self
    where
        R: Renderer<TextureId = GlesTexture> + ImportMem,
    {
        let mut element = Self::default();
        match load_default_cursor(renderer) {
            Ok((texture, hotspot)) => {
                element.texture = Some(texture);
                element.hotspot = hotspot;
            }
            Err(err) => warn!("no cursor theme image: {err}"),
        }
        element
    }

    pub fn set_status(&mut self, status: CursorImageStatus) {
        self.status = status;
    }
}

fn load_default_cursor<R>(
    renderer: &mut R,
) -> anyhow::Result<(TextureBuffer<GlesTexture>, Point<i32, Physical>)>
where
    R: Renderer<TextureId = GlesTexture> + ImportMem,
{
    let theme = var("XCURSOR_THEME").ok().unwrap_or_else(|| "default".into());
    let size = var("XCURSOR_SIZE")
        .ok()
        .and_then(|s| s.parse::<i32>().ok())
        .unwrap_or(24);

    let cursor_theme = CursorTheme::load(&theme);
    let cursor_path = cursor_theme
        .load_icon("default")
        .ok_or_else(|| anyhow::anyhow!("theme has no default icon"))?;
    let mut cursor_data = Vec::new();
    File::open(cursor_path)?.read_to_end(&mut cursor_data)?;

    // An xcursor file holds several sizes (and animation frames); take
    // the first image matching the requested size, or any image at all.
    let images = parse_xcursor(&cursor_data)
        .ok_or_else(|| anyhow::anyhow!("corrupt xcursor file"))?;
    let image = images
        .iter()
        .find(|image| image.width == size as u32 && image.height == size as u32)
        .or_else(|| images.first())
        .ok_or_else(|| anyhow::anyhow!("empty xcursor file"))?;

    let texture = renderer
        .import_memory(
            &image.pixels_rgba,
            Fourcc::Abgr8888,
            (image.width as i32, image.height as i32).into(),
            false,
        )
        .map_err(|err| anyhow::anyhow!("cursor import failed: {err:?}"))?;
    let buffer = TextureBuffer::from_texture(renderer, texture, 1, Transform::Normal, None);
    Ok((buffer, (image.xhot as i32, image.yhot as i32).into()))
}

// Combines the two possible cursor sources into one element type: the
// client-provided surface or our own theme texture.
render_elements! {
    pub PointerRenderElement<R> where
        R: ImportAll + ImportMem;
    Surface=WaylandSurfaceRenderElement<R>,
    Texture=TextureRenderElement<<R as Renderer>::TextureId>,
}

impl<R> AsRenderElements<R> for PointerElement
where
    R: Renderer<TextureId = GlesTexture> + ImportAll + ImportMem,
{
    type RenderElement = PointerRenderElement<R>;

    fn render_elements<E>(
        &self,
        renderer: &mut R,
        location: Point<i32, Physical>,
        scale: Scale<f64>,
        alpha: f32,
    ) -> Vec<E>
    where
        E: From<PointerRenderElement<R>>,
    {
        match &self.status {
            CursorImageStatus::Hidden => vec![],
            CursorImageStatus::Named(_) => {
                // Any named cursor renders as the theme's default
                // image; per-name lookups are not worth it for a
                // nested session.
                if let Some(texture) = self.texture.as_ref() {
                    let location = location - self.hotspot;
                    vec![PointerRenderElement::<R>::from(
                        TextureRenderElement::from_texture_buffer(
                            location.to_f64(),
                            texture,
                            None,
                            None,
                            None,
                            Kind::Cursor,
                        ),
                    )
                    .into()]
                } else {
                    vec![]
                }
            }
            CursorImageStatus::Surface(surface) => render_elements_from_surface_tree(
                renderer,
                surface,
                location,
                scale,
                alpha,
                Kind::Cursor,
            )
            .into_iter()
            .map(E::from)
            .collect(),
        }
    }
}
