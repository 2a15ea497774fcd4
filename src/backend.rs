//! The graphics backend.
//!
//! This build runs nested through smithay's winit backend: one window
//! on the host compositor acts as our single output. The DRM/udev path
//! would slot in behind the same `BackendData` shape.

use anyhow::{anyhow, Result};
use smithay::{
    backend::{
        renderer::gles::GlesRenderer,
        winit::{self, WinitEventLoop, WinitGraphicsBackend},
    },
    output::{Mode, Output, PhysicalProperties, Scale, Subpixel},
    reexports::wayland_server::DisplayHandle,
    utils::{Logical, Rectangle, Transform},
};
use tracing::info;

use crate::layers::LayerStack;
use crate::pointer::PointerElement;
use crate::state::InfinideskState;

pub struct BackendData {
    pub backend: WinitGraphicsBackend<GlesRenderer>,
    pub output: Output,
    pub pointer_element: PointerElement,
    /// Layer-shell stacks of this output.
    pub layers: LayerStack,
    /// Screen area not covered by exclusive zones; where new windows
    /// are spawned. Kept current by the arranger.
    pub usable_area: Rectangle<i32, Logical>,
}

impl BackendData {
    /// Bring up the winit window, the renderer and the advertised
    /// output. Failure here is fatal for the compositor.
    pub fn init(dh: &DisplayHandle, output_scale: f64) -> Result<(Self, WinitEventLoop)> {
        let (mut backend, winit_loop) = winit::init::<GlesRenderer>()
            .map_err(|err| anyhow!("failed to initialize winit backend: {err}"))?;
        backend.window().set_title("Infinidesk");

        let mode = Mode {
            size: backend.window_size(),
            refresh: 60_000,
        };

        // Advertise the nested window as a monitor. Physical size is
        // unknown for a nested output.
        let output = Output::new(
            "winit".to_string(),
            PhysicalProperties {
                size: (0, 0).into(),
                subpixel: Subpixel::Unknown,
                make: "Infinidesk".into(),
                model: "Winit".into(),
            },
        );
        let _global = output.create_global::<InfinideskState>(dh);
        output.change_current_state(
            Some(mode),
            Some(Transform::Normal),
            Some(Scale::Fractional(output_scale)),
            Some((0, 0).into()),
        );
        output.set_preferred(mode);
        info!(size = ?mode.size, scale = output_scale, "output ready");

        let pointer_element = PointerElement::new(backend.renderer());

        let mut data = Self {
            backend,
            output,
            pointer_element,
            layers: LayerStack::default(),
            usable_area: Rectangle::default(),
        };
        data.usable_area = data.output_geometry();
        Ok((data, winit_loop))
    }

    /// The output rectangle in logical (screen) coordinates.
    pub fn output_geometry(&self) -> Rectangle<i32, Logical> {
        let physical = self
            .backend
            .window_size();
        let scale = self.output.current_scale().fractional_scale();
        Rectangle::from_loc_and_size(
            (0, 0),
            physical.to_f64().to_logical(scale).to_i32_round(),
        )
    }

    /// Apply a host window resize: update the advertised mode and
    /// return the new output rectangle so the caller can re-arrange.
    pub fn resize(&mut self, size: smithay::utils::Size<i32, smithay::utils::Physical>) {
        let mode = Mode {
            size,
            refresh: 60_000,
        };
        self.output.change_current_state(Some(mode), None, None, None);
        self.output.set_preferred(mode);
    }
}
