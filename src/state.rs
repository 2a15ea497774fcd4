//! The compositor state: every Wayland global, the seat, and the
//! canvas world (views, strokes, switcher) live here, owned by the one
//! event loop. All listener callbacks run to completion against this
//! struct, so nothing in it needs interior locking.
//!
//! The view list is an ordered sequence whose head is the top of the
//! z-stack; whenever any view is focused it is the head that holds the
//! keyboard. All list mutations go through `focus_view`, `raise_view`,
//! `new_toplevel` and `toplevel_destroyed`.

use std::sync::{
    atomic::AtomicBool,
    Arc,
};

use anyhow::Result;
use smithay::{
    backend::renderer::utils::{on_commit_buffer_handler, with_renderer_surface_state},
    delegate_compositor, delegate_data_device, delegate_fractional_scale, delegate_layer_shell,
    delegate_output, delegate_seat, delegate_shm, delegate_viewporter, delegate_xdg_decoration,
    delegate_xdg_shell,
    desktop::{PopupKind, PopupManager},
    input::{
        keyboard::XkbConfig,
        pointer::CursorImageStatus,
        Seat, SeatHandler, SeatState,
    },
    reexports::{
        calloop::{LoopHandle, RegistrationToken},
        wayland_protocols::xdg::{
            decoration::zv1::server::zxdg_toplevel_decoration_v1::Mode as DecorationMode,
            shell::server::xdg_toplevel,
        },
        wayland_server::{
            backend::ClientData,
            protocol::{wl_buffer, wl_output::WlOutput, wl_seat, wl_surface::WlSurface},
            Client, DisplayHandle, Resource,
        },
    },
    utils::{Clock, Logical, Monotonic, Point, Serial, SERIAL_COUNTER},
    wayland::{
        buffer::BufferHandler,
        compositor::{
            get_parent, is_sync_subsurface, with_states, CompositorClientState,
            CompositorHandler, CompositorState,
        },
        fractional_scale::{
            with_fractional_scale, FractionalScaleHandler, FractionalScaleManagerState,
        },
        output::{OutputHandler, OutputManagerState},
        selection::data_device::{
            set_data_device_focus, ClientDndGrabHandler, DataDeviceHandler, DataDeviceState,
            ServerDndGrabHandler,
        },
        selection::SelectionHandler,
        shell::{
            wlr_layer::{
                Layer, LayerSurface as WlrLayerSurface, LayerSurfaceData, WlrLayerShellHandler,
                WlrLayerShellState,
            },
            xdg::{
                decoration::{XdgDecorationHandler, XdgDecorationState},
                PopupSurface, PositionerState, ToplevelSurface, XdgShellHandler, XdgShellState,
                XdgToplevelSurfaceData,
            },
        },
        shm::{ShmHandler, ShmState},
        viewporter::ViewporterState,
    },
};
use tracing::{debug, info, warn};

use crate::backend::BackendData;
use crate::canvas::Canvas;
use crate::config::Config;
use crate::drawing::DrawingState;
use crate::gather::gather_centres;
use crate::switcher::Switcher;
use crate::view::{centred_position, View};

pub struct CalloopData {
    pub state: InfinideskState,
    pub display_handle: DisplayHandle,
}

#[derive(Default)]
pub struct ClientState {
    pub compositor_state: CompositorClientState,
}

impl ClientData for ClientState {}

/// What the pointer is currently doing. `Resize` is reserved for a
/// later release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorMode {
    #[default]
    Passthrough,
    Move,
    Pan,
    Draw,
    #[allow(dead_code)]
    Resize,
}

/// The scroll-pan gesture: once scrolling starts over empty canvas it
/// owns every scroll event until the inactivity timer fires.
#[derive(Default)]
pub struct ScrollPan {
    pub active: bool,
    pub timer: Option<RegistrationToken>,
}

pub struct InfinideskState {
    pub display_handle: DisplayHandle,
    pub handle: LoopHandle<'static, CalloopData>,
    pub running: Arc<AtomicBool>,
    pub clock: Clock<Monotonic>,

    pub backend_data: BackendData,

    // Wayland globals. Each pairs with a *Handler impl below and a
    // delegate_*! at the bottom of the file.
    pub compositor_state: CompositorState,
    pub data_device_state: DataDeviceState,
    pub layer_shell_state: WlrLayerShellState,
    pub output_manager_state: OutputManagerState,
    pub seat_state: SeatState<Self>,
    pub shm_state: ShmState,
    pub viewporter_state: ViewporterState,
    pub fractional_scale_manager_state: FractionalScaleManagerState,
    pub xdg_decoration_state: XdgDecorationState,
    pub xdg_shell_state: XdgShellState,

    pub seat: Seat<Self>,
    pub popups: PopupManager,
    pub cursor_status: CursorImageStatus,
    pub pointer_location: Point<f64, Logical>,

    // The canvas world.
    pub canvas: Canvas,
    pub views: Vec<View>,
    next_view_id: u64,
    pub drawing: DrawingState,
    pub switcher: Switcher,
    /// Z-order snapshot the switcher cycles through.
    pub switcher_views: Vec<u64>,

    // Interaction state.
    pub cursor_mode: CursorMode,
    pub grabbed_view: Option<u64>,
    /// Whether the window-drag modifier is currently held.
    pub drag_modifier_held: bool,
    pub scroll_pan: ScrollPan,
    /// Keycodes whose press matched a keybind; their release is
    /// swallowed too.
    pub suppressed_keys: Vec<u32>,

    pub config: Config,
    /// Set whenever something visible changed; cleared after a frame.
    pub needs_redraw: bool,
}

impl InfinideskState {
    pub fn init(
        handle: LoopHandle<'static, CalloopData>,
        dh: DisplayHandle,
        mut backend_data: BackendData,
        config: Config,
    ) -> Result<Self> {
        // The protocol globals clients can bind. The surface trees and
        // buffer bookkeeping live inside CompositorState; the rest are
        // thin delegates into the handler impls below.
        let compositor_state = CompositorState::new::<Self>(&dh);
        let data_device_state = DataDeviceState::new::<Self>(&dh);
        let layer_shell_state = WlrLayerShellState::new::<Self>(&dh);
        let output_manager_state = OutputManagerState::new_with_xdg_output::<Self>(&dh);
        let mut shm_state = ShmState::new::<Self>(&dh, vec![]);
        let viewporter_state = ViewporterState::new::<Self>(&dh);
        let fractional_scale_manager_state = FractionalScaleManagerState::new::<Self>(&dh);
        let xdg_decoration_state = XdgDecorationState::new::<Self>(&dh);
        let xdg_shell_state = XdgShellState::new::<Self>(&dh);

        {
            use smithay::backend::renderer::ImportMemWl;
            shm_state.update_formats(backend_data.backend.renderer().shm_formats());
        }

        let mut seat_state = SeatState::new();
        let mut seat: Seat<Self> = seat_state.new_wl_seat(&dh, "infinidesk");
        seat.add_keyboard(XkbConfig::default(), 200, 25)?;
        seat.add_pointer();

        Ok(Self {
            display_handle: dh,
            handle,
            running: Arc::new(AtomicBool::new(true)),
            clock: Clock::new(),
            backend_data,
            compositor_state,
            data_device_state,
            layer_shell_state,
            output_manager_state,
            seat_state,
            shm_state,
            viewporter_state,
            fractional_scale_manager_state,
            xdg_decoration_state,
            xdg_shell_state,
            seat,
            popups: PopupManager::default(),
            cursor_status: CursorImageStatus::default_named(),
            pointer_location: (0.0, 0.0).into(),
            canvas: Canvas::default(),
            views: Vec::new(),
            next_view_id: 1,
            drawing: DrawingState::default(),
            switcher: Switcher::default(),
            switcher_views: Vec::new(),
            cursor_mode: CursorMode::default(),
            grabbed_view: None,
            drag_modifier_held: false,
            scroll_pan: ScrollPan::default(),
            suppressed_keys: Vec::new(),
            config,
            needs_redraw: true,
        })
    }

    /// Monotonic time in milliseconds, the clock every animation runs on.
    pub fn now_ms(&self) -> u64 {
        std::time::Duration::from(self.clock.now()).as_millis() as u64
    }

    /// Whether any animation record is still running; the composition
    /// pipeline uses this to request an immediate next frame.
    pub fn any_animating(&self) -> bool {
        self.canvas.is_snapping()
            || self
                .views
                .iter()
                .any(|v| v.focus_anim.active || v.map_anim.active)
    }

    // ---- view list operations -------------------------------------

    pub fn view_index(&self, id: u64) -> Option<usize> {
        self.views.iter().position(|v| v.id == id)
    }

    /// Assign keyboard focus to a view. Separate from `raise_view`:
    /// focus-follows-mouse focuses without raising, click-to-focus does
    /// both.
    pub fn focus_view(&mut self, id: u64) {
        let Some(index) = self.view_index(id) else {
            return;
        };
        let surface = self.views[index].toplevel.wl_surface().clone();
        let keyboard = self
            .seat
            .get_keyboard()
            .expect("Impossible seat without keyboard");
        if keyboard.current_focus().as_ref() == Some(&surface) {
            // Already focused; notably this must not restart animations.
            return;
        }

        let now = self.now_ms();
        for view in &mut self.views {
            if view.focused && view.id != id {
                view.focused = false;
                view.focus_anim.start(now);
                view.toplevel.with_pending_state(|state| {
                    state.states.unset(xdg_toplevel::State::Activated);
                });
                view.toplevel.send_pending_configure();
            }
        }
        let view = &mut self.views[index];
        view.focused = true;
        view.focus_anim.start(now);
        view.toplevel.with_pending_state(|state| {
            state.states.set(xdg_toplevel::State::Activated);
        });
        view.toplevel.send_pending_configure();
        debug!(view = id, "focus");

        keyboard.set_focus(self, Some(surface), SERIAL_COUNTER.next_serial());
        self.needs_redraw = true;
    }

    /// Move a view to the head of the list (top of the z-stack).
    pub fn raise_view(&mut self, id: u64) {
        if let Some(index) = self.view_index(id) {
            let view = self.views.remove(index);
            self.views.insert(0, view);
            self.needs_redraw = true;
        }
    }

    /// Hit-test the views front-to-back at a screen position. Returns
    /// the view id and the position in window-local logical
    /// coordinates (geometry offset added back, so the surface tree
    /// walker can resolve subsurfaces and popups).
    pub fn view_under(
        &self,
        screen: Point<f64, Logical>,
    ) -> Option<(u64, Point<f64, Logical>)> {
        let scale = self.canvas.scale();
        self.views.iter().filter(|v| v.mapped).find_map(|view| {
            let rect = view.screen_rect(&self.canvas);
            if screen.x >= rect.loc.x
                && screen.x < rect.loc.x + rect.size.w
                && screen.y >= rect.loc.y
                && screen.y < rect.loc.y + rect.size.h
            {
                let local = Point::from((
                    (screen.x - rect.loc.x) / scale + view.geo_offset.x as f64,
                    (screen.y - rect.loc.y) / scale + view.geo_offset.y as f64,
                ));
                tracing::trace!(view = view.id, ?local, "hit");
                Some((view.id, local))
            } else {
                None
            }
        })
    }

    /// Resolve the concrete (sub)surface under a screen position,
    /// together with its origin in screen coordinates chosen so that
    /// `pointer_location - origin` is the correct surface-local point.
    pub fn surface_under(
        &self,
        screen: Point<f64, Logical>,
    ) -> Option<(WlSurface, Point<f64, Logical>)> {
        let (id, local) = self.view_under(screen)?;
        let view = &self.views[self.view_index(id)?];
        let (surface, surface_loc) = smithay::desktop::utils::under_from_surface_tree(
            view.toplevel.wl_surface(),
            local,
            (0, 0),
            smithay::desktop::WindowSurfaceType::ALL,
        )?;
        // The canvas transform is not a pure translation, so the focus
        // origin is derived per-event from the local coordinates.
        let origin = Point::from((
            screen.x - (local.x - surface_loc.x as f64),
            screen.y - (local.y - surface_loc.y as f64),
        ));
        Some((surface, origin))
    }

    /// Implicit gesture cancellation: a grabbed view went away.
    pub fn cancel_interactions_for(&mut self, id: u64) {
        if self.grabbed_view == Some(id) {
            if let Some(index) = self.view_index(id) {
                self.views[index].move_end();
            }
            self.grabbed_view = None;
            self.cursor_mode = CursorMode::Passthrough;
        }
    }

    // ---- switcher -------------------------------------------------

    pub fn switcher_activate(&mut self) {
        let ids: Vec<u64> = self.views.iter().filter(|v| v.mapped).map(|v| v.id).collect();
        if self.switcher.activate(ids.len()) {
            debug!(views = ids.len(), "switcher activated");
            self.switcher_views = ids;
            self.needs_redraw = true;
        }
    }

    pub fn switcher_confirm(&mut self) {
        let selected = self
            .switcher_views
            .get(self.switcher.selected)
            .copied();
        self.switcher.deactivate();
        self.switcher_views.clear();
        if let Some(id) = selected {
            if let Some(index) = self.view_index(id) {
                let centre = self.views[index].centre();
                let out_size = self.backend_data.output_geometry().size;
                let now = self.now_ms();
                self.canvas.snap_to(centre, out_size, now);
                self.focus_view(id);
                self.raise_view(id);
            }
        }
        self.needs_redraw = true;
    }

    pub fn switcher_cancel(&mut self) {
        self.switcher.deactivate();
        self.switcher_views.clear();
        self.needs_redraw = true;
    }

    /// Titles for the switcher overlay, in snapshot order.
    pub fn switcher_titles(&self) -> Vec<String> {
        self.switcher_views
            .iter()
            .map(|id| {
                self.view_index(*id)
                    .map(|index| {
                        let surface = self.views[index].toplevel.wl_surface();
                        with_states(surface, |states| {
                            let attrs = states
                                .data_map
                                .get::<XdgToplevelSurfaceData>()
                                .expect("Impossible toplevel without role data")
                                .lock()
                                .unwrap();
                            attrs
                                .title
                                .clone()
                                .or_else(|| attrs.app_id.clone())
                        })
                    })
                    .flatten()
                    .unwrap_or_else(|| format!("window {id}"))
            })
            .collect()
    }

    // ---- gather ---------------------------------------------------

    /// Pull all mapped views towards their centroid and snap the
    /// viewport to the result.
    pub fn gather_views(&mut self) {
        let mapped: Vec<u64> = self.views.iter().filter(|v| v.mapped).map(|v| v.id).collect();
        let data: Vec<_> = mapped
            .iter()
            .map(|id| {
                let view = &self.views[self.view_index(*id).unwrap()];
                (view.centre(), view.geometry().size)
            })
            .collect();
        let Some((centres, centroid)) = gather_centres(&data) else {
            return;
        };
        for (id, centre) in mapped.iter().zip(centres) {
            let index = self.view_index(*id).unwrap();
            self.views[index].set_centre(centre);
        }
        let out_size = self.backend_data.output_geometry().size;
        let now = self.now_ms();
        self.canvas.snap_to(centroid, out_size, now);
        info!(views = mapped.len(), "gathered views");
        self.needs_redraw = true;
    }

    // ---- layer shell ----------------------------------------------

    pub fn arrange_layers(&mut self) {
        let geometry = self.backend_data.output_geometry();
        self.backend_data.usable_area = self.backend_data.layers.arrange(geometry);
        self.needs_redraw = true;
    }

    // ---- commit plumbing ------------------------------------------

    fn handle_toplevel_commit(&mut self, surface: &WlSurface) {
        let Some(index) = self
            .views
            .iter()
            .position(|v| v.toplevel.wl_surface() == surface)
        else {
            return;
        };

        // On the very first commit the client gets a zero-sized
        // configure so it picks its own size.
        let initial_configure_sent = with_states(surface, |states| {
            states
                .data_map
                .get::<XdgToplevelSurfaceData>()
                .expect("Impossible toplevel without role data")
                .lock()
                .unwrap()
                .initial_configure_sent
        });
        if !initial_configure_sent {
            self.views[index].toplevel.send_configure();
            return;
        }

        let has_buffer =
            with_renderer_surface_state(surface, |state| state.buffer().is_some())
                .unwrap_or(false);

        let (mapped, id) = {
            let view = &self.views[index];
            (view.mapped, view.id)
        };

        if !mapped && has_buffer {
            // The client mapped: centre it in the usable area and run
            // the map-in animation.
            let now = self.now_ms();
            let usable = self.backend_data.usable_area;
            let view = &mut self.views[index];
            view.mark_mapped(now);
            view.geo_offset = view.geometry().loc;
            let size = view.geometry().size;
            view.position = centred_position(usable, &self.canvas, size);
            debug!(view = id, position = ?view.position, "view mapped");
            self.focus_view(id);
            self.raise_view(id);
        } else if mapped && !has_buffer {
            // Unmapped. No exit animation in this release.
            self.views[index].mark_unmapped();
            self.cancel_interactions_for(id);
            let focused = self.views[index].focused;
            if focused {
                self.views[index].focused = false;
                let next = self.views.iter().find(|v| v.mapped).map(|v| v.id);
                match next {
                    Some(next) => {
                        // Raise as well, so the head of the list stays
                        // the focused view.
                        self.focus_view(next);
                        self.raise_view(next);
                    }
                    None => {
                        let keyboard = self
                            .seat
                            .get_keyboard()
                            .expect("Impossible seat without keyboard");
                        keyboard.set_focus(self, None, SERIAL_COUNTER.next_serial());
                    }
                }
            }
            debug!(view = id, "view unmapped");
        } else if mapped {
            // Re-cache the geometry offset, it moves when the client
            // resizes its shadows.
            let view = &mut self.views[index];
            let geo = view.geometry();
            if geo.loc != view.geo_offset {
                view.geo_offset = geo.loc;
            }
        }
    }

    fn handle_layer_commit(&mut self, surface: &WlSurface) {
        if !self.backend_data.layers.contains(surface) {
            return;
        }
        // Arrange before the initial configure so the size we send
        // respects what the client asked for.
        self.arrange_layers();
        let initial_configure_sent = with_states(surface, |states| {
            states
                .data_map
                .get::<LayerSurfaceData>()
                .expect("Impossible layer surface without role data")
                .lock()
                .unwrap()
                .initial_configure_sent
        });
        if !initial_configure_sent {
            if let Some(entry) = self
                .backend_data
                .layers
                .iter()
                .find(|e| e.surface.wl_surface() == surface)
            {
                entry.surface.send_configure();
            }
        }
    }
}

// ---- handler impls ------------------------------------------------

impl CompositorHandler for InfinideskState {
    fn compositor_state(&mut self) -> &mut CompositorState {
        &mut self.compositor_state
    }

    fn client_compositor_state<'a>(&self, client: &'a Client) -> &'a CompositorClientState {
        &client
            .get_data::<ClientState>()
            .expect("Impossible client without ClientState")
            .compositor_state
    }

    fn commit(&mut self, surface: &WlSurface) {
        // Take the committed buffer into the renderer bookkeeping.
        on_commit_buffer_handler::<Self>(surface);

        if !is_sync_subsurface(surface) {
            let mut root = surface.clone();
            while let Some(parent) = get_parent(&root) {
                root = parent;
            }
            self.handle_toplevel_commit(&root);
        }

        self.popups.commit(surface);
        if let Some(popup) = self.popups.find_popup(surface) {
            if let PopupKind::Xdg(popup) = popup {
                if !popup.is_initial_configure_sent() {
                    // The initial configure is always allowed.
                    popup.send_configure().expect("initial popup configure failed");
                }
            }
        }

        self.handle_layer_commit(surface);
        self.needs_redraw = true;
    }
}
delegate_compositor!(InfinideskState);

impl BufferHandler for InfinideskState {
    fn buffer_destroyed(&mut self, _buffer: &wl_buffer::WlBuffer) {}
}

impl ShmHandler for InfinideskState {
    fn shm_state(&self) -> &ShmState {
        &self.shm_state
    }
}
delegate_shm!(InfinideskState);

impl XdgShellHandler for InfinideskState {
    fn xdg_shell_state(&mut self) -> &mut XdgShellState {
        &mut self.xdg_shell_state
    }

    fn new_toplevel(&mut self, surface: ToplevelSurface) {
        let id = self.next_view_id;
        self.next_view_id += 1;
        // Content only appears at map time; until then the view waits
        // at the tail so the head remains the focused view. The map
        // path raises it.
        self.views.push(View::new(id, surface));
        debug!(view = id, "new toplevel");
    }

    fn toplevel_destroyed(&mut self, surface: ToplevelSurface) {
        let Some(index) = self.views.iter().position(|v| v.toplevel == surface) else {
            warn!("destroy for an unknown toplevel");
            return;
        };
        let id = self.views[index].id;
        self.cancel_interactions_for(id);
        if self.switcher.active && self.switcher_views.contains(&id) {
            self.switcher_cancel();
        }
        let view = self.views.remove(index);
        debug!(view = id, "toplevel destroyed");

        if view.focused {
            if let Some(next) = self.views.iter().find(|v| v.mapped).map(|v| v.id) {
                self.focus_view(next);
                self.raise_view(next);
            } else {
                let keyboard = self
                    .seat
                    .get_keyboard()
                    .expect("Impossible seat without keyboard");
                keyboard.set_focus(self, None, SERIAL_COUNTER.next_serial());
            }
        }
        self.needs_redraw = true;
    }

    fn new_popup(&mut self, surface: PopupSurface, _positioner: PositionerState) {
        if let Err(err) = self.popups.track_popup(PopupKind::Xdg(surface)) {
            warn!("failed to track popup: {err}");
        }
    }

    fn reposition_request(
        &mut self,
        surface: PopupSurface,
        positioner: PositionerState,
        token: u32,
    ) {
        surface.with_pending_state(|state| {
            state.geometry = positioner.get_geometry();
            state.positioner = positioner;
        });
        surface.send_repositioned(token);
    }

    // Server-side decorations are forced, so client-initiated move and
    // resize grabs do not occur; the canvas move gesture replaces them.
    fn move_request(&mut self, _surface: ToplevelSurface, _seat: wl_seat::WlSeat, _serial: Serial) {}

    fn resize_request(
        &mut self,
        _surface: ToplevelSurface,
        _seat: wl_seat::WlSeat,
        _serial: Serial,
        _edges: xdg_toplevel::ResizeEdge,
    ) {
    }

    fn grab(&mut self, _surface: PopupSurface, _seat: wl_seat::WlSeat, _serial: Serial) {}
}
delegate_xdg_shell!(InfinideskState);

impl WlrLayerShellHandler for InfinideskState {
    fn shell_state(&mut self) -> &mut WlrLayerShellState {
        &mut self.layer_shell_state
    }

    fn new_layer_surface(
        &mut self,
        surface: WlrLayerSurface,
        _output: Option<WlOutput>,
        layer: Layer,
        namespace: String,
    ) {
        // Single-output build: everything lands on the primary output,
        // which always exists while the backend is alive.
        debug!(%namespace, ?layer, "new layer surface");
        self.backend_data.layers.add(surface, layer);
        self.arrange_layers();
    }

    fn layer_destroyed(&mut self, surface: WlrLayerSurface) {
        self.backend_data.layers.remove(&surface);
        self.arrange_layers();
    }

    fn new_popup(&mut self, _parent: WlrLayerSurface, popup: PopupSurface) {
        if let Err(err) = self.popups.track_popup(PopupKind::Xdg(popup)) {
            warn!("failed to track layer popup: {err}");
        }
    }
}
delegate_layer_shell!(InfinideskState);

impl XdgDecorationHandler for InfinideskState {
    // The compositor draws borders itself, so clients are always told
    // to skip their own decorations.
    fn new_decoration(&mut self, toplevel: ToplevelSurface) {
        toplevel.with_pending_state(|state| {
            state.decoration_mode = Some(DecorationMode::ServerSide);
        });
    }

    fn request_mode(&mut self, toplevel: ToplevelSurface, _mode: DecorationMode) {
        toplevel.with_pending_state(|state| {
            state.decoration_mode = Some(DecorationMode::ServerSide);
        });
        let initial_configure_sent = with_states(toplevel.wl_surface(), |states| {
            states
                .data_map
                .get::<XdgToplevelSurfaceData>()
                .expect("Impossible toplevel without role data")
                .lock()
                .unwrap()
                .initial_configure_sent
        });
        if initial_configure_sent {
            toplevel.send_pending_configure();
        }
    }

    fn unset_mode(&mut self, toplevel: ToplevelSurface) {
        self.request_mode(toplevel, DecorationMode::ServerSide);
    }
}
delegate_xdg_decoration!(InfinideskState);

impl SeatHandler for InfinideskState {
    type KeyboardFocus = WlSurface;
    type PointerFocus = WlSurface;
    type TouchFocus = WlSurface;

    fn seat_state(&mut self) -> &mut SeatState<Self> {
        &mut self.seat_state
    }

    fn focus_changed(&mut self, seat: &Seat<Self>, focused: Option<&WlSurface>) {
        let dh = &self.display_handle;
        let client = focused.and_then(|s| dh.get_client(s.id()).ok());
        set_data_device_focus(dh, seat, client);
    }

    fn cursor_image(&mut self, _seat: &Seat<Self>, image: CursorImageStatus) {
        self.cursor_status = image;
        self.needs_redraw = true;
    }
}
delegate_seat!(InfinideskState);

impl SelectionHandler for InfinideskState {
    type SelectionUserData = ();
}

impl DataDeviceHandler for InfinideskState {
    fn data_device_state(&self) -> &DataDeviceState {
        &self.data_device_state
    }
}

impl ClientDndGrabHandler for InfinideskState {}
impl ServerDndGrabHandler for InfinideskState {
    fn send(&mut self, _mime_type: String, _fd: std::os::fd::OwnedFd, _seat: Seat<Self>) {}
}
delegate_data_device!(InfinideskState);

impl OutputHandler for InfinideskState {}
delegate_output!(InfinideskState);
delegate_viewporter!(InfinideskState);

impl FractionalScaleHandler for InfinideskState {
    fn new_fractional_scale(&mut self, surface: WlSurface) {
        // One output, one scale.
        let scale = self
            .backend_data
            .output
            .current_scale()
            .fractional_scale();
        with_states(&surface, |states| {
            with_fractional_scale(states, |fractional_scale| {
                fractional_scale.set_preferred_scale(scale);
            });
        });
    }
}
delegate_fractional_scale!(InfinideskState);
