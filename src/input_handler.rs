//! Input handling: the pointer-mode state machine, scroll arbitration
//! and the keybind table.
//!
//! Every seat event lands in [`handle_input`], which applies the side
//! effects to the state and forwards to clients where the compositor
//! does not claim the event. The keyboard filter runs inside
//! `keyboard.input` and returns an action for the tail of the function
//! to execute, once the keyboard borrow is gone.

use std::time::Duration;

use smithay::{
    backend::{
        input::{
            AbsolutePositionEvent, Axis, ButtonState, Event, InputEvent, KeyState,
            KeyboardKeyEvent, PointerAxisEvent, PointerButtonEvent,
        },
        winit::WinitInput,
    },
    input::{
        keyboard::{keysyms, FilterResult, ModifiersState},
        pointer::{AxisFrame, ButtonEvent, CursorImageStatus, MotionEvent},
    },
    utils::{Logical, Point, SERIAL_COUNTER},
};
use tracing::{debug, trace, warn};

use crate::canvas::ZOOM_STEP;
use crate::config::{self, Action};
use crate::drawing::DrawingState;
use crate::state::{CursorMode, InfinideskState};

/// Holding this modifier turns the pointer buttons into canvas
/// gestures: left drags a window, right pans the viewport.
const DRAG_MODIFIER: u8 = config::MOD_SUPER;

const BTN_LEFT: u32 = 0x110;
const BTN_RIGHT: u32 = 0x111;

/// Milliseconds of scroll inactivity that end a scroll-pan gesture.
const SCROLL_PAN_TIMEOUT_MS: u64 = 100;

/// What the keyboard filter decided, executed after the borrow ends.
enum KeyAction {
    Config(Action),
    SwitcherNext,
    SwitcherPrev,
    SwitcherConfirm,
    SwitcherCancel,
    /// A release whose press was already intercepted.
    Suppressed,
}

pub fn handle_input(state: &mut InfinideskState, event: InputEvent<WinitInput>) {
    match event {
        InputEvent::Keyboard { event } => handle_keyboard(state, event),
        InputEvent::PointerMotionAbsolute { event } => {
            let output_geo = state.backend_data.output_geometry();
            let position = event.position_transformed(output_geo.size);
            state.pointer_location = position;
            handle_pointer_motion(state, event.time_msec());
        }
        InputEvent::PointerButton { event } => handle_pointer_button(state, &event),
        InputEvent::PointerAxis { event } => handle_pointer_axis(state, &event),
        event => trace!("unhandled input event: {event:?}"),
    }
}

fn mods_mask(modifiers: &ModifiersState) -> u8 {
    let mut mask = 0;
    if modifiers.shift {
        mask |= config::MOD_SHIFT;
    }
    if modifiers.ctrl {
        mask |= config::MOD_CTRL;
    }
    if modifiers.alt {
        mask |= config::MOD_ALT;
    }
    if modifiers.logo {
        mask |= config::MOD_SUPER;
    }
    mask
}

fn is_modifier_sym(raw: u32) -> bool {
    matches!(
        raw,
        keysyms::KEY_Alt_L
            | keysyms::KEY_Alt_R
            | keysyms::KEY_Super_L
            | keysyms::KEY_Super_R
            | keysyms::KEY_Control_L
            | keysyms::KEY_Control_R
            | keysyms::KEY_Shift_L
            | keysyms::KEY_Shift_R
    )
}

fn handle_keyboard(
    state: &mut InfinideskState,
    event: <WinitInput as smithay::backend::input::InputBackend>::KeyboardKeyEvent,
) {
    let serial = SERIAL_COUNTER.next_serial();
    let time = Event::time_msec(&event);
    let press_state = event.state();
    let key_code = event.key_code();
    let keyboard = state
        .seat
        .get_keyboard()
        .expect("Impossible seat without keyboard");

    let action = keyboard.input::<KeyAction, _>(
        state,
        key_code,
        press_state,
        serial,
        time,
        |state, modifiers, keysym| {
            // Keep the drag-modifier flag current for the pointer path.
            state.drag_modifier_held = mods_mask(modifiers) & DRAG_MODIFIER != 0;

            let modified = keysym.modified_sym().raw();
            let raw = keysym
                .raw_syms()
                .first()
                .map(|sym| sym.raw())
                .unwrap_or(modified);
            trace!(?press_state, modified, raw, "key event");

            // The switcher claims its navigation keys while active, and
            // confirms when the chord's modifier is released.
            if state.switcher.active {
                if press_state == KeyState::Released && is_modifier_sym(modified) {
                    return FilterResult::Intercept(KeyAction::SwitcherConfirm);
                }
                if press_state == KeyState::Pressed {
                    match modified {
                        keysyms::KEY_Tab | keysyms::KEY_Right => {
                            return FilterResult::Intercept(KeyAction::SwitcherNext)
                        }
                        keysyms::KEY_ISO_Left_Tab | keysyms::KEY_Left => {
                            return FilterResult::Intercept(KeyAction::SwitcherPrev)
                        }
                        keysyms::KEY_Return => {
                            return FilterResult::Intercept(KeyAction::SwitcherConfirm)
                        }
                        keysyms::KEY_Escape => {
                            return FilterResult::Intercept(KeyAction::SwitcherCancel)
                        }
                        _ => {}
                    }
                }
            }

            if press_state == KeyState::Pressed {
                let mask = mods_mask(modifiers);
                let action = state
                    .config
                    .action_for(mask, raw)
                    .or_else(|| state.config.action_for(mask, modified));
                if let Some(action) = action {
                    let action = action.clone();
                    // Swallow the matching release as well.
                    state.suppressed_keys.push(key_code);
                    return FilterResult::Intercept(KeyAction::Config(action));
                }
            } else if let Some(position) = state
                .suppressed_keys
                .iter()
                .position(|&code| code == key_code)
            {
                state.suppressed_keys.remove(position);
                return FilterResult::Intercept(KeyAction::Suppressed);
            }

            FilterResult::Forward
        },
    );

    match action {
        Some(KeyAction::Config(action)) => execute_action(state, action),
        Some(KeyAction::SwitcherNext) => {
            let count = state.switcher_views.len();
            state.switcher.next(count);
            state.needs_redraw = true;
        }
        Some(KeyAction::SwitcherPrev) => {
            let count = state.switcher_views.len();
            state.switcher.prev(count);
            state.needs_redraw = true;
        }
        Some(KeyAction::SwitcherConfirm) => state.switcher_confirm(),
        Some(KeyAction::SwitcherCancel) => state.switcher_cancel(),
        Some(KeyAction::Suppressed) | None => {}
    }
}

pub fn execute_action(state: &mut InfinideskState, action: Action) {
    debug!(?action, "keybind action");
    match action {
        Action::Exec(command) => spawn_command(&command),
        Action::CloseWindow => {
            if let Some(view) = state.views.iter().find(|v| v.focused) {
                view.send_close();
            }
        }
        Action::Exit => {
            state
                .running
                .store(false, std::sync::atomic::Ordering::SeqCst);
        }
        Action::ToggleDrawing => {
            state.drawing.toggle_mode();
            if !state.drawing.mode_active && state.cursor_mode == CursorMode::Draw {
                state.cursor_mode = CursorMode::Passthrough;
            }
            state.needs_redraw = true;
        }
        Action::ClearDrawings => {
            state.drawing.clear();
            state.needs_redraw = true;
        }
        Action::Undo => {
            state.drawing.undo();
            state.needs_redraw = true;
        }
        Action::Redo => {
            state.drawing.redo();
            state.needs_redraw = true;
        }
        Action::Gather => state.gather_views(),
        Action::Switcher => state.switcher_activate(),
    }
}

/// Spawn an external command, splitting it like a shell would. A
/// failure is logged and otherwise ignored.
pub fn spawn_command(command: &str) {
    let Some(parts) = shlex::split(command) else {
        warn!(%command, "unparseable command");
        return;
    };
    let Some((program, args)) = parts.split_first() else {
        warn!(%command, "empty command");
        return;
    };
    match std::process::Command::new(program).args(args).spawn() {
        Ok(child) => debug!(%command, pid = child.id(), "spawned"),
        Err(err) => warn!(%command, "failed to spawn: {err}"),
    }
}

fn handle_pointer_motion(state: &mut InfinideskState, time: u32) {
    let position = state.pointer_location;
    state.needs_redraw = true;

    match state.cursor_mode {
        CursorMode::Move => {
            let cursor_canvas = state.canvas.to_canvas(position);
            if let Some(id) = state.grabbed_view {
                if let Some(index) = state.view_index(id) {
                    state.views[index].move_update(cursor_canvas);
                }
            }
        }
        CursorMode::Pan => state.canvas.pan_update(position),
        CursorMode::Draw => {
            let point = state.canvas.to_canvas(position);
            state.drawing.add_point(point);
        }
        CursorMode::Resize => {}
        CursorMode::Passthrough => {
            if state.drawing.mode_active {
                state.drawing.hovered_swatch = DrawingState::swatch_at(position);
            }

            let under = state.surface_under(position);
            if under.is_some() {
                // Focus follows the mouse without raising, except while
                // a scroll-pan gesture is navigating past windows.
                if !state.scroll_pan.active {
                    if let Some((id, _)) = state.view_under(position) {
                        state.focus_view(id);
                    }
                }
            } else {
                // Empty canvas: drop pointer focus, show our cursor.
                state.cursor_status = CursorImageStatus::default_named();
            }

            let pointer = state
                .seat
                .get_pointer()
                .expect("Impossible seat without pointer");
            let serial = SERIAL_COUNTER.next_serial();
            pointer.motion(
                state,
                under,
                &MotionEvent {
                    location: position,
                    serial,
                    time,
                },
            );
            pointer.frame(state);
        }
    }
}

fn handle_pointer_button(
    state: &mut InfinideskState,
    event: &<WinitInput as smithay::backend::input::InputBackend>::PointerButtonEvent,
) {
    let button = event.button_code();
    let button_state = event.state();
    let position = state.pointer_location;
    state.needs_redraw = true;

    let forward = match button_state {
        ButtonState::Pressed => button_pressed(state, button, position),
        ButtonState::Released => {
            // Ending a compositor gesture swallows the release; the
            // client never saw the press.
            match state.cursor_mode {
                CursorMode::Move => {
                    if let Some(id) = state.grabbed_view.take() {
                        if let Some(index) = state.view_index(id) {
                            state.views[index].move_end();
                        }
                    }
                    state.cursor_mode = CursorMode::Passthrough;
                    false
                }
                CursorMode::Pan => {
                    state.canvas.pan_end();
                    state.cursor_mode = CursorMode::Passthrough;
                    false
                }
                CursorMode::Draw => {
                    state.drawing.end_stroke();
                    state.cursor_mode = CursorMode::Passthrough;
                    false
                }
                _ => true,
            }
        }
    };

    if forward {
        let pointer = state
            .seat
            .get_pointer()
            .expect("Impossible seat without pointer");
        let serial = SERIAL_COUNTER.next_serial();
        pointer.button(
            state,
            &ButtonEvent {
                button,
                state: button_state,
                serial,
                time: event.time_msec(),
            },
        );
        pointer.frame(state);
    }
}

/// Button-press arbitration. Returns whether the press is forwarded to
/// the client under the cursor.
fn button_pressed(
    state: &mut InfinideskState,
    button: u32,
    position: Point<f64, Logical>,
) -> bool {
    // Drawing mode first: palette clicks, then stroke starts.
    if state.drawing.mode_active {
        if let Some(swatch) = DrawingState::swatch_at(position) {
            debug!(swatch, "palette click");
            state.drawing.set_color(swatch);
            return false;
        }
        if button == BTN_LEFT {
            state.cursor_mode = CursorMode::Draw;
            let point = state.canvas.to_canvas(position);
            state.drawing.begin_stroke(point);
            return false;
        }
    }

    // Modifier gestures: window drag and canvas pan.
    if state.drag_modifier_held && button == BTN_LEFT {
        if let Some((id, _)) = state.view_under(position) {
            state.focus_view(id);
            state.raise_view(id);
            state.cursor_mode = CursorMode::Move;
            state.grabbed_view = Some(id);
            let cursor_canvas = state.canvas.to_canvas(position);
            if let Some(index) = state.view_index(id) {
                state.views[index].move_begin(cursor_canvas);
            }
            return false;
        }
    }
    if state.drag_modifier_held && button == BTN_RIGHT {
        state.cursor_mode = CursorMode::Pan;
        state.canvas.pan_begin(position);
        return false;
    }

    // Plain click: click-to-focus raises, and the client receives the
    // button through the seat either way.
    if let Some((id, _)) = state.view_under(position) {
        state.focus_view(id);
        state.raise_view(id);
    }
    true
}

fn handle_pointer_axis(
    state: &mut InfinideskState,
    event: &<WinitInput as smithay::backend::input::InputBackend>::PointerAxisEvent,
) {
    let horizontal = event
        .amount(Axis::Horizontal)
        .unwrap_or_else(|| event.amount_v120(Axis::Horizontal).unwrap_or(0.0) * 15.0 / 120.0);
    let vertical = event
        .amount(Axis::Vertical)
        .unwrap_or_else(|| event.amount_v120(Axis::Vertical).unwrap_or(0.0) * 15.0 / 120.0);
    let position = state.pointer_location;

    // Modifier + scroll zooms about the cursor; one wheel notch is one
    // ZOOM_STEP, scrolling up zooms in.
    if state.drag_modifier_held {
        if vertical != 0.0 {
            let notches = -vertical / 15.0;
            state.canvas.zoom(ZOOM_STEP.powf(notches), position);
            state.needs_redraw = true;
        }
        return;
    }

    // An active scroll-pan gesture owns every scroll event until the
    // inactivity timer fires, no matter what is under the cursor.
    if state.scroll_pan.active {
        state.canvas.pan_delta(horizontal, vertical);
        reset_scroll_pan_timer(state);
        state.needs_redraw = true;
        return;
    }

    if state.view_under(position).is_some() {
        // Over a window: the client gets the axis event.
        let pointer = state
            .seat
            .get_pointer()
            .expect("Impossible seat without pointer");
        let mut frame = AxisFrame::new(event.time_msec()).source(event.source());
        if horizontal != 0.0 {
            frame = frame.value(Axis::Horizontal, horizontal);
            if let Some(discrete) = event.amount_v120(Axis::Horizontal) {
                frame = frame.v120(Axis::Horizontal, discrete as i32);
            }
        }
        if vertical != 0.0 {
            frame = frame.value(Axis::Vertical, vertical);
            if let Some(discrete) = event.amount_v120(Axis::Vertical) {
                frame = frame.v120(Axis::Vertical, discrete as i32);
            }
        }
        pointer.axis(state, frame);
        pointer.frame(state);
    } else {
        // Empty canvas: begin a scroll-pan gesture.
        debug!("scroll-pan gesture started");
        state.scroll_pan.active = true;
        state.canvas.pan_delta(horizontal, vertical);
        reset_scroll_pan_timer(state);
        state.needs_redraw = true;
    }
}

/// (Re)arm the scroll-pan inactivity timer; each scroll replaces the
/// previous deadline.
fn reset_scroll_pan_timer(state: &mut InfinideskState) {
    use smithay::reexports::calloop::timer::{TimeoutAction, Timer};

    if let Some(token) = state.scroll_pan.timer.take() {
        state.handle.remove(token);
    }
    let timer = Timer::from_duration(Duration::from_millis(SCROLL_PAN_TIMEOUT_MS));
    match state.handle.insert_source(timer, |_, _, data| {
        debug!("scroll-pan gesture ended");
        data.state.scroll_pan.active = false;
        data.state.scroll_pan.timer = None;
        TimeoutAction::Drop
    }) {
        Ok(token) => state.scroll_pan.timer = Some(token),
        Err(err) => {
            warn!("failed to arm scroll-pan timer: {err}");
            state.scroll_pan.active = false;
        }
    }
}
