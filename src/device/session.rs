// src/device/session.rs
//! DeviceSession - owns the native connection's request half and normalizes
//! native callbacks into `InputEvent`s.
//!
//! States: `Uninitialized -> Connected -> Disconnected -> Terminated`.
//! Focus is tracked per seat and is independent of the control side's
//! active window. Every produced event goes to an `EventSink`; the session
//! never waits for acknowledgment.

use crate::channel::EventSink;
use crate::device::backend::{
    ImeRequest, NativeDisplay, NativeEvent, NativeEventSource, OutputInfo, RegionOp, SeatId,
    SurfaceController,
};
use crate::error::BridgeError;
use crate::keys::{button_flag, ButtonFlags, Modifiers};
use crate::protocol::{
    ButtonKind, ControlCommand, InputEvent, KeyState, Point, TouchKind, WidgetState, WidgetType,
    WindowHandle,
};
use log::*;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Connected,
    /// The native connection failed; fatal for this session.
    Disconnected,
    Terminated,
}

#[derive(Debug, Clone, Copy)]
struct TouchPoint {
    handle: WindowHandle,
    x: f32,
    y: f32,
}

#[derive(Debug, Default)]
struct SeatFocus {
    pointer: Option<WindowHandle>,
    pointer_x: f32,
    pointer_y: f32,
    buttons: ButtonFlags,
    keyboard: Option<WindowHandle>,
    modifiers: Modifiers,
    touches: BTreeMap<i32, TouchPoint>,
}

impl SeatFocus {
    fn forget(&mut self, handle: WindowHandle) {
        if self.pointer == Some(handle) {
            self.pointer = None;
            self.buttons = ButtonFlags::empty();
        }
        if self.keyboard == Some(handle) {
            self.keyboard = None;
        }
        self.touches.retain(|_, touch| touch.handle != handle);
    }
}

#[derive(Debug)]
struct NativeWindow {
    parent: Option<WindowHandle>,
    kind: WidgetType,
    title: String,
    state: WidgetState,
    width: u32,
    height: u32,
    region: Vec<RegionOp>,
}

pub struct DeviceSession {
    state: SessionState,
    surfaces: Option<Box<dyn SurfaceController>>,
    outputs: Vec<OutputInfo>,
    seats: BTreeMap<SeatId, SeatFocus>,
    windows: HashMap<WindowHandle, NativeWindow>,
}

impl Default for DeviceSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            surfaces: None,
            outputs: Vec::new(),
            seats: BTreeMap::new(),
            windows: HashMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Geometry of the first discovered output still present.
    pub fn primary_output(&self) -> Option<OutputInfo> {
        self.outputs.first().copied()
    }

    pub fn seat_count(&self) -> usize {
        self.seats.len()
    }

    pub fn pointer_focus(&self, seat: SeatId) -> Option<WindowHandle> {
        self.seats.get(&seat).and_then(|focus| focus.pointer)
    }

    pub fn keyboard_focus(&self, seat: SeatId) -> Option<WindowHandle> {
        self.seats.get(&seat).and_then(|focus| focus.keyboard)
    }

    pub fn has_window(&self, handle: WindowHandle) -> bool {
        self.windows.contains_key(&handle)
    }

    pub fn window_parent(&self, handle: WindowHandle) -> Option<WindowHandle> {
        self.windows.get(&handle).and_then(|window| window.parent)
    }

    pub fn window_title(&self, handle: WindowHandle) -> Option<&str> {
        self.windows.get(&handle).map(|window| window.title.as_str())
    }

    /// Opens the display, replays discovery and hands back the blocking
    /// event source for the native-loop thread.
    pub fn initialize<D: NativeDisplay>(
        &mut self,
        display: D,
        sink: &mut dyn EventSink,
    ) -> Result<Box<dyn NativeEventSource>, BridgeError> {
        if self.state != SessionState::Uninitialized {
            return Err(BridgeError::ProtocolViolation(format!(
                "session already initialized ({:?})",
                self.state
            )));
        }

        let connection = match display.connect() {
            Ok(connection) => connection,
            Err(e) => {
                self.state = SessionState::Disconnected;
                error!("DeviceSession: native display unavailable: {}", e);
                return Err(match e {
                    BridgeError::HardwareUnavailable(_) => e,
                    other => BridgeError::HardwareUnavailable(other.to_string()),
                });
            }
        };

        self.surfaces = Some(connection.surfaces);
        self.state = SessionState::Connected;
        info!(
            "DeviceSession: connected, replaying {} discovery event(s)",
            connection.discovery.len()
        );
        for event in connection.discovery {
            self.handle_native(event, sink)?;
        }
        Ok(connection.events)
    }

    /// Applies one inbound command to the native windows.
    ///
    /// Commands naming unknown handles are protocol violations: logged and
    /// dropped. Only backend failures are returned.
    pub fn apply_command(
        &mut self,
        command: ControlCommand,
        sink: &mut dyn EventSink,
    ) -> Result<(), BridgeError> {
        if self.state != SessionState::Connected {
            debug!(
                "DeviceSession: dropping {:?} in state {:?}",
                command, self.state
            );
            return Ok(());
        }
        if let ControlCommand::SetWidgetState {
            handle,
            state: WidgetState::Destroyed,
            ..
        } = command
        {
            if !self.windows.contains_key(&handle) {
                // Its surface went with an earlier device; still acknowledge.
                debug!("DeviceSession: destroy of unknown surface {}, acknowledging", handle);
                emit(sink, InputEvent::WindowClosed { handle });
                return Ok(());
            }
        }
        if let Some(handle) = command.handle() {
            let creating = matches!(command, ControlCommand::CreateWidget { .. });
            if creating == self.windows.contains_key(&handle) {
                warn!(
                    "DeviceSession: protocol violation: {:?} for {} handle {}",
                    command,
                    if creating { "existing" } else { "unknown" },
                    handle
                );
                return Ok(());
            }
        }

        let Some(surfaces) = self.surfaces.as_mut() else {
            return Err(BridgeError::HardwareUnavailable(
                "no surface controller".to_string(),
            ));
        };

        match command {
            ControlCommand::CreateWidget {
                handle,
                parent,
                x,
                y,
                kind,
            } => {
                if let Some(parent) = parent {
                    if !self.windows.contains_key(&parent) {
                        warn!(
                            "DeviceSession: protocol violation: parent {} of {} is unknown",
                            parent, handle
                        );
                        return Ok(());
                    }
                }
                tolerate(surfaces.create_surface(handle, parent, Point::new(x, y), kind))?;
                debug!("DeviceSession: created {:?} surface {}", kind, handle);
                self.windows.insert(
                    handle,
                    NativeWindow {
                        parent,
                        kind,
                        title: String::new(),
                        state: WidgetState::Hide,
                        width: 0,
                        height: 0,
                        region: Vec::new(),
                    },
                );
            }
            ControlCommand::SetWidgetState {
                handle,
                state: WidgetState::Destroyed,
                ..
            } => {
                tolerate(surfaces.destroy_surface(handle))?;
                self.windows.remove(&handle);
                for focus in self.seats.values_mut() {
                    focus.forget(handle);
                }
                debug!("DeviceSession: destroyed surface {}", handle);
                emit(sink, InputEvent::WindowClosed { handle });
            }
            ControlCommand::SetWidgetState {
                handle,
                state,
                width,
                height,
            } => {
                tolerate(surfaces.set_state(handle, state, width, height))?;
                if let Some(window) = self.windows.get_mut(&handle) {
                    window.state = state;
                    if width > 0 && height > 0 {
                        window.width = width;
                        window.height = height;
                    }
                }
            }
            ControlCommand::SetWidgetTitle { handle, title } => {
                tolerate(surfaces.set_title(handle, &title))?;
                if let Some(window) = self.windows.get_mut(&handle) {
                    window.title = title;
                }
            }
            ControlCommand::SetWidgetCursor { frames, hotspot } => {
                tolerate(surfaces.set_cursor(&frames, hotspot))?;
            }
            ControlCommand::AddRegion { handle, rect } | ControlCommand::SubRegion { handle, rect }
                if rect.is_empty() =>
            {
                trace!("DeviceSession: ignoring empty region for {}", handle);
            }
            ControlCommand::AddRegion { handle, rect } => {
                if let Some(window) = self.windows.get_mut(&handle) {
                    window.region.push(RegionOp::Add(rect));
                    tolerate(surfaces.set_input_region(handle, &window.region))?;
                }
            }
            ControlCommand::SubRegion { handle, rect } => {
                if let Some(window) = self.windows.get_mut(&handle) {
                    window.region.push(RegionOp::Subtract(rect));
                    tolerate(surfaces.set_input_region(handle, &window.region))?;
                }
            }
            ControlCommand::MoveCursor { point } => tolerate(surfaces.move_cursor(point))?,
            ControlCommand::ImeReset => tolerate(surfaces.ime(ImeRequest::Reset))?,
            ControlCommand::ShowInputPanel => tolerate(surfaces.ime(ImeRequest::ShowPanel))?,
            ControlCommand::HideInputPanel => tolerate(surfaces.ime(ImeRequest::HidePanel))?,
        }
        Ok(())
    }

    /// Normalizes one native callback. Returns `HardwareUnavailable` when the
    /// native connection is lost; the session is unusable afterwards.
    pub fn handle_native(
        &mut self,
        event: NativeEvent,
        sink: &mut dyn EventSink,
    ) -> Result<(), BridgeError> {
        if self.state != SessionState::Connected {
            trace!(
                "DeviceSession: ignoring native event in state {:?}: {:?}",
                self.state,
                event
            );
            return Ok(());
        }

        match event {
            NativeEvent::OutputAdded(info) => {
                let first = self.outputs.is_empty();
                self.outputs.push(info);
                if first {
                    emit_output_size(sink, info);
                }
            }
            NativeEvent::OutputChanged(info) => {
                if let Some(output) = self.outputs.iter_mut().find(|o| o.id == info.id) {
                    *output = info;
                }
                if self.primary_output().map(|o| o.id) == Some(info.id) {
                    emit_output_size(sink, info);
                }
            }
            NativeEvent::OutputRemoved { id } => {
                let was_primary = self.primary_output().map(|o| o.id) == Some(id);
                self.outputs.retain(|o| o.id != id);
                if let (true, Some(next)) = (was_primary, self.primary_output()) {
                    emit_output_size(sink, next);
                }
            }
            NativeEvent::SeatAdded { seat } => {
                debug!("DeviceSession: seat {} added", seat);
                self.seats.entry(seat).or_default();
            }
            NativeEvent::SeatRemoved { seat } => {
                debug!("DeviceSession: seat {} removed", seat);
                self.seats.remove(&seat);
            }

            NativeEvent::PointerEnter { seat, handle, x, y } => {
                if !self.known(handle, "pointer enter") {
                    return Ok(());
                }
                let focus = self.seats.entry(seat).or_default();
                focus.pointer = Some(handle);
                focus.pointer_x = x;
                focus.pointer_y = y;
                emit(sink, InputEvent::PointerEnter { handle, x, y });
            }
            NativeEvent::PointerLeave { seat, handle } => {
                let focus = self.seats.entry(seat).or_default();
                let (x, y) = (focus.pointer_x, focus.pointer_y);
                if focus.pointer == Some(handle) {
                    focus.pointer = None;
                    focus.buttons = ButtonFlags::empty();
                }
                if self.windows.contains_key(&handle) {
                    emit(sink, InputEvent::PointerLeave { handle, x, y });
                }
            }
            NativeEvent::PointerMotion {
                seat,
                x,
                y,
                time_ms,
            } => {
                let focus = self.seats.entry(seat).or_default();
                focus.pointer_x = x;
                focus.pointer_y = y;
                match focus.pointer {
                    Some(handle) => emit(
                        sink,
                        InputEvent::Motion {
                            handle,
                            x,
                            y,
                            time_ms,
                        },
                    ),
                    None => trace!("DeviceSession: motion on seat {} without focus", seat),
                }
            }
            NativeEvent::PointerButton {
                seat,
                button,
                pressed,
                time_ms,
            } => {
                let focus = self.seats.entry(seat).or_default();
                focus.buttons.set(button_flag(button), pressed);
                let Some(handle) = focus.pointer else {
                    trace!("DeviceSession: button on seat {} without focus", seat);
                    return Ok(());
                };
                emit(
                    sink,
                    InputEvent::Button {
                        handle,
                        kind: if pressed {
                            ButtonKind::Press
                        } else {
                            ButtonKind::Release
                        },
                        button,
                        flags: focus.buttons,
                        modifiers: focus.modifiers,
                        x: focus.pointer_x,
                        y: focus.pointer_y,
                        time_ms,
                    },
                );
            }
            NativeEvent::PointerAxis {
                seat,
                dx,
                dy,
                time_ms,
            } => {
                let focus = self.seats.entry(seat).or_default();
                if let Some(handle) = focus.pointer {
                    emit(
                        sink,
                        InputEvent::Axis {
                            handle,
                            x: focus.pointer_x,
                            y: focus.pointer_y,
                            dx,
                            dy,
                            time_ms,
                        },
                    );
                }
            }

            NativeEvent::KeyboardEnter { seat, handle } => {
                if self.known(handle, "keyboard enter") {
                    self.seats.entry(seat).or_default().keyboard = Some(handle);
                }
            }
            NativeEvent::KeyboardLeave { seat, handle } => {
                let focus = self.seats.entry(seat).or_default();
                if focus.keyboard == Some(handle) {
                    focus.keyboard = None;
                }
            }
            NativeEvent::Key {
                seat,
                code,
                pressed,
                time_ms,
            } => {
                let focus = self.seats.entry(seat).or_default();
                match focus.keyboard {
                    Some(handle) => emit(
                        sink,
                        InputEvent::Key {
                            handle,
                            state: if pressed {
                                KeyState::Pressed
                            } else {
                                KeyState::Released
                            },
                            code,
                            modifiers: focus.modifiers,
                            time_ms,
                        },
                    ),
                    None => trace!("DeviceSession: key on seat {} without focus", seat),
                }
            }
            NativeEvent::KeyboardModifiers { seat, modifiers } => {
                self.seats.entry(seat).or_default().modifiers = modifiers;
            }

            NativeEvent::TouchDown {
                seat,
                handle,
                id,
                x,
                y,
                time_ms,
            } => {
                if !self.known(handle, "touch down") {
                    return Ok(());
                }
                let focus = self.seats.entry(seat).or_default();
                focus.touches.insert(id, TouchPoint { handle, x, y });
                emit(sink, touch(handle, TouchKind::Down, x, y, id, time_ms));
            }
            NativeEvent::TouchMotion {
                seat,
                id,
                x,
                y,
                time_ms,
            } => {
                let focus = self.seats.entry(seat).or_default();
                if let Some(point) = focus.touches.get_mut(&id) {
                    point.x = x;
                    point.y = y;
                    emit(sink, touch(point.handle, TouchKind::Motion, x, y, id, time_ms));
                }
            }
            NativeEvent::TouchUp { seat, id, time_ms } => {
                let focus = self.seats.entry(seat).or_default();
                if let Some(point) = focus.touches.remove(&id) {
                    emit(
                        sink,
                        touch(point.handle, TouchKind::Up, point.x, point.y, id, time_ms),
                    );
                }
            }
            NativeEvent::TouchCancel { seat } => {
                let focus = self.seats.entry(seat).or_default();
                for (id, point) in std::mem::take(&mut focus.touches) {
                    emit(
                        sink,
                        touch(point.handle, TouchKind::Cancel, point.x, point.y, id, 0),
                    );
                }
            }

            NativeEvent::TextCommit { seat, text } => match self.keyboard_focus(seat) {
                Some(handle) => emit(sink, InputEvent::TextCommit { handle, text }),
                None => debug!("DeviceSession: text commit on seat {} without focus", seat),
            },
            NativeEvent::TextPreedit { seat, text, commit } => match self.keyboard_focus(seat) {
                Some(handle) => emit(sink, InputEvent::TextPreedit { handle, text, commit }),
                None => debug!("DeviceSession: preedit on seat {} without focus", seat),
            },

            NativeEvent::Configure {
                handle,
                width,
                height,
            } => {
                let Some(window) = self.windows.get_mut(&handle) else {
                    warn!("DeviceSession: configure for unknown surface {}", handle);
                    return Ok(());
                };
                // 0x0 leaves the size to the client.
                if width == 0 || height == 0 || (window.width, window.height) == (width, height) {
                    return Ok(());
                }
                window.width = width;
                window.height = height;
                emit(
                    sink,
                    InputEvent::WindowResized {
                        handle,
                        width,
                        height,
                    },
                );
            }
            NativeEvent::CloseRequested { handle } => {
                if self.known(handle, "close request") {
                    emit(sink, InputEvent::WindowClosed { handle });
                }
            }
            NativeEvent::Activated { handle } => {
                if self.known(handle, "activation") {
                    emit(sink, InputEvent::WindowActivated { handle });
                }
            }
            NativeEvent::Deactivated { handle } => {
                if self.known(handle, "deactivation") {
                    emit(sink, InputEvent::WindowDeactivated { handle });
                }
            }
            NativeEvent::Unminimized { handle } => {
                let Some(window) = self.windows.get_mut(&handle) else {
                    warn!("DeviceSession: unminimize for unknown surface {}", handle);
                    return Ok(());
                };
                if window.state == WidgetState::Minimized {
                    window.state = WidgetState::Restore;
                }
                emit(sink, InputEvent::WindowUnminimized { handle });
            }

            NativeEvent::ConnectionLost { reason } => {
                error!("DeviceSession: native connection lost: {}", reason);
                self.state = SessionState::Disconnected;
                self.surfaces = None;
                return Err(BridgeError::HardwareUnavailable(reason));
            }
        }
        Ok(())
    }

    /// Destroys every native surface and releases the connection.
    pub fn terminate(&mut self) {
        if let Some(surfaces) = self.surfaces.as_mut() {
            for (handle, window) in self.windows.drain() {
                trace!("DeviceSession: tearing down {:?} {}", window.kind, handle);
                if let Err(e) = surfaces.destroy_surface(handle) {
                    debug!("DeviceSession: destroy {} during teardown: {}", handle, e);
                }
            }
        }
        self.windows.clear();
        self.seats.clear();
        self.surfaces = None;
        self.state = SessionState::Terminated;
        info!("DeviceSession: terminated");
    }

    fn known(&self, handle: WindowHandle, what: &str) -> bool {
        let known = self.windows.contains_key(&handle);
        if !known {
            warn!("DeviceSession: {} for unknown surface {}", what, handle);
        }
        known
    }
}

fn touch(handle: WindowHandle, kind: TouchKind, x: f32, y: f32, id: i32, time_ms: u32) -> InputEvent {
    InputEvent::Touch {
        handle,
        kind,
        x,
        y,
        touch_id: id,
        time_ms,
    }
}

fn emit_output_size(sink: &mut dyn EventSink, info: OutputInfo) {
    emit(
        sink,
        InputEvent::OutputSizeChanged {
            width: info.width,
            height: info.height,
        },
    );
}

/// Hands an event to the sink. Sink errors are logged, never waited on.
fn emit(sink: &mut dyn EventSink, event: InputEvent) {
    trace!("DeviceSession: emit {:?}", event);
    if let Err(e) = sink.post_event(event) {
        warn!("DeviceSession: event sink refused event: {}", e);
    }
}

/// Backend protocol violations are logged and dropped; anything else is a
/// native failure and propagates.
fn tolerate(result: Result<(), BridgeError>) -> Result<(), BridgeError> {
    match result {
        Err(e) if e.is_protocol_violation() || matches!(e, BridgeError::HandleInUse(_)) => {
            warn!("DeviceSession: backend rejected request: {}", e);
            Ok(())
        }
        other => other,
    }
}
