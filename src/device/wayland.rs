// src/device/wayland.rs
//! Wayland backend (feature `wayland`).
//!
//! The connection is split the same way as every backend: the event queue
//! and its dispatch state move to the native-loop thread, while the request
//! half keeps cloned proxies and a `QueueHandle` so new objects report their
//! events to that queue. wayland-client proxies are `Send + Sync`, so
//! requests may be issued while the native loop is blocked in dispatch.
//!
//! Surface user data is the `WindowHandle`, which is how pointer, keyboard
//! and touch focus callbacks are resolved back to windows.

use crate::device::backend::{
    ImeRequest, NativeConnection, NativeDisplay, NativeEvent, NativeEventSource, OutputId,
    OutputInfo, RegionOp, SeatId, SurfaceController,
};
use crate::error::BridgeError;
use crate::keys::modifiers_from_xkb;
use crate::protocol::{CursorBitmap, Point, WidgetState, WidgetType, WindowHandle};
use log::*;
use std::collections::{HashMap, HashSet};
use wayland_client::{
    protocol::{
        wl_compositor, wl_keyboard, wl_output, wl_pointer, wl_region, wl_registry, wl_seat,
        wl_surface, wl_touch,
    },
    Connection, Dispatch, EventQueue, QueueHandle, WEnum,
};
use wayland_protocols::xdg::shell::client::{
    xdg_popup, xdg_positioner, xdg_surface, xdg_toplevel, xdg_wm_base,
};

/// Entry point; the connection is opened by `connect`.
pub struct WaylandDisplay {
    _private: (),
}

impl WaylandDisplay {
    /// Targets the compositor named by `WAYLAND_DISPLAY`.
    pub fn from_env() -> Self {
        Self { _private: () }
    }
}

impl NativeDisplay for WaylandDisplay {
    fn connect(self) -> Result<NativeConnection, BridgeError> {
        info!("WaylandDisplay: connecting to compositor...");
        let conn = Connection::connect_to_env()
            .map_err(|e| BridgeError::HardwareUnavailable(format!("Wayland connect: {}", e)))?;

        let mut queue: EventQueue<WaylandState> = conn.new_event_queue();
        let qh = queue.handle();
        let _registry = conn.display().get_registry(&qh, ());

        let mut state = WaylandState::default();
        // First round-trip binds globals; the second collects output modes
        // and seat capabilities.
        for _ in 0..2 {
            queue
                .roundtrip(&mut state)
                .map_err(|e| BridgeError::HardwareUnavailable(format!("roundtrip: {}", e)))?;
        }

        let compositor = state.compositor.clone().ok_or_else(|| {
            BridgeError::HardwareUnavailable("wl_compositor not advertised".to_string())
        })?;
        let wm_base = state.wm_base.clone().ok_or_else(|| {
            BridgeError::HardwareUnavailable("xdg_wm_base not advertised".to_string())
        })?;
        if state.seats.is_empty() {
            warn!("WaylandDisplay: no wl_seat advertised; input will be unavailable");
        }

        let discovery = std::mem::take(&mut state.pending);
        info!(
            "WaylandDisplay: connected, {} output(s), {} seat(s)",
            state.outputs.len(),
            state.seats.len()
        );

        Ok(NativeConnection {
            surfaces: Box::new(WaylandSurfaces {
                conn,
                qh,
                compositor,
                wm_base,
                surfaces: HashMap::new(),
            }),
            events: Box::new(WaylandEventSource { queue, state }),
            discovery,
        })
    }
}

// --- Dispatch state (native-loop thread) ---

struct OutputSlot {
    _proxy: wl_output::WlOutput,
    info: OutputInfo,
    announced: bool,
}

#[derive(Default)]
struct SeatDevices {
    seat: Option<wl_seat::WlSeat>,
    pointer: Option<wl_pointer::WlPointer>,
    keyboard: Option<wl_keyboard::WlKeyboard>,
    touch: Option<wl_touch::WlTouch>,
}

#[derive(Default)]
struct WaylandState {
    compositor: Option<wl_compositor::WlCompositor>,
    wm_base: Option<xdg_wm_base::XdgWmBase>,
    outputs: HashMap<OutputId, OutputSlot>,
    seats: HashMap<SeatId, SeatDevices>,
    /// Size from the last role configure, applied on `xdg_surface.configure`.
    pending_sizes: HashMap<WindowHandle, (u32, u32)>,
    activated: HashSet<WindowHandle>,
    pending: Vec<NativeEvent>,
}

impl WaylandState {
    fn push(&mut self, event: NativeEvent) {
        self.pending.push(event);
    }
}

fn surface_handle(surface: &wl_surface::WlSurface) -> Option<WindowHandle> {
    use wayland_client::Proxy;
    surface.data::<WindowHandle>().copied()
}

struct WaylandEventSource {
    queue: EventQueue<WaylandState>,
    state: WaylandState,
}

impl NativeEventSource for WaylandEventSource {
    fn dispatch(&mut self) -> Result<Vec<NativeEvent>, BridgeError> {
        while self.state.pending.is_empty() {
            if let Err(e) = self.queue.blocking_dispatch(&mut self.state) {
                return Err(BridgeError::HardwareUnavailable(format!(
                    "Wayland dispatch: {}",
                    e
                )));
            }
        }
        Ok(std::mem::take(&mut self.state.pending))
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for WaylandState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => {
                debug!("Wayland global: name={}, interface={}, version={}", name, interface, version);
                match interface.as_str() {
                    "wl_compositor" => {
                        state.compositor =
                            Some(registry.bind::<wl_compositor::WlCompositor, _, _>(name, version.min(4), qh, ()));
                    }
                    "xdg_wm_base" => {
                        state.wm_base =
                            Some(registry.bind::<xdg_wm_base::XdgWmBase, _, _>(name, version.min(2), qh, ()));
                    }
                    "wl_output" => {
                        let proxy =
                            registry.bind::<wl_output::WlOutput, _, _>(name, version.min(2), qh, name);
                        state.outputs.insert(
                            name,
                            OutputSlot {
                                _proxy: proxy,
                                info: OutputInfo {
                                    id: name,
                                    width: 0,
                                    height: 0,
                                    scale: 1,
                                },
                                announced: false,
                            },
                        );
                    }
                    "wl_seat" => {
                        let seat = registry.bind::<wl_seat::WlSeat, _, _>(name, version.min(5), qh, name);
                        state.seats.insert(
                            name,
                            SeatDevices {
                                seat: Some(seat),
                                ..SeatDevices::default()
                            },
                        );
                        state.push(NativeEvent::SeatAdded { seat: name });
                    }
                    _ => {}
                }
            }
            wl_registry::Event::GlobalRemove { name } => {
                if state.outputs.remove(&name).is_some() {
                    state.push(NativeEvent::OutputRemoved { id: name });
                } else if state.seats.remove(&name).is_some() {
                    state.push(NativeEvent::SeatRemoved { seat: name });
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_output::WlOutput, OutputId> for WaylandState {
    fn event(
        state: &mut Self,
        _output: &wl_output::WlOutput,
        event: wl_output::Event,
        id: &OutputId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(slot) = state.outputs.get_mut(id) else {
            return;
        };
        match event {
            wl_output::Event::Mode {
                flags: WEnum::Value(flags),
                width,
                height,
                ..
            } if flags.contains(wl_output::Mode::Current) => {
                slot.info.width = width.max(0) as u32;
                slot.info.height = height.max(0) as u32;
            }
            wl_output::Event::Scale { factor } => slot.info.scale = factor,
            wl_output::Event::Done => {
                let info = slot.info;
                let event = if slot.announced {
                    NativeEvent::OutputChanged(info)
                } else {
                    NativeEvent::OutputAdded(info)
                };
                slot.announced = true;
                state.push(event);
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_seat::WlSeat, SeatId> for WaylandState {
    fn event(
        state: &mut Self,
        seat: &wl_seat::WlSeat,
        event: wl_seat::Event,
        id: &SeatId,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        let caps = match event {
            wl_seat::Event::Capabilities {
                capabilities: WEnum::Value(caps),
            } => caps,
            other => {
                trace!("WlSeat event: {:?}", other);
                return;
            }
        };
        let Some(devices) = state.seats.get_mut(id) else {
            return;
        };
        if caps.contains(wl_seat::Capability::Pointer) && devices.pointer.is_none() {
            devices.pointer = Some(seat.get_pointer(qh, *id));
        }
        if caps.contains(wl_seat::Capability::Keyboard) && devices.keyboard.is_none() {
            devices.keyboard = Some(seat.get_keyboard(qh, *id));
        }
        if caps.contains(wl_seat::Capability::Touch) && devices.touch.is_none() {
            devices.touch = Some(seat.get_touch(qh, *id));
        }
        debug!(
            "Seat {} capabilities {:?} (seat bound: {})",
            id,
            caps,
            devices.seat.is_some()
        );
    }
}

impl Dispatch<wl_pointer::WlPointer, SeatId> for WaylandState {
    fn event(
        state: &mut Self,
        _pointer: &wl_pointer::WlPointer,
        event: wl_pointer::Event,
        seat: &SeatId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let seat = *seat;
        let native = match event {
            wl_pointer::Event::Enter {
                surface,
                surface_x,
                surface_y,
                ..
            } => surface_handle(&surface).map(|handle| NativeEvent::PointerEnter {
                seat,
                handle,
                x: surface_x as f32,
                y: surface_y as f32,
            }),
            wl_pointer::Event::Leave { surface, .. } => surface_handle(&surface)
                .map(|handle| NativeEvent::PointerLeave { seat, handle }),
            wl_pointer::Event::Motion {
                time,
                surface_x,
                surface_y,
            } => Some(NativeEvent::PointerMotion {
                seat,
                x: surface_x as f32,
                y: surface_y as f32,
                time_ms: time,
            }),
            wl_pointer::Event::Button {
                time,
                button,
                state: button_state,
                ..
            } => Some(NativeEvent::PointerButton {
                seat,
                button,
                pressed: matches!(button_state, WEnum::Value(wl_pointer::ButtonState::Pressed)),
                time_ms: time,
            }),
            wl_pointer::Event::Axis {
                time,
                axis: WEnum::Value(axis),
                value,
            } => {
                let (dx, dy) = match axis {
                    wl_pointer::Axis::HorizontalScroll => (value as f32, 0.0),
                    _ => (0.0, value as f32),
                };
                Some(NativeEvent::PointerAxis {
                    seat,
                    dx,
                    dy,
                    time_ms: time,
                })
            }
            _ => None,
        };
        if let Some(native) = native {
            state.push(native);
        }
    }
}

impl Dispatch<wl_keyboard::WlKeyboard, SeatId> for WaylandState {
    fn event(
        state: &mut Self,
        _keyboard: &wl_keyboard::WlKeyboard,
        event: wl_keyboard::Event,
        seat: &SeatId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let seat = *seat;
        let native = match event {
            wl_keyboard::Event::Enter { surface, .. } => surface_handle(&surface)
                .map(|handle| NativeEvent::KeyboardEnter { seat, handle }),
            wl_keyboard::Event::Leave { surface, .. } => surface_handle(&surface)
                .map(|handle| NativeEvent::KeyboardLeave { seat, handle }),
            wl_keyboard::Event::Key {
                time,
                key,
                state: key_state,
                ..
            } => Some(NativeEvent::Key {
                seat,
                code: key,
                pressed: matches!(key_state, WEnum::Value(wl_keyboard::KeyState::Pressed)),
                time_ms: time,
            }),
            wl_keyboard::Event::Modifiers {
                mods_depressed,
                mods_latched,
                mods_locked,
                ..
            } => Some(NativeEvent::KeyboardModifiers {
                seat,
                modifiers: modifiers_from_xkb(mods_depressed, mods_latched, mods_locked),
            }),
            // Keymap fd is closed on drop; codes are forwarded untranslated.
            _ => None,
        };
        if let Some(native) = native {
            state.push(native);
        }
    }
}

impl Dispatch<wl_touch::WlTouch, SeatId> for WaylandState {
    fn event(
        state: &mut Self,
        _touch: &wl_touch::WlTouch,
        event: wl_touch::Event,
        seat: &SeatId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let seat = *seat;
        let native = match event {
            wl_touch::Event::Down {
                time,
                surface,
                id,
                x,
                y,
                ..
            } => surface_handle(&surface).map(|handle| NativeEvent::TouchDown {
                seat,
                handle,
                id,
                x: x as f32,
                y: y as f32,
                time_ms: time,
            }),
            wl_touch::Event::Motion { time, id, x, y } => Some(NativeEvent::TouchMotion {
                seat,
                id,
                x: x as f32,
                y: y as f32,
                time_ms: time,
            }),
            wl_touch::Event::Up { time, id, .. } => Some(NativeEvent::TouchUp {
                seat,
                id,
                time_ms: time,
            }),
            wl_touch::Event::Cancel => Some(NativeEvent::TouchCancel { seat }),
            _ => None,
        };
        if let Some(native) = native {
            state.push(native);
        }
    }
}

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for WaylandState {
    fn event(
        _state: &mut Self,
        proxy: &xdg_wm_base::XdgWmBase,
        event: xdg_wm_base::Event,
        _: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            proxy.pong(serial);
            trace!("XdgWmBase: ponged serial {}", serial);
        }
    }
}

impl Dispatch<xdg_surface::XdgSurface, WindowHandle> for WaylandState {
    fn event(
        state: &mut Self,
        proxy: &xdg_surface::XdgSurface,
        event: xdg_surface::Event,
        handle: &WindowHandle,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            proxy.ack_configure(serial);
            if let Some((width, height)) = state.pending_sizes.remove(handle) {
                state.push(NativeEvent::Configure {
                    handle: *handle,
                    width,
                    height,
                });
            }
        }
    }
}

const XDG_TOPLEVEL_STATE_ACTIVATED: u32 = 4;

impl Dispatch<xdg_toplevel::XdgToplevel, WindowHandle> for WaylandState {
    fn event(
        state: &mut Self,
        _proxy: &xdg_toplevel::XdgToplevel,
        event: xdg_toplevel::Event,
        handle: &WindowHandle,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let handle = *handle;
        match event {
            xdg_toplevel::Event::Configure {
                width,
                height,
                states,
            } => {
                state
                    .pending_sizes
                    .insert(handle, (width.max(0) as u32, height.max(0) as u32));
                let active = states
                    .chunks_exact(4)
                    .map(|raw| u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]))
                    .any(|s| s == XDG_TOPLEVEL_STATE_ACTIVATED);
                let was_active = state.activated.contains(&handle);
                if active && !was_active {
                    state.activated.insert(handle);
                    state.push(NativeEvent::Activated { handle });
                } else if !active && was_active {
                    state.activated.remove(&handle);
                    state.push(NativeEvent::Deactivated { handle });
                }
            }
            xdg_toplevel::Event::Close => state.push(NativeEvent::CloseRequested { handle }),
            _ => {}
        }
    }
}

impl Dispatch<xdg_popup::XdgPopup, WindowHandle> for WaylandState {
    fn event(
        state: &mut Self,
        _proxy: &xdg_popup::XdgPopup,
        event: xdg_popup::Event,
        handle: &WindowHandle,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            xdg_popup::Event::Configure { width, height, .. } => {
                state
                    .pending_sizes
                    .insert(*handle, (width.max(0) as u32, height.max(0) as u32));
            }
            xdg_popup::Event::PopupDone => {
                state.push(NativeEvent::CloseRequested { handle: *handle })
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_surface::WlSurface, WindowHandle> for WaylandState {
    fn event(
        _state: &mut Self,
        _proxy: &wl_surface::WlSurface,
        event: wl_surface::Event,
        handle: &WindowHandle,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        trace!("WlSurface {}: {:?}", handle, event);
    }
}

wayland_client::delegate_noop!(WaylandState: ignore wl_compositor::WlCompositor);
wayland_client::delegate_noop!(WaylandState: ignore wl_region::WlRegion);
wayland_client::delegate_noop!(WaylandState: ignore xdg_positioner::XdgPositioner);

// --- Request half (application loop) ---

enum Role {
    Toplevel(xdg_toplevel::XdgToplevel),
    Popup(xdg_popup::XdgPopup),
}

struct NativeSurface {
    surface: wl_surface::WlSurface,
    xdg: xdg_surface::XdgSurface,
    role: Role,
}

struct WaylandSurfaces {
    conn: Connection,
    qh: QueueHandle<WaylandState>,
    compositor: wl_compositor::WlCompositor,
    wm_base: xdg_wm_base::XdgWmBase,
    surfaces: HashMap<WindowHandle, NativeSurface>,
}

impl WaylandSurfaces {
    fn get(&self, handle: WindowHandle) -> Result<&NativeSurface, BridgeError> {
        self.surfaces
            .get(&handle)
            .ok_or_else(|| BridgeError::unknown_handle(handle))
    }

    fn flush(&self) -> Result<(), BridgeError> {
        self.conn
            .flush()
            .map_err(|e| BridgeError::HardwareUnavailable(format!("Wayland flush: {}", e)))
    }

    fn toplevel(&self, handle: WindowHandle) -> Result<Option<&xdg_toplevel::XdgToplevel>, BridgeError> {
        Ok(match &self.get(handle)?.role {
            Role::Toplevel(toplevel) => Some(toplevel),
            Role::Popup(_) => None,
        })
    }
}

impl SurfaceController for WaylandSurfaces {
    fn create_surface(
        &mut self,
        handle: WindowHandle,
        parent: Option<WindowHandle>,
        origin: Point,
        kind: WidgetType,
    ) -> Result<(), BridgeError> {
        if self.surfaces.contains_key(&handle) {
            return Err(BridgeError::HandleInUse(handle));
        }
        let parent = match parent {
            Some(parent) => Some(self.get(parent)?),
            None => None,
        };

        let surface = self.compositor.create_surface(&self.qh, handle);
        let xdg = self.wm_base.get_xdg_surface(&surface, &self.qh, handle);
        let role = match (kind, parent) {
            (WidgetType::Toplevel, parent) | (_, parent @ None) => {
                let toplevel = xdg.get_toplevel(&self.qh, handle);
                if let Some(NativeSurface {
                    role: Role::Toplevel(parent_toplevel),
                    ..
                }) = parent
                {
                    toplevel.set_parent(Some(parent_toplevel));
                }
                Role::Toplevel(toplevel)
            }
            (_, Some(parent)) => {
                let positioner = self.wm_base.create_positioner(&self.qh, ());
                positioner.set_size(1, 1);
                positioner.set_anchor_rect(origin.x, origin.y, 1, 1);
                let popup = xdg.get_popup(Some(&parent.xdg), &positioner, &self.qh, handle);
                positioner.destroy();
                Role::Popup(popup)
            }
        };
        surface.commit();
        self.surfaces.insert(handle, NativeSurface { surface, xdg, role });
        self.flush()
    }

    fn destroy_surface(&mut self, handle: WindowHandle) -> Result<(), BridgeError> {
        let native = self
            .surfaces
            .remove(&handle)
            .ok_or_else(|| BridgeError::unknown_handle(handle))?;
        match native.role {
            Role::Toplevel(toplevel) => toplevel.destroy(),
            Role::Popup(popup) => popup.destroy(),
        }
        native.xdg.destroy();
        native.surface.destroy();
        self.flush()
    }

    fn set_state(
        &mut self,
        handle: WindowHandle,
        state: WidgetState,
        width: u32,
        height: u32,
    ) -> Result<(), BridgeError> {
        let native = self.get(handle)?;
        let toplevel = self.toplevel(handle)?;
        match state {
            WidgetState::Show => native.surface.commit(),
            WidgetState::Hide => {
                native.surface.attach(None, 0, 0);
                native.surface.commit();
            }
            WidgetState::Maximized => toplevel.into_iter().for_each(|t| t.set_maximized()),
            WidgetState::Minimized => toplevel.into_iter().for_each(|t| t.set_minimized()),
            WidgetState::Fullscreen => toplevel.into_iter().for_each(|t| t.set_fullscreen(None)),
            WidgetState::Restore => toplevel.into_iter().for_each(|t| {
                t.unset_fullscreen();
                t.unset_maximized();
            }),
            WidgetState::Resize if width > 0 && height > 0 => {
                native
                    .xdg
                    .set_window_geometry(0, 0, width as i32, height as i32);
                native.surface.commit();
            }
            // Activation and destruction are decided by the compositor or
            // routed through destroy_surface.
            other => trace!("WaylandSurfaces: {:?} has no client request for {}", other, handle),
        }
        self.flush()
    }

    fn set_title(&mut self, handle: WindowHandle, title: &str) -> Result<(), BridgeError> {
        if let Some(toplevel) = self.toplevel(handle)? {
            toplevel.set_title(title.to_string());
        }
        self.flush()
    }

    fn set_input_region(&mut self, handle: WindowHandle, ops: &[RegionOp]) -> Result<(), BridgeError> {
        let native = self.get(handle)?;
        let region = self.compositor.create_region(&self.qh, ());
        for op in ops {
            match op {
                RegionOp::Add(r) => region.add(r.left, r.top, r.right - r.left, r.bottom - r.top),
                RegionOp::Subtract(r) => {
                    region.subtract(r.left, r.top, r.right - r.left, r.bottom - r.top)
                }
            }
        }
        native.surface.set_input_region(Some(&region));
        native.surface.commit();
        region.destroy();
        self.flush()
    }

    /// Cursor images are not uploaded: this backend binds no `wl_shm`
    /// pool for cursor buffers, so the compositor's default cursor stays
    /// in place and the request is logged and ignored.
    fn set_cursor(&mut self, frames: &[CursorBitmap], hotspot: Point) -> Result<(), BridgeError> {
        debug!(
            "WaylandSurfaces: cursor images not supported ({} frame(s), hotspot {:?})",
            frames.len(),
            hotspot
        );
        Ok(())
    }

    fn move_cursor(&mut self, point: Point) -> Result<(), BridgeError> {
        trace!("WaylandSurfaces: clients cannot warp the pointer (to {:?})", point);
        Ok(())
    }

    fn ime(&mut self, request: ImeRequest) -> Result<(), BridgeError> {
        debug!("WaylandSurfaces: text-input protocol not bound, ignoring {:?}", request);
        Ok(())
    }
}
