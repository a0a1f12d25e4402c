// src/control/window_manager.rs
//! Control-side window manager.
//!
//! Owns the registry, the active window and the grab holder. All mutation
//! happens on the UI loop; commands leave through a `CommandSink`, which
//! queues them while the channel is down.
//!
//! Routing rules:
//! - input events go to the grab holder if set, else to their own window
//! - window events always go to their own window
//! - an unknown destination is a protocol violation: logged and dropped
//!
//! Activation requests made while another window holds the grab are queued
//! and replayed, in order, when the grab is released.

use crate::channel::CommandSink;
use crate::control::delegate::WindowDelegate;
use crate::control::registry::{WindowEntry, WindowRegistry};
use crate::error::BridgeError;
use crate::protocol::{
    ControlCommand, CursorBitmap, EventCategory, InputEvent, Point, Rect, WidgetState, WidgetType,
    WindowHandle,
};
use log::*;
use std::collections::{HashSet, VecDeque};

/// Who asked for an activation. Device-originated activations are already
/// true on the native side and are not echoed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOrigin {
    Ui,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to this window's delegate.
    Delivered(WindowHandle),
    /// Output geometry recorded on the manager.
    Recorded,
    /// The device confirmed destruction of a closed window.
    Acknowledged(WindowHandle),
    /// No live destination.
    Dropped,
}

pub struct WindowManager<S: CommandSink> {
    registry: WindowRegistry,
    active: Option<WindowHandle>,
    grab: Option<WindowHandle>,
    pending_activations: VecDeque<(WindowHandle, ActivationOrigin)>,
    /// Closed but not yet acknowledged by the device.
    retired: HashSet<WindowHandle>,
    output_size: Option<(u32, u32)>,
    sink: S,
}

impl<S: CommandSink> WindowManager<S> {
    pub fn new(sink: S) -> Self {
        Self {
            registry: WindowRegistry::new(),
            active: None,
            grab: None,
            pending_activations: VecDeque::new(),
            retired: HashSet::new(),
            output_size: None,
            sink,
        }
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.registry
    }

    pub fn active(&self) -> Option<WindowHandle> {
        self.active
    }

    pub fn grab_holder(&self) -> Option<WindowHandle> {
        self.grab
    }

    pub fn pending_activations(&self) -> usize {
        self.pending_activations.len()
    }

    pub fn is_retired(&self, handle: WindowHandle) -> bool {
        self.retired.contains(&handle)
    }

    pub fn output_size(&self) -> Option<(u32, u32)> {
        self.output_size
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn create_window(
        &mut self,
        handle: WindowHandle,
        parent: Option<WindowHandle>,
        x: i32,
        y: i32,
        kind: WidgetType,
        delegate: Box<dyn WindowDelegate>,
    ) -> Result<(), BridgeError> {
        if self.retired.contains(&handle) {
            return Err(BridgeError::HandleInUse(handle));
        }
        if let Some(parent) = parent {
            if !self.registry.contains(parent) {
                return Err(BridgeError::unknown_handle(parent));
            }
        }
        self.registry.insert(
            handle,
            WindowEntry::new(parent, kind, Point::new(x, y), delegate),
        )?;
        debug!("WindowManager: created {:?} {} (parent {:?})", kind, handle, parent);

        let sent = self.sink.send_command(ControlCommand::CreateWidget {
            handle,
            parent,
            x,
            y,
            kind,
        });
        if let Err(e) = sent {
            self.registry.remove(handle);
            return Err(e);
        }
        Ok(())
    }

    /// UI-originated activation.
    pub fn activate(&mut self, handle: WindowHandle) -> Result<(), BridgeError> {
        self.request_activation(handle, ActivationOrigin::Ui)
    }

    fn request_activation(
        &mut self,
        handle: WindowHandle,
        origin: ActivationOrigin,
    ) -> Result<(), BridgeError> {
        if !self.registry.contains(handle) {
            return Err(BridgeError::unknown_handle(handle));
        }
        if self.active == Some(handle) {
            return Ok(());
        }
        if let Some(holder) = self.grab.filter(|holder| *holder != handle) {
            debug!(
                "WindowManager: deferring activation of {} while {} holds the grab",
                handle, holder
            );
            self.pending_activations.push_back((handle, origin));
            return Ok(());
        }

        if let Some(previous) = self.active.replace(handle) {
            self.notify(previous, |d| d.on_activation_changed(false));
        }
        self.registry.raise(handle);
        self.notify(handle, |d| d.on_activation_changed(true));
        debug!("WindowManager: {} is now active ({:?})", handle, origin);

        if origin == ActivationOrigin::Ui {
            self.send_state(handle, WidgetState::Active, 0, 0)?;
        }
        Ok(())
    }

    /// Gives `handle` exclusive pointer/keyboard routing. A previous holder
    /// is told it lost capture before the new holder acquires it.
    pub fn set_grab(&mut self, handle: WindowHandle) -> Result<(), BridgeError> {
        if !self.registry.contains(handle) {
            return Err(BridgeError::unknown_handle(handle));
        }
        if self.grab == Some(handle) {
            return Ok(());
        }
        if let Some(previous) = self.grab.take() {
            self.notify(previous, |d| d.on_lost_capture());
        }
        self.grab = Some(handle);
        self.notify(handle, |d| d.on_capture_acquired());
        debug!("WindowManager: {} holds the grab", handle);
        Ok(())
    }

    /// Releases the grab if `handle` holds it, then applies deferred
    /// activations.
    pub fn release_grab(&mut self, handle: WindowHandle) -> Result<(), BridgeError> {
        if self.grab != Some(handle) {
            debug!(
                "WindowManager: release_grab({}) ignored, holder is {:?}",
                handle, self.grab
            );
            return Ok(());
        }
        self.grab = None;
        self.notify(handle, |d| d.on_lost_capture());
        self.flush_pending_activations()
    }

    fn flush_pending_activations(&mut self) -> Result<(), BridgeError> {
        let pending = std::mem::take(&mut self.pending_activations);
        for (handle, origin) in pending {
            if self.registry.contains(handle) {
                self.request_activation(handle, origin)?;
            }
        }
        Ok(())
    }

    /// Removes the window and asks the device to destroy it. The handle
    /// stays retired until the device acknowledges with `WindowClosed`, or
    /// until the channel resets. A destroy that could not be queued leaves
    /// the handle free, since nothing will acknowledge it.
    pub fn close_window(&mut self, handle: WindowHandle) -> Result<(), BridgeError> {
        let mut entry = self
            .registry
            .remove(handle)
            .ok_or_else(|| BridgeError::unknown_handle(handle))?;
        self.pending_activations.retain(|(h, _)| *h != handle);

        let held_grab = self.grab == Some(handle);
        if held_grab {
            self.grab = None;
            entry.delegate.on_lost_capture();
        }
        if self.active == Some(handle) {
            self.active = self.registry.front();
            if let Some(front) = self.active {
                debug!("WindowManager: {} tentatively active after closing {}", front, handle);
                self.notify(front, |d| d.on_activation_changed(true));
            }
        }
        info!("WindowManager: closed {}", handle);

        let flushed = if held_grab {
            self.flush_pending_activations()
        } else {
            Ok(())
        };
        if let Err(e) = self.send_state(handle, WidgetState::Destroyed, 0, 0) {
            warn!("WindowManager: destroy of {} not queued: {}", handle, e);
            return Err(e);
        }
        self.retired.insert(handle);
        flushed
    }

    /// The device process went away and took its surfaces with it. Retired
    /// handles are released, except those whose destroy is still queued
    /// for the next device, which will acknowledge it.
    pub fn on_channel_reset(&mut self, destroy_queued: impl Fn(WindowHandle) -> bool) {
        let before = self.retired.len();
        self.retired.retain(|handle| destroy_queued(*handle));
        if before != self.retired.len() {
            debug!(
                "WindowManager: released {} retired handle(s) after reset",
                before - self.retired.len()
            );
        }
    }

    /// Routes one inbound event.
    pub fn dispatch(&mut self, event: InputEvent) -> DispatchOutcome {
        match event.category() {
            EventCategory::Output => {
                if let InputEvent::OutputSizeChanged { width, height } = event {
                    info!("WindowManager: output size {}x{}", width, height);
                    self.output_size = Some((width, height));
                }
                DispatchOutcome::Recorded
            }
            EventCategory::Input => {
                let Some(target) = event.target() else {
                    return DispatchOutcome::Dropped;
                };
                if !self.registry.contains(target) {
                    warn!(
                        "WindowManager: protocol violation: {:?} for unknown window {}",
                        event, target
                    );
                    return DispatchOutcome::Dropped;
                }
                let destination = self.grab.unwrap_or(target);
                let Some(entry) = self.registry.get_mut(destination) else {
                    return DispatchOutcome::Dropped;
                };
                match &event {
                    InputEvent::TextCommit { text, .. } => entry.delegate.on_text_commit(text),
                    InputEvent::TextPreedit { text, commit, .. } => {
                        entry.delegate.on_text_preedit(text, commit)
                    }
                    _ => entry.delegate.on_input(&event),
                }
                DispatchOutcome::Delivered(destination)
            }
            EventCategory::Window => self.dispatch_window_event(event),
        }
    }

    fn dispatch_window_event(&mut self, event: InputEvent) -> DispatchOutcome {
        let Some(handle) = event.target() else {
            return DispatchOutcome::Dropped;
        };
        if let InputEvent::WindowClosed { .. } = event {
            if self.retired.remove(&handle) {
                debug!("WindowManager: device acknowledged close of {}", handle);
                return DispatchOutcome::Acknowledged(handle);
            }
        }
        let Some(entry) = self.registry.get_mut(handle) else {
            warn!(
                "WindowManager: protocol violation: {:?} for unknown window {}",
                event, handle
            );
            return DispatchOutcome::Dropped;
        };

        match event {
            InputEvent::WindowResized { width, height, .. } => {
                entry.width = width;
                entry.height = height;
                entry.delegate.on_bounds_changed(width, height);
            }
            InputEvent::WindowClosed { .. } => entry.delegate.on_close_requested(),
            InputEvent::WindowUnminimized { .. } => entry.delegate.on_unminimized(),
            InputEvent::WindowActivated { .. } => {
                if let Err(e) = self.request_activation(handle, ActivationOrigin::Device) {
                    warn!("WindowManager: device activation of {} failed: {}", handle, e);
                }
            }
            InputEvent::WindowDeactivated { .. } => {
                if self.active == Some(handle) {
                    self.active = None;
                    entry.delegate.on_activation_changed(false);
                }
            }
            other => trace!("WindowManager: unexpected window event {:?}", other),
        }
        DispatchOutcome::Delivered(handle)
    }

    // --- Forwarding operations ---

    pub fn show(&mut self, handle: WindowHandle) -> Result<(), BridgeError> {
        self.entry_mut(handle)?.visible = true;
        self.send_state(handle, WidgetState::Show, 0, 0)
    }

    pub fn hide(&mut self, handle: WindowHandle) -> Result<(), BridgeError> {
        self.entry_mut(handle)?.visible = false;
        self.send_state(handle, WidgetState::Hide, 0, 0)
    }

    pub fn set_bounds(&mut self, handle: WindowHandle, width: u32, height: u32) -> Result<(), BridgeError> {
        let entry = self.entry_mut(handle)?;
        entry.width = width;
        entry.height = height;
        self.send_state(handle, WidgetState::Resize, width, height)
    }

    /// Maximize, minimize, fullscreen, restore and friends. `Destroyed`
    /// closes the window.
    pub fn set_state(&mut self, handle: WindowHandle, state: WidgetState) -> Result<(), BridgeError> {
        match state {
            WidgetState::Destroyed => self.close_window(handle),
            WidgetState::Show => self.show(handle),
            WidgetState::Hide => self.hide(handle),
            WidgetState::Active => self.activate(handle),
            state => {
                self.entry_mut(handle)?;
                self.send_state(handle, state, 0, 0)
            }
        }
    }

    pub fn set_title(&mut self, handle: WindowHandle, title: &str) -> Result<(), BridgeError> {
        self.entry_mut(handle)?.title = title.to_string();
        self.sink.send_command(ControlCommand::SetWidgetTitle {
            handle,
            title: title.to_string(),
        })
    }

    pub fn set_cursor(&mut self, frames: Vec<CursorBitmap>, hotspot: Point) -> Result<(), BridgeError> {
        self.sink
            .send_command(ControlCommand::SetWidgetCursor { frames, hotspot })
    }

    pub fn add_region(&mut self, handle: WindowHandle, rect: Rect) -> Result<(), BridgeError> {
        self.entry_mut(handle)?;
        self.sink.send_command(ControlCommand::AddRegion { handle, rect })
    }

    pub fn sub_region(&mut self, handle: WindowHandle, rect: Rect) -> Result<(), BridgeError> {
        self.entry_mut(handle)?;
        self.sink.send_command(ControlCommand::SubRegion { handle, rect })
    }

    pub fn move_cursor(&mut self, point: Point) -> Result<(), BridgeError> {
        self.sink.send_command(ControlCommand::MoveCursor { point })
    }

    pub fn ime_reset(&mut self) -> Result<(), BridgeError> {
        self.sink.send_command(ControlCommand::ImeReset)
    }

    pub fn show_input_panel(&mut self) -> Result<(), BridgeError> {
        self.sink.send_command(ControlCommand::ShowInputPanel)
    }

    pub fn hide_input_panel(&mut self) -> Result<(), BridgeError> {
        self.sink.send_command(ControlCommand::HideInputPanel)
    }

    /// Re-sends `CreateWidget` plus last known bounds, title and visibility
    /// for every open window, parents first. Returns the number of windows.
    pub fn reissue_widgets(&mut self) -> Result<usize, BridgeError> {
        let handles = self.registry.parents_first();
        for handle in &handles {
            let handle = *handle;
            let parent = self.registry.parent_of(handle);
            let Some(entry) = self.registry.get(handle) else {
                continue;
            };
            let mut commands = vec![ControlCommand::CreateWidget {
                handle,
                parent,
                x: entry.origin.x,
                y: entry.origin.y,
                kind: entry.kind,
            }];
            if entry.width > 0 && entry.height > 0 {
                commands.push(state_command(handle, WidgetState::Resize, entry.width, entry.height));
            }
            if !entry.title.is_empty() {
                commands.push(ControlCommand::SetWidgetTitle {
                    handle,
                    title: entry.title.clone(),
                });
            }
            if entry.visible {
                commands.push(state_command(handle, WidgetState::Show, 0, 0));
            }
            for command in commands {
                self.sink.send_command(command)?;
            }
        }
        info!("WindowManager: re-issued {} window(s)", handles.len());
        Ok(handles.len())
    }

    fn entry_mut(&mut self, handle: WindowHandle) -> Result<&mut WindowEntry, BridgeError> {
        self.registry
            .get_mut(handle)
            .ok_or_else(|| BridgeError::unknown_handle(handle))
    }

    fn send_state(
        &mut self,
        handle: WindowHandle,
        state: WidgetState,
        width: u32,
        height: u32,
    ) -> Result<(), BridgeError> {
        self.sink
            .send_command(state_command(handle, state, width, height))
    }

    fn notify(&mut self, handle: WindowHandle, f: impl FnOnce(&mut dyn WindowDelegate)) {
        if let Some(entry) = self.registry.get_mut(handle) {
            f(entry.delegate.as_mut());
        }
    }
}

fn state_command(handle: WindowHandle, state: WidgetState, width: u32, height: u32) -> ControlCommand {
    ControlCommand::SetWidgetState {
        handle,
        state,
        width,
        height,
    }
}
