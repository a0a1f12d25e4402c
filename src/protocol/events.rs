// src/protocol/events.rs
//! Platform-agnostic events produced by the device session.
//!
//! Every variant that concerns a window carries its `WindowHandle`. Pointer
//! coordinates are surface-local, in logical pixels.

use crate::keys::{ButtonFlags, Modifiers};
use crate::protocol::messages::WindowHandle;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonKind {
    Press,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyState {
    Pressed,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TouchKind {
    Down,
    Motion,
    Up,
    Cancel,
}

/// How the window manager routes an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    /// Pointer, keyboard, touch and text input; follows the grab holder.
    Input,
    /// Window lifecycle; always goes to the event's own window.
    Window,
    /// Display geometry; has no window target.
    Output,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputEvent {
    Motion {
        handle: WindowHandle,
        x: f32,
        y: f32,
        time_ms: u32,
    },
    Button {
        handle: WindowHandle,
        kind: ButtonKind,
        /// Native button code of the button that changed.
        button: u32,
        /// Buttons held after this event was applied.
        flags: ButtonFlags,
        modifiers: Modifiers,
        x: f32,
        y: f32,
        time_ms: u32,
    },
    Axis {
        handle: WindowHandle,
        x: f32,
        y: f32,
        dx: f32,
        dy: f32,
        time_ms: u32,
    },
    PointerEnter {
        handle: WindowHandle,
        x: f32,
        y: f32,
    },
    PointerLeave {
        handle: WindowHandle,
        x: f32,
        y: f32,
    },
    Key {
        handle: WindowHandle,
        state: KeyState,
        code: u32,
        modifiers: Modifiers,
        time_ms: u32,
    },
    Touch {
        handle: WindowHandle,
        kind: TouchKind,
        x: f32,
        y: f32,
        touch_id: i32,
        time_ms: u32,
    },
    TextCommit {
        handle: WindowHandle,
        text: String,
    },
    TextPreedit {
        handle: WindowHandle,
        text: String,
        commit: String,
    },
    OutputSizeChanged {
        width: u32,
        height: u32,
    },
    WindowResized {
        handle: WindowHandle,
        width: u32,
        height: u32,
    },
    WindowClosed {
        handle: WindowHandle,
    },
    WindowUnminimized {
        handle: WindowHandle,
    },
    WindowActivated {
        handle: WindowHandle,
    },
    WindowDeactivated {
        handle: WindowHandle,
    },
}

impl InputEvent {
    /// The window this event concerns. `None` only for output geometry.
    pub fn target(&self) -> Option<WindowHandle> {
        match self {
            InputEvent::Motion { handle, .. }
            | InputEvent::Button { handle, .. }
            | InputEvent::Axis { handle, .. }
            | InputEvent::PointerEnter { handle, .. }
            | InputEvent::PointerLeave { handle, .. }
            | InputEvent::Key { handle, .. }
            | InputEvent::Touch { handle, .. }
            | InputEvent::TextCommit { handle, .. }
            | InputEvent::TextPreedit { handle, .. }
            | InputEvent::WindowResized { handle, .. }
            | InputEvent::WindowClosed { handle }
            | InputEvent::WindowUnminimized { handle }
            | InputEvent::WindowActivated { handle }
            | InputEvent::WindowDeactivated { handle } => Some(*handle),
            InputEvent::OutputSizeChanged { .. } => None,
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            InputEvent::Motion { .. }
            | InputEvent::Button { .. }
            | InputEvent::Axis { .. }
            | InputEvent::PointerEnter { .. }
            | InputEvent::PointerLeave { .. }
            | InputEvent::Key { .. }
            | InputEvent::Touch { .. }
            | InputEvent::TextCommit { .. }
            | InputEvent::TextPreedit { .. } => EventCategory::Input,
            InputEvent::WindowResized { .. }
            | InputEvent::WindowClosed { .. }
            | InputEvent::WindowUnminimized { .. }
            | InputEvent::WindowActivated { .. }
            | InputEvent::WindowDeactivated { .. } => EventCategory::Window,
            InputEvent::OutputSizeChanged { .. } => EventCategory::Output,
        }
    }
}
