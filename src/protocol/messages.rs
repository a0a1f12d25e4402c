// src/protocol/messages.rs
//! Wire-level message types exchanged between the control and device processes.
//!
//! Everything here is plain data with serde derives; ownership moves across
//! the channel, nothing is shared.

use crate::protocol::events::InputEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque window identifier chosen by the control process.
///
/// The device process never originates a handle; it only echoes handles
/// it received in `CreateWidget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowHandle(pub u32);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one connection epoch's message stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingId(pub u64);

impl fmt::Display for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route:{}", self.0)
    }
}

/// Where an envelope is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// Captured while no channel existed; resolved when the queue drains.
    Unresolved,
    Route(RoutingId),
}

impl Destination {
    /// Substitutes `routing_id` for a placeholder; resolved destinations are kept.
    pub fn resolve(self, routing_id: RoutingId) -> Destination {
        match self {
            Destination::Unresolved => Destination::Route(routing_id),
            resolved => resolved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WidgetType {
    Toplevel,
    Popup,
    Menu,
    Tooltip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WidgetState {
    Show,
    Hide,
    Active,
    Inactive,
    Maximized,
    Minimized,
    Fullscreen,
    Restore,
    /// Resize to the width/height carried by the command.
    Resize,
    /// The control side closed the window; the device frees the surface
    /// and acknowledges with `WindowClosed`.
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }
}

/// One frame of a (possibly animated) cursor image, ARGB8888 row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorBitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

/// Commands from the control process to the device process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlCommand {
    CreateWidget {
        handle: WindowHandle,
        parent: Option<WindowHandle>,
        x: i32,
        y: i32,
        kind: WidgetType,
    },
    SetWidgetState {
        handle: WindowHandle,
        state: WidgetState,
        width: u32,
        height: u32,
    },
    SetWidgetTitle {
        handle: WindowHandle,
        title: String,
    },
    SetWidgetCursor {
        frames: Vec<CursorBitmap>,
        hotspot: Point,
    },
    AddRegion {
        handle: WindowHandle,
        rect: Rect,
    },
    SubRegion {
        handle: WindowHandle,
        rect: Rect,
    },
    MoveCursor {
        point: Point,
    },
    ImeReset,
    ShowInputPanel,
    HideInputPanel,
}

impl ControlCommand {
    /// The window this command acts on, if any.
    pub fn handle(&self) -> Option<WindowHandle> {
        match self {
            ControlCommand::CreateWidget { handle, .. }
            | ControlCommand::SetWidgetState { handle, .. }
            | ControlCommand::SetWidgetTitle { handle, .. }
            | ControlCommand::AddRegion { handle, .. }
            | ControlCommand::SubRegion { handle, .. } => Some(*handle),
            ControlCommand::SetWidgetCursor { .. }
            | ControlCommand::MoveCursor { .. }
            | ControlCommand::ImeReset
            | ControlCommand::ShowInputPanel
            | ControlCommand::HideInputPanel => None,
        }
    }
}

/// The message category, used by the receive path to demultiplex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Command(ControlCommand),
    Event(InputEvent),
}

impl From<ControlCommand> for Payload {
    fn from(command: ControlCommand) -> Self {
        Payload::Command(command)
    }
}

impl From<InputEvent> for Payload {
    fn from(event: InputEvent) -> Self {
        Payload::Event(event)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub destination: Destination,
    pub payload: Payload,
}

/// Unit of transmission on a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Control asks the device to bind this epoch to `routing_id`.
    Establish { routing_id: RoutingId },
    /// Device confirms the binding; the handshake is complete.
    Established { routing_id: RoutingId },
    Message(Envelope),
}
