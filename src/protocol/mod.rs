// src/protocol/mod.rs
//! Message catalogue shared by both processes.
//!
//! - messages: handles, routing ids, commands, envelopes and frames
//! - events: normalized input and window events from the device side
//! - codec: newline-delimited JSON framing for socket links

pub mod codec;
pub mod events;
pub mod messages;

pub use codec::{FrameReader, FrameWriter};
pub use events::{ButtonKind, EventCategory, InputEvent, KeyState, TouchKind};
pub use messages::{
    ControlCommand, CursorBitmap, Destination, Envelope, Frame, Payload, Point, Rect, RoutingId,
    WidgetState, WidgetType, WindowHandle,
};
