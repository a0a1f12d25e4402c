// src/device/backend.rs
//! Native display backend interface.
//!
//! ## Threading Model
//! - `NativeEventSource` runs on the dedicated native-loop thread and is the
//!   only place that performs blocking reads on the display connection.
//! - `SurfaceController` lives with the `DeviceSession` on the application
//!   loop and issues requests (create, configure, destroy surfaces).
//! - The two halves share nothing the session can observe; events cross
//!   from the native loop to the application loop by message.
//!
//! ## Lifecycle
//! 1. `NativeDisplay::connect()` - open the connection and run the discovery
//!    round-trip (outputs, seats)
//! 2. The session replays `NativeConnection::discovery` and takes the
//!    surface controller; the event source moves to the native-loop thread
//! 3. Drop - cleanup (no explicit shutdown message)

use crate::config::{BackendKind, DeviceConfig};
use crate::device::headless::HeadlessDisplay;
#[cfg(feature = "wayland")]
use crate::device::wayland::WaylandDisplay;
use crate::error::BridgeError;
use crate::keys::Modifiers;
use crate::protocol::{CursorBitmap, Point, Rect, WidgetState, WidgetType, WindowHandle};

pub type SeatId = u32;
pub type OutputId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputInfo {
    pub id: OutputId,
    pub width: u32,
    pub height: u32,
    pub scale: i32,
}

/// Input region edits, applied in order on top of an empty region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOp {
    Add(Rect),
    Subtract(Rect),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImeRequest {
    Reset,
    ShowPanel,
    HidePanel,
}

/// Raw callbacks from the native protocol, before focus resolution.
///
/// Pointer, keyboard and text callbacks carry the seat but not the window;
/// the session resolves the window from per-seat focus.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    OutputAdded(OutputInfo),
    OutputChanged(OutputInfo),
    OutputRemoved { id: OutputId },
    SeatAdded { seat: SeatId },
    SeatRemoved { seat: SeatId },

    PointerEnter { seat: SeatId, handle: WindowHandle, x: f32, y: f32 },
    PointerLeave { seat: SeatId, handle: WindowHandle },
    PointerMotion { seat: SeatId, x: f32, y: f32, time_ms: u32 },
    PointerButton { seat: SeatId, button: u32, pressed: bool, time_ms: u32 },
    PointerAxis { seat: SeatId, dx: f32, dy: f32, time_ms: u32 },

    KeyboardEnter { seat: SeatId, handle: WindowHandle },
    KeyboardLeave { seat: SeatId, handle: WindowHandle },
    Key { seat: SeatId, code: u32, pressed: bool, time_ms: u32 },
    KeyboardModifiers { seat: SeatId, modifiers: Modifiers },

    TouchDown { seat: SeatId, handle: WindowHandle, id: i32, x: f32, y: f32, time_ms: u32 },
    TouchMotion { seat: SeatId, id: i32, x: f32, y: f32, time_ms: u32 },
    TouchUp { seat: SeatId, id: i32, time_ms: u32 },
    TouchCancel { seat: SeatId },

    TextCommit { seat: SeatId, text: String },
    TextPreedit { seat: SeatId, text: String, commit: String },

    Configure { handle: WindowHandle, width: u32, height: u32 },
    CloseRequested { handle: WindowHandle },
    Activated { handle: WindowHandle },
    Deactivated { handle: WindowHandle },
    Unminimized { handle: WindowHandle },

    /// The underlying socket failed. Fatal for the session.
    ConnectionLost { reason: String },
}

/// Blocking half, owned by the native-loop thread.
pub trait NativeEventSource: Send {
    /// Blocks until at least one event is available and returns the batch.
    fn dispatch(&mut self) -> Result<Vec<NativeEvent>, BridgeError>;
}

/// Request half, owned by the session on the application loop.
pub trait SurfaceController {
    fn create_surface(
        &mut self,
        handle: WindowHandle,
        parent: Option<WindowHandle>,
        origin: Point,
        kind: WidgetType,
    ) -> Result<(), BridgeError>;

    fn destroy_surface(&mut self, handle: WindowHandle) -> Result<(), BridgeError>;

    fn set_state(
        &mut self,
        handle: WindowHandle,
        state: WidgetState,
        width: u32,
        height: u32,
    ) -> Result<(), BridgeError>;

    fn set_title(&mut self, handle: WindowHandle, title: &str) -> Result<(), BridgeError>;

    fn set_input_region(&mut self, handle: WindowHandle, ops: &[RegionOp])
        -> Result<(), BridgeError>;

    fn set_cursor(&mut self, frames: &[CursorBitmap], hotspot: Point) -> Result<(), BridgeError>;

    fn move_cursor(&mut self, point: Point) -> Result<(), BridgeError>;

    fn ime(&mut self, request: ImeRequest) -> Result<(), BridgeError>;
}

/// An open display connection, split for the two threads that use it.
pub struct NativeConnection {
    pub surfaces: Box<dyn SurfaceController>,
    pub events: Box<dyn NativeEventSource>,
    /// Outputs and seats found by the initial round-trip.
    pub discovery: Vec<NativeEvent>,
}

pub trait NativeDisplay {
    /// Opens the connection and performs discovery. Any failure here is a
    /// hardware/resource-acquisition failure.
    fn connect(self) -> Result<NativeConnection, BridgeError>;
}

/// The backend selected in the configuration, not yet connected.
pub enum ConfiguredDisplay {
    Headless(HeadlessDisplay),
    #[cfg(feature = "wayland")]
    Wayland(WaylandDisplay),
    Unsupported(&'static str),
}

impl ConfiguredDisplay {
    pub fn from_config(config: &DeviceConfig) -> Self {
        match config.backend {
            BackendKind::Headless => ConfiguredDisplay::Headless(HeadlessDisplay::detached(
                config.headless_output.width,
                config.headless_output.height,
                config.headless_seats,
            )),
            #[cfg(feature = "wayland")]
            BackendKind::Wayland => ConfiguredDisplay::Wayland(WaylandDisplay::from_env()),
            #[cfg(not(feature = "wayland"))]
            BackendKind::Wayland => {
                ConfiguredDisplay::Unsupported("built without the `wayland` feature")
            }
        }
    }
}

impl NativeDisplay for ConfiguredDisplay {
    fn connect(self) -> Result<NativeConnection, BridgeError> {
        match self {
            ConfiguredDisplay::Headless(display) => display.connect(),
            #[cfg(feature = "wayland")]
            ConfiguredDisplay::Wayland(display) => display.connect(),
            ConfiguredDisplay::Unsupported(reason) => {
                Err(BridgeError::HardwareUnavailable(reason.to_string()))
            }
        }
    }
}
