//! Headless display backend.
//!
//! Advertises one synthetic output and a fixed number of seats. Native events
//! are pushed in through a `HeadlessInjector`; surface requests are recorded
//! in a `SurfaceLog` so tests can inspect what the session asked for.

use crate::device::backend::{
    ImeRequest, NativeConnection, NativeDisplay, NativeEvent, NativeEventSource, OutputInfo,
    RegionOp, SurfaceController,
};
use crate::error::BridgeError;
use crate::protocol::{CursorBitmap, Point, WidgetState, WidgetType, WindowHandle};
use log::{info, trace};
use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

/// One request the session made against the headless surfaces.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Create {
        handle: WindowHandle,
        parent: Option<WindowHandle>,
        origin: Point,
        kind: WidgetType,
    },
    Destroy(WindowHandle),
    State {
        handle: WindowHandle,
        state: WidgetState,
        width: u32,
        height: u32,
    },
    Title {
        handle: WindowHandle,
        title: String,
    },
    InputRegion {
        handle: WindowHandle,
        ops: Vec<RegionOp>,
    },
    Cursor {
        frames: usize,
        hotspot: Point,
    },
    MoveCursor(Point),
    Ime(ImeRequest),
}

/// Shared record of surface requests.
#[derive(Debug, Clone, Default)]
pub struct SurfaceLog(Arc<Mutex<Vec<SurfaceCall>>>);

impl SurfaceLog {
    fn lock(&self) -> MutexGuard<'_, Vec<SurfaceCall>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, call: SurfaceCall) {
        trace!("HeadlessDisplay: {:?}", call);
        self.lock().push(call);
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.lock().clone()
    }
}

/// Pushes native events into a headless display from any thread.
#[derive(Debug, Clone)]
pub struct HeadlessInjector {
    tx: Sender<NativeEvent>,
}

impl HeadlessInjector {
    pub fn inject(&self, event: NativeEvent) -> Result<(), BridgeError> {
        self.tx
            .send(event)
            .map_err(|_| BridgeError::HardwareUnavailable("headless display is gone".to_string()))
    }
}

pub struct HeadlessDisplay {
    output: OutputInfo,
    seats: u32,
    rx: Receiver<NativeEvent>,
    keepalive: Option<Sender<NativeEvent>>,
    log: SurfaceLog,
    unavailable: Option<String>,
}

impl HeadlessDisplay {
    /// A display driven by the returned injector. Dropping every injector
    /// clone is observed as a lost connection.
    pub fn new(width: u32, height: u32, seats: u32) -> (Self, HeadlessInjector) {
        let (tx, rx) = mpsc::channel();
        let display = Self {
            output: OutputInfo {
                id: 0,
                width,
                height,
                scale: 1,
            },
            seats,
            rx,
            keepalive: None,
            log: SurfaceLog::default(),
            unavailable: None,
        };
        (display, HeadlessInjector { tx })
    }

    /// A display nobody injects into. Its event source blocks forever.
    pub fn detached(width: u32, height: u32, seats: u32) -> Self {
        let (mut display, injector) = Self::new(width, height, seats);
        display.keepalive = Some(injector.tx);
        display
    }

    /// A display whose connection attempt fails.
    pub fn unavailable(reason: &str) -> Self {
        let (mut display, _) = Self::new(0, 0, 0);
        display.unavailable = Some(reason.to_string());
        display
    }

    pub fn surface_log(&self) -> SurfaceLog {
        self.log.clone()
    }
}

impl NativeDisplay for HeadlessDisplay {
    fn connect(self) -> Result<NativeConnection, BridgeError> {
        if let Some(reason) = self.unavailable {
            return Err(BridgeError::HardwareUnavailable(reason));
        }
        info!(
            "HeadlessDisplay: connected - output {}x{}, {} seat(s)",
            self.output.width, self.output.height, self.seats
        );

        let mut discovery = vec![NativeEvent::OutputAdded(self.output)];
        discovery.extend((0..self.seats).map(|seat| NativeEvent::SeatAdded { seat }));

        Ok(NativeConnection {
            surfaces: Box::new(HeadlessSurfaces {
                log: self.log,
                live: HashSet::new(),
            }),
            events: Box::new(HeadlessEventSource {
                rx: self.rx,
                _keepalive: self.keepalive,
            }),
            discovery,
        })
    }
}

struct HeadlessEventSource {
    rx: Receiver<NativeEvent>,
    _keepalive: Option<Sender<NativeEvent>>,
}

impl NativeEventSource for HeadlessEventSource {
    fn dispatch(&mut self) -> Result<Vec<NativeEvent>, BridgeError> {
        let first = self.rx.recv().map_err(|_| {
            BridgeError::HardwareUnavailable("headless injector dropped".to_string())
        })?;
        let mut batch = vec![first];
        batch.extend(self.rx.try_iter());
        Ok(batch)
    }
}

struct HeadlessSurfaces {
    log: SurfaceLog,
    live: HashSet<WindowHandle>,
}

impl HeadlessSurfaces {
    fn require(&self, handle: WindowHandle) -> Result<(), BridgeError> {
        if self.live.contains(&handle) {
            Ok(())
        } else {
            Err(BridgeError::unknown_handle(handle))
        }
    }
}

impl SurfaceController for HeadlessSurfaces {
    fn create_surface(
        &mut self,
        handle: WindowHandle,
        parent: Option<WindowHandle>,
        origin: Point,
        kind: WidgetType,
    ) -> Result<(), BridgeError> {
        if !self.live.insert(handle) {
            return Err(BridgeError::HandleInUse(handle));
        }
        self.log.push(SurfaceCall::Create {
            handle,
            parent,
            origin,
            kind,
        });
        Ok(())
    }

    fn destroy_surface(&mut self, handle: WindowHandle) -> Result<(), BridgeError> {
        if !self.live.remove(&handle) {
            return Err(BridgeError::unknown_handle(handle));
        }
        self.log.push(SurfaceCall::Destroy(handle));
        Ok(())
    }

    fn set_state(
        &mut self,
        handle: WindowHandle,
        state: WidgetState,
        width: u32,
        height: u32,
    ) -> Result<(), BridgeError> {
        self.require(handle)?;
        self.log.push(SurfaceCall::State {
            handle,
            state,
            width,
            height,
        });
        Ok(())
    }

    fn set_title(&mut self, handle: WindowHandle, title: &str) -> Result<(), BridgeError> {
        self.require(handle)?;
        self.log.push(SurfaceCall::Title {
            handle,
            title: title.to_string(),
        });
        Ok(())
    }

    fn set_input_region(
        &mut self,
        handle: WindowHandle,
        ops: &[RegionOp],
    ) -> Result<(), BridgeError> {
        self.require(handle)?;
        self.log.push(SurfaceCall::InputRegion {
            handle,
            ops: ops.to_vec(),
        });
        Ok(())
    }

    fn set_cursor(&mut self, frames: &[CursorBitmap], hotspot: Point) -> Result<(), BridgeError> {
        self.log.push(SurfaceCall::Cursor {
            frames: frames.len(),
            hotspot,
        });
        Ok(())
    }

    fn move_cursor(&mut self, point: Point) -> Result<(), BridgeError> {
        self.log.push(SurfaceCall::MoveCursor(point));
        Ok(())
    }

    fn ime(&mut self, request: ImeRequest) -> Result<(), BridgeError> {
        self.log.push(SurfaceCall::Ime(request));
        Ok(())
    }
}
