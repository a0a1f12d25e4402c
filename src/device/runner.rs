// src/device/runner.rs

//! Device process main loop.
//!
//! Three threads:
//! - `native-loop` blocks on the display connection and forwards batches
//! - `device-io` blocks on the socket and forwards decoded frames
//! - the application loop (caller's thread) owns the `DeviceSession` and the
//!   `ChannelTransport`; every state change happens here

use crate::channel::{ChannelTransport, Delivery, Link, SocketLink};
use crate::config::{ChannelConfig, Config};
use crate::device::backend::{ConfiguredDisplay, NativeDisplay, NativeEvent, NativeEventSource};
use crate::device::session::{DeviceSession, SessionState};
use crate::error::BridgeError;
use crate::protocol::{Frame, FrameReader};
use anyhow::{Context, Result};
use log::*;
use std::ops::ControlFlow;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Work items for the application loop.
#[derive(Debug)]
pub enum DeviceTask {
    Native(Vec<NativeEvent>),
    NativeFailed(BridgeError),
    Frame(Frame),
    PeerClosed(String),
}

/// Session plus transport, driven one task at a time.
pub struct DeviceApp {
    session: DeviceSession,
    transport: ChannelTransport,
}

impl DeviceApp {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            session: DeviceSession::new(),
            transport: ChannelTransport::new("device", config),
        }
    }

    pub fn attach(&mut self, link: Box<dyn Link>) {
        self.transport.attach(link);
    }

    pub fn initialize<D: NativeDisplay>(
        &mut self,
        display: D,
    ) -> Result<Box<dyn NativeEventSource>, BridgeError> {
        self.session.initialize(display, &mut self.transport)
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn transport(&self) -> &ChannelTransport {
        &self.transport
    }

    /// Applies one task. `Break` means the control process is gone.
    pub fn handle_task(&mut self, task: DeviceTask) -> Result<ControlFlow<()>, BridgeError> {
        match task {
            DeviceTask::Frame(frame) => match self.transport.on_message_received(frame) {
                Delivery::EstablishRequested(routing_id) => {
                    if let Some(current) = self.transport.routing_id() {
                        warn!(
                            "DeviceApp: establish({}) while bound to {}, ignoring",
                            routing_id, current
                        );
                    } else {
                        self.transport.confirm_establish(routing_id)?;
                    }
                }
                Delivery::Command(command) => {
                    self.session.apply_command(command, &mut self.transport)?;
                }
                Delivery::EstablishConfirmed(routing_id) => {
                    warn!(
                        "DeviceApp: protocol violation: unexpected confirmation for {}",
                        routing_id
                    );
                }
                Delivery::Event(event) => {
                    warn!("DeviceApp: protocol violation: event sent to device: {:?}", event);
                }
                Delivery::Dropped => {}
            },
            DeviceTask::Native(batch) => {
                for event in batch {
                    self.session.handle_native(event, &mut self.transport)?;
                }
            }
            DeviceTask::NativeFailed(e) => {
                error!("DeviceApp: native loop failed: {}", e);
                return Err(e);
            }
            DeviceTask::PeerClosed(reason) => {
                info!("DeviceApp: control process gone ({}), shutting down", reason);
                self.shutdown();
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Destroys native windows and closes the channel.
    pub fn shutdown(&mut self) {
        if self.session.state() != SessionState::Terminated {
            self.session.terminate();
        }
        self.transport.on_channel_closed();
    }
}

/// Runs the device process against the control process listening on
/// `socket`. Returns when the control process goes away.
pub fn run(socket: &Path, config: &Config) -> Result<()> {
    info!("Device process connecting to {}", socket.display());
    let stream = UnixStream::connect(socket)
        .with_context(|| format!("Failed to connect to control socket {}", socket.display()))?;
    let (link, reader) = SocketLink::from_stream(stream).context("Failed to split control socket")?;

    let mut app = DeviceApp::new(&config.channel);
    app.attach(Box::new(link));
    let events = app
        .initialize(ConfiguredDisplay::from_config(&config.device))
        .context("Native display unavailable")?;

    let (task_tx, task_rx) = mpsc::channel();
    spawn_native_loop(events, task_tx.clone())?;
    let reader_handle = spawn_reader(reader, task_tx)?;

    let result = drive(&mut app, task_rx);
    app.shutdown();

    // The native loop may be parked in a blocking read; only the socket
    // reader is joined.
    if let Err(e) = reader_handle.join() {
        error!("device-io thread panicked: {:?}", e);
    }
    info!("Device process exiting");
    result
}

fn drive(app: &mut DeviceApp, tasks: Receiver<DeviceTask>) -> Result<()> {
    for task in tasks {
        if app
            .handle_task(task)
            .context("Device application loop failed")?
            .is_break()
        {
            return Ok(());
        }
    }
    warn!("Device task channel closed unexpectedly");
    Ok(())
}

fn spawn_native_loop(
    mut events: Box<dyn NativeEventSource>,
    tx: Sender<DeviceTask>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("native-loop".to_string())
        .spawn(move || loop {
            let task = match events.dispatch() {
                Ok(batch) if batch.is_empty() => continue,
                Ok(batch) => DeviceTask::Native(batch),
                Err(e) => DeviceTask::NativeFailed(e),
            };
            let failed = matches!(task, DeviceTask::NativeFailed(_));
            if tx.send(task).is_err() || failed {
                debug!("native-loop thread exiting");
                break;
            }
        })
        .context("Failed to spawn native-loop thread")
}

fn spawn_reader(
    mut reader: FrameReader<UnixStream>,
    tx: Sender<DeviceTask>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("device-io".to_string())
        .spawn(move || loop {
            let task = match reader.read_frame() {
                Ok(Some(frame)) => DeviceTask::Frame(frame),
                Ok(None) => DeviceTask::PeerClosed("socket closed".to_string()),
                Err(BridgeError::Codec(e)) => {
                    warn!("device-io: protocol violation: undecodable frame: {}", e);
                    continue;
                }
                Err(e) => DeviceTask::PeerClosed(e.to_string()),
            };
            let closed = matches!(task, DeviceTask::PeerClosed(_));
            if tx.send(task).is_err() || closed {
                debug!("device-io thread exiting");
                break;
            }
        })
        .context("Failed to spawn device-io thread")
}
