// src/lifecycle/launcher.rs
//! Starting and stopping the device process.
//!
//! Each launch is one connection epoch. The launcher owns everything bound
//! to that epoch (socket, reader thread, process handle) and throws it away
//! on `discard`; nothing is reused across epochs.

use crate::channel::{Link, SocketLink};
use crate::error::BridgeError;
use crate::protocol::{Frame, FrameReader};
use log::*;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::ErrorKind;
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Poll interval while waiting for the child to connect.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Reported by per-epoch threads to whoever runs the UI loop.
#[derive(Debug)]
pub enum DeviceSignal {
    Frame { epoch: u64, frame: Frame },
    /// EOF, read failure or process exit. May be reported more than once
    /// per epoch.
    Lost { epoch: u64, reason: String },
}

pub trait DeviceLauncher {
    /// Starts a device for `epoch` and returns the outbound link once the
    /// device is connected. Inbound frames arrive out of band.
    fn launch(&mut self, epoch: u64) -> Result<Box<dyn Link>, BridgeError>;

    /// Drops the handler bound to `epoch`. Must be recreated, never reused.
    fn discard(&mut self, epoch: u64);

    /// Stops the current device for good.
    fn terminate(&mut self);
}

struct LaunchedDevice {
    epoch: u64,
    pid: Pid,
    exited: Arc<AtomicBool>,
    stream: UnixStream,
    reader: Option<JoinHandle<()>>,
}

/// Runs the device as a child process of this executable (or
/// `device_program`) connected over a per-epoch Unix socket.
pub struct ChildProcessLauncher<T> {
    program: PathBuf,
    socket_dir: PathBuf,
    accept_timeout: Duration,
    signals: Sender<T>,
    current: Option<LaunchedDevice>,
}

impl<T: From<DeviceSignal> + Send + 'static> ChildProcessLauncher<T> {
    pub fn new(
        program: PathBuf,
        socket_dir: PathBuf,
        accept_timeout: Duration,
        signals: Sender<T>,
    ) -> Self {
        Self {
            program,
            socket_dir,
            accept_timeout,
            signals,
            current: None,
        }
    }

    pub fn socket_path(&self, epoch: u64) -> PathBuf {
        self.socket_dir.join(format!(
            "window-bridge-{}-{}.sock",
            std::process::id(),
            epoch
        ))
    }

    fn accept(
        &self,
        listener: &UnixListener,
        child: &mut Child,
    ) -> Result<UnixStream, BridgeError> {
        let deadline = Instant::now() + self.accept_timeout;
        loop {
            match listener.accept() {
                Ok((stream, _)) => return Ok(stream),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if let Some(status) = child.try_wait()? {
                        return Err(BridgeError::PeerLost(format!(
                            "device exited before connecting ({})",
                            status
                        )));
                    }
                    if Instant::now() >= deadline {
                        return Err(BridgeError::PeerLost(format!(
                            "device did not connect within {:?}",
                            self.accept_timeout
                        )));
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<T: From<DeviceSignal> + Send + 'static> DeviceLauncher for ChildProcessLauncher<T> {
    fn launch(&mut self, epoch: u64) -> Result<Box<dyn Link>, BridgeError> {
        let socket_path = self.socket_path(epoch);
        remove_socket(&socket_path);
        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;

        info!(
            "Launching device process {} for epoch {}",
            self.program.display(),
            epoch
        );
        let spawned = Command::new(&self.program)
            .arg("device")
            .arg("--socket")
            .arg(&socket_path)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                remove_socket(&socket_path);
                return Err(e.into());
            }
        };
        let pid = Pid::from_raw(child.id() as i32);

        let accepted = self.accept(&listener, &mut child);
        drop(listener);
        remove_socket(&socket_path);
        let stream = match accepted {
            Ok(stream) => stream,
            Err(e) => {
                stop_child(pid, &mut child);
                return Err(e);
            }
        };
        stream.set_nonblocking(false)?;
        let (link, reader) = SocketLink::from_stream(stream.try_clone()?)?;

        let exited = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(epoch, reader, self.signals.clone())?;
        spawn_watcher(epoch, child, exited.clone(), self.signals.clone())?;
        debug!("Device for epoch {} connected (pid {})", epoch, pid);

        self.current = Some(LaunchedDevice {
            epoch,
            pid,
            exited,
            stream,
            reader: Some(reader),
        });
        Ok(Box::new(link))
    }

    fn discard(&mut self, epoch: u64) {
        if self.current.as_ref().map(|d| d.epoch) != Some(epoch) {
            return;
        }
        let Some(mut device) = self.current.take() else {
            return;
        };
        debug!("Discarding device handler for epoch {}", epoch);
        if let Err(e) = device.stream.shutdown(Shutdown::Both) {
            trace!("Device socket already closed: {}", e);
        }
        if !device.exited.load(Ordering::SeqCst) {
            if let Err(e) = kill(device.pid, Signal::SIGTERM) {
                debug!("SIGTERM to device {} failed: {}", device.pid, e);
            }
        }
        if let Some(reader) = device.reader.take() {
            if let Err(e) = reader.join() {
                error!("control-io thread for epoch {} panicked: {:?}", epoch, e);
            }
        }
    }

    fn terminate(&mut self) {
        if let Some(epoch) = self.current.as_ref().map(|d| d.epoch) {
            info!("Terminating device process for epoch {}", epoch);
            self.discard(epoch);
        }
    }
}

impl<T> Drop for ChildProcessLauncher<T> {
    fn drop(&mut self) {
        if let Some(device) = self.current.take() {
            debug!("ChildProcessLauncher dropped with a live device");
            let _ = device.stream.shutdown(Shutdown::Both);
            if !device.exited.load(Ordering::SeqCst) {
                let _ = kill(device.pid, Signal::SIGTERM);
            }
        }
    }
}

fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove socket {}: {}", path.display(), e);
        }
    }
}

/// SIGTERM, then reap.
fn stop_child(pid: Pid, child: &mut Child) {
    if let Err(e) = kill(pid, Signal::SIGTERM) {
        debug!("SIGTERM to {} failed: {}", pid, e);
    }
    if let Err(e) = child.wait() {
        warn!("Failed to reap device process {}: {}", pid, e);
    }
}

fn spawn_reader<T: From<DeviceSignal> + Send + 'static>(
    epoch: u64,
    mut reader: FrameReader<UnixStream>,
    signals: Sender<T>,
) -> Result<JoinHandle<()>, BridgeError> {
    let handle = thread::Builder::new()
        .name(format!("control-io-{}", epoch))
        .spawn(move || loop {
            let signal = match reader.read_frame() {
                Ok(Some(frame)) => DeviceSignal::Frame { epoch, frame },
                Ok(None) => DeviceSignal::Lost {
                    epoch,
                    reason: "socket closed".to_string(),
                },
                Err(BridgeError::Codec(e)) => {
                    warn!("control-io: protocol violation: undecodable frame: {}", e);
                    continue;
                }
                Err(e) => DeviceSignal::Lost {
                    epoch,
                    reason: e.to_string(),
                },
            };
            let lost = matches!(signal, DeviceSignal::Lost { .. });
            if signals.send(T::from(signal)).is_err() || lost {
                debug!("control-io thread for epoch {} exiting", epoch);
                break;
            }
        })?;
    Ok(handle)
}

fn spawn_watcher<T: From<DeviceSignal> + Send + 'static>(
    epoch: u64,
    mut child: Child,
    exited: Arc<AtomicBool>,
    signals: Sender<T>,
) -> Result<JoinHandle<()>, BridgeError> {
    let handle = thread::Builder::new()
        .name(format!("device-watch-{}", epoch))
        .spawn(move || {
            let reason = match child.wait() {
                Ok(status) => format!("device process exited ({})", status),
                Err(e) => format!("waiting for device process failed: {}", e),
            };
            exited.store(true, Ordering::SeqCst);
            info!("Epoch {}: {}", epoch, reason);
            let _ = signals.send(T::from(DeviceSignal::Lost { epoch, reason }));
        })?;
    Ok(handle)
}
