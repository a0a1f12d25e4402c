// src/host/mod.rs
//! Control-side host: the UI loop.
//!
//! `ControlContext` owns the window manager (and through it the channel
//! transport) plus the lifecycle observer. It runs on the caller's thread
//! and is fed by an `mpsc::Receiver<UiTask>`; the per-epoch reader and
//! watcher threads only post tasks.

use crate::channel::{ChannelTransport, Delivery};
use crate::config::{Config, LifecycleConfig};
use crate::control::WindowManager;
use crate::error::BridgeError;
use crate::lifecycle::{DeviceLauncher, DeviceSignal, LifecycleNotice, ProcessLifecycleObserver};
use crate::protocol::{ControlCommand, Frame, Payload, WidgetState, WindowHandle};
use anyhow::{anyhow, Context, Result};
use log::*;
use std::collections::HashSet;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Work for the UI loop.
#[derive(Debug)]
pub enum UiTask {
    Device(DeviceSignal),
    /// Posted by delegates that accept a close request.
    CloseWindow(WindowHandle),
    Shutdown,
}

impl From<DeviceSignal> for UiTask {
    fn from(signal: DeviceSignal) -> Self {
        UiTask::Device(signal)
    }
}

/// Status of the UI loop after handling one task.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HostStatus {
    Running,
    Shutdown,
}

pub struct ControlContext<L: DeviceLauncher> {
    windows: WindowManager<ChannelTransport>,
    lifecycle: ProcessLifecycleObserver<L>,
    config: LifecycleConfig,
    gave_up: bool,
}

impl<L: DeviceLauncher> ControlContext<L> {
    pub fn new(launcher: L, config: &Config) -> Self {
        Self {
            windows: WindowManager::new(ChannelTransport::new("control", &config.channel)),
            lifecycle: ProcessLifecycleObserver::new(launcher, &config.lifecycle),
            config: config.lifecycle.clone(),
            gave_up: false,
        }
    }

    pub fn windows(&self) -> &WindowManager<ChannelTransport> {
        &self.windows
    }

    pub fn windows_mut(&mut self) -> &mut WindowManager<ChannelTransport> {
        &mut self.windows
    }

    pub fn lifecycle(&self) -> &ProcessLifecycleObserver<L> {
        &self.lifecycle
    }

    /// Whether the observer stopped respawning the device.
    pub fn gave_up(&self) -> bool {
        self.gave_up
    }

    /// Launches the first device process.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        let started = self.lifecycle.start(self.windows.sink_mut());
        self.process_notices()?;
        started
    }

    pub fn handle_task(&mut self, task: UiTask) -> Result<HostStatus, BridgeError> {
        match task {
            UiTask::Device(DeviceSignal::Frame { epoch, frame }) => {
                if epoch != self.lifecycle.epoch() {
                    debug!(
                        "ControlContext: dropping frame from stale epoch {} (current {})",
                        epoch,
                        self.lifecycle.epoch()
                    );
                    return Ok(HostStatus::Running);
                }
                self.handle_frame(frame);
            }
            UiTask::Device(DeviceSignal::Lost { epoch, reason }) => {
                let relaunched = self
                    .lifecycle
                    .on_device_lost(epoch, &reason, self.windows.sink_mut());
                if let Err(e) = relaunched {
                    error!("ControlContext: respawning the device failed: {}", e);
                }
            }
            UiTask::CloseWindow(handle) => {
                if let Err(e) = self.windows.close_window(handle) {
                    warn!("ControlContext: closing {} failed: {}", handle, e);
                }
            }
            UiTask::Shutdown => {
                info!("ControlContext: shutdown requested");
                return Ok(HostStatus::Shutdown);
            }
        }
        self.process_notices()?;
        Ok(HostStatus::Running)
    }

    fn handle_frame(&mut self, frame: Frame) {
        match self.windows.sink_mut().on_message_received(frame) {
            Delivery::EstablishConfirmed(routing_id) => {
                self.lifecycle
                    .on_handshake(routing_id, self.windows.sink_mut());
            }
            Delivery::Event(event) => {
                let outcome = self.windows.dispatch(event);
                trace!("ControlContext: dispatch outcome {:?}", outcome);
            }
            Delivery::EstablishRequested(routing_id) => {
                warn!(
                    "ControlContext: protocol violation: device requested establishment on {}",
                    routing_id
                );
            }
            Delivery::Command(command) => {
                warn!(
                    "ControlContext: protocol violation: command from device: {:?}",
                    command
                );
            }
            Delivery::Dropped => {}
        }
    }

    fn process_notices(&mut self) -> Result<(), BridgeError> {
        for notice in self.lifecycle.take_notices() {
            match notice {
                LifecycleNotice::Connected { epoch, routing_id } => {
                    info!("ControlContext: device epoch {} online on {}", epoch, routing_id);
                }
                LifecycleNotice::ChannelReset { epoch } => {
                    let queued = queued_destroys(self.windows.sink());
                    self.windows
                        .on_channel_reset(|handle| queued.contains(&handle));
                    if self.config.replay_on_reset {
                        let count = self.windows.reissue_widgets()?;
                        info!(
                            "ControlContext: re-issued {} window(s) after reset of epoch {}",
                            count, epoch
                        );
                    } else {
                        info!(
                            "ControlContext: channel reset (epoch {}), windows are not replayed",
                            epoch
                        );
                    }
                }
                LifecycleNotice::GaveUp { attempts } => {
                    error!(
                        "ControlContext: device gave up after {} respawn(s); commands keep queueing",
                        attempts
                    );
                    self.gave_up = true;
                }
            }
        }
        Ok(())
    }

    /// Runs the UI loop until `Shutdown` or until every sender is gone.
    pub fn run(&mut self, tasks: &Receiver<UiTask>) -> Result<()> {
        loop {
            let received = match self.lifecycle.handshake_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    tasks.recv_timeout(wait)
                }
                None => tasks.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(task) => {
                    let status = self.handle_task(task).context("UI task failed")?;
                    if status == HostStatus::Shutdown {
                        return Ok(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.poll_deadline()?;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    info!("ControlContext: task channel closed, leaving UI loop");
                    return Ok(());
                }
            }
        }
    }

    /// Handles tasks until the device reports its output size. Window
    /// creation before this point is allowed but nothing can be placed.
    pub fn wait_for_output_size(
        &mut self,
        tasks: &Receiver<UiTask>,
        timeout: Duration,
    ) -> Result<(u32, u32)> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(size) = self.windows.output_size() {
                return Ok(size);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(anyhow!("No output size reported within {:?}", timeout));
            }
            let mut wait = deadline - now;
            if let Some(handshake) = self.lifecycle.handshake_deadline() {
                wait = wait.min(handshake.saturating_duration_since(now));
            }
            match tasks.recv_timeout(wait) {
                Ok(task) => {
                    if self.handle_task(task).context("UI task failed")? == HostStatus::Shutdown {
                        return Err(anyhow!("Shutdown requested before startup completed"));
                    }
                }
                Err(RecvTimeoutError::Timeout) => self.poll_deadline()?,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("Task channel closed before startup completed"));
                }
            }
        }
    }

    fn poll_deadline(&mut self) -> Result<()> {
        let polled = self
            .lifecycle
            .poll_deadline(Instant::now(), self.windows.sink_mut());
        if let Err(e) = polled {
            error!("ControlContext: respawning the device failed: {}", e);
        }
        self.process_notices().context("Handling lifecycle notices")
    }

    /// Stops the reader and the device, then drops the window state.
    pub fn shutdown(mut self) {
        info!(
            "ControlContext: shutting down with {} open window(s)",
            self.windows.registry().len()
        );
        self.lifecycle.shutdown(self.windows.sink_mut());
    }
}

/// Handles whose `Destroyed` has not left the deferred queue yet.
fn queued_destroys(transport: &ChannelTransport) -> HashSet<WindowHandle> {
    transport
        .deferred()
        .iter()
        .filter_map(|message| match &message.payload {
            Payload::Command(ControlCommand::SetWidgetState {
                handle,
                state: WidgetState::Destroyed,
                ..
            }) => Some(*handle),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests;
