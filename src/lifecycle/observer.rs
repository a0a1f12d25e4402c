// src/lifecycle/observer.rs
//! Process lifecycle observer.
//!
//! `NotStarted -> Starting -> Connected -> Disconnected -> Starting ...`
//!
//! Each launch opens a new epoch with a fresh routing id. Loss reports are
//! keyed by epoch, so the reader and the process watcher may both report
//! the same loss and only the first one counts. The window registry is
//! never touched here; windows outlive the device process.

use crate::channel::ChannelTransport;
use crate::config::LifecycleConfig;
use crate::error::BridgeError;
use crate::lifecycle::launcher::DeviceLauncher;
use crate::protocol::RoutingId;
use log::*;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Starting,
    Connected,
    Disconnected,
}

/// Transitions reported to higher layers. None of them is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleNotice {
    Connected { epoch: u64, routing_id: RoutingId },
    /// The device went away; already-delivered window state is not replayed.
    ChannelReset { epoch: u64 },
    /// Respawning stopped; the observer stays `Disconnected`.
    GaveUp { attempts: u32 },
}

pub struct ProcessLifecycleObserver<L: DeviceLauncher> {
    launcher: L,
    config: LifecycleConfig,
    state: LifecycleState,
    epoch: u64,
    next_routing_id: u64,
    awaiting: Option<RoutingId>,
    handshake_deadline: Option<Instant>,
    /// Respawns since the last successful handshake.
    respawns: u32,
    notices: VecDeque<LifecycleNotice>,
}

impl<L: DeviceLauncher> ProcessLifecycleObserver<L> {
    pub fn new(launcher: L, config: &LifecycleConfig) -> Self {
        Self {
            launcher,
            config: config.clone(),
            state: LifecycleState::NotStarted,
            epoch: 0,
            next_routing_id: config.first_routing_id,
            awaiting: None,
            handshake_deadline: None,
            respawns: 0,
            notices: VecDeque::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Current epoch; 0 before the first launch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn respawns(&self) -> u32 {
        self.respawns
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn launcher_mut(&mut self) -> &mut L {
        &mut self.launcher
    }

    pub fn handshake_deadline(&self) -> Option<Instant> {
        self.handshake_deadline
    }

    pub fn take_notices(&mut self) -> Vec<LifecycleNotice> {
        self.notices.drain(..).collect()
    }

    /// Launches the first device. A device that cannot be launched at all
    /// is reported as an error and not retried.
    pub fn start(&mut self, transport: &mut ChannelTransport) -> Result<(), BridgeError> {
        if self.state != LifecycleState::NotStarted {
            debug!("Lifecycle: start() in state {:?}, ignoring", self.state);
            return Ok(());
        }
        self.launch(transport)
    }

    fn launch(&mut self, transport: &mut ChannelTransport) -> Result<(), BridgeError> {
        self.epoch += 1;
        let epoch = self.epoch;
        let routing_id = RoutingId(self.next_routing_id);
        self.next_routing_id += 1;
        self.state = LifecycleState::Starting;

        let requested = self.launcher.launch(epoch).and_then(|link| {
            transport.attach(link);
            transport.request_establish(routing_id)
        });
        if let Err(e) = requested {
            error!("Lifecycle: launching device for epoch {} failed: {}", epoch, e);
            self.launcher.discard(epoch);
            transport.on_channel_closed();
            self.state = LifecycleState::Disconnected;
            self.notices.push_back(LifecycleNotice::GaveUp {
                attempts: self.respawns,
            });
            return Err(e);
        }

        info!(
            "Lifecycle: epoch {} starting, awaiting handshake on {}",
            epoch, routing_id
        );
        self.awaiting = Some(routing_id);
        self.handshake_deadline =
            Some(Instant::now() + Duration::from_millis(self.config.handshake_timeout_ms));
        Ok(())
    }

    /// The device confirmed the handshake: establish and drain.
    pub fn on_handshake(&mut self, routing_id: RoutingId, transport: &mut ChannelTransport) {
        if self.state != LifecycleState::Starting || self.awaiting != Some(routing_id) {
            warn!(
                "Lifecycle: unexpected handshake for {} in state {:?} (awaiting {:?})",
                routing_id, self.state, self.awaiting
            );
            return;
        }
        if let Err(e) = transport.establish_channel(routing_id) {
            // The link is closed; the reader reports the loss for this epoch.
            warn!("Lifecycle: establishing {} failed: {}", routing_id, e);
            return;
        }
        self.state = LifecycleState::Connected;
        self.awaiting = None;
        self.handshake_deadline = None;
        self.respawns = 0;
        info!("Lifecycle: epoch {} connected on {}", self.epoch, routing_id);
        self.notices.push_back(LifecycleNotice::Connected {
            epoch: self.epoch,
            routing_id,
        });
    }

    /// The device for `epoch` stopped or crashed. Reports for other epochs
    /// and repeated reports are ignored.
    pub fn on_device_lost(
        &mut self,
        epoch: u64,
        reason: &str,
        transport: &mut ChannelTransport,
    ) -> Result<(), BridgeError> {
        let live = matches!(
            self.state,
            LifecycleState::Starting | LifecycleState::Connected
        );
        if epoch != self.epoch || !live {
            debug!(
                "Lifecycle: ignoring loss report for epoch {} (current {}, {:?}): {}",
                epoch, self.epoch, self.state, reason
            );
            return Ok(());
        }

        warn!("Lifecycle: device for epoch {} lost: {}", epoch, reason);
        transport.on_channel_closed();
        self.launcher.discard(epoch);
        self.state = LifecycleState::Disconnected;
        self.awaiting = None;
        self.handshake_deadline = None;
        self.notices
            .push_back(LifecycleNotice::ChannelReset { epoch });

        if !self.config.respawn {
            info!("Lifecycle: respawn disabled, staying disconnected");
            self.notices.push_back(LifecycleNotice::GaveUp { attempts: 0 });
            return Ok(());
        }
        if let Some(max) = self.config.max_respawns {
            if self.respawns >= max {
                error!("Lifecycle: giving up after {} respawn(s)", self.respawns);
                self.notices.push_back(LifecycleNotice::GaveUp {
                    attempts: self.respawns,
                });
                return Ok(());
            }
        }
        self.respawns += 1;
        self.launch(transport)
    }

    /// Treats an overdue handshake as a loss of the current epoch.
    pub fn poll_deadline(
        &mut self,
        now: Instant,
        transport: &mut ChannelTransport,
    ) -> Result<(), BridgeError> {
        match self.handshake_deadline {
            Some(deadline) if now >= deadline && self.state == LifecycleState::Starting => {
                let epoch = self.epoch;
                self.on_device_lost(epoch, "handshake timed out", transport)
            }
            _ => Ok(()),
        }
    }

    /// Closes the channel and stops the device. Later loss reports are
    /// ignored.
    pub fn shutdown(&mut self, transport: &mut ChannelTransport) {
        info!("Lifecycle: shutting down (epoch {})", self.epoch);
        transport.on_channel_closed();
        self.launcher.terminate();
        self.state = LifecycleState::Disconnected;
        self.awaiting = None;
        self.handshake_deadline = None;
    }
}
