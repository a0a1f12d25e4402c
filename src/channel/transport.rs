// src/channel/transport.rs
//! Ordered, epoch-aware channel on top of a `Link`.
//!
//! ## Ordering
//! - While `Unconnected`, every send lands in the deferred queue with an
//!   unresolved destination.
//! - `establish_channel` flips to `Connected(routing_id)` and drains the queue
//!   before returning, so deferred messages always precede messages sent
//!   after establishment.
//! - Nothing is retransmitted across epochs. A message whose transmission
//!   failed was never delivered, so it goes back to the queue.

use crate::channel::deferred::{DeferredMessage, DeferredQueue};
use crate::channel::link::{Link, SendFailure};
use crate::config::ChannelConfig;
use crate::error::BridgeError;
use crate::protocol::{
    ControlCommand, Destination, Envelope, Frame, InputEvent, Payload, RoutingId,
};
use log::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unconnected,
    Connected(RoutingId),
}

/// What the receive path found in an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// The control process asks to bind a new epoch (seen by the device).
    EstablishRequested(RoutingId),
    /// The device confirmed the binding (seen by the control process).
    EstablishConfirmed(RoutingId),
    /// Destined for the device session.
    Command(ControlCommand),
    /// Destined for the window manager.
    Event(InputEvent),
    /// Arrived outside the current epoch and was discarded.
    Dropped,
}

/// Sender side used by the window manager.
pub trait CommandSink {
    fn send_command(&mut self, command: ControlCommand) -> Result<(), BridgeError>;
}

/// Sender side used by the device session. Must never block.
pub trait EventSink {
    fn post_event(&mut self, event: InputEvent) -> Result<(), BridgeError>;
}

pub struct ChannelTransport {
    side: &'static str,
    state: ChannelState,
    link: Option<Box<dyn Link>>,
    deferred: DeferredQueue,
    transmitted: u64,
}

impl ChannelTransport {
    /// `side` labels log lines ("control" or "device").
    pub fn new(side: &'static str, config: &ChannelConfig) -> Self {
        Self {
            side,
            state: ChannelState::Unconnected,
            link: None,
            deferred: DeferredQueue::new(config),
            transmitted: 0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ChannelState::Connected(_))
    }

    pub fn routing_id(&self) -> Option<RoutingId> {
        match self.state {
            ChannelState::Connected(id) => Some(id),
            ChannelState::Unconnected => None,
        }
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    pub fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    /// Messages successfully handed to a link, across all epochs.
    pub fn transmitted(&self) -> u64 {
        self.transmitted
    }

    /// Installs the link for a new epoch. Any previous link is closed and
    /// the channel stays `Unconnected` until `establish_channel`.
    pub fn attach(&mut self, link: Box<dyn Link>) {
        if let Some(mut old) = self.link.take() {
            debug!("ChannelTransport[{}]: replacing existing link", self.side);
            old.close();
        }
        if self.is_connected() {
            warn!(
                "ChannelTransport[{}]: link attached while connected, starting a new epoch",
                self.side
            );
            self.state = ChannelState::Unconnected;
        }
        self.link = Some(link);
    }

    /// Control side: sends the handshake request for `routing_id`.
    pub fn request_establish(&mut self, routing_id: RoutingId) -> Result<(), BridgeError> {
        let link = self.link.as_mut().ok_or(BridgeError::NotAttached)?;
        debug!(
            "ChannelTransport[{}]: requesting establishment on {}",
            self.side, routing_id
        );
        link.send(Frame::Establish { routing_id })
            .map_err(|failure| failure.error)
    }

    /// Device side: confirms the handshake and establishes the channel.
    pub fn confirm_establish(&mut self, routing_id: RoutingId) -> Result<(), BridgeError> {
        let link = self.link.as_mut().ok_or(BridgeError::NotAttached)?;
        link.send(Frame::Established { routing_id })
            .map_err(|failure| failure.error)?;
        self.establish_channel(routing_id)
    }

    /// Transitions to `Connected(routing_id)` and drains deferred messages
    /// in enqueue order. No-op when already connected.
    pub fn establish_channel(&mut self, routing_id: RoutingId) -> Result<(), BridgeError> {
        if let ChannelState::Connected(current) = self.state {
            debug!(
                "ChannelTransport[{}]: already connected on {}, ignoring establish({})",
                self.side, current, routing_id
            );
            return Ok(());
        }
        if self.link.is_none() {
            return Err(BridgeError::NotAttached);
        }

        self.state = ChannelState::Connected(routing_id);
        info!(
            "ChannelTransport[{}]: established on {}, draining {} deferred message(s)",
            self.side,
            routing_id,
            self.deferred.len()
        );

        while let Some(message) = self.deferred.pop_front() {
            let envelope = Envelope {
                destination: message.destination.resolve(routing_id),
                payload: message.payload,
            };
            if let Err(failure) = self.transmit(envelope) {
                // Back to the head, with its placeholder, for the next epoch.
                if let Frame::Message(envelope) = failure.frame {
                    self.deferred.push_front(DeferredMessage {
                        destination: Destination::Unresolved,
                        payload: envelope.payload,
                    });
                }
                self.on_channel_closed();
                return Err(BridgeError::PeerLost(format!(
                    "link failed while draining deferred messages: {}",
                    failure.error
                )));
            }
        }
        Ok(())
    }

    /// Transmits now if connected, otherwise defers. Never drops silently.
    pub fn send(&mut self, payload: Payload) -> Result<(), BridgeError> {
        match self.state {
            ChannelState::Connected(routing_id) => {
                let envelope = Envelope {
                    destination: Destination::Route(routing_id),
                    payload,
                };
                let Err(failure) = self.transmit(envelope) else {
                    return Ok(());
                };
                warn!(
                    "ChannelTransport[{}]: send on {} failed ({}), treating channel as closed",
                    self.side, routing_id, failure.error
                );
                self.on_channel_closed();
                match failure.frame {
                    Frame::Message(envelope) => self.deferred.enqueue(DeferredMessage {
                        destination: Destination::Unresolved,
                        payload: envelope.payload,
                    }),
                    _ => Ok(()),
                }
            }
            ChannelState::Unconnected => {
                trace!(
                    "ChannelTransport[{}]: deferring {:?} ({} queued)",
                    self.side,
                    payload,
                    self.deferred.len()
                );
                self.deferred.enqueue(DeferredMessage {
                    destination: Destination::Unresolved,
                    payload,
                })
            }
        }
    }

    /// Demultiplexes one inbound frame by message category.
    pub fn on_message_received(&mut self, frame: Frame) -> Delivery {
        match frame {
            Frame::Establish { routing_id } => Delivery::EstablishRequested(routing_id),
            Frame::Established { routing_id } => Delivery::EstablishConfirmed(routing_id),
            Frame::Message(envelope) => {
                let current = match self.state {
                    ChannelState::Connected(id) => id,
                    ChannelState::Unconnected => {
                        debug!(
                            "ChannelTransport[{}]: dropping message received before establishment",
                            self.side
                        );
                        return Delivery::Dropped;
                    }
                };
                if envelope.destination != Destination::Route(current) {
                    debug!(
                        "ChannelTransport[{}]: dropping stale message for {:?} (current {})",
                        self.side, envelope.destination, current
                    );
                    return Delivery::Dropped;
                }
                match envelope.payload {
                    Payload::Command(command) => Delivery::Command(command),
                    Payload::Event(event) => Delivery::Event(event),
                }
            }
        }
    }

    /// Ends the current epoch. Later sends queue again.
    pub fn on_channel_closed(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        if let ChannelState::Connected(id) = self.state {
            info!("ChannelTransport[{}]: channel {} closed", self.side, id);
        }
        self.state = ChannelState::Unconnected;
    }

    fn transmit(&mut self, envelope: Envelope) -> Result<(), SendFailure> {
        let frame = Frame::Message(envelope);
        let Some(link) = self.link.as_mut() else {
            return Err(SendFailure {
                frame,
                error: BridgeError::NotAttached,
            });
        };
        link.send(frame)?;
        self.transmitted += 1;
        Ok(())
    }
}

impl CommandSink for ChannelTransport {
    fn send_command(&mut self, command: ControlCommand) -> Result<(), BridgeError> {
        self.send(Payload::Command(command))
    }
}

impl EventSink for ChannelTransport {
    fn post_event(&mut self, event: InputEvent) -> Result<(), BridgeError> {
        self.send(Payload::Event(event))
    }
}
