// src/error.rs
//! Error taxonomy shared by every component of the bridge.
//!
//! There is no transport-not-ready error: a send before establishment is
//! queued, never reported. Protocol violations are logged and dropped at the
//! dispatch boundary. Peer loss is handled by the lifecycle observer.
//! Hardware unavailability is fatal for the device session.

use crate::protocol::WindowHandle;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// A message or call referenced state the receiver does not know about.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The other process went away (EOF, broken pipe, exit).
    #[error("peer lost: {0}")]
    PeerLost(String),

    /// The native display connection could not be opened or was lost.
    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// An operation that needs a link was attempted before one was attached.
    #[error("channel has no link attached")]
    NotAttached,

    /// The handle is open, or closed but not yet acknowledged by the device.
    #[error("window handle {0} is still in use")]
    HandleInUse(WindowHandle),

    /// The deferred queue is capped and configured to reject new messages.
    #[error("deferred queue is full ({limit} messages)")]
    QueueFull { limit: usize },

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn unknown_handle(handle: WindowHandle) -> Self {
        BridgeError::ProtocolViolation(format!("unknown window handle {}", handle))
    }

    /// Whether the error is recoverable by dropping the offending message.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, BridgeError::ProtocolViolation(_))
    }
}
