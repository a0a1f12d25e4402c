// src/channel/mod.rs
//! Channel transport between the control and device processes.
//!
//! - link: raw per-epoch pipes (Unix socket, in-memory)
//! - deferred: FIFO for messages produced before establishment
//! - transport: state machine, ordering guarantees and receive demux

pub mod deferred;
pub mod link;
pub mod transport;

pub use deferred::{DeferredMessage, DeferredQueue};
pub use link::{Link, MemoryLink, SendFailure, SocketLink};
pub use transport::{ChannelState, ChannelTransport, CommandSink, Delivery, EventSink};

#[cfg(test)]
mod tests;
