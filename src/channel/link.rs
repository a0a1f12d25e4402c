// src/channel/link.rs
//! Point-to-point pipes carrying frames for one connection epoch.
//!
//! A link only moves frames. Ordering, deferral and routing live in
//! `ChannelTransport`; a new link is attached for every epoch.

use crate::error::BridgeError;
use crate::protocol::{Frame, FrameReader, FrameWriter};
use log::debug;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{self, Receiver, Sender};

/// A failed transmission hands the frame back so the caller can requeue it.
#[derive(Debug)]
pub struct SendFailure {
    pub frame: Frame,
    pub error: BridgeError,
}

/// Outbound half of a connection epoch.
pub trait Link: Send {
    /// Transmits one frame. An error means the frame was not delivered.
    fn send(&mut self, frame: Frame) -> Result<(), SendFailure>;

    /// Tears the pipe down. Further sends fail.
    fn close(&mut self);
}

/// Unix-domain socket link using newline-delimited JSON frames.
pub struct SocketLink {
    writer: FrameWriter<UnixStream>,
    stream: UnixStream,
}

impl SocketLink {
    /// Splits a connected stream into the outbound link and a blocking
    /// reader for the inbound direction.
    pub fn from_stream(stream: UnixStream) -> Result<(Self, FrameReader<UnixStream>), BridgeError> {
        let write_half = stream.try_clone()?;
        let read_half = stream.try_clone()?;
        Ok((
            Self {
                writer: FrameWriter::new(write_half),
                stream,
            },
            FrameReader::new(read_half),
        ))
    }
}

impl Link for SocketLink {
    fn send(&mut self, frame: Frame) -> Result<(), SendFailure> {
        match self.writer.write_frame(&frame) {
            Ok(()) => Ok(()),
            Err(error) => Err(SendFailure { frame, error }),
        }
    }

    fn close(&mut self) {
        // Unblocks the reader thread on the same stream.
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("SocketLink: shutdown failed (already closed?): {}", e);
        }
    }
}

/// In-process link over `std::sync::mpsc`.
pub struct MemoryLink {
    tx: Option<Sender<Frame>>,
}

impl MemoryLink {
    /// Creates a link and the receiver observing everything it transmits.
    pub fn new() -> (Self, Receiver<Frame>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Some(tx) }, rx)
    }
}

impl Link for MemoryLink {
    fn send(&mut self, frame: Frame) -> Result<(), SendFailure> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(SendFailure {
                frame,
                error: BridgeError::PeerLost("memory link closed".to_string()),
            });
        };
        tx.send(frame).map_err(|returned| SendFailure {
            frame: returned.0,
            error: BridgeError::PeerLost("memory link receiver dropped".to_string()),
        })
    }

    fn close(&mut self) {
        self.tx = None;
    }
}
