// src/protocol/codec.rs
//! Newline-delimited JSON framing.
//!
//! One `Frame` per line. JSON never emits a raw newline inside a value, so
//! the line boundary is the frame boundary.

use crate::error::BridgeError;
use crate::protocol::messages::Frame;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};

pub struct FrameWriter<W: Write> {
    inner: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    /// Serializes and flushes one frame.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), BridgeError> {
        serde_json::to_writer(&mut self.inner, frame)?;
        self.inner.write_all(b"\n")?;
        self.inner.flush()?;
        Ok(())
    }
}

pub struct FrameReader<R: Read> {
    inner: BufReader<R>,
    line: String,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: String::new(),
        }
    }

    /// Blocks for the next frame. `Ok(None)` means the peer closed the stream.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, BridgeError> {
        loop {
            self.line.clear();
            if self.inner.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(trimmed)?));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        ControlCommand, Destination, Envelope, Payload, RoutingId, WidgetType, WindowHandle,
    };

    #[test]
    fn it_should_read_frames_back_in_write_order() -> anyhow::Result<()> {
        let mut wire = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut wire);
            writer.write_frame(&Frame::Establish {
                routing_id: RoutingId(42),
            })?;
            writer.write_frame(&Frame::Message(Envelope {
                destination: Destination::Route(RoutingId(42)),
                payload: Payload::Command(ControlCommand::CreateWidget {
                    handle: WindowHandle(1),
                    parent: None,
                    x: 0,
                    y: 0,
                    kind: WidgetType::Toplevel,
                }),
            }))?;
        }

        let mut reader = FrameReader::new(wire.as_slice());
        assert_eq!(
            reader.read_frame()?,
            Some(Frame::Establish {
                routing_id: RoutingId(42)
            })
        );
        assert!(matches!(reader.read_frame()?, Some(Frame::Message(_))));
        assert_eq!(reader.read_frame()?, None);
        Ok(())
    }

    #[test]
    fn it_should_report_garbage_as_a_codec_error() {
        let mut reader = FrameReader::new("{not json}\n".as_bytes());
        assert!(matches!(reader.read_frame(), Err(BridgeError::Codec(_))));
    }
}
